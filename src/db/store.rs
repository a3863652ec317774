//! Storage capabilities consumed by the sync engine, and their SQLite implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::db::models::{RemoteSubscription, Subscription, User, UserSummary};
use crate::db::repository::{SubscriptionRepository, UserRepository};
use crate::error::{AppError, AppResult};

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Missing users fail with a `NotFound`-kind error.
    async fn load_user(&self, id: &str) -> AppResult<User>;
    async fn load_user_by_remote_id(&self, remote_id: &str) -> AppResult<User>;
    async fn load_user_index(&self) -> AppResult<Vec<UserSummary>>;
    /// Persist profile and settings. Never touches the subscription link or
    /// the sync bookkeeping columns.
    async fn store_user(&self, user: &User) -> AppResult<()>;
    async fn store_user_last_status(&self, id: &str, last_status: Option<&str>) -> AppResult<()>;
    async fn store_user_active_events(&self, id: &str, events: &[String]) -> AppResult<()>;
    async fn delete_user(&self, id: &str) -> AppResult<()>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn load_subscription(&self, id: &str) -> AppResult<Subscription>;
    /// Rejects subscriptions whose creator is not `user`'s remote identity.
    async fn store_user_subscription(&self, user: &User, sub: &RemoteSubscription)
        -> AppResult<()>;
    async fn delete_user_subscription(&self, user: &User, id: &str) -> AppResult<()>;
    async fn list_subscriptions(&self) -> AppResult<Vec<Subscription>>;
    async fn list_expiring_subscriptions(
        &self,
        before: DateTime<Utc>,
    ) -> AppResult<Vec<Subscription>>;
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn load_user(&self, id: &str) -> AppResult<User> {
        UserRepository::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {}", id)))
    }

    async fn load_user_by_remote_id(&self, remote_id: &str) -> AppResult<User> {
        UserRepository::find_by_remote_id(&self.pool, remote_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user with remote id {}", remote_id)))
    }

    async fn load_user_index(&self) -> AppResult<Vec<UserSummary>> {
        UserRepository::list_summaries(&self.pool).await
    }

    async fn store_user(&self, user: &User) -> AppResult<()> {
        UserRepository::upsert(&self.pool, user).await
    }

    async fn store_user_last_status(&self, id: &str, last_status: Option<&str>) -> AppResult<()> {
        UserRepository::set_last_status(&self.pool, id, last_status).await
    }

    async fn store_user_active_events(&self, id: &str, events: &[String]) -> AppResult<()> {
        UserRepository::set_active_events(&self.pool, id, events).await
    }

    async fn delete_user(&self, id: &str) -> AppResult<()> {
        UserRepository::delete(&self.pool, id).await
    }
}

#[async_trait]
impl SubscriptionStore for SqliteStore {
    async fn load_subscription(&self, id: &str) -> AppResult<Subscription> {
        SubscriptionRepository::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("subscription {}", id)))
    }

    async fn store_user_subscription(
        &self,
        user: &User,
        sub: &RemoteSubscription,
    ) -> AppResult<()> {
        SubscriptionRepository::store_for_user(&self.pool, user, sub).await
    }

    async fn delete_user_subscription(&self, user: &User, id: &str) -> AppResult<()> {
        SubscriptionRepository::delete_for_user(&self.pool, &user.id, id).await
    }

    async fn list_subscriptions(&self) -> AppResult<Vec<Subscription>> {
        SubscriptionRepository::list_all(&self.pool).await
    }

    async fn list_expiring_subscriptions(
        &self,
        before: DateTime<Utc>,
    ) -> AppResult<Vec<Subscription>> {
        SubscriptionRepository::list_expiring(&self.pool, before).await
    }
}
