use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::db::models::{RemoteSubscription, Subscription, User};
use crate::error::{AppError, AppResult};

pub struct SubscriptionRepository;

impl SubscriptionRepository {
    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Subscription>> {
        sqlx::query_as::<_, Subscription>(
            r#"
            SELECT
                id,
                user_id,
                creator_id,
                resource,
                notification_url,
                expires_at,
                created_at,
                updated_at
            FROM subscriptions
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn list_all(pool: &SqlitePool) -> AppResult<Vec<Subscription>> {
        sqlx::query_as::<_, Subscription>(
            r#"
            SELECT
                id,
                user_id,
                creator_id,
                resource,
                notification_url,
                expires_at,
                created_at,
                updated_at
            FROM subscriptions
            ORDER BY expires_at
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Subscriptions whose expiry falls before `before`, soonest first.
    pub async fn list_expiring(
        pool: &SqlitePool,
        before: DateTime<Utc>,
    ) -> AppResult<Vec<Subscription>> {
        sqlx::query_as::<_, Subscription>(
            r#"
            SELECT
                id,
                user_id,
                creator_id,
                resource,
                notification_url,
                expires_at,
                created_at,
                updated_at
            FROM subscriptions
            WHERE expires_at < ?
            ORDER BY expires_at
            "#,
        )
        .bind(before)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Persist `sub` as the user's only subscription and record its id on the user.
    ///
    /// Fails with `CreatorMismatch` before touching the database when the
    /// subscription was created for a different remote identity.
    pub async fn store_for_user(
        pool: &SqlitePool,
        user: &User,
        sub: &RemoteSubscription,
    ) -> AppResult<()> {
        if sub.creator_id != user.remote_id {
            return Err(AppError::CreatorMismatch {
                user: user.remote_id.clone(),
                creator: sub.creator_id.clone(),
            });
        }

        let now = Utc::now().naive_utc();
        let mut tx = pool.begin().await.map_err(AppError::Database)?;

        sqlx::query("DELETE FROM subscriptions WHERE user_id = ? AND id <> ?")
            .bind(&user.id)
            .bind(&sub.id)
            .execute(&mut *tx)
            .await
            .map_err(AppError::Database)?;

        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id,
                user_id,
                creator_id,
                resource,
                notification_url,
                expires_at,
                created_at,
                updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                creator_id = excluded.creator_id,
                resource = excluded.resource,
                notification_url = excluded.notification_url,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&sub.id)
        .bind(&user.id)
        .bind(&sub.creator_id)
        .bind(&sub.resource)
        .bind(&sub.notification_url)
        .bind(sub.expires_at)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(AppError::Database)?;

        sqlx::query("UPDATE users SET subscription_id = ?, updated_at = ? WHERE id = ?")
            .bind(&sub.id)
            .bind(now)
            .bind(&user.id)
            .execute(&mut *tx)
            .await
            .map_err(AppError::Database)?;

        tx.commit().await.map_err(AppError::Database)?;
        Ok(())
    }

    /// Remove the subscription row and clear it from the owning user.
    pub async fn delete_for_user(pool: &SqlitePool, user_id: &str, id: &str) -> AppResult<()> {
        let now = Utc::now().naive_utc();
        let mut tx = pool.begin().await.map_err(AppError::Database)?;

        sqlx::query("DELETE FROM subscriptions WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(AppError::Database)?;

        sqlx::query(
            "UPDATE users SET subscription_id = NULL, updated_at = ? WHERE id = ? AND subscription_id = ?",
        )
        .bind(now)
        .bind(user_id)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(AppError::Database)?;

        tx.commit().await.map_err(AppError::Database)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::UserRepository;
    use crate::db::test_pool;
    use crate::error::ErrorKind;

    fn remote(id: &str, creator: &str) -> RemoteSubscription {
        RemoteSubscription {
            id: id.to_string(),
            creator_id: creator.to_string(),
            resource: format!("users/{}/events", creator),
            notification_url: "https://example.com/webhooks/calendar".to_string(),
            expires_at: Utc::now() + chrono::Duration::hours(48),
        }
    }

    async fn seed_user(pool: &SqlitePool) -> User {
        let user = User::new("u1", "remote-1", "u1@example.com");
        UserRepository::upsert(pool, &user).await.unwrap();
        user
    }

    #[tokio::test]
    async fn creator_mismatch_is_rejected_without_writing() {
        let pool = test_pool().await;
        let user = seed_user(&pool).await;

        let err = SubscriptionRepository::store_for_user(&pool, &user, &remote("sub-1", "remote-2"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);

        assert!(SubscriptionRepository::find_by_id(&pool, "sub-1")
            .await
            .unwrap()
            .is_none());
        let reloaded = UserRepository::find_by_id(&pool, "u1").await.unwrap().unwrap();
        assert_eq!(reloaded.settings.subscription_id, None);
    }

    #[tokio::test]
    async fn store_records_id_on_user_and_replaces_previous() {
        let pool = test_pool().await;
        let user = seed_user(&pool).await;

        SubscriptionRepository::store_for_user(&pool, &user, &remote("sub-1", "remote-1"))
            .await
            .unwrap();
        SubscriptionRepository::store_for_user(&pool, &user, &remote("sub-2", "remote-1"))
            .await
            .unwrap();

        assert!(SubscriptionRepository::find_by_id(&pool, "sub-1")
            .await
            .unwrap()
            .is_none());
        let stored = SubscriptionRepository::find_by_id(&pool, "sub-2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.user_id, "u1");

        let reloaded = UserRepository::find_by_id(&pool, "u1").await.unwrap().unwrap();
        assert_eq!(reloaded.settings.subscription_id.as_deref(), Some("sub-2"));
    }

    #[tokio::test]
    async fn delete_clears_user_subscription_id() {
        let pool = test_pool().await;
        let user = seed_user(&pool).await;
        SubscriptionRepository::store_for_user(&pool, &user, &remote("sub-1", "remote-1"))
            .await
            .unwrap();

        SubscriptionRepository::delete_for_user(&pool, "u1", "sub-1")
            .await
            .unwrap();

        assert!(SubscriptionRepository::list_all(&pool).await.unwrap().is_empty());
        let reloaded = UserRepository::find_by_id(&pool, "u1").await.unwrap().unwrap();
        assert_eq!(reloaded.settings.subscription_id, None);
    }

    #[tokio::test]
    async fn list_expiring_filters_by_expiry() {
        let pool = test_pool().await;
        let user = seed_user(&pool).await;
        let mut sub = remote("sub-1", "remote-1");
        sub.expires_at = Utc::now() + chrono::Duration::hours(2);
        SubscriptionRepository::store_for_user(&pool, &user, &sub)
            .await
            .unwrap();

        let soon = SubscriptionRepository::list_expiring(&pool, Utc::now() + chrono::Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(soon.len(), 1);

        let none = SubscriptionRepository::list_expiring(&pool, Utc::now())
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
