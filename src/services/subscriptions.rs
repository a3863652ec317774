//! Lifecycle of the remote push subscriptions that drive webhook-triggered syncs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::db::models::{RemoteSubscription, Subscription};
use crate::error::{AppError, AppResult, ErrorKind, ResultExt};
use crate::services::availability::LogLimiter;
use crate::services::engine::{CallContext, Engine};

/// Outcome counters of one renewal sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RenewalSummary {
    pub renewed: usize,
    pub removed: usize,
    pub failed: usize,
}

impl Engine {
    /// Create a remote subscription for the acting user and record it.
    pub async fn create_subscription(&self, ctx: &CallContext) -> AppResult<RemoteSubscription> {
        let sub = ctx
            .gateway
            .create_subscription(&ctx.user.remote_id, &self.notification_url())
            .await
            .context("error creating subscription")?;

        if let Err(e) = self
            .deps
            .subscriptions
            .store_user_subscription(&ctx.user, &sub)
            .await
        {
            // Never leave a remote subscription without a local owner.
            if let Err(cleanup) = ctx.gateway.delete_subscription(&sub).await {
                warn!(
                    "Failed to remove unrecorded subscription {}: {}",
                    sub.id, cleanup
                );
            }
            return Err(e.context("error storing subscription"));
        }

        info!(
            "Created subscription {} for user {} (expires {})",
            sub.id, ctx.user.id, sub.expires_at
        );
        Ok(sub)
    }

    /// The acting user's recorded subscription, if any.
    pub async fn load_subscription(&self, ctx: &CallContext) -> AppResult<Option<Subscription>> {
        let id = match ctx.user.settings.subscription_id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => return Ok(None),
        };

        self.deps
            .subscriptions
            .load_subscription(id)
            .await
            .map(Some)
            .context("error loading subscription")
    }

    /// Renew the acting user's subscription. A subscription the remote side
    /// no longer knows is removed locally and `None` is returned.
    pub async fn renew_subscription(
        &self,
        ctx: &CallContext,
    ) -> AppResult<Option<RemoteSubscription>> {
        let Some(current) = self.load_subscription(ctx).await? else {
            return Ok(None);
        };

        match ctx.gateway.renew_subscription(&current.id, &current).await {
            Ok(renewed) => {
                self.deps
                    .subscriptions
                    .store_user_subscription(&ctx.user, &renewed)
                    .await
                    .context("error storing renewed subscription")?;
                info!(
                    "Renewed subscription {} for user {} until {}",
                    renewed.id, ctx.user.id, renewed.expires_at
                );
                Ok(Some(renewed))
            }
            Err(e) if e.kind() == ErrorKind::OrphanedSubscription => {
                warn!(
                    "Subscription {} of user {} no longer exists remotely, removing it",
                    current.id, ctx.user.id
                );
                self.deps
                    .subscriptions
                    .delete_user_subscription(&ctx.user, &current.id)
                    .await
                    .with_context(|| {
                        format!("failed to delete orphaned subscription {}", current.id)
                    })?;
                Ok(None)
            }
            Err(e) => Err(e.context("error renewing subscription")),
        }
    }

    /// Delete the acting user's subscription remotely, then locally. A remote
    /// failure leaves the local record in place.
    pub async fn delete_subscription(&self, ctx: &CallContext) -> AppResult<()> {
        let current = self
            .load_subscription(ctx)
            .await?
            .ok_or_else(|| AppError::NotFound("subscription".to_string()))?;

        ctx.gateway
            .delete_subscription(&RemoteSubscription::from(&current))
            .await
            .with_context(|| format!("failed to delete remote subscription {}", current.id))?;

        self.deps
            .subscriptions
            .delete_user_subscription(&ctx.user, &current.id)
            .await
            .with_context(|| format!("failed to delete subscription {}", current.id))?;

        info!("Deleted subscription {} of user {}", current.id, ctx.user.id);
        Ok(())
    }

    /// Delete a remote subscription that no local user owns.
    pub async fn delete_orphaned_subscription(&self, sub: &RemoteSubscription) -> AppResult<()> {
        self.deps
            .gateway
            .delete_subscription(sub)
            .await
            .with_context(|| format!("failed to delete subscription {}", sub.id))?;
        info!("Deleted orphaned subscription {}", sub.id);
        Ok(())
    }

    pub async fn list_remote_subscriptions(&self) -> AppResult<Vec<RemoteSubscription>> {
        self.deps
            .gateway
            .list_subscriptions()
            .await
            .context("error listing remote subscriptions")
    }

    /// Renew every stored subscription expiring before `before`, acting as its owner.
    pub async fn renew_expiring_subscriptions(
        &self,
        before: DateTime<Utc>,
    ) -> AppResult<RenewalSummary> {
        let expiring = self
            .deps
            .subscriptions
            .list_expiring_subscriptions(before)
            .await
            .context("error listing expiring subscriptions")?;

        let mut summary = RenewalSummary::default();
        let mut logs = LogLimiter::new(self.settings.log_truncate_limit);

        for sub in expiring {
            let ctx = match self.context_for(&sub.user_id).await {
                Ok(ctx) => ctx,
                Err(e) => {
                    logs.warn(format!(
                        "Cannot renew subscription {}: owner {} not loaded. err={}",
                        sub.id, sub.user_id, e
                    ));
                    summary.failed += 1;
                    continue;
                }
            };

            match self.renew_subscription(&ctx).await {
                Ok(Some(_)) => summary.renewed += 1,
                Ok(None) => summary.removed += 1,
                Err(e) => {
                    logs.warn(format!(
                        "Failed to renew subscription {} of user {}. err={}",
                        sub.id, sub.user_id, e
                    ));
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }
}
