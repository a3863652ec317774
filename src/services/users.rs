use crate::db::models::{RemoteSubscription, UpdateUserSettings, User};
use crate::error::{AppError, AppResult, ErrorKind, ResultExt};
use crate::i18n;
use crate::services::engine::Engine;

impl Engine {
    /// Record the chat user as connected to `remote_id` and subscribe to its
    /// calendar. Reconnecting keeps the stored settings.
    pub async fn connect_user(
        &self,
        user_id: &str,
        remote_id: &str,
        email: &str,
    ) -> AppResult<(User, RemoteSubscription)> {
        let mut user = match self.deps.users.load_user(user_id).await {
            Ok(existing) => {
                if existing.remote_id != remote_id {
                    self.disconnect_user(user_id).await?;
                    User::new(user_id, remote_id, email)
                } else {
                    existing
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => User::new(user_id, remote_id, email),
            Err(e) => return Err(e),
        };
        user.email = email.to_string();
        user.updated_at = chrono::Utc::now().naive_utc();

        self.deps
            .users
            .store_user(&user)
            .await
            .with_context(|| format!("error storing user {}", user_id))?;

        let ctx = self.context_for(user_id).await?;
        if ctx.user.settings.subscription_id.is_some() {
            if let Err(e) = self.delete_subscription(&ctx).await {
                tracing::warn!("Failed to replace subscription of user {}: {}", user_id, e);
            }
        }
        let ctx = self.context_for(user_id).await?;
        let sub = self.create_subscription(&ctx).await?;

        tracing::info!("User {} connected calendar account {}", user_id, remote_id);
        Ok((self.load_connected_user(user_id).await?, sub))
    }

    pub async fn update_user_settings(
        &self,
        user_id: &str,
        update: UpdateUserSettings,
    ) -> AppResult<User> {
        let mut user = self.load_connected_user(user_id).await?;

        if let Some(lang) = update.lang {
            let lang = i18n::normalize_language(&lang);
            if !i18n::is_supported_language(&lang) {
                return Err(AppError::BadRequest(format!("Unsupported language: {}", lang)));
            }
            user.lang = Some(lang);
        }

        let settings = &mut user.settings;
        if let Some(v) = update.update_status {
            settings.update_status = v;
        }
        if let Some(v) = update.get_confirmation {
            settings.get_confirmation = v;
        }
        if let Some(v) = update.receive_reminders {
            settings.receive_reminders = v;
        }
        if let Some(v) = update.receive_notifications_during_meeting {
            settings.receive_notifications_during_meeting = v;
        }
        if let Some(v) = update.busy_status {
            settings.busy_status = v;
        }
        user.updated_at = chrono::Utc::now().naive_utc();

        self.deps.users.store_user(&user).await?;
        Ok(user)
    }

    /// Remove the user's subscription (best effort) and their record.
    pub async fn disconnect_user(&self, user_id: &str) -> AppResult<()> {
        let ctx = self.context_for(user_id).await?;

        if ctx.user.settings.subscription_id.is_some() {
            if let Err(e) = self.delete_subscription(&ctx).await {
                tracing::warn!(
                    "Failed to delete subscription while disconnecting user {}: {}",
                    user_id,
                    e
                );
            }
        }

        self.deps
            .users
            .delete_user(user_id)
            .await
            .with_context(|| format!("error deleting user {}", user_id))?;
        tracing::info!("User {} disconnected", user_id);
        Ok(())
    }
}
