//! Chat host capabilities (presence, direct messages, timezone lookup) and the
//! REST client that provides them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::services::http::{error_for_status, send_with_backoff};
use crate::services::webhooks::WebhookService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Dnd,
    Offline,
}

impl PresenceStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "online" => Some(PresenceStatus::Online),
            "away" => Some(PresenceStatus::Away),
            "dnd" => Some(PresenceStatus::Dnd),
            "offline" => Some(PresenceStatus::Offline),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Away => "away",
            PresenceStatus::Dnd => "dnd",
            PresenceStatus::Offline => "offline",
        }
    }
}

/// Live presence of one chat user as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserStatus {
    pub user_id: String,
    pub status: String,
    /// Whether the user picked the status themselves.
    #[serde(default)]
    pub manual: bool,
}

/// Prompt asking a user to confirm a status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPrompt {
    pub text: String,
    pub target_status: PresenceStatus,
    pub confirm_label: String,
    pub decline_label: String,
}

#[async_trait]
pub trait StatusHost: Send + Sync {
    async fn get_statuses(&self, user_ids: &[String]) -> AppResult<Vec<UserStatus>>;
    async fn set_status(&self, user_id: &str, status: PresenceStatus) -> AppResult<()>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_direct_message(&self, user_id: &str, message: &str) -> AppResult<()>;
    async fn send_direct_message_with_confirmation_prompt(
        &self,
        user_id: &str,
        prompt: &StatusPrompt,
        action_url: &str,
    ) -> AppResult<()>;
}

#[async_trait]
pub trait TimezoneResolver: Send + Sync {
    /// IANA timezone name of the user.
    async fn resolve_timezone(&self, user_id: &str) -> AppResult<String>;
}

#[derive(Debug, Deserialize)]
struct ChatUser {
    id: String,
    #[serde(default)]
    timezone: Option<ChatTimezone>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatTimezone {
    #[serde(default)]
    use_automatic_timezone: String,
    #[serde(default)]
    automatic_timezone: String,
    #[serde(default)]
    manual_timezone: String,
}

impl ChatTimezone {
    fn resolve(&self) -> Option<&str> {
        let tz = if self.use_automatic_timezone == "true" {
            &self.automatic_timezone
        } else {
            &self.manual_timezone
        };
        if tz.is_empty() {
            None
        } else {
            Some(tz.as_str())
        }
    }
}

#[derive(Debug, Deserialize)]
struct Channel {
    id: String,
}

#[derive(Debug, Clone)]
pub struct ChatService {
    client: Client,
    server_url: String,
    bot_token: String,
    action_secret: String,
    bot_user_id: Arc<RwLock<Option<String>>>,
}

impl ChatService {
    pub fn new(config: &Config) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self {
            client,
            server_url: config.chat.server_url.clone(),
            bot_token: config.chat.bot_token.clone(),
            action_secret: config.webhook.secret.clone(),
            bot_user_id: Arc::new(RwLock::new(None)),
        })
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v4{}", self.server_url, path)
    }

    async fn bot_user_id(&self) -> AppResult<String> {
        {
            let guard = self.bot_user_id.read().await;
            if let Some(ref id) = *guard {
                return Ok(id.clone());
            }
        }

        let response = send_with_backoff(
            "chat",
            || self.client.get(self.api("/users/me")).bearer_auth(&self.bot_token),
            AppError::Chat,
        )
        .await?;
        let response = error_for_status(response, "Failed to load bot user", AppError::Chat).await?;
        let me: ChatUser = response
            .json()
            .await
            .map_err(|e| AppError::Chat(format!("Failed to parse bot user: {}", e)))?;

        *self.bot_user_id.write().await = Some(me.id.clone());
        Ok(me.id)
    }

    async fn direct_channel_id(&self, user_id: &str) -> AppResult<String> {
        let bot_id = self.bot_user_id().await?;
        let members = [bot_id, user_id.to_string()];

        let response = send_with_backoff(
            "chat",
            || {
                self.client
                    .post(self.api("/channels/direct"))
                    .bearer_auth(&self.bot_token)
                    .json(&members)
            },
            AppError::Chat,
        )
        .await?;
        let response =
            error_for_status(response, "Failed to open direct channel", AppError::Chat).await?;
        let channel: Channel = response
            .json()
            .await
            .map_err(|e| AppError::Chat(format!("Failed to parse channel: {}", e)))?;
        Ok(channel.id)
    }

    async fn create_post(&self, body: serde_json::Value) -> AppResult<()> {
        let response = send_with_backoff(
            "chat",
            || {
                self.client
                    .post(self.api("/posts"))
                    .bearer_auth(&self.bot_token)
                    .json(&body)
            },
            AppError::Chat,
        )
        .await?;
        error_for_status(response, "Failed to create post", AppError::Chat).await?;
        Ok(())
    }
}

/// Message attachment with confirm/decline buttons posting back to `action_url`.
fn prompt_attachment(
    user_id: &str,
    prompt: &StatusPrompt,
    action_url: &str,
    token: &str,
) -> serde_json::Value {
    let action = |id: &str, name: &str, confirm: bool| {
        json!({
            "id": id,
            "name": name,
            "integration": {
                "url": action_url,
                "context": {
                    "user_id": user_id,
                    "status": prompt.target_status.as_str(),
                    "confirm": confirm,
                    "token": token,
                }
            }
        })
    };

    json!({
        "text": prompt.text,
        "actions": [
            action("confirm", prompt.confirm_label.as_str(), true),
            action("decline", prompt.decline_label.as_str(), false),
        ]
    })
}

#[async_trait]
impl StatusHost for ChatService {
    async fn get_statuses(&self, user_ids: &[String]) -> AppResult<Vec<UserStatus>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let response = send_with_backoff(
            "chat",
            || {
                self.client
                    .post(self.api("/users/status/ids"))
                    .bearer_auth(&self.bot_token)
                    .json(user_ids)
            },
            AppError::Chat,
        )
        .await?;
        let response =
            error_for_status(response, "Failed to get user statuses", AppError::Chat).await?;

        response
            .json()
            .await
            .map_err(|e| AppError::Chat(format!("Failed to parse user statuses: {}", e)))
    }

    async fn set_status(&self, user_id: &str, status: PresenceStatus) -> AppResult<()> {
        let body = json!({ "user_id": user_id, "status": status.as_str() });
        let response = send_with_backoff(
            "chat",
            || {
                self.client
                    .put(self.api(&format!("/users/{}/status", user_id)))
                    .bearer_auth(&self.bot_token)
                    .json(&body)
            },
            AppError::Chat,
        )
        .await?;
        error_for_status(response, "Failed to update user status", AppError::Chat).await?;

        tracing::debug!("Set status of {} to {}", user_id, status.as_str());
        Ok(())
    }
}

#[async_trait]
impl Notifier for ChatService {
    async fn send_direct_message(&self, user_id: &str, message: &str) -> AppResult<()> {
        let channel_id = self.direct_channel_id(user_id).await?;
        self.create_post(json!({ "channel_id": channel_id, "message": message }))
            .await
    }

    async fn send_direct_message_with_confirmation_prompt(
        &self,
        user_id: &str,
        prompt: &StatusPrompt,
        action_url: &str,
    ) -> AppResult<()> {
        let channel_id = self.direct_channel_id(user_id).await?;
        let token = WebhookService::sign_status_action(
            &self.action_secret,
            user_id,
            prompt.target_status,
        )?;
        let attachment = prompt_attachment(user_id, prompt, action_url, &token);

        self.create_post(json!({
            "channel_id": channel_id,
            "message": "",
            "props": { "attachments": [attachment] }
        }))
        .await
    }
}

#[async_trait]
impl TimezoneResolver for ChatService {
    async fn resolve_timezone(&self, user_id: &str) -> AppResult<String> {
        let response = send_with_backoff(
            "chat",
            || {
                self.client
                    .get(self.api(&format!("/users/{}", user_id)))
                    .bearer_auth(&self.bot_token)
            },
            AppError::Chat,
        )
        .await?;
        let response = error_for_status(response, "Failed to load user", AppError::Chat).await?;
        let user: ChatUser = response
            .json()
            .await
            .map_err(|e| AppError::Chat(format!("Failed to parse user: {}", e)))?;

        Ok(user
            .timezone
            .as_ref()
            .and_then(ChatTimezone::resolve)
            .unwrap_or("UTC")
            .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timezone_prefers_automatic_when_enabled() {
        let tz = ChatTimezone {
            use_automatic_timezone: "true".to_string(),
            automatic_timezone: "Europe/Berlin".to_string(),
            manual_timezone: "America/New_York".to_string(),
        };
        assert_eq!(tz.resolve(), Some("Europe/Berlin"));

        let tz = ChatTimezone {
            use_automatic_timezone: "false".to_string(),
            ..tz
        };
        assert_eq!(tz.resolve(), Some("America/New_York"));

        assert_eq!(ChatTimezone::default().resolve(), None);
    }

    #[test]
    fn prompt_attachment_carries_target_status_for_both_actions() {
        let prompt = StatusPrompt {
            text: "Meeting starting".to_string(),
            target_status: PresenceStatus::Dnd,
            confirm_label: "Yes".to_string(),
            decline_label: "No".to_string(),
        };
        let v = prompt_attachment("u1", &prompt, "https://x/actions", "tok");

        let actions = v["actions"].as_array().unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0]["integration"]["context"]["status"], "dnd");
        assert_eq!(actions[0]["integration"]["context"]["confirm"], true);
        assert_eq!(actions[1]["integration"]["context"]["confirm"], false);
        assert_eq!(actions[1]["integration"]["url"], "https://x/actions");
    }

    #[test]
    fn presence_status_parses_case_insensitively() {
        assert_eq!(PresenceStatus::from_str("DND"), Some(PresenceStatus::Dnd));
        assert_eq!(PresenceStatus::from_str("busy"), None);
    }
}
