use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tokio::task::JoinHandle;

use crate::error::{AppError, AppResult, ErrorKind};
use crate::services::chat::PresenceStatus;
use crate::services::engine::Engine;

type HmacSha256 = Hmac<Sha256>;

/// Change notifications posted by the calendar provider.
#[derive(Debug, Deserialize)]
pub struct NotificationPayload {
    #[serde(default)]
    pub value: Vec<ChangeNotification>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    pub subscription_id: String,
    #[serde(default)]
    pub client_state: Option<String>,
    #[serde(default)]
    pub change_type: String,
    #[serde(default)]
    pub resource: String,
}

pub struct WebhookService;

impl WebhookService {
    fn mac(secret: &str) -> AppResult<HmacSha256> {
        HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Failed to create HMAC")))
    }

    /// Hex HMAC-SHA256 of `message` under `secret`.
    pub fn sign(secret: &str, message: &[u8]) -> AppResult<String> {
        let mut mac = Self::mac(secret)?;
        mac.update(message);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Constant-time check of a hex signature produced by [`WebhookService::sign`].
    pub fn verify(secret: &str, message: &[u8], signature: &str) -> AppResult<()> {
        let expected = hex::decode(signature)
            .map_err(|_| AppError::BadRequest("Invalid signature format".to_string()))?;

        let mut mac = Self::mac(secret)?;
        mac.update(message);
        mac.verify_slice(&expected).map_err(|_| AppError::Unauthorized)
    }

    fn status_action_message(user_id: &str, status: PresenceStatus) -> String {
        format!("status-action:{}:{}", user_id, status.as_str())
    }

    /// Token embedded in a status-change prompt, binding it to one user and
    /// one target status.
    pub fn sign_status_action(
        secret: &str,
        user_id: &str,
        status: PresenceStatus,
    ) -> AppResult<String> {
        Self::sign(
            secret,
            Self::status_action_message(user_id, status).as_bytes(),
        )
    }

    pub fn verify_status_action(
        secret: &str,
        user_id: &str,
        status: PresenceStatus,
        token: &str,
    ) -> AppResult<()> {
        Self::verify(
            secret,
            Self::status_action_message(user_id, status).as_bytes(),
            token,
        )
        .map_err(|_| AppError::Forbidden)
    }

    /// Map verified notifications to the local users they concern. Items for
    /// unknown subscriptions or with a wrong `clientState` are dropped.
    pub async fn resolve_notifications(
        engine: &Engine,
        secret: &str,
        payload: &NotificationPayload,
    ) -> AppResult<Vec<String>> {
        let mut user_ids: Vec<String> = Vec::new();

        for item in &payload.value {
            let sub = match engine
                .deps
                .subscriptions
                .load_subscription(&item.subscription_id)
                .await
            {
                Ok(sub) => sub,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tracing::warn!(
                        "Notification for unknown subscription {} ignored",
                        item.subscription_id
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };

            let Some(client_state) = item.client_state.as_deref() else {
                tracing::warn!(
                    "Notification for subscription {} has no clientState",
                    sub.id
                );
                continue;
            };
            if Self::verify(secret, sub.creator_id.as_bytes(), client_state).is_err() {
                tracing::warn!(
                    "Notification for subscription {} failed clientState verification",
                    sub.id
                );
                continue;
            }

            tracing::debug!(
                "Calendar change notification: subscription={}, change={}, resource={}",
                sub.id,
                item.change_type,
                item.resource
            );
            if !user_ids.contains(&sub.user_id) {
                user_ids.push(sub.user_id);
            }
        }

        Ok(user_ids)
    }

    /// Verify the payload and reconcile the presence of each affected user in
    /// the background. Returns the handles of the started syncs.
    pub async fn handle_notifications(
        engine: Arc<Engine>,
        secret: &str,
        payload: &NotificationPayload,
    ) -> AppResult<Vec<JoinHandle<()>>> {
        let user_ids = Self::resolve_notifications(&engine, secret, payload).await?;

        let handles = user_ids
            .into_iter()
            .map(|user_id| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    match engine.sync_status_one(&user_id).await {
                        Ok((message, _)) => {
                            tracing::info!("Webhook sync for user {}: {}", user_id, message)
                        }
                        Err(e) => {
                            tracing::warn!("Webhook sync for user {} failed: {}", user_id, e)
                        }
                    }
                })
            })
            .collect();

        Ok(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::calendar::CalendarGateway;
    use crate::services::engine::testing::*;

    const SECRET: &str = "webhook-secret";

    fn notification(subscription_id: &str, client_state: Option<String>) -> ChangeNotification {
        ChangeNotification {
            subscription_id: subscription_id.to_string(),
            client_state,
            change_type: "updated".to_string(),
            resource: "Users/remote-u1/Events/1".to_string(),
        }
    }

    #[test]
    fn signature_round_trip_and_tamper() {
        let sig = WebhookService::sign(SECRET, b"remote-u1").unwrap();
        assert_eq!(sig.len(), 64);
        tokio_test::assert_ok!(WebhookService::verify(SECRET, b"remote-u1", &sig));
        assert!(matches!(
            WebhookService::verify(SECRET, b"remote-u2", &sig),
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            WebhookService::verify(SECRET, b"remote-u1", "not-hex"),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn status_action_token_is_bound_to_status() {
        let token =
            WebhookService::sign_status_action(SECRET, "u1", PresenceStatus::Dnd).unwrap();
        WebhookService::verify_status_action(SECRET, "u1", PresenceStatus::Dnd, &token).unwrap();
        assert!(matches!(
            WebhookService::verify_status_action(SECRET, "u1", PresenceStatus::Online, &token),
            Err(AppError::Forbidden)
        ));
    }

    #[test]
    fn payload_parses_graph_shape() {
        let body = r#"{"value":[{"subscriptionId":"sub-1","clientState":"abc","changeType":"created","resource":"Users/x/Events/y","tenantId":"t"}]}"#;
        let payload: NotificationPayload = serde_json::from_str(body).unwrap();
        assert_eq!(payload.value.len(), 1);
        assert_eq!(payload.value[0].subscription_id, "sub-1");
        assert_eq!(payload.value[0].client_state.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn only_verified_notifications_resolve_users() {
        let h = Harness::new(vec![user("u1")], at(9, 0));
        let sub = h
            .gateway
            .create_subscription("remote-u1", "https://x/webhooks/calendar")
            .await
            .unwrap();
        h.subs.insert(&user("u1"), &sub);

        let good = WebhookService::sign(SECRET, b"remote-u1").unwrap();
        let payload = NotificationPayload {
            value: vec![
                notification(&sub.id, Some(good.clone())),
                notification(&sub.id, Some(good)),
                notification(&sub.id, Some("00".repeat(32))),
                notification(&sub.id, None),
                notification("unknown", Some("00".to_string())),
            ],
        };

        let users = WebhookService::resolve_notifications(&h.engine, SECRET, &payload)
            .await
            .unwrap();
        assert_eq!(users, vec!["u1".to_string()]);
    }

    #[tokio::test]
    async fn notification_resyncs_status_without_repeating_reminder() {
        let Harness {
            engine,
            subs,
            gateway,
            chat,
            ..
        } = Harness::new(vec![user("u1")], at(9, 0));
        let engine = Arc::new(engine);
        chat.set_live_status("u1", "online", false);
        gateway.set_events("remote-u1", vec![busy_event("uid-1", at(9, 10))]);
        let sub = gateway
            .create_subscription("remote-u1", "https://x/webhooks/calendar")
            .await
            .unwrap();
        subs.insert(&user("u1"), &sub);

        engine.sync_all().await.unwrap();
        assert_eq!(chat.messages.lock().unwrap().len(), 1);

        gateway.set_events(
            "remote-u1",
            vec![busy_event("uid-1", at(9, 10)), busy_event("uid-2", at(9, 5))],
        );
        let client_state = WebhookService::sign(SECRET, b"remote-u1").unwrap();
        let payload = NotificationPayload {
            value: vec![notification(&sub.id, Some(client_state))],
        };
        let handles = WebhookService::handle_notifications(engine.clone(), SECRET, &payload)
            .await
            .unwrap();
        assert_eq!(handles.len(), 1);
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(chat.messages.lock().unwrap().len(), 1);
        assert_eq!(chat.set_calls(), vec![("u1".to_string(), PresenceStatus::Dnd)]);
    }
}
