use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::services::chat::PresenceStatus;
use crate::services::webhooks::WebhookService;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/confirm-status-change", post(confirm_status_change))
}

/// Interactive message action posted by the chat server when a prompt button
/// is clicked.
#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub user_id: String,
    pub context: StatusActionContext,
}

#[derive(Debug, Deserialize)]
pub struct StatusActionContext {
    pub user_id: String,
    pub status: String,
    pub confirm: bool,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub update: ActionUpdate,
}

#[derive(Debug, Serialize)]
pub struct ActionUpdate {
    pub message: String,
}

async fn confirm_status_change(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ActionRequest>,
) -> AppResult<Json<ActionResponse>> {
    let ctx = req.context;
    if req.user_id != ctx.user_id {
        tracing::warn!(
            "User {} tried to answer a status prompt addressed to {}",
            req.user_id,
            ctx.user_id
        );
        return Err(AppError::Forbidden);
    }

    let status = PresenceStatus::from_str(&ctx.status)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown status: {}", ctx.status)))?;

    WebhookService::verify_status_action(
        &state.config.webhook.secret,
        &ctx.user_id,
        status,
        &ctx.token,
    )?;

    let message = state
        .engine
        .confirm_status_change(&ctx.user_id, status, ctx.confirm)
        .await?;

    Ok(Json(ActionResponse {
        update: ActionUpdate { message },
    }))
}

#[cfg(test)]
mod tests {
    use http::StatusCode;
    use serde_json::json;

    use crate::routes::testing::{TestApp, WEBHOOK_SECRET};
    use crate::services::chat::PresenceStatus;
    use crate::services::engine::testing::*;
    use crate::services::webhooks::WebhookService;

    fn action(user_id: &str, status: &str, confirm: bool, token: &str) -> serde_json::Value {
        json!({
            "user_id": user_id,
            "context": {
                "user_id": user_id,
                "status": status,
                "confirm": confirm,
                "token": token,
            }
        })
    }

    const PATH: &str = "/api/actions/confirm-status-change";

    #[tokio::test]
    async fn confirmed_prompt_sets_status() {
        let app = TestApp::new(Harness::new(vec![user("u1")], at(9, 0))).await;
        app.chat.set_live_status("u1", "online", false);
        let token =
            WebhookService::sign_status_action(WEBHOOK_SECRET, "u1", PresenceStatus::Dnd).unwrap();

        let (status, body) = app
            .send_json("POST", PATH, None, Some(action("u1", "dnd", true, &token)))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["update"]["message"]
            .as_str()
            .unwrap()
            .contains("Do Not Disturb"));
        assert_eq!(
            app.chat.set_calls(),
            vec![("u1".to_string(), PresenceStatus::Dnd)]
        );
    }

    #[tokio::test]
    async fn declined_prompt_leaves_status() {
        let app = TestApp::new(Harness::new(vec![user("u1")], at(9, 0))).await;
        let token =
            WebhookService::sign_status_action(WEBHOOK_SECRET, "u1", PresenceStatus::Away).unwrap();

        let (status, body) = app
            .send_json("POST", PATH, None, Some(action("u1", "away", false, &token)))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["update"]["message"],
            crate::i18n::t("status.declined")
        );
        assert!(app.chat.set_calls().is_empty());
    }

    #[tokio::test]
    async fn token_for_other_status_is_forbidden() {
        let app = TestApp::new(Harness::new(vec![user("u1")], at(9, 0))).await;
        let token =
            WebhookService::sign_status_action(WEBHOOK_SECRET, "u1", PresenceStatus::Away).unwrap();

        let (status, _) = app
            .send_json("POST", PATH, None, Some(action("u1", "offline", true, &token)))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(app.chat.set_calls().is_empty());
    }

    #[tokio::test]
    async fn clicker_must_be_prompt_owner() {
        let app = TestApp::new(Harness::new(vec![user("u1")], at(9, 0))).await;
        let token =
            WebhookService::sign_status_action(WEBHOOK_SECRET, "u1", PresenceStatus::Dnd).unwrap();
        let mut body = action("u1", "dnd", true, &token);
        body["user_id"] = json!("u2");

        let (status, _) = app.send_json("POST", PATH, None, Some(body)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
