use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::models::{RemoteSubscription, UpdateUserSettings, User, UserSettings};
use crate::error::{AppError, AppResult};
use crate::i18n;
use crate::routes::auth::AuthUser;
use crate::AppState;

/// Router for connecting, inspecting and disconnecting the acting user
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/connect", post(connect))
        .route("/me", get(me).delete(disconnect))
        .route("/me/settings", put(update_settings))
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub remote_id: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub remote_id: String,
    pub email: String,
    pub lang: Option<String>,
    pub settings: UserSettings,
    pub last_status: Option<String>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            remote_id: u.remote_id,
            email: u.email,
            lang: u.lang,
            settings: u.settings,
            last_status: u.last_status,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConnectResponse {
    pub message: String,
    pub user: UserResponse,
    pub subscription: RemoteSubscription,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

async fn connect(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<ConnectRequest>,
) -> AppResult<Json<ConnectResponse>> {
    let remote_id = req.remote_id.trim();
    if remote_id.is_empty() {
        return Err(AppError::BadRequest("remote_id is required".to_string()));
    }

    let (user, subscription) = state
        .engine
        .connect_user(&user_id, remote_id, req.email.trim())
        .await?;

    Ok(Json(ConnectResponse {
        message: i18n::tr(user.lang.as_deref(), "user.connected", None),
        user: user.into(),
        subscription,
    }))
}

async fn me(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<UserResponse>> {
    let ctx = state.engine.context_for(&user_id).await?;
    Ok(Json(ctx.user.into()))
}

async fn update_settings(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(update): Json<UpdateUserSettings>,
) -> AppResult<Json<UserResponse>> {
    let user = state.engine.update_user_settings(&user_id, update).await?;
    Ok(Json(user.into()))
}

async fn disconnect(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<MessageResponse>> {
    let ctx = state.engine.context_for(&user_id).await?;
    let lang = ctx.user.lang.clone();
    state.engine.disconnect_user(&user_id).await?;

    Ok(Json(MessageResponse {
        message: i18n::tr(lang.as_deref(), "user.disconnected", None),
    }))
}

#[cfg(test)]
mod tests {
    use http::StatusCode;
    use serde_json::json;

    use crate::routes::testing::TestApp;
    use crate::services::engine::testing::*;

    #[tokio::test]
    async fn requests_without_token_are_rejected() {
        let app = TestApp::new(Harness::new(vec![], at(9, 0))).await;
        let (status, body) = app.send_json("GET", "/api/users/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn unknown_user_gets_not_connected_message() {
        let app = TestApp::new(Harness::new(vec![], at(9, 0))).await;
        let (status, body) = app.send_json("GET", "/api/users/me", Some("u1"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_CONNECTED");
        assert_eq!(
            body["error"]["message"],
            crate::i18n::t("errors.not_connected")
        );
    }

    #[tokio::test]
    async fn connect_then_read_settings() {
        let app = TestApp::new(Harness::new(vec![], at(9, 0))).await;

        let (status, body) = app
            .send_json(
                "POST",
                "/api/users/connect",
                Some("u1"),
                Some(json!({ "remote_id": "remote-u1", "email": "u1@example.com" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subscription"]["creator_id"], "remote-u1");
        assert_eq!(body["user"]["settings"]["busy_status"], "dnd");

        let (status, body) = app
            .send_json(
                "PUT",
                "/api/users/me/settings",
                Some("u1"),
                Some(json!({ "receive_reminders": false, "busy_status": "away" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["settings"]["receive_reminders"], false);
        assert_eq!(body["settings"]["busy_status"], "away");
    }

    #[tokio::test]
    async fn disconnect_removes_user() {
        let app = TestApp::new(Harness::new(vec![user("u1")], at(9, 0))).await;
        let (status, _) = app.send_json("DELETE", "/api/users/me", Some("u1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(app.users.users.lock().unwrap().is_empty());
    }
}
