use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{delete, get},
    Json, Router,
};
use serde::Serialize;

use crate::db::models::{RemoteSubscription, Subscription};
use crate::error::{AppError, AppResult};
use crate::i18n;
use crate::routes::auth::{AdminUser, AuthUser};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/me",
            get(get_mine)
                .post(create_mine)
                .put(renew_mine)
                .delete(delete_mine),
        )
        .route("/remote", get(list_remote))
        .route("/remote/:id", delete(delete_remote))
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse<T> {
    pub subscription: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

async fn get_mine(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<SubscriptionResponse<Subscription>>> {
    let ctx = state.engine.context_for(&user_id).await?;
    let subscription = state.engine.load_subscription(&ctx).await?;
    let message = subscription
        .is_none()
        .then(|| i18n::tr(ctx.user.lang.as_deref(), "subscription.none", None));
    Ok(Json(SubscriptionResponse {
        subscription,
        message,
    }))
}

async fn create_mine(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<RemoteSubscription>> {
    let ctx = state.engine.context_for(&user_id).await?;
    Ok(Json(state.engine.create_subscription(&ctx).await?))
}

async fn renew_mine(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<SubscriptionResponse<RemoteSubscription>>> {
    let ctx = state.engine.context_for(&user_id).await?;
    let subscription = state.engine.renew_subscription(&ctx).await?;
    let message = subscription
        .is_none()
        .then(|| i18n::tr(ctx.user.lang.as_deref(), "subscription.none", None));
    Ok(Json(SubscriptionResponse {
        subscription,
        message,
    }))
}

async fn delete_mine(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<SubscriptionResponse<RemoteSubscription>>> {
    let ctx = state.engine.context_for(&user_id).await?;
    state.engine.delete_subscription(&ctx).await?;
    Ok(Json(SubscriptionResponse {
        subscription: None,
        message: Some(i18n::tr(
            ctx.user.lang.as_deref(),
            "subscription.deleted",
            None,
        )),
    }))
}

/// All subscriptions registered with the calendar provider, for audit
async fn list_remote(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
) -> AppResult<Json<Vec<RemoteSubscription>>> {
    Ok(Json(state.engine.list_remote_subscriptions().await?))
}

async fn delete_remote(
    State(state): State<Arc<AppState>>,
    AdminUser(admin_id): AdminUser,
    Path(id): Path<String>,
) -> AppResult<Json<SubscriptionResponse<RemoteSubscription>>> {
    let sub = state
        .engine
        .list_remote_subscriptions()
        .await?
        .into_iter()
        .find(|s| s.id == id)
        .ok_or_else(|| AppError::NotFound(format!("subscription {}", id)))?;

    tracing::info!("Admin {} deleting remote subscription {}", admin_id, id);
    state.engine.delete_orphaned_subscription(&sub).await?;

    Ok(Json(SubscriptionResponse {
        subscription: Some(sub),
        message: Some(i18n::t("subscription.deleted")),
    }))
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use crate::routes::testing::{TestApp, ADMIN};
    use crate::services::calendar::CalendarGateway;
    use crate::services::engine::testing::*;

    #[tokio::test]
    async fn lifecycle_for_acting_user() {
        let app = TestApp::new(Harness::new(vec![user("u1")], at(9, 0))).await;

        let (status, body) = app
            .send_json("GET", "/api/subscriptions/me", Some("u1"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["subscription"].is_null());

        let (status, body) = app
            .send_json("POST", "/api/subscriptions/me", Some("u1"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "sub-1");

        let (status, body) = app
            .send_json("PUT", "/api/subscriptions/me", Some("u1"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subscription"]["id"], "sub-1");

        let (status, _) = app
            .send_json("DELETE", "/api/subscriptions/me", Some("u1"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(app.subs.subs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn foreign_creator_is_a_conflict() {
        let app = TestApp::new(Harness::new(vec![user("u1")], at(9, 0))).await;
        *app.gateway.creator_override.lock().unwrap() = Some("intruder".to_string());

        let (status, body) = app
            .send_json("POST", "/api/subscriptions/me", Some("u1"), None)
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "SUBSCRIPTION_CREATOR_MISMATCH");
    }

    #[tokio::test]
    async fn admin_deletes_orphaned_remote_subscription() {
        let app = TestApp::new(Harness::new(vec![], at(9, 0))).await;
        let orphan = app
            .gateway
            .create_subscription("remote-gone", "https://x/webhooks/calendar")
            .await
            .unwrap();

        let (status, body) = app
            .send_json("GET", "/api/subscriptions/remote", Some(ADMIN), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let uri = format!("/api/subscriptions/remote/{}", orphan.id);
        let (status, _) = app.send_json("DELETE", &uri, Some("u1"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app.send_json("DELETE", &uri, Some(ADMIN), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(app.gateway.remote_subs.lock().unwrap().is_empty());

        let (status, _) = app.send_json("DELETE", &uri, Some(ADMIN), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
