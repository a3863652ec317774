use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use serde::Serialize;

use crate::error::AppResult;
use crate::routes::auth::{AdminUser, AuthUser};
use crate::services::engine::SyncJobSummary;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sync", post(sync_me))
        .route("/sync-all", post(sync_all))
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub message: String,
    pub summary: SyncJobSummary,
}

/// Manual status sync for the acting user
async fn sync_me(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<SyncResponse>> {
    let (message, summary) = state.engine.sync_one(&user_id).await?;
    Ok(Json(SyncResponse { message, summary }))
}

async fn sync_all(
    State(state): State<Arc<AppState>>,
    AdminUser(admin_id): AdminUser,
) -> AppResult<Json<SyncResponse>> {
    tracing::info!("Manual status sync for all users requested by {}", admin_id);
    let (message, summary) = state.engine.sync_all().await?;
    Ok(Json(SyncResponse { message, summary }))
}
