use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde::Deserialize;

use crate::error::AppError;
use crate::services::webhooks::{NotificationPayload, WebhookService};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/calendar", post(handle_calendar_webhook))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookQuery {
    pub validation_token: Option<String>,
}

async fn handle_calendar_webhook(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WebhookQuery>,
    body: Bytes,
) -> Result<Response, AppError> {
    // Subscription creation handshake: echo the token back as plain text.
    if let Some(token) = query.validation_token {
        tracing::info!("Answering calendar webhook validation request");
        return Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            token,
        )
            .into_response());
    }

    let payload: NotificationPayload = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid payload: {}", e)))?;

    tracing::info!(
        "Received calendar webhook with {} notification(s)",
        payload.value.len()
    );

    let started = WebhookService::handle_notifications(
        state.engine.clone(),
        &state.config.webhook.secret,
        &payload,
    )
    .await?;
    tracing::debug!("Calendar webhook started {} sync(s)", started.len());

    Ok(StatusCode::ACCEPTED.into_response())
}
