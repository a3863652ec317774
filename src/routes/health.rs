use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (code, status) = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => (StatusCode::OK, "healthy"),
        Err(e) => {
            tracing::error!("Health check database query failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "degraded")
        }
    };

    let response = HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    (code, Json(response))
}

#[cfg(test)]
mod tests {
    use crate::routes::testing::TestApp;
    use crate::services::engine::testing::*;

    #[tokio::test]
    async fn reports_healthy_with_database() {
        let app = TestApp::new(Harness::new(vec![], at(9, 0))).await;
        let (status, body) = app.send_json("GET", "/health", None, None).await;
        assert_eq!(status, http::StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }
}
