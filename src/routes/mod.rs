pub mod actions;
pub mod auth;
pub mod availability;
pub mod health;
pub mod subscriptions;
pub mod users;
pub mod webhooks;

use std::sync::Arc;

use axum::{routing::get, Router};

use crate::AppState;

/// All routes except the rate-limited webhook receiver.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api/users", users::router())
        .nest("/api/availability", availability::router())
        .nest("/api/subscriptions", subscriptions::router())
        .nest("/api/actions", actions::router())
}
