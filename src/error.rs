use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Coarse classification of an [`AppError`], stable across context wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotConnected,
    Store,
    Gateway,
    OrphanedSubscription,
    Integrity,
    Host,
    Unauthorized,
    Forbidden,
    NotFound,
    BadRequest,
    RateLimited,
    Config,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The acting user has no local record. Carries the rendered user-facing text.
    #[error("{0}")]
    NotConnected(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Access denied")]
    Forbidden,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Calendar API error: {0}")]
    Gateway(String),

    /// The remote side no longer knows the subscription (renewal answered 404).
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("user \"{user}\" does not match the subscription creator \"{creator}\"")]
    CreatorMismatch { user: String, creator: String },

    #[error("Chat server error: {0}")]
    Chat(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<AppError>,
    },
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NotConnected(_) => ErrorKind::NotConnected,
            AppError::Unauthorized | AppError::Jwt(_) => ErrorKind::Unauthorized,
            AppError::Forbidden => ErrorKind::Forbidden,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::BadRequest(_) => ErrorKind::BadRequest,
            AppError::RateLimited => ErrorKind::RateLimited,
            AppError::Internal(_) => ErrorKind::Internal,
            AppError::Database(sqlx::Error::RowNotFound) => ErrorKind::NotFound,
            AppError::Database(_) | AppError::Store(_) => ErrorKind::Store,
            AppError::Request(_) | AppError::Gateway(_) => ErrorKind::Gateway,
            AppError::SubscriptionNotFound(_) => ErrorKind::OrphanedSubscription,
            AppError::CreatorMismatch { .. } => ErrorKind::Integrity,
            AppError::Chat(_) => ErrorKind::Host,
            AppError::Config(_) => ErrorKind::Config,
            AppError::Context { source, .. } => source.kind(),
        }
    }

    /// Wrap the error with a description of the operation that failed.
    pub fn context(self, context: impl Into<String>) -> AppError {
        AppError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping context layers.
    pub fn root(&self) -> &AppError {
        match self {
            AppError::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Attach operation context to fallible results, keeping the error kind.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> AppResult<T>;

    fn with_context<F>(self, f: F) -> AppResult<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<AppError>,
{
    fn context(self, context: impl Into<String>) -> AppResult<T> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<F>(self, f: F) -> AppResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().context(f()))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self.kind() {
            ErrorKind::NotConnected => (
                StatusCode::NOT_FOUND,
                "NOT_CONNECTED",
                self.root().to_string(),
            ),
            ErrorKind::Unauthorized => {
                tracing::debug!("Unauthorized request: {:?}", self);
                (
                    StatusCode::UNAUTHORIZED,
                    "UNAUTHORIZED",
                    "Authentication required".to_string(),
                )
            }
            ErrorKind::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN", self.to_string()),
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            ErrorKind::BadRequest => (StatusCode::BAD_REQUEST, "BAD_REQUEST", self.to_string()),
            ErrorKind::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                self.to_string(),
            ),
            ErrorKind::Integrity => (
                StatusCode::CONFLICT,
                "SUBSCRIPTION_CREATOR_MISMATCH",
                self.root().to_string(),
            ),
            ErrorKind::OrphanedSubscription => (
                StatusCode::GONE,
                "SUBSCRIPTION_NOT_FOUND",
                "The calendar subscription no longer exists".to_string(),
            ),
            ErrorKind::Store => {
                tracing::error!("Store error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORE_ERROR",
                    "A storage error occurred".to_string(),
                )
            }
            ErrorKind::Gateway => {
                tracing::error!("Calendar API error: {:?}", self);
                (
                    StatusCode::BAD_GATEWAY,
                    "CALENDAR_API_ERROR",
                    "Failed to communicate with the calendar service".to_string(),
                )
            }
            ErrorKind::Host => {
                tracing::error!("Chat server error: {:?}", self);
                (
                    StatusCode::BAD_GATEWAY,
                    "CHAT_SERVER_ERROR",
                    "Failed to communicate with the chat server".to_string(),
                )
            }
            ErrorKind::Config => {
                tracing::error!("Configuration error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIG_ERROR",
                    "Server configuration error".to_string(),
                )
            }
            ErrorKind::Internal => {
                tracing::error!("Internal error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
