use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Locally stored record of a user's remote push subscription.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub creator_id: String,
    pub resource: String,
    pub notification_url: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// A push subscription as reported by the calendar provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSubscription {
    pub id: String,
    /// Remote id of the calendar user the subscription was created for.
    pub creator_id: String,
    pub resource: String,
    pub notification_url: String,
    pub expires_at: DateTime<Utc>,
}

impl From<&Subscription> for RemoteSubscription {
    fn from(s: &Subscription) -> Self {
        Self {
            id: s.id.clone(),
            creator_id: s.creator_id.clone(),
            resource: s.resource.clone(),
            notification_url: s.notification_url.clone(),
            expires_at: s.expires_at,
        }
    }
}
