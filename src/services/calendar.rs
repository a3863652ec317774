//! Calendar domain types and the remote calendar capability.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::{RemoteSubscription, Subscription};
use crate::error::{AppError, AppResult};

/// Free/busy indicator of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ShowAs {
    Free,
    Tentative,
    Busy,
    Oof,
    WorkingElsewhere,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub ical_uid: String,
    pub subject: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub show_as: ShowAs,
    pub is_cancelled: bool,
}

impl CalendarEvent {
    /// Diffing identity of one occurrence: the iCal UID plus its UTC start,
    /// at second precision.
    pub fn identity(&self) -> String {
        format!(
            "{} {}",
            self.ical_uid,
            self.start.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }

    pub fn is_busy(&self) -> bool {
        self.show_as == ShowAs::Busy
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarViewRequest {
    pub remote_user_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Per-user outcome of a batched calendar-view fetch.
#[derive(Debug)]
pub struct CalendarViewResult {
    pub remote_user_id: String,
    pub events: Result<Vec<CalendarEvent>, AppError>,
}

#[async_trait]
pub trait CalendarGateway: Send + Sync {
    /// Fetch the calendar view of every requested user. Individual failures are
    /// reported on that user's result; only a failure to issue the batch at all
    /// is returned as an error.
    async fn fetch_calendar_views(
        &self,
        requests: Vec<CalendarViewRequest>,
    ) -> AppResult<Vec<CalendarViewResult>>;

    async fn create_subscription(
        &self,
        remote_user_id: &str,
        notification_url: &str,
    ) -> AppResult<RemoteSubscription>;

    /// Extend the subscription. Fails with `SubscriptionNotFound` when the
    /// remote side no longer knows it.
    async fn renew_subscription(
        &self,
        id: &str,
        current: &Subscription,
    ) -> AppResult<RemoteSubscription>;

    async fn delete_subscription(&self, sub: &RemoteSubscription) -> AppResult<()>;

    async fn list_subscriptions(&self) -> AppResult<Vec<RemoteSubscription>>;
}
