//! The presence sync engine: its injected capabilities, timing settings and the
//! per-call context used by the availability, status, reminder and subscription
//! operations implemented in the sibling modules.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::db::models::User;
use crate::db::store::{SubscriptionStore, UserStore};
use crate::error::{AppError, AppResult, ErrorKind};
use crate::i18n;
use crate::services::calendar::CalendarGateway;
use crate::services::chat::{Notifier, StatusHost, TimezoneResolver};

pub const WEBHOOK_PATH: &str = "/webhooks/calendar";
pub const CONFIRM_STATUS_CHANGE_PATH: &str = "/api/actions/confirm-status-change";

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Capabilities the engine drives.
#[derive(Clone)]
pub struct Dependencies {
    pub users: Arc<dyn UserStore>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub gateway: Arc<dyn CalendarGateway>,
    pub status_host: Arc<dyn StatusHost>,
    pub notifier: Arc<dyn Notifier>,
    pub timezones: Arc<dyn TimezoneResolver>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Length of the calendar view fetched for each user, starting now.
    pub view_window: Duration,
    /// How far ahead of an event's start its reminder is sent.
    pub reminder_lead: Duration,
    pub sync_interval: Duration,
    pub log_truncate_limit: usize,
}

impl SyncSettings {
    /// Tolerance around the reminder time: 110% of the sync interval.
    pub fn reminder_window(&self) -> Duration {
        self.sync_interval * 11 / 10
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            view_window: Duration::minutes(10),
            reminder_lead: Duration::minutes(10),
            sync_interval: Duration::minutes(5),
            log_truncate_limit: 5,
        }
    }
}

/// Counters of one orchestrator run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncJobSummary {
    pub users_processed: usize,
    pub users_status_changed: usize,
    pub users_failed: usize,
}

/// The acting user and the calendar client to act with, resolved once per call.
pub struct CallContext {
    pub user: User,
    pub gateway: Arc<dyn CalendarGateway>,
}

pub struct Engine {
    pub(crate) deps: Dependencies,
    pub(crate) settings: SyncSettings,
    public_url: String,
    /// Held for the whole of every sync pass, so no two passes ever
    /// reconcile the same user at once.
    pub(crate) sync_guard: Mutex<()>,
}

impl Engine {
    pub fn new(deps: Dependencies, settings: SyncSettings, public_url: &str) -> Self {
        Self {
            deps,
            settings,
            public_url: public_url.trim_end_matches('/').to_string(),
            sync_guard: Mutex::new(()),
        }
    }

    pub fn notification_url(&self) -> String {
        format!("{}{}", self.public_url, WEBHOOK_PATH)
    }

    pub fn status_action_url(&self) -> String {
        format!("{}{}", self.public_url, CONFIRM_STATUS_CHANGE_PATH)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.deps.clock.now()
    }

    /// Resolve the acting user. An unknown user yields the templated
    /// not-connected error.
    pub async fn context_for(&self, user_id: &str) -> AppResult<CallContext> {
        let user = self.load_connected_user(user_id).await?;
        Ok(CallContext {
            user,
            gateway: self.deps.gateway.clone(),
        })
    }

    pub(crate) async fn load_connected_user(&self, user_id: &str) -> AppResult<User> {
        match self.deps.users.load_user(user_id).await {
            Ok(user) => Ok(user),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(AppError::NotConnected(i18n::t("errors.not_connected")))
            }
            Err(e) => Err(e),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn reminder_window_is_110_percent_of_interval() {
        let settings = SyncSettings::default();
        assert_eq!(settings.reminder_window(), Duration::seconds(330));
    }

    #[test]
    fn urls_are_built_from_public_url() {
        let h = Harness::new(vec![], at(9, 0));
        assert_eq!(
            h.engine.notification_url(),
            "https://presence.example.com/webhooks/calendar"
        );
        assert_eq!(
            h.engine.status_action_url(),
            "https://presence.example.com/api/actions/confirm-status-change"
        );
    }

    #[tokio::test]
    async fn unknown_user_is_not_connected() {
        let h = Harness::new(vec![], at(9, 0));
        let err = h.engine.context_for("ghost").await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
        assert_eq!(err.to_string(), i18n::t("errors.not_connected"));
    }
}
