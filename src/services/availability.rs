//! Sync orchestrator: one-user and all-user presence sync cycles.

use std::collections::HashMap;

use crate::db::models::{User, UserSummary};
use crate::error::{AppResult, ResultExt};
use crate::i18n;
use crate::services::calendar::{CalendarViewRequest, CalendarViewResult};
use crate::services::chat::UserStatus;
use crate::services::engine::{Engine, SyncJobSummary};

pub const LOG_TRUNCATE_MESSAGE: &str = "We've truncated the logs due to too many messages";

/// Caps per-user warnings within one sync phase.
#[derive(Debug)]
pub struct LogLimiter {
    limit: usize,
    logged: usize,
}

impl LogLimiter {
    pub fn new(limit: usize) -> Self {
        Self { limit, logged: 0 }
    }

    /// Emit `message` as a warning unless the limit has been reached. The
    /// first overflow is replaced by a single truncation notice.
    pub fn warn(&mut self, message: impl AsRef<str>) -> bool {
        let emitted = if self.logged < self.limit {
            tracing::warn!("{}", message.as_ref());
            true
        } else {
            if self.logged == self.limit {
                tracing::warn!("{}", LOG_TRUNCATE_MESSAGE);
            }
            false
        };
        self.logged += 1;
        emitted
    }
}

/// Which phases a sync pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncPhases {
    StatusAndReminders,
    StatusOnly,
}

impl Engine {
    /// Sync a single connected user.
    pub async fn sync_one(&self, user_id: &str) -> AppResult<(String, SyncJobSummary)> {
        let _guard = self.sync_guard.lock().await;
        let index = vec![self.user_summary(user_id).await?];
        self.sync_users(index, SyncPhases::StatusAndReminders).await
    }

    /// Reconcile the presence of one user after a calendar change
    /// notification. Reminders stay with the timed cycle.
    pub async fn sync_status_one(&self, user_id: &str) -> AppResult<(String, SyncJobSummary)> {
        let _guard = self.sync_guard.lock().await;
        let index = vec![self.user_summary(user_id).await?];
        self.sync_users(index, SyncPhases::StatusOnly).await
    }

    /// Sync every connected user.
    pub async fn sync_all(&self) -> AppResult<(String, SyncJobSummary)> {
        let _guard = self.sync_guard.lock().await;

        let index = self
            .deps
            .users
            .load_user_index()
            .await
            .context("error loading the connected user index")?;
        self.sync_users(index, SyncPhases::StatusAndReminders).await
    }

    async fn user_summary(&self, user_id: &str) -> AppResult<UserSummary> {
        let user = self.load_connected_user(user_id).await?;
        Ok(UserSummary {
            id: user.id,
            remote_id: user.remote_id,
            email: user.email,
        })
    }

    /// Callers hold `sync_guard`; users are loaded fresh under it.
    async fn sync_users(
        &self,
        index: Vec<UserSummary>,
        phases: SyncPhases,
    ) -> AppResult<(String, SyncJobSummary)> {
        let mut summary = SyncJobSummary::default();
        if index.is_empty() {
            return Ok((i18n::t("sync.no_connected_users"), summary));
        }
        summary.users_processed = index.len();

        let mut logs = LogLimiter::new(self.settings.log_truncate_limit);
        let mut users = Vec::with_capacity(index.len());
        for entry in &index {
            match self.deps.users.load_user(&entry.id).await {
                Ok(user) => users.push(user),
                Err(e) => {
                    logs.warn(format!("Not able to load user {} from user index. err={}", entry.id, e));
                    summary.users_failed += 1;
                }
            }
        }

        let with_reminders = phases == SyncPhases::StatusAndReminders;
        users.retain(|u| {
            u.settings.update_status || (with_reminders && u.settings.receive_reminders)
        });
        if users.is_empty() {
            return Ok((i18n::t("sync.no_users_need_sync"), summary));
        }

        let views = self
            .get_calendar_views(&users)
            .await
            .context("not able to get calendar views for connected users")?;
        if views.is_empty() {
            return Ok((i18n::t("sync.no_calendar_views"), summary));
        }

        if with_reminders {
            self.deliver_reminders(&users, &views).await;
        }

        let (message, changed, failed) = self
            .set_user_statuses(&mut users, &views)
            .await
            .context("error setting the user statuses")?;
        summary.users_status_changed = changed;
        summary.users_failed += failed;

        let message = message.unwrap_or_else(|| {
            let processed = summary.users_processed.to_string();
            let changed = summary.users_status_changed.to_string();
            let failed = summary.users_failed.to_string();
            i18n::t_with(
                "sync.summary",
                &[
                    ("processed", processed.as_str()),
                    ("changed", changed.as_str()),
                    ("failed", failed.as_str()),
                ],
            )
        });

        tracing::info!(
            "Status sync finished: processed={} changed={} failed={}",
            summary.users_processed,
            summary.users_status_changed,
            summary.users_failed
        );
        Ok((message, summary))
    }

    /// One batched calendar view per user, covering `[now, now + window]`.
    pub async fn get_calendar_views(&self, users: &[User]) -> AppResult<Vec<CalendarViewResult>> {
        let start = self.now();
        let end = start + self.settings.view_window;

        let requests = users
            .iter()
            .map(|u| CalendarViewRequest {
                remote_user_id: u.remote_id.clone(),
                start,
                end,
            })
            .collect();

        self.deps.gateway.fetch_calendar_views(requests).await
    }

    async fn deliver_reminders(&self, users: &[User], views: &[CalendarViewResult]) {
        let by_remote_id: HashMap<&str, &User> = users
            .iter()
            .filter(|u| u.settings.receive_reminders)
            .map(|u| (u.remote_id.as_str(), u))
            .collect();
        if by_remote_id.is_empty() {
            return;
        }

        let mut logs = LogLimiter::new(self.settings.log_truncate_limit);
        for view in views {
            let Some(user) = by_remote_id.get(view.remote_user_id.as_str()) else {
                continue;
            };
            match &view.events {
                Ok(events) => {
                    self.notify_upcoming_events(user, events).await;
                }
                Err(e) => {
                    logs.warn(format!(
                        "Error getting availability for {}. err={}",
                        user.id, e
                    ));
                }
            }
        }
    }

    /// Reconcile every status-syncing user in gateway result order. Returns
    /// the last reconciler message, the changed count and the failed count.
    async fn set_user_statuses(
        &self,
        users: &mut [User],
        views: &[CalendarViewResult],
    ) -> AppResult<(Option<String>, usize, usize)> {
        let mut changed = 0;
        let mut failed = 0;

        let ids: Vec<String> = users
            .iter()
            .filter(|u| u.settings.update_status)
            .map(|u| u.id.clone())
            .collect();
        if ids.is_empty() {
            return Ok((Some(i18n::t("sync.no_status_updates")), changed, failed));
        }

        let statuses = self
            .deps
            .status_host
            .get_statuses(&ids)
            .await
            .context("error in getting user statuses for connected users")?;
        let status_by_id: HashMap<&str, &UserStatus> =
            statuses.iter().map(|s| (s.user_id.as_str(), s)).collect();

        let mut by_remote_id: HashMap<String, &mut User> = users
            .iter_mut()
            .filter(|u| u.settings.update_status)
            .map(|u| (u.remote_id.clone(), u))
            .collect();

        let mut logs = LogLimiter::new(self.settings.log_truncate_limit);
        let mut last_message = None;
        for view in views {
            let Some(user) = by_remote_id.get_mut(&view.remote_user_id) else {
                continue;
            };
            let events = match &view.events {
                Ok(events) => events,
                Err(e) => {
                    logs.warn(format!(
                        "Error getting availability for {}. err={}",
                        user.id, e
                    ));
                    failed += 1;
                    continue;
                }
            };
            let Some(status) = status_by_id.get(user.id.as_str()) else {
                continue;
            };

            match self.set_status_from_calendar_view(user, status, events).await {
                Ok(outcome) => {
                    if outcome.status_changed {
                        changed += 1;
                    }
                    last_message = Some(outcome.message);
                }
                Err(e) => {
                    logs.warn(format!("Error setting user {} status. err={}", user.id, e));
                    failed += 1;
                }
            }
        }

        Ok((last_message, changed, failed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::services::chat::PresenceStatus;
    use crate::services::engine::testing::*;

    #[test]
    fn log_limiter_emits_limit_then_one_notice() {
        let mut logs = LogLimiter::new(2);
        assert!(logs.warn("a"));
        assert!(logs.warn("b"));
        assert!(!logs.warn("c"));
        assert!(!logs.warn("d"));
        assert_eq!(logs.logged, 4);
    }

    #[tokio::test]
    async fn empty_index_is_not_an_error() {
        let h = Harness::new(vec![], at(9, 0));
        let (message, summary) = h.engine.sync_all().await.unwrap();
        assert_eq!(message, i18n::t("sync.no_connected_users"));
        assert_eq!(summary, SyncJobSummary::default());
        assert!(h.gateway.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn users_wanting_nothing_are_not_fetched() {
        let mut u = user("u1");
        u.settings.update_status = false;
        u.settings.receive_reminders = false;
        let h = Harness::new(vec![u], at(9, 0));

        let (message, summary) = h.engine.sync_all().await.unwrap();
        assert_eq!(message, i18n::t("sync.no_users_need_sync"));
        assert_eq!(summary.users_processed, 1);
        assert!(h.gateway.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn broken_user_record_is_counted_and_skipped() {
        let h = Harness::new(vec![user("u1")], at(9, 0));
        h.users.broken.lock().unwrap().push("u0".to_string());
        h.chat.set_live_status("u1", "online", false);
        h.gateway
            .set_events("remote-u1", vec![busy_event("uid-1", at(9, 0))]);

        let (_, summary) = h.engine.sync_all().await.unwrap();
        assert_eq!(summary.users_processed, 2);
        assert_eq!(summary.users_failed, 1);
        assert_eq!(summary.users_status_changed, 1);
    }

    #[tokio::test]
    async fn fetch_window_starts_now() {
        let h = Harness::new(vec![user("u1")], at(9, 0));
        h.chat.set_live_status("u1", "online", false);
        h.engine.sync_all().await.unwrap();

        let requests = h.gateway.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].remote_user_id, "remote-u1");
        assert_eq!(requests[0].start, at(9, 0));
        assert_eq!(requests[0].end, at(9, 10));
    }

    #[tokio::test]
    async fn batch_failure_aborts_cycle_with_context() {
        let h = Harness::new(vec![user("u1")], at(9, 0));
        *h.gateway.fail_batch.lock().unwrap() = true;

        let err = h.engine.sync_all().await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Gateway);
        assert!(err
            .to_string()
            .starts_with("not able to get calendar views for connected users"));
    }

    #[tokio::test]
    async fn one_failed_fetch_does_not_affect_others() {
        let h = Harness::new(vec![user("a"), user("b"), user("c")], at(9, 0));
        for id in ["a", "b", "c"] {
            h.chat.set_live_status(id, "online", false);
        }
        h.gateway
            .set_events("remote-a", vec![busy_event("uid-a", at(9, 0))]);
        h.gateway
            .failing_users
            .lock()
            .unwrap()
            .push("remote-b".to_string());

        let (_, summary) = h.engine.sync_all().await.unwrap();
        assert_eq!(summary.users_processed, 3);
        assert_eq!(summary.users_status_changed, 1);
        assert_eq!(summary.users_failed, 1);
        assert_eq!(
            h.chat.set_calls(),
            vec![("a".to_string(), PresenceStatus::Dnd)]
        );
    }

    #[tokio::test]
    async fn unknown_remote_ids_in_results_are_dropped() {
        let h = Harness::new(vec![user("u1")], at(9, 0));
        h.chat.set_live_status("u1", "online", false);
        h.gateway
            .extra_results
            .lock()
            .unwrap()
            .push("remote-stranger".to_string());

        let (_, summary) = h.engine.sync_all().await.unwrap();
        assert_eq!(summary.users_status_changed, 0);
        assert!(h.chat.set_calls().is_empty());
    }

    #[tokio::test]
    async fn reminder_only_users_are_not_status_synced() {
        let mut u = user("u1");
        u.settings.update_status = false;
        let h = Harness::new(vec![u], at(9, 0));
        h.gateway
            .set_events("remote-u1", vec![busy_event("uid-1", at(9, 10))]);

        let (message, summary) = h.engine.sync_all().await.unwrap();
        assert_eq!(message, i18n::t("sync.no_status_updates"));
        assert_eq!(summary.users_status_changed, 0);
        assert_eq!(h.chat.messages.lock().unwrap().len(), 1);
        assert!(h.chat.set_calls().is_empty());
    }

    #[tokio::test]
    async fn status_lookup_failure_aborts_cycle() {
        let h = Harness::new(vec![user("u1")], at(9, 0));
        *h.chat.fail_statuses.lock().unwrap() = true;

        let err = h.engine.sync_all().await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Host);
        assert!(err.to_string().starts_with("error setting the user statuses"));
    }

    #[tokio::test]
    async fn persistence_failure_counts_user_as_failed() {
        let h = Harness::new(vec![user("a"), user("b")], at(9, 0));
        h.chat.set_live_status("a", "online", false);
        h.chat.set_live_status("b", "online", false);
        h.gateway
            .set_events("remote-a", vec![busy_event("uid-a", at(9, 0))]);
        h.gateway
            .set_events("remote-b", vec![busy_event("uid-b", at(9, 0))]);
        h.users.fail_store_for.lock().unwrap().push("a".to_string());

        let (_, summary) = h.engine.sync_all().await.unwrap();
        assert_eq!(summary.users_failed, 1);
        assert_eq!(summary.users_status_changed, 1);
    }

    #[tokio::test]
    async fn sync_one_requires_connected_user() {
        let h = Harness::new(vec![], at(9, 0));
        let err = h.engine.sync_one("ghost").await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn sync_one_returns_reconciler_message() {
        let h = Harness::new(vec![user("u1")], at(9, 0));
        h.chat.set_live_status("u1", "online", false);

        let (message, summary) = h.engine.sync_one("u1").await.unwrap();
        assert_eq!(message, "No events in local or remote. No status change.");
        assert_eq!(summary.users_processed, 1);
    }

    #[tokio::test]
    async fn status_only_sync_does_not_repeat_reminders() {
        let h = Harness::new(vec![user("u1")], at(9, 0));
        h.chat.set_live_status("u1", "online", false);
        h.gateway
            .set_events("remote-u1", vec![busy_event("uid-1", at(9, 10))]);

        h.engine.sync_all().await.unwrap();
        assert_eq!(h.chat.messages.lock().unwrap().len(), 1);

        let (_, summary) = h.engine.sync_status_one("u1").await.unwrap();
        assert_eq!(summary.users_processed, 1);
        assert_eq!(h.chat.messages.lock().unwrap().len(), 1);
        assert_eq!(h.chat.set_calls(), vec![("u1".to_string(), PresenceStatus::Dnd)]);
    }

    #[tokio::test]
    async fn status_only_sync_skips_reminder_only_users() {
        let mut u = user("u1");
        u.settings.update_status = false;
        let h = Harness::new(vec![u], at(9, 0));
        h.gateway
            .set_events("remote-u1", vec![busy_event("uid-1", at(9, 10))]);

        let (message, _) = h.engine.sync_status_one("u1").await.unwrap();
        assert_eq!(message, i18n::t("sync.no_users_need_sync"));
        assert!(h.gateway.requests.lock().unwrap().is_empty());
        assert!(h.chat.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sync_passes_run_one_at_a_time() {
        let h = Harness::new(vec![user("u1")], at(9, 0));
        h.chat.set_live_status("u1", "away", true);
        h.gateway
            .set_events("remote-u1", vec![busy_event("uid-1", at(9, 0))]);
        let users = h.users.clone();
        let chat = h.chat.clone();
        let engine = std::sync::Arc::new(h.engine);

        let guard = engine.sync_guard.lock().await;
        let pending = tokio::spawn({
            let engine = engine.clone();
            async move { engine.sync_status_one("u1").await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!pending.is_finished());
        assert!(chat.set_calls().is_empty());
        drop(guard);

        let (_, first) = pending.await.unwrap().unwrap();
        assert_eq!(first.users_status_changed, 1);
        assert_eq!(users.get("u1").last_status.as_deref(), Some("away"));

        // The second pass sees the record the first one wrote.
        let (_, second) = engine.sync_all().await.unwrap();
        assert_eq!(second.users_status_changed, 0);
        assert_eq!(users.get("u1").last_status.as_deref(), Some("away"));
        assert_eq!(chat.set_calls(), vec![("u1".to_string(), PresenceStatus::Dnd)]);
    }
}
