//! Status reconciler: decides free/busy transitions for one user from the
//! previous active-events snapshot and the freshly fetched events.

use std::collections::HashSet;

use crate::db::models::{BusyStatus, User, UserSettings};
use crate::error::{AppResult, ResultExt};
use crate::i18n;
use crate::services::calendar::CalendarEvent;
use crate::services::chat::{PresenceStatus, UserStatus};
use crate::services::engine::Engine;
use crate::services::views;

/// Outcome of reconciling one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub message: String,
    pub status_changed: bool,
}

impl Reconciliation {
    fn unchanged(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_changed: false,
        }
    }

    fn changed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_changed: true,
        }
    }
}

/// Presence applied while in a meeting. Users who keep receiving
/// notifications during meetings are set to away.
pub fn effective_busy_status(settings: &UserSettings) -> PresenceStatus {
    if settings.receive_notifications_during_meeting {
        return PresenceStatus::Away;
    }
    match settings.busy_status {
        BusyStatus::Dnd => PresenceStatus::Dnd,
        BusyStatus::Away => PresenceStatus::Away,
    }
}

fn busy_events(events: &[CalendarEvent]) -> Vec<&CalendarEvent> {
    events
        .iter()
        .filter(|e| e.is_busy() && !e.is_cancelled)
        .collect()
}

impl Engine {
    pub(crate) async fn set_status_from_calendar_view(
        &self,
        user: &mut User,
        status: &UserStatus,
        events: &[CalendarEvent],
    ) -> AppResult<Reconciliation> {
        let current = status.status.as_str();
        if current == PresenceStatus::Offline.as_str() && !user.settings.get_confirmation {
            return Ok(Reconciliation::unchanged(
                "User offline and does not want status change confirmations. No status change",
            ));
        }

        let busy = busy_events(events);
        let busy_status = effective_busy_status(&user.settings);
        let is_busy_now = current == busy_status.as_str();

        if user.active_events.is_empty() && busy.is_empty() {
            return Ok(Reconciliation::unchanged(
                "No events in local or remote. No status change.",
            ));
        }

        if busy.is_empty() {
            let mut outcome = Reconciliation::unchanged(format!(
                "User is no longer busy in calendar, but is not set to busy ({}). No status change.",
                busy_status.as_str()
            ));
            if is_busy_now {
                let message = match &user.last_status {
                    Some(last) => format!(
                        "User is no longer busy in calendar. Set status to previous status ({})",
                        last
                    ),
                    None => "User is no longer busy in calendar. Set status to online.".to_string(),
                };
                self.set_status_or_ask_user(user, status, &[], true)
                    .await
                    .with_context(|| format!("error in setting user status for user {}", user.id))?;
                outcome = Reconciliation::changed(message);
            }
            self.store_active_events(user, Vec::new()).await?;
            return Ok(outcome);
        }

        let identities: Vec<String> = busy.iter().map(|e| e.identity()).collect();
        let busy: Vec<CalendarEvent> = busy.into_iter().cloned().collect();

        if user.active_events.is_empty() {
            if is_busy_now {
                user.last_status = status.manual.then(|| status.status.clone());
                self.deps
                    .users
                    .store_user_last_status(&user.id, user.last_status.as_deref())
                    .await
                    .with_context(|| format!("error in storing user {}", user.id))?;
                self.store_active_events(user, identities).await?;
                return Ok(Reconciliation::unchanged(
                    "User was already marked as busy. No status change.",
                ));
            }

            self.set_status_or_ask_user(user, status, &busy, false)
                .await
                .with_context(|| format!("error in setting user status for user {}", user.id))?;
            self.store_active_events(user, identities).await?;
            return Ok(Reconciliation::changed(format!(
                "User was free, but is now busy ({}). Set status to busy.",
                busy_status.as_str()
            )));
        }

        let previous: HashSet<&str> = user.active_events.iter().map(String::as_str).collect();
        let new_event_exists = identities.iter().any(|id| !previous.contains(id.as_str()));
        if !new_event_exists {
            return Ok(Reconciliation::unchanged(format!(
                "No change in active events. Total number of events: {}",
                busy.len()
            )));
        }

        let mut outcome = Reconciliation::unchanged("User is already busy. No status change.");
        if !is_busy_now {
            self.set_status_or_ask_user(user, status, &busy, false)
                .await
                .with_context(|| format!("error in setting user status for user {}", user.id))?;
            outcome = Reconciliation::changed(format!(
                "User was free, but is now busy. Set status to busy ({}).",
                busy_status.as_str()
            ));
        }
        self.store_active_events(user, identities).await?;
        Ok(outcome)
    }

    async fn store_active_events(&self, user: &mut User, identities: Vec<String>) -> AppResult<()> {
        self.deps
            .users
            .store_user_active_events(&user.id, &identities)
            .await
            .with_context(|| format!("error in storing active events for user {}", user.id))?;
        user.active_events = identities;
        Ok(())
    }

    /// Apply the free or busy transition, or ask the user first when they
    /// opted into confirmations. The last-status bookkeeping is persisted
    /// before the status is touched.
    async fn set_status_or_ask_user(
        &self,
        user: &mut User,
        current: &UserStatus,
        events: &[CalendarEvent],
        is_free: bool,
    ) -> AppResult<()> {
        let to_set = if is_free {
            user.last_status
                .take()
                .and_then(|last| PresenceStatus::from_str(&last))
                .unwrap_or(PresenceStatus::Online)
        } else {
            if !user.settings.get_confirmation {
                user.last_status = current.manual.then(|| current.status.clone());
            }
            effective_busy_status(&user.settings)
        };

        self.deps
            .users
            .store_user_last_status(&user.id, user.last_status.as_deref())
            .await?;

        if !user.settings.get_confirmation {
            return self.deps.status_host.set_status(&user.id, to_set).await;
        }

        let prompt = views::status_change_prompt(events, to_set, is_free, user.lang.as_deref());
        self.deps
            .notifier
            .send_direct_message_with_confirmation_prompt(
                &user.id,
                &prompt,
                &self.status_action_url(),
            )
            .await
    }

    /// Apply the user's answer to a status-change prompt. Returns the text
    /// that replaces the prompt.
    pub async fn confirm_status_change(
        &self,
        user_id: &str,
        target: PresenceStatus,
        confirm: bool,
    ) -> AppResult<String> {
        let mut user = self.load_connected_user(user_id).await?;
        let lang = user.lang.clone();

        if !confirm {
            return Ok(i18n::tr(lang.as_deref(), "status.declined", None));
        }

        if target != PresenceStatus::Online {
            let statuses = self
                .deps
                .status_host
                .get_statuses(std::slice::from_ref(&user.id))
                .await
                .context("error in getting user status")?;
            if let Some(current) = statuses.iter().find(|s| s.user_id == user.id) {
                user.last_status = current.manual.then(|| current.status.clone());
            }
            self.deps
                .users
                .store_user_last_status(&user.id, user.last_status.as_deref())
                .await?;
        }

        self.deps.status_host.set_status(&user.id, target).await?;

        let status_name = views::status_name(target, lang.as_deref());
        let params = [("status", status_name.as_str())];
        Ok(i18n::tr(lang.as_deref(), "status.confirmed", Some(&params[..])))
    }
}
