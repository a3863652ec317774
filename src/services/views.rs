//! Rendering of reminder messages and status-change prompts.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::error::{AppError, AppResult};
use crate::i18n;
use crate::services::calendar::CalendarEvent;
use crate::services::chat::{PresenceStatus, StatusPrompt};

const TIME_FORMAT: &str = "%H:%M";

pub fn status_name(status: PresenceStatus, lang: Option<&str>) -> String {
    i18n::tr(lang, &format!("status.{}", status.as_str()), None)
}

fn subject(event: &CalendarEvent, lang: Option<&str>) -> String {
    if event.subject.trim().is_empty() {
        i18n::tr(lang, "event.no_subject", None)
    } else {
        event.subject.clone()
    }
}

fn local_time(at: DateTime<Utc>, tz: &Tz) -> String {
    at.with_timezone(tz).format(TIME_FORMAT).to_string()
}

/// Reminder for an event starting in `lead_minutes`, with times rendered in
/// the user's timezone.
pub fn render_upcoming_event(
    event: &CalendarEvent,
    timezone: &str,
    lead_minutes: i64,
    lang: Option<&str>,
) -> AppResult<String> {
    let tz: Tz = timezone
        .parse()
        .map_err(|e| AppError::BadRequest(format!("Unknown timezone {}: {}", timezone, e)))?;

    let minutes = lead_minutes.to_string();
    let params = [("minutes", minutes.as_str())];
    let header = i18n::tr(lang, "reminder.upcoming", Some(&params[..]));

    Ok(format!(
        "{}\n**{}** {} - {} ({})",
        header,
        subject(event, lang),
        local_time(event.start, &tz),
        local_time(event.end, &tz),
        tz.name()
    ))
}

/// Prompt asking the user to switch to `target`, listing the triggering events.
pub fn status_change_prompt(
    events: &[CalendarEvent],
    target: PresenceStatus,
    is_free: bool,
    lang: Option<&str>,
) -> StatusPrompt {
    let key = if is_free {
        "status.prompt.free"
    } else {
        "status.prompt.busy"
    };
    let name = status_name(target, lang);
    let params = [("status", name.as_str())];
    let mut text = i18n::tr(lang, key, Some(&params[..]));

    for event in events {
        text.push_str(&format!(
            "\n- **{}** {} - {} UTC",
            subject(event, lang),
            local_time(event.start, &Tz::UTC),
            local_time(event.end, &Tz::UTC)
        ));
    }

    StatusPrompt {
        text,
        target_status: target,
        confirm_label: i18n::tr(lang, "status.prompt.yes", None),
        decline_label: i18n::tr(lang, "status.prompt.no", None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::engine::testing::{at, busy_event};

    #[test]
    fn upcoming_event_uses_user_timezone() {
        let event = busy_event("uid-1", at(9, 0));
        let text = render_upcoming_event(&event, "Europe/Berlin", 10, None).unwrap();
        assert_eq!(
            text,
            "You have an upcoming event in 10 minutes:\n**Meeting uid-1** 11:00 - 11:30 (Europe/Berlin)"
        );
    }

    #[test]
    fn unknown_timezone_is_an_error() {
        let event = busy_event("uid-1", at(9, 0));
        assert!(render_upcoming_event(&event, "Mars/Olympus", 10, None).is_err());
    }

    #[test]
    fn empty_subject_gets_placeholder() {
        let mut event = busy_event("uid-1", at(9, 0));
        event.subject = " ".to_string();
        let text = render_upcoming_event(&event, "UTC", 10, Some("ru")).unwrap();
        assert!(text.contains("(без темы)"));
    }

    #[test]
    fn prompt_lists_events_and_target() {
        let events = vec![busy_event("uid-1", at(9, 0))];
        let prompt = status_change_prompt(&events, PresenceStatus::Dnd, false, None);
        assert_eq!(prompt.target_status, PresenceStatus::Dnd);
        assert!(prompt.text.contains("**Do Not Disturb**"));
        assert!(prompt.text.contains("**Meeting uid-1** 09:00 - 09:30 UTC"));
        assert_eq!(prompt.confirm_label, "Yes");
        assert_eq!(prompt.decline_label, "No");

        let prompt = status_change_prompt(&[], PresenceStatus::Online, true, None);
        assert!(prompt.text.starts_with("Your meeting has ended"));
    }
}
