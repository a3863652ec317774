use crate::db::models::User;
use crate::services::calendar::CalendarEvent;
use crate::services::engine::Engine;
use crate::services::views;

impl Engine {
    /// Send a reminder for each event starting about one lead time from now.
    /// Returns the number of reminders sent.
    pub async fn notify_upcoming_events(&self, user: &User, events: &[CalendarEvent]) -> usize {
        let upcoming = self.now() + self.settings.reminder_lead;
        let window = self.settings.reminder_window();
        let lead_minutes = self.settings.reminder_lead.num_minutes();

        let mut timezone: Option<String> = None;
        let mut sent = 0;

        for event in events.iter().filter(|e| !e.is_cancelled) {
            let diff = event.start - upcoming;
            if diff >= window || diff <= -window {
                continue;
            }

            let tz = match &timezone {
                Some(tz) => tz.clone(),
                None => match self.deps.timezones.resolve_timezone(&user.id).await {
                    Ok(tz) => {
                        timezone = Some(tz.clone());
                        tz
                    }
                    Err(e) => {
                        tracing::warn!(
                            "notify_upcoming_events error getting timezone for {}. err={}",
                            user.id,
                            e
                        );
                        return sent;
                    }
                },
            };

            let message =
                match views::render_upcoming_event(event, &tz, lead_minutes, user.lang.as_deref()) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!("notify_upcoming_events error rendering event. err={}", e);
                        continue;
                    }
                };

            match self.deps.notifier.send_direct_message(&user.id, &message).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    tracing::warn!(
                        "notify_upcoming_events error sending reminder to {}. err={}",
                        user.id,
                        e
                    );
                }
            }
        }

        sent
    }
}

#[cfg(test)]
mod tests {
    use crate::services::engine::testing::*;

    #[tokio::test]
    async fn reminds_events_starting_after_lead_time() {
        let h = Harness::new(vec![user("u1")], at(9, 0));
        let events = vec![
            busy_event("soon", at(9, 10)),
            busy_event("edge", at(9, 15)),
            busy_event("now", at(9, 0)),
            busy_event("later", at(9, 30)),
        ];

        let sent = h.engine.notify_upcoming_events(&user("u1"), &events).await;
        assert_eq!(sent, 2);
        let messages = h.chat.messages.lock().unwrap();
        assert!(messages[0].1.contains("Meeting soon"));
        assert!(messages[1].1.contains("Meeting edge"));
    }

    #[tokio::test]
    async fn cancelled_events_are_not_reminded() {
        let h = Harness::new(vec![user("u1")], at(9, 0));
        let mut event = busy_event("soon", at(9, 10));
        event.is_cancelled = true;

        let sent = h.engine.notify_upcoming_events(&user("u1"), &[event]).await;
        assert_eq!(sent, 0);
        assert_eq!(*h.chat.timezone_lookups.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn timezone_is_resolved_once() {
        let h = Harness::new(vec![user("u1")], at(9, 0));
        let events = vec![busy_event("a", at(9, 10)), busy_event("b", at(9, 12))];

        h.engine.notify_upcoming_events(&user("u1"), &events).await;
        assert_eq!(*h.chat.timezone_lookups.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn timezone_failure_stops_reminders_for_user() {
        let h = Harness::new(vec![user("u1")], at(9, 0));
        *h.chat.fail_timezone.lock().unwrap() = true;
        let events = vec![busy_event("a", at(9, 10)), busy_event("b", at(9, 12))];

        let sent = h.engine.notify_upcoming_events(&user("u1"), &events).await;
        assert_eq!(sent, 0);
        assert_eq!(*h.chat.timezone_lookups.lock().unwrap(), 1);
        assert!(h.chat.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_failure_does_not_stop_dispatch() {
        let h = Harness::new(vec![user("u1")], at(9, 0));
        h.chat
            .fail_dm_for
            .lock()
            .unwrap()
            .push("Meeting a".to_string());
        let events = vec![busy_event("a", at(9, 10)), busy_event("b", at(9, 12))];

        let sent = h.engine.notify_upcoming_events(&user("u1"), &events).await;
        assert_eq!(sent, 1);
        assert_eq!(h.chat.messages.lock().unwrap().len(), 2);
    }
}
