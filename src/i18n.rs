/*
Simple i18n helper for user-facing text.

This module provides:
- A tiny embedded translations store for EN/RU (compile-time embedded JSON).
- A simple `tr` function to lookup translations by key + optional params.
- `t` / `t_with` convenience wrappers using the default language (DEFAULT_LANG).

Usage:
    use crate::i18n;
    let msg = i18n::t("errors.not_connected");
    let msg_with = i18n::t_with("reminder.upcoming", &[("minutes", "10")]);

Notes:
- Placeholders in translation strings use single-brace format: `{name}`.
- Default language is `en`. If a key is missing for the requested language,
  the fallback language will be used.
*/

use std::collections::HashMap;
use std::sync::OnceLock;

pub const DEFAULT_LANG: &str = "en";

static TRANSLATIONS: OnceLock<HashMap<String, HashMap<String, String>>> = OnceLock::new();

const EN_JSON: &str = r#"
{
  "errors.not_connected": "It looks like your chat account is not connected to a calendar account. Please connect your account first.",
  "sync.no_connected_users": "No connected users found",
  "sync.no_users_need_sync": "No users need to be synced",
  "sync.no_calendar_views": "No calendar views found",
  "sync.no_status_updates": "No users want their status updated",
  "sync.summary": "Processed {processed} users: {changed} status changes, {failed} failures",
  "reminder.upcoming": "You have an upcoming event in {minutes} minutes:",
  "event.no_subject": "(no subject)",
  "status.prompt.busy": "You have a meeting starting now. Do you want to set your status to **{status}**?",
  "status.prompt.free": "Your meeting has ended. Do you want to set your status to **{status}**?",
  "status.prompt.yes": "Yes",
  "status.prompt.no": "No",
  "status.confirmed": "Your status has been changed to **{status}**.",
  "status.declined": "Your status has not been changed.",
  "status.online": "Online",
  "status.away": "Away",
  "status.dnd": "Do Not Disturb",
  "status.offline": "Offline",
  "user.connected": "Your calendar account is now connected",
  "user.disconnected": "Your calendar account has been disconnected",
  "subscription.deleted": "Calendar subscription deleted",
  "subscription.none": "You have no calendar subscription",
  "app.name": "Calendar Presence"
}
"#;

const RU_JSON: &str = r#"
{
  "errors.not_connected": "Похоже, ваш аккаунт в чате не связан с аккаунтом календаря. Сначала подключите аккаунт.",
  "sync.no_connected_users": "Подключённые пользователи не найдены",
  "sync.no_users_need_sync": "Нет пользователей для синхронизации",
  "sync.no_calendar_views": "Данные календаря не найдены",
  "sync.no_status_updates": "Ни один пользователь не хочет обновлять статус",
  "sync.summary": "Обработано пользователей: {processed}, изменений статуса: {changed}, ошибок: {failed}",
  "reminder.upcoming": "Через {minutes} минут у вас начинается событие:",
  "event.no_subject": "(без темы)",
  "status.prompt.busy": "У вас начинается встреча. Установить статус **{status}**?",
  "status.prompt.free": "Ваша встреча закончилась. Установить статус **{status}**?",
  "status.prompt.yes": "Да",
  "status.prompt.no": "Нет",
  "status.confirmed": "Ваш статус изменён на **{status}**.",
  "status.declined": "Ваш статус не изменён.",
  "status.online": "В сети",
  "status.away": "Отошёл",
  "status.dnd": "Не беспокоить",
  "status.offline": "Не в сети",
  "user.connected": "Аккаунт календаря подключён",
  "user.disconnected": "Аккаунт календаря отключён",
  "subscription.deleted": "Подписка на календарь удалена",
  "subscription.none": "У вас нет подписки на календарь",
  "app.name": "Календарный статус"
}
"#;

/// Initialize translations map (lazy).
fn build_translations() -> HashMap<String, HashMap<String, String>> {
    let mut out: HashMap<String, HashMap<String, String>> = HashMap::new();

    // Parse EN
    let en_map: HashMap<String, String> = serde_json::from_str(EN_JSON).unwrap_or_else(|e| {
        panic!("failed to parse EN_JSON in i18n module: {}", e);
    });
    out.insert("en".to_string(), en_map);

    // Parse RU
    let ru_map: HashMap<String, String> = serde_json::from_str(RU_JSON).unwrap_or_else(|e| {
        panic!("failed to parse RU_JSON in i18n module: {}", e);
    });
    out.insert("ru".to_string(), ru_map);

    out
}

/// Returns the global translations map (lang -> (key -> message)).
fn translations() -> &'static HashMap<String, HashMap<String, String>> {
    TRANSLATIONS.get_or_init(build_translations)
}

/// Normalize a language tag into a short, lowercase code (e.g. "en-US" -> "en").
pub fn normalize_language(lang: &str) -> String {
    lang.split('-').next().unwrap_or(lang).to_lowercase()
}

/// Returns true if the given language code has a translation table.
pub fn is_supported_language(lang: &str) -> bool {
    translations().contains_key(lang)
}

/// Translate a key using an explicit language (or default if None).
///
/// Placeholders use single braces (`{name}`) and are replaced from `params`.
/// Missing keys fall back to the default language, then to the key itself.
pub fn tr(lang: Option<&str>, key: &str, params: Option<&[(&str, &str)]>) -> String {
    let map = translations();

    let desired = lang.unwrap_or(DEFAULT_LANG);

    let val = map
        .get(desired)
        .and_then(|m| m.get(key))
        .cloned()
        .or_else(|| map.get(DEFAULT_LANG).and_then(|m| m.get(key)).cloned())
        .unwrap_or_else(|| key.to_string());

    if let Some(params) = params {
        let mut s = val;
        for (k, v) in params {
            s = s.replace(&format!("{{{}}}", k), v);
        }
        s
    } else {
        val
    }
}

/// Convenience wrapper: translate using default language (DEFAULT_LANG).
pub fn t(key: &str) -> String {
    tr(None, key, None)
}

/// Convenience wrapper with params (default language).
pub fn t_with(key: &str, params: &[(&str, &str)]) -> String {
    tr(None, key, Some(params))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tr_basic() {
        let s = tr(Some("en"), "errors.not_connected", None);
        assert!(s.contains("not connected"));
    }

    #[test]
    fn test_t_with_params() {
        let s = t_with(
            "sync.summary",
            &[("processed", "3"), ("changed", "2"), ("failed", "1")],
        );
        assert_eq!(s, "Processed 3 users: 2 status changes, 1 failures");
    }

    #[test]
    fn test_fallback_to_default() {
        let s = tr(Some("fr"), "sync.no_connected_users", None);
        assert_eq!(s, "No connected users found");
    }

    #[test]
    fn missing_key_returns_key() {
        let k = "non.existent.key";
        let s = t(k);
        assert_eq!(s, k.to_string());
    }

    #[test]
    fn every_english_key_has_a_russian_translation() {
        let map = translations();
        let en = &map["en"];
        let ru = &map["ru"];
        for key in en.keys() {
            assert!(ru.contains_key(key), "missing ru translation for {}", key);
        }
    }

    #[test]
    fn test_is_supported_language() {
        assert!(is_supported_language("ru"));
        assert!(is_supported_language("en"));
        assert!(!is_supported_language("fr"));
    }

    #[test]
    fn test_normalize_language() {
        assert_eq!(normalize_language("en-US"), "en");
        assert_eq!(normalize_language("ru"), "ru");
        assert_eq!(normalize_language("EN-us"), "en");
    }
}
