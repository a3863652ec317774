use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Presence value applied while the user is in a meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusyStatus {
    #[default]
    Dnd,
    Away,
}

impl BusyStatus {
    /// Convert from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "dnd" => Some(BusyStatus::Dnd),
            "away" => Some(BusyStatus::Away),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BusyStatus::Dnd => "dnd",
            BusyStatus::Away => "away",
        }
    }
}

impl TryFrom<&str> for BusyStatus {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::from_str(value).ok_or_else(|| format!("Invalid busy status: {}", value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    pub update_status: bool,
    pub get_confirmation: bool,
    pub receive_reminders: bool,
    pub receive_notifications_during_meeting: bool,
    pub busy_status: BusyStatus,
    pub subscription_id: Option<String>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            update_status: true,
            get_confirmation: false,
            receive_reminders: true,
            receive_notifications_during_meeting: false,
            busy_status: BusyStatus::Dnd,
            subscription_id: None,
        }
    }
}

/// A chat user connected to a remote calendar account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub remote_id: String,
    pub email: String,
    pub lang: Option<String>,
    pub settings: UserSettings,
    /// Status held right before the last automatic busy status, if it was set manually.
    pub last_status: Option<String>,
    /// Identities of the busy events seen in the previous sync cycle.
    pub active_events: Vec<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl User {
    pub fn new(id: &str, remote_id: &str, email: &str) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id: id.to_string(),
            remote_id: remote_id.to_string(),
            email: email.to_string(),
            lang: None,
            settings: UserSettings::default(),
            last_status: None,
            active_events: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Entry of the connected-user index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: String,
    pub remote_id: String,
    pub email: String,
}

/// Partial settings update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUserSettings {
    pub update_status: Option<bool>,
    pub get_confirmation: Option<bool>,
    pub receive_reminders: Option<bool>,
    pub receive_notifications_during_meeting: Option<bool>,
    pub busy_status: Option<BusyStatus>,
    pub lang: Option<String>,
}
