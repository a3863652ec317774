use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use sqlx::SqlitePool;

use crate::db::models::*;
use crate::error::{AppError, AppResult};

// ============================================================================
// User Repository
// ============================================================================

pub struct UserRepository;

const USER_COLUMNS: &str = r#"
    id, remote_id, email, lang,
    update_status, get_confirmation, receive_reminders,
    receive_notifications_during_meeting, busy_status,
    subscription_id, last_status, active_events,
    created_at, updated_at
"#;

fn user_from_row(r: &SqliteRow) -> AppResult<User> {
    let busy_status: String = r.get("busy_status");
    let active_events: String = r.get("active_events");

    Ok(User {
        id: r.get("id"),
        remote_id: r.get("remote_id"),
        email: r.get("email"),
        lang: r.get("lang"),
        settings: UserSettings {
            update_status: r.get("update_status"),
            get_confirmation: r.get("get_confirmation"),
            receive_reminders: r.get("receive_reminders"),
            receive_notifications_during_meeting: r.get("receive_notifications_during_meeting"),
            busy_status: BusyStatus::try_from(busy_status.as_str()).map_err(AppError::Store)?,
            subscription_id: r.get("subscription_id"),
        },
        last_status: r.get("last_status"),
        active_events: serde_json::from_str(&active_events)
            .map_err(|e| AppError::Store(format!("invalid active_events: {}", e)))?,
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    })
}

fn encode_events(events: &[String]) -> AppResult<String> {
    serde_json::to_string(events)
        .map_err(|e| AppError::Store(format!("failed to encode active_events: {}", e)))
}

impl UserRepository {
    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)?;

        row.as_ref().map(user_from_row).transpose()
    }

    pub async fn find_by_remote_id(pool: &SqlitePool, remote_id: &str) -> AppResult<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE remote_id = ?",
            USER_COLUMNS
        ))
        .bind(remote_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        row.as_ref().map(user_from_row).transpose()
    }

    /// Summaries of every connected user, ordered by id.
    pub async fn list_summaries(pool: &SqlitePool) -> AppResult<Vec<UserSummary>> {
        let rows = sqlx::query("SELECT id, remote_id, email FROM users ORDER BY id")
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(rows
            .into_iter()
            .map(|r| UserSummary {
                id: r.get("id"),
                remote_id: r.get("remote_id"),
                email: r.get("email"),
            })
            .collect())
    }

    /// Insert the user, or replace the profile and settings of an existing
    /// row. `subscription_id`, `last_status` and `active_events` of an
    /// existing row are left alone; each has its own writer.
    pub async fn upsert(pool: &SqlitePool, user: &User) -> AppResult<()> {
        let now = Utc::now().naive_utc();
        let active_events = encode_events(&user.active_events)?;

        sqlx::query(
            r#"
            INSERT INTO users (
                id, remote_id, email, lang,
                update_status, get_confirmation, receive_reminders,
                receive_notifications_during_meeting, busy_status,
                last_status, active_events,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                remote_id = excluded.remote_id,
                email = excluded.email,
                lang = excluded.lang,
                update_status = excluded.update_status,
                get_confirmation = excluded.get_confirmation,
                receive_reminders = excluded.receive_reminders,
                receive_notifications_during_meeting = excluded.receive_notifications_during_meeting,
                busy_status = excluded.busy_status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&user.id)
        .bind(&user.remote_id)
        .bind(&user.email)
        .bind(&user.lang)
        .bind(user.settings.update_status)
        .bind(user.settings.get_confirmation)
        .bind(user.settings.receive_reminders)
        .bind(user.settings.receive_notifications_during_meeting)
        .bind(user.settings.busy_status.as_str())
        .bind(&user.last_status)
        .bind(active_events)
        .bind(user.created_at)
        .bind(now)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// Replace only the status to restore once the user is free again.
    pub async fn set_last_status(
        pool: &SqlitePool,
        id: &str,
        last_status: Option<&str>,
    ) -> AppResult<()> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query("UPDATE users SET last_status = ?, updated_at = ? WHERE id = ?")
            .bind(last_status)
            .bind(now)
            .bind(id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("user {}", id)));
        }
        Ok(())
    }

    /// Replace only the active-events snapshot.
    pub async fn set_active_events(pool: &SqlitePool, id: &str, events: &[String]) -> AppResult<()> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query("UPDATE users SET active_events = ?, updated_at = ? WHERE id = ?")
            .bind(encode_events(events)?)
            .bind(now)
            .bind(id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("user {}", id)));
        }
        Ok(())
    }

    pub async fn delete(pool: &SqlitePool, id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(())
    }
}
