use std::{env, str::FromStr, time::Duration};

use serde::Deserialize;

use crate::services::engine::SyncSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub graph: GraphConfig,
    pub chat: ChatConfig,
    pub jwt: JwtConfig,
    pub webhook: WebhookConfig,
    pub sync: SyncConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Externally reachable base URL. Used to build the calendar webhook URL and
    /// the status-confirmation action URL.
    pub public_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub api_url: String,
    pub auth_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    pub server_url: String,
    pub bot_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Key for the per-subscription `clientState` HMAC.
    pub secret: String,
    /// Allowed requests per second (per IP) for the calendar webhook
    pub per_second: u32,
    /// Burst size for the calendar webhook
    pub burst: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub status_sync_enabled: bool,
    pub status_sync_interval_seconds: u64,
    pub calendar_view_window_minutes: i64,
    pub reminder_lead_minutes: i64,
    pub calendar_fetch_concurrency: usize,
    /// Per-cycle warnings emitted before the rest are truncated.
    pub log_truncate_limit: usize,
    pub subscription_renewal_enabled: bool,
    pub subscription_renewal_interval_seconds: u64,
    pub subscription_renew_before_expiry_hours: i64,
    pub subscription_ttl_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    /// Local user ids allowed to run all-user and audit operations.
    pub user_ids: Vec<String>,
}

impl AdminConfig {
    pub fn is_admin(&self, user_id: &str) -> bool {
        self.user_ids.iter().any(|id| id == user_id)
    }
}

impl SyncConfig {
    pub fn status_sync_interval(&self) -> Duration {
        Duration::from_secs(self.status_sync_interval_seconds)
    }

    pub fn subscription_renewal_interval(&self) -> Duration {
        Duration::from_secs(self.subscription_renewal_interval_seconds)
    }

    /// Engine timing derived from the configured intervals.
    pub fn engine_settings(&self) -> SyncSettings {
        SyncSettings {
            view_window: chrono::Duration::minutes(self.calendar_view_window_minutes),
            reminder_lead: chrono::Duration::minutes(self.reminder_lead_minutes),
            sync_interval: chrono::Duration::seconds(self.status_sync_interval_seconds as i64),
            log_truncate_limit: self.log_truncate_limit,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => match v.to_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

fn required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnv(key.to_string()))
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();
        let jwt_secret = required("JWT_SECRET")?;

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or(defaults.server.host),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                public_url: env::var("PUBLIC_URL")
                    .map(|u| u.trim_end_matches('/').to_string())
                    .unwrap_or(defaults.server.public_url),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 5),
            },
            graph: GraphConfig {
                tenant_id: required("GRAPH_TENANT_ID")?,
                client_id: required("GRAPH_CLIENT_ID")?,
                client_secret: required("GRAPH_CLIENT_SECRET")?,
                api_url: env::var("GRAPH_API_URL").unwrap_or(defaults.graph.api_url),
                auth_url: env::var("GRAPH_AUTH_URL").unwrap_or(defaults.graph.auth_url),
            },
            chat: ChatConfig {
                server_url: required("CHAT_SERVER_URL")?
                    .trim_end_matches('/')
                    .to_string(),
                bot_token: required("CHAT_BOT_TOKEN")?,
            },
            webhook: WebhookConfig {
                secret: env::var("WEBHOOK_SECRET").unwrap_or_else(|_| jwt_secret.clone()),
                per_second: env_or("RATE_LIMIT_WEBHOOKS_PER_SECOND", 10),
                burst: env_or("RATE_LIMIT_WEBHOOKS_BURST", 50),
            },
            jwt: JwtConfig { secret: jwt_secret },
            sync: SyncConfig {
                status_sync_enabled: env_flag("STATUS_SYNC_ENABLED", true),
                status_sync_interval_seconds: env_or("STATUS_SYNC_INTERVAL_SECONDS", 300),
                calendar_view_window_minutes: env_or("CALENDAR_VIEW_WINDOW_MINUTES", 10),
                reminder_lead_minutes: env_or("REMINDER_LEAD_MINUTES", 10),
                calendar_fetch_concurrency: env_or("CALENDAR_FETCH_CONCURRENCY", 4usize).max(1),
                log_truncate_limit: env_or("LOG_TRUNCATE_LIMIT", 5),
                subscription_renewal_enabled: env_flag("SUBSCRIPTION_RENEWAL_ENABLED", true),
                subscription_renewal_interval_seconds: env_or(
                    "SUBSCRIPTION_RENEWAL_INTERVAL_SECONDS",
                    3600,
                ),
                subscription_renew_before_expiry_hours: env_or(
                    "SUBSCRIPTION_RENEW_BEFORE_EXPIRY_HOURS",
                    24,
                ),
                subscription_ttl_hours: env_or("SUBSCRIPTION_TTL_HOURS", 48),
            },
            admin: AdminConfig {
                user_ids: env::var("ADMIN_USER_IDS")
                    .map(|v| {
                        v.split(',')
                            .map(|s| s.trim().to_string())
                            .filter(|s| !s.is_empty())
                            .collect()
                    })
                    .unwrap_or_default(),
            },
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                public_url: "http://localhost:8080".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/app.db".to_string(),
                max_connections: 5,
            },
            graph: GraphConfig {
                tenant_id: String::new(),
                client_id: String::new(),
                client_secret: String::new(),
                api_url: "https://graph.microsoft.com/v1.0".to_string(),
                auth_url: "https://login.microsoftonline.com".to_string(),
            },
            chat: ChatConfig {
                server_url: "http://localhost:8065".to_string(),
                bot_token: String::new(),
            },
            jwt: JwtConfig {
                secret: String::new(),
            },
            webhook: WebhookConfig {
                secret: String::new(),
                per_second: 10,
                burst: 50,
            },
            sync: SyncConfig {
                status_sync_enabled: true,
                status_sync_interval_seconds: 300,
                calendar_view_window_minutes: 10,
                reminder_lead_minutes: 10,
                calendar_fetch_concurrency: 4,
                log_truncate_limit: 5,
                subscription_renewal_enabled: true,
                subscription_renewal_interval_seconds: 3600,
                subscription_renew_before_expiry_hours: 24,
                subscription_ttl_hours: 48,
            },
            admin: AdminConfig {
                user_ids: Vec::new(),
            },
        }
    }
}
