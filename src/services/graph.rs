//! Microsoft Graph implementation of [`CalendarGateway`].

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use futures::stream::{self, StreamExt};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::Config;
use crate::db::models::{RemoteSubscription, Subscription};
use crate::error::{AppError, AppResult};
use crate::services::calendar::{
    CalendarEvent, CalendarGateway, CalendarViewRequest, CalendarViewResult, ShowAs,
};
use crate::services::http::{error_for_status, send_with_backoff};
use crate::services::webhooks::WebhookService;

const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";
const CALENDAR_VIEW_PAGE_SIZE: &str = "20";
const SUBSCRIPTION_CHANGE_TYPES: &str = "created,updated,deleted";

#[derive(Debug, Clone)]
pub struct GraphService {
    client: Client,
    api_url: String,
    token_url: String,
    client_id: String,
    client_secret: String,
    webhook_secret: String,
    subscription_ttl: Duration,
    fetch_concurrency: usize,
    app_access_token: Arc<RwLock<Option<AppAccessToken>>>,
}

#[derive(Debug, Clone)]
pub struct AppAccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct AppAccessTokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct GraphList<T> {
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphDateTime {
    date_time: String,
    time_zone: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphEvent {
    #[serde(rename = "iCalUId", default)]
    ical_uid: String,
    #[serde(default)]
    subject: String,
    start: GraphDateTime,
    end: GraphDateTime,
    #[serde(default)]
    show_as: ShowAs,
    #[serde(default)]
    is_cancelled: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSubscriptionRequest<'a> {
    change_type: &'a str,
    notification_url: &'a str,
    resource: &'a str,
    expiration_date_time: String,
    client_state: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RenewSubscriptionRequest {
    expiration_date_time: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphSubscription {
    id: String,
    #[serde(default)]
    resource: String,
    #[serde(default)]
    notification_url: String,
    expiration_date_time: DateTime<Utc>,
}

impl GraphSubscription {
    fn into_remote(self, fallback_creator: Option<&str>) -> RemoteSubscription {
        let creator_id = resource_owner(&self.resource)
            .or(fallback_creator)
            .unwrap_or_default()
            .to_string();
        RemoteSubscription {
            id: self.id,
            creator_id,
            resource: self.resource,
            notification_url: self.notification_url,
            expires_at: self.expiration_date_time,
        }
    }
}

/// Remote user id from a `users/{id}/events` resource path.
fn resource_owner(resource: &str) -> Option<&str> {
    let mut parts = resource.trim_start_matches('/').split('/');
    match (parts.next(), parts.next()) {
        (Some(root), Some(id)) if root.eq_ignore_ascii_case("users") && !id.is_empty() => Some(id),
        _ => None,
    }
}

fn parse_graph_datetime(value: &GraphDateTime) -> AppResult<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(&value.date_time, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|e| AppError::Gateway(format!("Invalid event time {}: {}", value.date_time, e)))?;

    if value.time_zone.is_empty() || value.time_zone.eq_ignore_ascii_case("UTC") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    let tz: chrono_tz::Tz = value
        .time_zone
        .parse()
        .map_err(|_| AppError::Gateway(format!("Unknown event time zone: {}", value.time_zone)))?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| {
            AppError::Gateway(format!(
                "Nonexistent local time {} in {}",
                value.date_time, value.time_zone
            ))
        })
}

impl TryFrom<GraphEvent> for CalendarEvent {
    type Error = AppError;

    fn try_from(e: GraphEvent) -> Result<Self, Self::Error> {
        Ok(CalendarEvent {
            start: parse_graph_datetime(&e.start)?,
            end: parse_graph_datetime(&e.end)?,
            ical_uid: e.ical_uid,
            subject: e.subject,
            show_as: e.show_as,
            is_cancelled: e.is_cancelled,
        })
    }
}

impl GraphService {
    pub fn new(config: &Config) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self {
            client,
            api_url: config.graph.api_url.trim_end_matches('/').to_string(),
            token_url: format!(
                "{}/{}/oauth2/v2.0/token",
                config.graph.auth_url.trim_end_matches('/'),
                config.graph.tenant_id
            ),
            client_id: config.graph.client_id.clone(),
            client_secret: config.graph.client_secret.clone(),
            webhook_secret: config.webhook.secret.clone(),
            subscription_ttl: Duration::hours(config.sync.subscription_ttl_hours),
            fetch_concurrency: config.sync.calendar_fetch_concurrency.max(1),
            app_access_token: Arc::new(RwLock::new(None)),
        })
    }

    pub async fn refresh_app_access_token(&self) -> AppResult<()> {
        let response = send_with_backoff(
            "calendar",
            || {
                self.client.post(&self.token_url).form(&[
                    ("client_id", self.client_id.as_str()),
                    ("client_secret", self.client_secret.as_str()),
                    ("scope", GRAPH_SCOPE),
                    ("grant_type", "client_credentials"),
                ])
            },
            AppError::Gateway,
        )
        .await?;
        let response =
            error_for_status(response, "Failed to get app access token", AppError::Gateway).await?;

        let token_response: AppAccessTokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::Gateway(format!("Failed to parse token response: {}", e)))?;

        let expires_at = Utc::now() + Duration::seconds(token_response.expires_in);
        *self.app_access_token.write().await = Some(AppAccessToken {
            token: token_response.access_token,
            expires_at,
        });

        tracing::info!("Refreshed calendar app access token; expires at {}", expires_at);
        Ok(())
    }

    /// Current app token, refreshed when it expires within a minute.
    pub async fn get_valid_app_access_token(&self) -> AppResult<String> {
        const REFRESH_MARGIN_SECS: i64 = 60;

        {
            let guard = self.app_access_token.read().await;
            if let Some(ref t) = *guard {
                if t.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) > Utc::now() {
                    return Ok(t.token.clone());
                }
            }
        }

        self.refresh_app_access_token().await?;

        let guard = self.app_access_token.read().await;
        guard
            .as_ref()
            .map(|t| t.token.clone())
            .ok_or_else(|| AppError::Gateway("No app access token available".to_string()))
    }

    /// Run a request with the app token, refreshing the token once on 401.
    async fn send_app_request_with_token<F>(&self, make_request: F) -> AppResult<reqwest::Response>
    where
        F: Fn(&str) -> reqwest::RequestBuilder,
    {
        let mut refreshed_token = false;
        loop {
            let token = self.get_valid_app_access_token().await?;
            let response =
                send_with_backoff("calendar", || make_request(&token), AppError::Gateway).await?;

            if response.status() != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }
            if refreshed_token {
                let error_text = response.text().await.unwrap_or_default();
                return Err(AppError::Gateway(format!(
                    "Unauthorized calendar request: {}",
                    error_text
                )));
            }

            tracing::warn!("Unauthorized calendar request. Refreshing token and retrying.");
            self.refresh_app_access_token().await?;
            refreshed_token = true;
        }
    }

    async fn fetch_calendar_view(&self, req: &CalendarViewRequest) -> AppResult<Vec<CalendarEvent>> {
        let url = format!(
            "{}/users/{}/calendarView",
            self.api_url,
            urlencoding::encode(&req.remote_user_id)
        );
        let start = req.start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let end = req.end.to_rfc3339_opts(SecondsFormat::Secs, true);

        let response = self
            .send_app_request_with_token(|token| {
                self.client
                    .get(&url)
                    .bearer_auth(token)
                    .header("Prefer", "outlook.timezone=\"UTC\"")
                    .query(&[
                        ("startDateTime", start.as_str()),
                        ("endDateTime", end.as_str()),
                        ("$top", CALENDAR_VIEW_PAGE_SIZE),
                    ])
            })
            .await?;
        let response =
            error_for_status(response, "Failed to get calendar view", AppError::Gateway).await?;

        let page: GraphList<GraphEvent> = response
            .json()
            .await
            .map_err(|e| AppError::Gateway(format!("Failed to parse calendar view: {}", e)))?;

        page.value.into_iter().map(CalendarEvent::try_from).collect()
    }

    fn client_state(&self, creator_id: &str) -> AppResult<String> {
        WebhookService::sign(&self.webhook_secret, creator_id.as_bytes())
    }
}

#[async_trait]
impl CalendarGateway for GraphService {
    async fn fetch_calendar_views(
        &self,
        requests: Vec<CalendarViewRequest>,
    ) -> AppResult<Vec<CalendarViewResult>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        // Without a token no request can succeed
        self.get_valid_app_access_token().await?;

        tracing::debug!(
            "Fetching calendar views for {} users ({} at a time)",
            requests.len(),
            self.fetch_concurrency
        );

        let results = stream::iter(requests)
            .map(|req| async move {
                let events = self.fetch_calendar_view(&req).await;
                if let Err(ref e) = events {
                    tracing::debug!("Calendar view for {} failed: {}", req.remote_user_id, e);
                }
                CalendarViewResult {
                    remote_user_id: req.remote_user_id,
                    events,
                }
            })
            .buffer_unordered(self.fetch_concurrency)
            .collect::<Vec<_>>()
            .await;

        Ok(results)
    }

    async fn create_subscription(
        &self,
        remote_user_id: &str,
        notification_url: &str,
    ) -> AppResult<RemoteSubscription> {
        let resource = format!("users/{}/events", remote_user_id);
        let request = CreateSubscriptionRequest {
            change_type: SUBSCRIPTION_CHANGE_TYPES,
            notification_url,
            resource: &resource,
            expiration_date_time: (Utc::now() + self.subscription_ttl)
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            client_state: self.client_state(remote_user_id)?,
        };

        let response = self
            .send_app_request_with_token(|token| {
                self.client
                    .post(format!("{}/subscriptions", self.api_url))
                    .bearer_auth(token)
                    .json(&request)
            })
            .await?;
        let response =
            error_for_status(response, "Failed to create subscription", AppError::Gateway).await?;

        let created: GraphSubscription = response
            .json()
            .await
            .map_err(|e| AppError::Gateway(format!("Failed to parse subscription: {}", e)))?;

        tracing::debug!(
            "Created calendar subscription {} for {} (expires {})",
            created.id,
            remote_user_id,
            created.expiration_date_time
        );
        Ok(created.into_remote(None))
    }

    async fn renew_subscription(
        &self,
        id: &str,
        current: &Subscription,
    ) -> AppResult<RemoteSubscription> {
        let request = RenewSubscriptionRequest {
            expiration_date_time: (Utc::now() + self.subscription_ttl)
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        };
        let url = format!("{}/subscriptions/{}", self.api_url, urlencoding::encode(id));

        let response = self
            .send_app_request_with_token(|token| {
                self.client.patch(&url).bearer_auth(token).json(&request)
            })
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(AppError::SubscriptionNotFound(id.to_string()));
        }
        let response =
            error_for_status(response, "Failed to renew subscription", AppError::Gateway).await?;

        let renewed: GraphSubscription = response
            .json()
            .await
            .map_err(|e| AppError::Gateway(format!("Failed to parse subscription: {}", e)))?;

        tracing::debug!(
            "Renewed calendar subscription {} (expires {})",
            id,
            renewed.expiration_date_time
        );

        let mut remote = renewed.into_remote(Some(&current.creator_id));
        if remote.notification_url.is_empty() {
            remote.notification_url = current.notification_url.clone();
        }
        if remote.resource.is_empty() {
            remote.resource = current.resource.clone();
        }
        Ok(remote)
    }

    async fn delete_subscription(&self, sub: &RemoteSubscription) -> AppResult<()> {
        let url = format!(
            "{}/subscriptions/{}",
            self.api_url,
            urlencoding::encode(&sub.id)
        );

        let response = self
            .send_app_request_with_token(|token| self.client.delete(&url).bearer_auth(token))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!("Calendar subscription {} already gone", sub.id);
            return Ok(());
        }
        error_for_status(response, "Failed to delete subscription", AppError::Gateway).await?;

        tracing::debug!("Deleted calendar subscription {}", sub.id);
        Ok(())
    }

    async fn list_subscriptions(&self) -> AppResult<Vec<RemoteSubscription>> {
        let mut out = Vec::new();
        let mut next = Some(format!("{}/subscriptions", self.api_url));

        while let Some(url) = next.take() {
            let response = self
                .send_app_request_with_token(|token| self.client.get(&url).bearer_auth(token))
                .await?;
            let response =
                error_for_status(response, "Failed to list subscriptions", AppError::Gateway)
                    .await?;

            let page: GraphList<GraphSubscription> = response.json().await.map_err(|e| {
                AppError::Gateway(format!("Failed to parse subscriptions: {}", e))
            })?;

            out.extend(page.value.into_iter().map(|s| s.into_remote(None)));
            next = page.next_link;
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_owner_extracts_user_id() {
        assert_eq!(resource_owner("users/abc-123/events"), Some("abc-123"));
        assert_eq!(resource_owner("/Users/abc-123/Events"), Some("abc-123"));
        assert_eq!(resource_owner("me/events"), None);
        assert_eq!(resource_owner(""), None);
    }

    #[test]
    fn graph_event_maps_to_utc() {
        let raw = r#"{
            "iCalUId": "uid-1",
            "subject": "Planning",
            "start": {"dateTime": "2024-10-01T11:00:00.0000000", "timeZone": "Europe/Berlin"},
            "end": {"dateTime": "2024-10-01T09:30:00.0000000", "timeZone": "UTC"},
            "showAs": "busy",
            "isCancelled": false
        }"#;
        let event: GraphEvent = serde_json::from_str(raw).unwrap();
        let event = CalendarEvent::try_from(event).unwrap();

        assert_eq!(event.identity(), "uid-1 2024-10-01T09:00:00Z");
        assert_eq!(
            event.end,
            Utc.with_ymd_and_hms(2024, 10, 1, 9, 30, 0).unwrap()
        );
        assert!(event.is_busy());
    }

    #[test]
    fn unknown_time_zone_is_a_gateway_error() {
        let dt = GraphDateTime {
            date_time: "2024-10-01T11:00:00".to_string(),
            time_zone: "Mars/Olympus".to_string(),
        };
        let err = parse_graph_datetime(&dt).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Gateway);
    }

    #[test]
    fn subscription_creator_falls_back_to_current_record() {
        let sub = GraphSubscription {
            id: "sub-1".to_string(),
            resource: String::new(),
            notification_url: String::new(),
            expiration_date_time: Utc::now(),
        };
        assert_eq!(sub.into_remote(Some("remote-1")).creator_id, "remote-1");
    }
}
