use std::time::Duration;

use reqwest::StatusCode;

use crate::error::{AppError, AppResult};

const MAX_RETRIES: usize = 5;
const MAX_BACKOFF_SECS: u64 = 60;

/// Send a request, retrying on 429, 5xx and network errors with exponential
/// backoff. A `Retry-After` header overrides the computed wait.
///
/// Any other response is returned as-is so the caller can decide how to handle
/// 401/404 and friends. `upstream` names the remote in logs, and `on_exhausted`
/// builds the error once retries run out on an error status.
pub async fn send_with_backoff<F>(
    upstream: &str,
    make_request: F,
    on_exhausted: fn(String) -> AppError,
) -> AppResult<reqwest::Response>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut backoff_secs: u64 = 1;

    for attempt in 0..MAX_RETRIES {
        match (make_request)().send().await {
            Ok(resp) => {
                if resp.status() == StatusCode::TOO_MANY_REQUESTS
                    || resp.status().is_server_error()
                {
                    let wait_secs = retry_after_secs(&resp).unwrap_or(backoff_secs);

                    tracing::warn!(
                        "Transient {} error (status: {}). Retrying in {}s (attempt {}/{})",
                        upstream,
                        resp.status(),
                        wait_secs,
                        attempt + 1,
                        MAX_RETRIES
                    );

                    if attempt + 1 >= MAX_RETRIES {
                        let status = resp.status();
                        let err_text = resp.text().await.unwrap_or_default();
                        return Err(on_exhausted(format!(
                            "Failed after {} attempts ({}): {}",
                            attempt + 1,
                            status,
                            err_text
                        )));
                    }

                    tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                    backoff_secs = std::cmp::min(backoff_secs * 2, MAX_BACKOFF_SECS);
                    continue;
                }

                return Ok(resp);
            }
            Err(e) => {
                if attempt + 1 >= MAX_RETRIES {
                    return Err(e.into());
                }
                tracing::warn!(
                    "{} request failed: {}. Retrying in {}s (attempt {}/{})",
                    upstream,
                    e,
                    backoff_secs,
                    attempt + 1,
                    MAX_RETRIES
                );
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                backoff_secs = std::cmp::min(backoff_secs * 2, MAX_BACKOFF_SECS);
            }
        }
    }

    Err(on_exhausted(format!("Exceeded {} retry attempts", upstream)))
}

fn retry_after_secs(resp: &reqwest::Response) -> Option<u64> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

/// Turn a non-success response into an error carrying the response body.
pub async fn error_for_status(
    resp: reqwest::Response,
    what: &str,
    make_err: fn(String) -> AppError,
) -> AppResult<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let error_text = resp.text().await.unwrap_or_default();
    Err(make_err(format!("{} ({}): {}", what, status, error_text)))
}
