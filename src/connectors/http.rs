//! HTTP client shared by the connectors.
//!
//! Every request passes through the per-source rate limiter and retries
//! transient failures (network errors, 5xx, 429) with exponential backoff
//! plus jitter. Other 4xx statuses are immediately fatal.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, warn};

use super::rate_limit::RateLimiter;

/// Attempts beyond the first request.
const MAX_RETRIES: u32 = 3;
/// First backoff step; doubles each attempt.
const BASE_DELAY: Duration = Duration::from_secs(1);
/// Upper bound of the uniform jitter added to each backoff.
const JITTER_MS: u64 = 500;

pub const USER_AGENT: &str = concat!("permitwatch/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
    #[error("request to {url} failed after {attempts} attempts: {reason}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        reason: String,
    },
    #[error("invalid response body from {url}: {reason}")]
    Body { url: String, reason: String },
}

/// Rate-limited, retrying JSON client.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    rate_limiter: Arc<RateLimiter>,
    max_retries: u32,
    base_delay: Duration,
}

impl HttpClient {
    pub fn new(rate_limiter: Arc<RateLimiter>, timeout: Duration) -> Self {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            rate_limiter,
            max_retries: MAX_RETRIES,
            base_delay: BASE_DELAY,
        }
    }

    /// GET a JSON document. Extra headers are attached as given.
    pub async fn get_json(
        &self,
        url: &str,
        headers: &[(&str, String)],
    ) -> Result<serde_json::Value, HttpError> {
        let mut last_reason = String::new();

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.base_delay * 2u32.pow(attempt - 1)
                    + Duration::from_millis(rand::rng().random_range(0..JITTER_MS));
                debug!("retry {} for {} after {:?}", attempt, url, backoff);
                tokio::time::sleep(backoff).await;
            }

            self.rate_limiter.acquire().await;

            let mut request = self.client.get(url);
            for (name, value) in headers {
                request = request.header(*name, value);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        match response.json::<serde_json::Value>().await {
                            Ok(value) => return Ok(value),
                            Err(e) => {
                                return Err(HttpError::Body {
                                    url: url.to_string(),
                                    reason: e.to_string(),
                                })
                            }
                        }
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!("transient HTTP {} from {}", status, url);
                        last_reason = format!("HTTP {}", status);
                        continue;
                    }
                    // Other 4xx: not worth retrying.
                    return Err(HttpError::Status {
                        status: status.as_u16(),
                        url: url.to_string(),
                    });
                }
                Err(e) => {
                    warn!("request error for {}: {}", url, e);
                    last_reason = e.to_string();
                    continue;
                }
            }
        }

        Err(HttpError::RetriesExhausted {
            url: url.to_string(),
            attempts: self.max_retries + 1,
            reason: last_reason,
        })
    }

    /// Trivial reachability probe: one GET, no retries. Any HTTP response —
    /// including an error status — counts as reachable.
    pub async fn probe(&self, url: &str) -> Result<(), HttpError> {
        self.rate_limiter.acquire().await;
        self.client
            .get(url)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| HttpError::RetriesExhausted {
                url: url.to_string(),
                attempts: 1,
                reason: e.to_string(),
            })
    }
}
