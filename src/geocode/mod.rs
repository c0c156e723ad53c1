//! Geocoding client with a two-tier cache.
//!
//! Resolves address strings to WGS84 coordinates against a Nominatim-style
//! search endpoint. Lookups check the in-memory map first, then the
//! persistent cache table, then the network. The upstream rate limit is
//! process-wide: a single shared limiter spaces requests at least 1.1 s
//! apart no matter how many sources are ingesting.
//!
//! Negative answers from the service ("no result") are cached; transient
//! failures (429, network errors) are not, so they get retried on a later
//! lookup.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::repository::Store;

/// Minimum spacing between upstream requests.
const REQUEST_SPACING: Duration = Duration::from_millis(1100);
/// Retries after the first attempt.
const MAX_RETRIES: u32 = 2;
/// Pause between retries.
const RETRY_DELAY: Duration = Duration::from_secs(3);

pub struct GeocodeClient {
    http: Client,
    base_url: String,
    store: Store,
    /// Hot path: address -> cached answer (None = cached negative).
    memory: Mutex<HashMap<String, Option<(f64, f64)>>>,
    /// Held across the upstream call so spacing is global.
    last_request: Mutex<Option<Instant>>,
}

impl GeocodeClient {
    pub fn new(base_url: &str, store: Store) -> Self {
        let http = Client::builder()
            .user_agent(crate::connectors::USER_AGENT)
            .timeout(Duration::from_secs(20))
            .build()
            .expect("failed to build geocoder HTTP client");

        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            store,
            memory: Mutex::new(HashMap::new()),
            last_request: Mutex::new(None),
        }
    }

    /// Resolve an address. Absent coordinates on failure or no result.
    pub async fn geocode(&self, address: &str) -> Option<(f64, f64)> {
        let key = address.trim().to_lowercase();
        if key.is_empty() {
            return None;
        }

        if let Some(cached) = self.memory.lock().await.get(&key) {
            return *cached;
        }

        if let Ok(Some(entry)) = self.store.get_geocode(&key).await {
            debug!(
                "geocode cache hit for {:?} ({}, cached {})",
                entry.address,
                entry.display_name.as_deref().unwrap_or("no result"),
                entry.fetched_at.to_rfc3339()
            );
            let answer = match (entry.lat, entry.lon) {
                (Some(lat), Some(lon)) => Some((lat, lon)),
                _ => None,
            };
            self.memory.lock().await.insert(key, answer);
            return answer;
        }

        match self.fetch(address).await {
            Ok(result) => {
                let (lat, lon, display_name) = match &result {
                    Some((lat, lon, name)) => (Some(*lat), Some(*lon), Some(name.clone())),
                    None => (None, None, None),
                };
                if let Err(e) = self.store.put_geocode(&key, lat, lon, display_name).await {
                    warn!("failed to persist geocode cache entry: {}", e);
                }
                let answer = result.map(|(lat, lon, _)| (lat, lon));
                self.memory.lock().await.insert(key, answer);
                answer
            }
            // Transient failure: nothing cached, retried on a later lookup.
            Err(e) => {
                warn!("geocode failed for {:?}: {}", address, e);
                None
            }
        }
    }

    /// One upstream lookup with spacing and retries. `Ok(None)` is a
    /// definitive "no result"; `Err` is transient.
    async fn fetch(&self, address: &str) -> Result<Option<(f64, f64, String)>, String> {
        let url = format!(
            "{}/search?q={}&format=json&addressdetails=1&limit=1",
            self.base_url,
            urlencoding::encode(address)
        );

        let mut last_error = String::new();
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(RETRY_DELAY).await;
            }

            // The lock is held across the request so concurrent callers
            // cannot collectively exceed the upstream policy.
            let mut last = self.last_request.lock().await;
            if let Some(previous) = *last {
                let elapsed = previous.elapsed();
                if elapsed < REQUEST_SPACING {
                    tokio::time::sleep(REQUEST_SPACING - elapsed).await;
                }
            }
            *last = Some(Instant::now());

            let response = match self.http.get(&url).send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = e.to_string();
                    drop(last);
                    continue;
                }
            };
            drop(last);

            let status = response.status();
            if status.as_u16() == 429 || status.is_server_error() {
                last_error = format!("HTTP {}", status);
                continue;
            }
            if !status.is_success() {
                return Err(format!("HTTP {}", status));
            }

            let results: Vec<serde_json::Value> = match response.json().await {
                Ok(v) => v,
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };

            let Some(first) = results.first() else {
                debug!("no geocode result for {:?}", address);
                return Ok(None);
            };

            let lat = first
                .get("lat")
                .and_then(crate::normalize::coerce_f64);
            let lon = first
                .get("lon")
                .and_then(crate::normalize::coerce_f64);
            let display_name = first
                .get("display_name")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();

            return match (lat, lon) {
                (Some(lat), Some(lon)) => Ok(Some((lat, lon, display_name))),
                _ => Ok(None),
            };
        }

        Err(last_error)
    }
}

/// Persistent cache row.
#[derive(Debug, Clone)]
pub struct GeocodeEntry {
    pub address: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub display_name: Option<String>,
    pub fetched_at: chrono::DateTime<Utc>,
}
