//! eBird API client
//!
//! Thin, typed access to the eBird v2 HTTP API with the plumbing every
//! caller needs: token auth, retry with exponential backoff, a process-wide
//! request-spacing gate, a circuit breaker, and client-side clamps on the
//! service's documented limits.
//!
//! The subset of endpoints the pipeline consumes is abstracted behind the
//! [`ObservationApi`] trait so tests can substitute in-memory stubs.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::{EBIRD_MAX_DAYS_BACK, EBIRD_MAX_DISTANCE_KM, EBIRD_MAX_RESULTS, MIN_REQUEST_INTERVAL_MS};
use crate::ebird::types::{Hotspot, HotspotInfo, Observation, TaxonomyEntry};
use crate::http_client;

/// Transport and protocol failures against the observation service
#[derive(Debug, thiserror::Error)]
pub enum ObservationError {
    /// HTTP 429. Retryable after backoff.
    #[error("Rate limit exceeded - please try again later")]
    RateLimited,

    /// HTTP 5xx. Transient; retryable.
    #[error("Server error: eBird API returned {0}")]
    Server(u16),

    /// HTTP 404. Invalid region or species code; not retryable.
    #[error("Not found: invalid region or species code for {0}")]
    NotFound(String),

    /// HTTP 401/403. Fatal: the API token is missing or invalid.
    #[error("Authentication failed for eBird API: {0}")]
    Auth(String),

    /// HTTP 400. Caller passed invalid parameters; not retryable.
    #[error("Bad request: invalid parameters for {0}")]
    BadRequest(String),

    /// Per-call deadline exceeded. Treated as transient.
    #[error("Request timeout - eBird API is not responding")]
    Timeout,

    /// Connection-level failure. Treated as transient.
    #[error("Connection error: {0}")]
    Network(String),

    /// Response body did not match the expected shape
    #[error("Failed to parse eBird response: {0}")]
    Decode(String),

    /// Circuit breaker is open after repeated consecutive failures
    #[error("eBird API circuit breaker is open")]
    CircuitOpen,

    #[error("Unexpected response: {0}")]
    Unexpected(u16),
}

impl ObservationError {
    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Server(_) | Self::Timeout | Self::Network(_)
        )
    }

    /// Whether this failure should abort the whole pipeline
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

/// Map a non-success HTTP status to a typed error
fn classify_status(status: StatusCode, path: &str) -> ObservationError {
    match status.as_u16() {
        400 => ObservationError::BadRequest(path.to_string()),
        401 | 403 => ObservationError::Auth(path.to_string()),
        404 => ObservationError::NotFound(path.to_string()),
        429 => ObservationError::RateLimited,
        code @ 500..=599 => ObservationError::Server(code),
        code => ObservationError::Unexpected(code),
    }
}

/// Retry behavior for observation-service requests
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Initial backoff before the second attempt
    pub initial_backoff: Duration,
    /// Backoff ceiling
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Config with no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Serialized gate enforcing minimum spacing between outgoing requests.
///
/// A worker holds the lock while it waits out the remainder of the interval,
/// so concurrent workers queue behind it and sends stay spaced even under
/// full fan-out.
pub struct RateGate {
    min_interval: Duration,
    last_send: tokio::sync::Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_send: tokio::sync::Mutex::new(None),
        }
    }

    /// Wait until at least `min_interval` has passed since the previous send,
    /// then record this send.
    pub async fn acquire(&self) {
        let mut last = self.last_send.lock().await;
        if let Some(prev) = *last {
            let next_allowed = prev + self.min_interval;
            let now = Instant::now();
            if now < next_allowed {
                tokio::time::sleep_until(next_allowed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

const BREAKER_FAILURE_THRESHOLD: u32 = 5;
const BREAKER_OPEN_SECS: u64 = 60;

#[derive(Debug)]
enum BreakerState {
    Closed { failures: u32 },
    Open { since: Instant },
    HalfOpen,
}

/// Circuit breaker over the observation service: five consecutive transport
/// failures open it for sixty seconds, after which a single half-open probe
/// is allowed through.
pub struct CircuitBreaker {
    state: std::sync::Mutex<BreakerState>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            state: std::sync::Mutex::new(BreakerState::Closed { failures: 0 }),
        }
    }

    /// Check whether a call may proceed
    pub fn check(&self) -> Result<(), ObservationError> {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        match &*state {
            BreakerState::Closed { .. } => Ok(()),
            BreakerState::Open { since } => {
                if since.elapsed() >= Duration::from_secs(BREAKER_OPEN_SECS) {
                    *state = BreakerState::HalfOpen;
                    Ok(())
                } else {
                    Err(ObservationError::CircuitOpen)
                }
            }
            // One probe in flight; hold further calls until it resolves
            BreakerState::HalfOpen => Err(ObservationError::CircuitOpen),
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        *state = BreakerState::Closed { failures: 0 };
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        *state = match &*state {
            BreakerState::Closed { failures } => {
                let failures = failures + 1;
                if failures >= BREAKER_FAILURE_THRESHOLD {
                    BreakerState::Open {
                        since: Instant::now(),
                    }
                } else {
                    BreakerState::Closed { failures }
                }
            }
            BreakerState::HalfOpen | BreakerState::Open { .. } => BreakerState::Open {
                since: Instant::now(),
            },
        };
    }
}

/// The observation-service capability the pipeline depends on.
///
/// `EbirdApiClient` is the production implementation; tests inject
/// in-memory stubs.
#[async_trait]
pub trait ObservationApi: Send + Sync {
    /// Recent nearby observations, optionally restricted to one species
    async fn nearby_observations(
        &self,
        lat: f64,
        lng: f64,
        distance_km: u32,
        days_back: u32,
        species_code: Option<&str>,
    ) -> Result<Vec<Observation>, ObservationError>;

    /// Recent observations of a species in a region
    async fn species_observations(
        &self,
        species_code: &str,
        region_code: &str,
        days_back: u32,
    ) -> Result<Vec<Observation>, ObservationError>;

    /// Registered hotspots in a region
    async fn hotspots(&self, region_code: &str) -> Result<Vec<Hotspot>, ObservationError>;

    /// Registered hotspots near a coordinate
    async fn nearby_hotspots(
        &self,
        lat: f64,
        lng: f64,
        distance_km: u32,
    ) -> Result<Vec<Hotspot>, ObservationError>;

    /// The full eBird taxonomy
    async fn taxonomy(&self) -> Result<Vec<TaxonomyEntry>, ObservationError>;
}

/// HTTP client for the eBird v2 API
pub struct EbirdApiClient {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
    retry: RetryConfig,
    rate_gate: RateGate,
    breaker: CircuitBreaker,
}

impl EbirdApiClient {
    /// Create a client authenticating with the given API token
    pub fn new(api_token: impl Into<String>) -> Self {
        Self {
            client: http_client::api_client(),
            base_url: "https://api.ebird.org/v2".to_string(),
            api_token: api_token.into(),
            retry: RetryConfig::default(),
            rate_gate: RateGate::new(Duration::from_millis(MIN_REQUEST_INTERVAL_MS)),
            breaker: CircuitBreaker::new(),
        }
    }

    /// Override the service base URL (tests, proxies)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Override retry behavior
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Centralized request path: rate gate, auth header, retry with
    /// exponential backoff, typed error classification.
    async fn request<T>(&self, path: &str, params: &[(&str, String)]) -> Result<T, ObservationError>
    where
        T: DeserializeOwned,
    {
        self.breaker.check()?;

        let url = format!("{}{}", self.base_url, path);
        let mut delay = self.retry.initial_backoff;

        for attempt in 0..self.retry.max_attempts {
            self.rate_gate.acquire().await;

            tracing::debug!(path, attempt, "eBird API request");

            let result = self
                .client
                .get(&url)
                .header("X-eBirdApiToken", &self.api_token)
                .header("User-Agent", concat!("birdtrip/", env!("CARGO_PKG_VERSION")))
                .query(params)
                .send()
                .await;

            let error = match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        self.breaker.record_success();
                        return response
                            .json::<T>()
                            .await
                            .map_err(|e| ObservationError::Decode(e.to_string()));
                    }
                    classify_status(status, path)
                }
                Err(e) if e.is_timeout() => ObservationError::Timeout,
                Err(e) => ObservationError::Network(e.to_string()),
            };

            if error.is_retryable() && attempt + 1 < self.retry.max_attempts {
                tracing::warn!(path, %error, "retrying in {delay:?}");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(self.retry.max_backoff);
                continue;
            }

            // Only transport-level failures trip the breaker; a 404 for a
            // bad species code says nothing about service health.
            if error.is_retryable() {
                self.breaker.record_failure();
            }
            return Err(error);
        }

        unreachable!("retry loop always returns")
    }

    /// Recent observations in a region (GET /data/obs/{region}/recent)
    pub async fn recent_observations(
        &self,
        region_code: &str,
        days_back: u32,
        include_provisional: bool,
    ) -> Result<Vec<Observation>, ObservationError> {
        let path = format!("/data/obs/{region_code}/recent");
        let params = [
            ("back", days_back.min(EBIRD_MAX_DAYS_BACK).to_string()),
            ("includeProvisional", include_provisional.to_string()),
        ];
        self.request(&path, &params).await
    }

    /// Nearest locations where a species was recently observed
    /// (GET /data/nearest/geo/recent/{speciesCode})
    pub async fn nearest_species_observations(
        &self,
        species_code: &str,
        lat: f64,
        lng: f64,
        days_back: u32,
        distance_km: u32,
        max_results: u32,
    ) -> Result<Vec<Observation>, ObservationError> {
        let path = format!("/data/nearest/geo/recent/{species_code}");
        let params = [
            ("lat", format!("{lat:.4}")),
            ("lng", format!("{lng:.4}")),
            ("back", days_back.min(EBIRD_MAX_DAYS_BACK).to_string()),
            ("dist", distance_km.min(EBIRD_MAX_DISTANCE_KM).to_string()),
            ("maxResults", max_results.min(EBIRD_MAX_RESULTS).to_string()),
        ];
        self.request(&path, &params).await
    }

    /// Detailed information about one hotspot (GET /ref/hotspot/info/{locId})
    pub async fn hotspot_info(&self, loc_id: &str) -> Result<HotspotInfo, ObservationError> {
        let path = format!("/ref/hotspot/info/{loc_id}");
        self.request(&path, &[]).await
    }

    /// Species codes ever reported in a region (GET /product/spplist/{region})
    pub async fn species_list(&self, region_code: &str) -> Result<Vec<String>, ObservationError> {
        let path = format!("/product/spplist/{region_code}");
        self.request(&path, &[]).await
    }
}

#[async_trait]
impl ObservationApi for EbirdApiClient {
    async fn nearby_observations(
        &self,
        lat: f64,
        lng: f64,
        distance_km: u32,
        days_back: u32,
        species_code: Option<&str>,
    ) -> Result<Vec<Observation>, ObservationError> {
        let path = match species_code {
            Some(code) => format!("/data/obs/geo/recent/{code}"),
            None => "/data/obs/geo/recent".to_string(),
        };
        let params = [
            ("lat", format!("{lat:.4}")),
            ("lng", format!("{lng:.4}")),
            ("dist", distance_km.min(EBIRD_MAX_DISTANCE_KM).to_string()),
            ("back", days_back.min(EBIRD_MAX_DAYS_BACK).to_string()),
        ];
        self.request(&path, &params).await
    }

    async fn species_observations(
        &self,
        species_code: &str,
        region_code: &str,
        days_back: u32,
    ) -> Result<Vec<Observation>, ObservationError> {
        let path = format!("/data/obs/{region_code}/recent/{species_code}");
        let params = [
            ("back", days_back.min(EBIRD_MAX_DAYS_BACK).to_string()),
            ("hotspot", "false".to_string()),
        ];
        self.request(&path, &params).await
    }

    async fn hotspots(&self, region_code: &str) -> Result<Vec<Hotspot>, ObservationError> {
        let path = format!("/ref/hotspot/{region_code}");
        let params = [("fmt", "json".to_string())];
        self.request(&path, &params).await
    }

    async fn nearby_hotspots(
        &self,
        lat: f64,
        lng: f64,
        distance_km: u32,
    ) -> Result<Vec<Hotspot>, ObservationError> {
        let params = [
            ("lat", format!("{lat:.4}")),
            ("lng", format!("{lng:.4}")),
            ("dist", distance_km.min(EBIRD_MAX_DISTANCE_KM).to_string()),
        ];
        self.request("/ref/hotspot/geo", &params).await
    }

    async fn taxonomy(&self) -> Result<Vec<TaxonomyEntry>, ObservationError> {
        let params = [("fmt", "json".to_string()), ("locale", "en".to_string())];
        self.request("/ref/taxonomy/ebird", &params).await
    }
}
