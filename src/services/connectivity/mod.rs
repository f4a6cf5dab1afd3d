//! Endpoint connectivity: single-endpoint health probes and concurrent
//! fan-out with pooling, rate limiting, retry backoff, and history.
//!
//! Probes never raise. Transport failures are captured into the
//! `EndpointHealth` record; retry applies to transport-level failures only,
//! never to HTTP status >= 400.

mod rate_limiter;

pub use rate_limiter::TokenBucket;

use dashmap::DashMap;
use reqwest::Client;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::models::{EndpointAuth, EndpointHealth, EndpointStatus};

/// Bound on retained health snapshots per endpoint
const HISTORY_CAP: usize = 100;

/// Default fan-out pool size
const DEFAULT_POOL_SIZE: usize = 10;

// ============================================================================
// Connection Configuration
// ============================================================================

/// Settings for a single probe run
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub timeout: Duration,
    pub verify_ssl: bool,
    pub user_agent: String,
    pub auth: Option<EndpointAuth>,
    /// Transport-failure retry cap (attempts = 1 + retries)
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub retry_backoff: f64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            verify_ssl: true,
            user_agent: concat!("quasar/", env!("CARGO_PKG_VERSION")).to_string(),
            auth: None,
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            retry_backoff: 2.0,
        }
    }
}

// ============================================================================
// Prober (single endpoint)
// ============================================================================

/// One-shot health prober for a single endpoint
pub struct EndpointProber {
    http_client: Client,
    config: ConnectionConfig,
}

impl EndpointProber {
    pub fn new(config: ConnectionConfig) -> Self {
        let http_client = Client::builder()
            .danger_accept_invalid_certs(!config.verify_ssl)
            .timeout(config.timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { http_client, config }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Probe one endpoint, optionally with a trivial ASK query.
    ///
    /// Never returns an error; transport failures land in `error_message`.
    pub async fn probe(&self, endpoint_url: &str, check_query: bool) -> EndpointHealth {
        let started = Instant::now();
        let mut health = EndpointHealth::unknown(endpoint_url);

        let response = match self.head_or_get(endpoint_url).await {
            Ok(response) => response,
            Err(e) => {
                health.status = EndpointStatus::Unhealthy;
                health.error_message = Some(if e.is_timeout() {
                    format!("Timeout after {:?}", self.config.timeout)
                } else {
                    e.to_string()
                });
                tracing::warn!("Probe of {} failed: {}", endpoint_url, e);
                return health;
            },
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let status_code = response.status().as_u16();
        health.status_code = Some(status_code);
        health.response_time_ms = Some(elapsed_ms);
        health.server_banner = response
            .headers()
            .get("server")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        if endpoint_url.starts_with("https://") {
            // reqwest only completes the request when the peer certificate
            // validated, so a successful HTTPS response implies a valid chain
            health.ssl_valid = Some(true);
        }

        if !response.status().is_success() {
            health.status = EndpointStatus::Unhealthy;
            health.error_message = Some(format!("HTTP {}", status_code));
            return health;
        }

        if !check_query {
            health.status = EndpointStatus::Healthy;
            return health;
        }

        match self.ask_probe(endpoint_url).await {
            Ok(()) => {
                // response_time_ms stays the transport round trip so a
                // Healthy probe never reports more than its own timeout
                health.status = EndpointStatus::Healthy;
                health.capabilities.push("ask".to_string());
                health.capabilities.push("json-results".to_string());
            },
            Err(message) => {
                health.status = EndpointStatus::Degraded;
                health.error_message = Some(message);
            },
        }

        health
    }

    async fn head_or_get(&self, endpoint_url: &str) -> Result<reqwest::Response, reqwest::Error> {
        let head = self
            .apply_auth(self.http_client.head(endpoint_url))
            .header("User-Agent", &self.config.user_agent)
            .send()
            .await;

        match head {
            Ok(response)
                if response.status() == reqwest::StatusCode::METHOD_NOT_ALLOWED
                    || response.status() == reqwest::StatusCode::NOT_IMPLEMENTED =>
            {
                self.apply_auth(self.http_client.get(endpoint_url))
                    .header("User-Agent", &self.config.user_agent)
                    .send()
                    .await
            },
            other => other,
        }
    }

    /// Trivial `ASK { ?s ?p ?o }` with a tight timeout (half the probe
    /// timeout, floor 2 s); success requires a parseable JSON `boolean`.
    async fn ask_probe(&self, endpoint_url: &str) -> Result<(), String> {
        let ask_timeout = (self.config.timeout / 2).max(Duration::from_secs(2));
        let url = format!("{}?query={}", endpoint_url, urlencoding::encode("ASK { ?s ?p ?o }"));

        let response = self
            .apply_auth(self.http_client.get(&url))
            .header("Accept", "application/sparql-results+json")
            .header("User-Agent", &self.config.user_agent)
            .timeout(ask_timeout)
            .send()
            .await
            .map_err(|e| format!("ASK probe failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("ASK probe returned HTTP {}", response.status().as_u16()));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| format!("ASK probe returned non-JSON body: {}", e))?;

        if body.get("boolean").is_none() {
            return Err("ASK probe response missing 'boolean' field".to_string());
        }

        Ok(())
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.auth {
            Some(EndpointAuth::Basic { username, password }) => {
                request.basic_auth(username, Some(password))
            },
            Some(EndpointAuth::Bearer { token }) => request.bearer_auth(token),
            None => request,
        }
    }
}

// ============================================================================
// Pinger (concurrent fan-out)
// ============================================================================

/// Concurrent health checker over many endpoints
///
/// Fan-out is bounded by a semaphore pool; an optional token bucket rate
/// limits request starts. Per-endpoint history rings are guarded by their
/// own mutex.
pub struct EndpointPinger {
    prober: Arc<EndpointProber>,
    semaphore: Arc<Semaphore>,
    rate_limiter: Option<Arc<TokenBucket>>,
    history: DashMap<String, Arc<Mutex<VecDeque<EndpointHealth>>>>,
}

impl Default for EndpointPinger {
    fn default() -> Self {
        Self::new(ConnectionConfig::default())
    }
}

impl EndpointPinger {
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_pool_size(config, DEFAULT_POOL_SIZE)
    }

    pub fn with_pool_size(config: ConnectionConfig, pool_size: usize) -> Self {
        Self {
            prober: Arc::new(EndpointProber::new(config)),
            semaphore: Arc::new(Semaphore::new(pool_size.max(1))),
            rate_limiter: None,
            history: DashMap::new(),
        }
    }

    /// Attach a token bucket: `rate` requests per second with `burst` slack
    pub fn with_rate_limit(mut self, rate: f64, burst: u32) -> Self {
        self.rate_limiter = Some(Arc::new(TokenBucket::new(rate, burst)));
        self
    }

    /// Probe one endpoint with transport-failure retry
    pub async fn ping_one(&self, endpoint_url: &str, check_query: bool) -> EndpointHealth {
        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire().await;
        }
        let health =
            Self::probe_with_retry(&self.prober, endpoint_url, check_query, None).await;
        self.record(health.clone());
        health
    }

    /// Probe one endpoint under a hard deadline.
    ///
    /// If the deadline elapses mid-retry the in-flight attempt is abandoned
    /// and the best-known snapshot is returned; `Unknown` when no attempt
    /// completed.
    pub async fn ping_one_with_deadline(
        &self,
        endpoint_url: &str,
        check_query: bool,
        deadline: Duration,
    ) -> EndpointHealth {
        let best_known: Arc<Mutex<Option<EndpointHealth>>> = Arc::new(Mutex::new(None));
        let attempt = Self::probe_with_retry(
            &self.prober,
            endpoint_url,
            check_query,
            Some(best_known.clone()),
        );

        let health = match tokio::time::timeout(deadline, attempt).await {
            Ok(health) => health,
            Err(_) => {
                tracing::warn!("Deadline elapsed while probing {}", endpoint_url);
                best_known
                    .lock()
                    .expect("best-known slot poisoned")
                    .take()
                    .unwrap_or_else(|| EndpointHealth::unknown(endpoint_url))
            },
        };

        self.record(health.clone());
        health
    }

    /// Probe many endpoints concurrently, preserving input order
    pub async fn ping_many(
        &self,
        endpoint_urls: &[String],
        check_query: bool,
    ) -> Vec<EndpointHealth> {
        let mut join_set = JoinSet::new();

        for (index, url) in endpoint_urls.iter().enumerate() {
            let prober = self.prober.clone();
            let semaphore = self.semaphore.clone();
            let limiter = self.rate_limiter.clone();
            let url = url.clone();

            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("pinger semaphore closed");
                if let Some(limiter) = &limiter {
                    limiter.acquire().await;
                }
                let health = Self::probe_with_retry(&prober, &url, check_query, None).await;
                (index, health)
            });
        }

        let mut results: Vec<Option<EndpointHealth>> = vec![None; endpoint_urls.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, health)) => results[index] = Some(health),
                Err(e) => tracing::error!("Ping task panicked: {}", e),
            }
        }

        let healths: Vec<EndpointHealth> = results
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| EndpointHealth::unknown(&endpoint_urls[index]))
            })
            .collect();

        for health in &healths {
            self.record(health.clone());
        }
        healths
    }

    async fn probe_with_retry(
        prober: &EndpointProber,
        endpoint_url: &str,
        check_query: bool,
        best_known: Option<Arc<Mutex<Option<EndpointHealth>>>>,
    ) -> EndpointHealth {
        let config = prober.config();
        let max_attempts = config.retry_attempts.max(1);
        let mut delay = config.retry_delay;
        let mut last = EndpointHealth::unknown(endpoint_url);

        for attempt in 1..=max_attempts {
            let health = prober.probe(endpoint_url, check_query).await;
            if let Some(slot) = &best_known {
                *slot.lock().expect("best-known slot poisoned") = Some(health.clone());
            }

            // retry only transport-level failures; an HTTP status answer is
            // an answer
            let transport_failure =
                health.status == EndpointStatus::Unhealthy && health.status_code.is_none();
            if !transport_failure || attempt == max_attempts {
                return health;
            }

            tracing::debug!(
                "Transport failure probing {} (attempt {}/{}), retrying in {:?}",
                endpoint_url,
                attempt,
                max_attempts,
                delay
            );
            last = health;
            tokio::time::sleep(delay).await;
            delay = delay.mul_f64(config.retry_backoff);
        }

        last
    }

    // ========================================
    // History
    // ========================================

    fn record(&self, health: EndpointHealth) {
        let ring = self
            .history
            .entry(health.endpoint_url.clone())
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::with_capacity(HISTORY_CAP))))
            .clone();
        let mut ring = ring.lock().expect("history ring poisoned");
        if ring.len() == HISTORY_CAP {
            ring.pop_front();
        }
        ring.push_back(health);
    }

    /// Recorded snapshots for an endpoint, oldest first
    pub fn history(&self, endpoint_url: &str) -> Vec<EndpointHealth> {
        self.history
            .get(endpoint_url)
            .map(|ring| {
                ring.lock()
                    .expect("history ring poisoned")
                    .iter()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Healthy fraction of recorded probes, `None` without history
    pub fn uptime_fraction(&self, endpoint_url: &str) -> Option<f64> {
        let history = self.history(endpoint_url);
        if history.is_empty() {
            return None;
        }
        let healthy = history.iter().filter(|h| h.is_healthy()).count();
        Some(healthy as f64 / history.len() as f64)
    }

    /// Mean response time over recorded probes that completed, `None`
    /// without any timed probe
    pub fn avg_response_time(&self, endpoint_url: &str) -> Option<f64> {
        let history = self.history(endpoint_url);
        let times: Vec<f64> = history.iter().filter_map(|h| h.response_time_ms).collect();
        if times.is_empty() {
            return None;
        }
        Some(times.iter().sum::<f64>() / times.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn health(url: &str, status: EndpointStatus, ms: Option<f64>) -> EndpointHealth {
        EndpointHealth {
            endpoint_url: url.to_string(),
            status,
            status_code: None,
            response_time_ms: ms,
            ssl_valid: None,
            ssl_expiry: None,
            server_banner: None,
            capabilities: Vec::new(),
            error_message: None,
            checked_at: Utc::now(),
        }
    }

    #[test]
    fn history_ring_is_bounded() {
        let pinger = EndpointPinger::default();
        for i in 0..150 {
            pinger.record(health(
                "http://ex.org/sparql",
                EndpointStatus::Healthy,
                Some(i as f64),
            ));
        }
        let history = pinger.history("http://ex.org/sparql");
        assert_eq!(history.len(), 100);
        // oldest entries evicted first
        assert_eq!(history[0].response_time_ms, Some(50.0));
    }

    #[test]
    fn uptime_and_avg_response_time() {
        let pinger = EndpointPinger::default();
        pinger.record(health("http://a/sparql", EndpointStatus::Healthy, Some(100.0)));
        pinger.record(health("http://a/sparql", EndpointStatus::Unhealthy, None));
        pinger.record(health("http://a/sparql", EndpointStatus::Healthy, Some(300.0)));

        assert!((pinger.uptime_fraction("http://a/sparql").unwrap() - 2.0 / 3.0).abs() < 1e-9);
        assert!((pinger.avg_response_time("http://a/sparql").unwrap() - 200.0).abs() < 1e-9);
        assert_eq!(pinger.uptime_fraction("http://b/sparql"), None);
    }

    #[tokio::test]
    async fn deadline_with_unreachable_endpoint_returns_unknown_or_unhealthy() {
        let config = ConnectionConfig {
            timeout: Duration::from_millis(200),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(100),
            ..ConnectionConfig::default()
        };
        let pinger = EndpointPinger::new(config);
        // reserved TEST-NET address, nothing listens there
        let health = pinger
            .ping_one_with_deadline("http://192.0.2.1:9/sparql", false, Duration::from_millis(50))
            .await;
        assert!(matches!(
            health.status,
            EndpointStatus::Unknown | EndpointStatus::Unhealthy
        ));
    }
}
