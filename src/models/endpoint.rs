//! SPARQL endpoint models: configuration, authentication, and health snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authentication for a SPARQL endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndpointAuth {
    Basic { username: String, password: String },
    Bearer { token: String },
}

/// Per-endpoint rate limit: requests per second plus burst allowance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RateLimit {
    pub requests_per_sec: f64,
    pub burst: u32,
}

/// A configured SPARQL endpoint
///
/// Identified by URL. Configured at startup and immutable for the duration
/// of a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<EndpointAuth>,
    /// Total deadline override in seconds; falls back to the global default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), name: None, auth: None, timeout_secs: None, rate_limit: None }
    }

    pub fn with_auth(mut self, auth: EndpointAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Display name, falling back to the URL
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }
}

/// Probe outcome classification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl EndpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        }
    }
}

/// Snapshot of a single endpoint health probe
///
/// Produced by the connectivity prober. Probes never raise: transport
/// failures are captured in `error_message` with `status = Unhealthy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointHealth {
    pub endpoint_url: String,
    pub status: EndpointStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<f64>,
    /// Whether the TLS handshake validated the peer certificate (HTTPS only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_valid: Option<bool>,
    /// Peer certificate expiry when the transport exposes it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_expiry: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_banner: Option<String>,
    /// Capability hints observed during the probe (e.g. "ask", "json-results")
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl EndpointHealth {
    /// Unknown-status placeholder, used when a deadline elapses before any
    /// probe attempt completes.
    pub fn unknown(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            status: EndpointStatus::Unknown,
            status_code: None,
            response_time_ms: None,
            ssl_valid: None,
            ssl_expiry: None,
            server_banner: None,
            capabilities: Vec::new(),
            error_message: None,
            checked_at: Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == EndpointStatus::Healthy
    }
}
