use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::models::RateLimit;
use crate::services::connectivity::ConnectionConfig;
use crate::services::discovery::{DetectionOptions, StatisticsOptions};
use crate::services::executor::ExecutionOptions;
use crate::services::inference::InferenceOptions;
use crate::services::llm::LlmProvider;
use crate::services::retry_engine::RetryPolicy;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub endpoint: EndpointConfig,
    pub discovery: DiscoveryConfig,
    pub validation: ValidationConfig,
    pub retry: RetryConfig,
    pub inference: InferenceConfig,
    pub llm: LlmConfig,
    pub logging: LoggingConfig,
}

/// Endpoint transport configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Total request deadline in seconds when the caller supplies none
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub default_timeout_secs: u64,
    /// Per-query HTTP timeout in seconds
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub request_timeout_secs: u64,
    /// Health/capability probe timeout in seconds
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub probe_timeout_secs: u64,
    /// Retry cap for transport-level failures
    pub max_retries: u32,
    /// Optional per-endpoint rate limit
    pub rate_limit: Option<RateLimit>,
    pub user_agent: String,
    pub verify_ssl: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 120,
            request_timeout_secs: 30,
            probe_timeout_secs: 10,
            max_retries: 3,
            rate_limit: None,
            user_agent: concat!("quasar/", env!("CARGO_PKG_VERSION")).to_string(),
            verify_ssl: true,
        }
    }
}

/// Capability discovery configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Halve probe timeouts, skip statistics and function probes
    pub fast_mode: bool,
    /// Adapt per-probe timeouts to observed latency
    pub progressive_timeout: bool,
    /// LIMIT cap for statistics sampling queries
    pub max_samples: usize,
    pub collect_statistics: bool,
    /// Capability cache entry lifetime in hours
    pub cache_ttl_hours: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            fast_mode: false,
            progressive_timeout: true,
            max_samples: 1000,
            collect_statistics: true,
            cache_ttl_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Raise selected warnings to errors
    pub strict: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self { strict: false }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_validation_retries: u32,
    pub max_execution_retries: u32,
    /// Base backoff delay in milliseconds
    pub base_backoff_ms: u64,
    /// LIMIT injected when a failing query has none
    pub default_limit: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_validation_retries: 3,
            max_execution_retries: 3,
            base_backoff_ms: 500,
            default_limit: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub cardinality_threshold: f64,
    pub optional_threshold: f64,
    /// Numeric confidence below which inferred shapes are dropped
    pub min_confidence: f64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self { cardinality_threshold: 0.9, optional_threshold: 0.85, min_confidence: 0.0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_base: String,
    pub model: String,
    /// API key; prefer the APP_LLM_API_KEY environment variable
    pub api_key: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            temperature: 0.1,
            max_tokens: 2048,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info,sparql_agent=debug".to_string(), file: None }
    }
}

/// Command line arguments for configuration overrides
#[derive(Parser, Debug, Clone)]
#[command(name = "quasar")]
#[command(version, about = "Quasar - Natural-language-to-SPARQL agent")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// SPARQL endpoint URL to query
    #[arg(long, value_name = "URL")]
    pub endpoint: Option<String>,

    /// Natural-language question to answer
    #[arg(long, value_name = "TEXT")]
    pub question: Option<String>,

    /// Total request deadline (overrides config file, e.g. "90s", "2m")
    #[arg(long, value_name = "DURATION")]
    pub timeout: Option<String>,

    /// Strict validation (overrides config file)
    #[arg(long, value_name = "BOOL")]
    pub strict: Option<bool>,

    /// Fast discovery mode (overrides config file)
    #[arg(long, value_name = "BOOL")]
    pub fast_mode: Option<bool>,

    /// Logging level (overrides config file, e.g. "info,sparql_agent=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with command line, environment variable, and file
    /// support
    ///
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables (prefixed with APP_)
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load() -> Result<(Self, CommandLineArgs), anyhow::Error> {
        let cli_args = CommandLineArgs::parse();
        let config = Self::load_with(&cli_args)?;
        Ok((config, cli_args))
    }

    /// Load without touching process arguments (used by tests)
    pub fn load_with(cli_args: &CommandLineArgs) -> Result<Self, anyhow::Error> {
        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(cli_args);
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - APP_LLM_API_KEY: LLM API key
    /// - APP_LLM_API_BASE: LLM API base URL
    /// - APP_LLM_MODEL: LLM model name
    /// - APP_LOG_LEVEL: Logging level (e.g. "info,sparql_agent=debug")
    /// - APP_ENDPOINT_TIMEOUT_SECS: Total request deadline (accepts "90s", "2m")
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("APP_LLM_API_KEY") {
            self.llm.api_key = Some(key);
            tracing::info!("Override llm.api_key from env");
        }

        if let Ok(base) = std::env::var("APP_LLM_API_BASE") {
            self.llm.api_base = base;
            tracing::info!("Override llm.api_base from env: {}", self.llm.api_base);
        }

        if let Ok(model) = std::env::var("APP_LLM_MODEL") {
            self.llm.model = model;
            tracing::info!("Override llm.model from env: {}", self.llm.model);
        }

        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }

        if let Ok(timeout) = std::env::var("APP_ENDPOINT_TIMEOUT_SECS") {
            match parse_duration_to_secs(&timeout) {
                Ok(val) => {
                    self.endpoint.default_timeout_secs = val;
                    tracing::info!(
                        "Override endpoint.default_timeout_secs from env: {}",
                        self.endpoint.default_timeout_secs
                    );
                },
                Err(e) => tracing::warn!(
                    "Invalid APP_ENDPOINT_TIMEOUT_SECS '{}': {} (keep {})",
                    timeout,
                    e,
                    self.endpoint.default_timeout_secs
                ),
            }
        }
    }

    /// Apply command line argument overrides (highest priority)
    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(timeout) = &args.timeout {
            match parse_duration_to_secs(timeout) {
                Ok(val) => {
                    self.endpoint.default_timeout_secs = val;
                    tracing::info!(
                        "Override endpoint.default_timeout_secs from CLI: {}",
                        self.endpoint.default_timeout_secs
                    );
                },
                Err(e) => tracing::warn!(
                    "Invalid --timeout '{}': {} (keep {})",
                    timeout,
                    e,
                    self.endpoint.default_timeout_secs
                ),
            }
        }

        if let Some(strict) = args.strict {
            self.validation.strict = strict;
            tracing::info!("Override validation.strict from CLI: {}", strict);
        }

        if let Some(fast_mode) = args.fast_mode {
            self.discovery.fast_mode = fast_mode;
            tracing::info!("Override discovery.fast_mode from CLI: {}", fast_mode);
        }

        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
            tracing::info!("Override logging.level from CLI: {}", self.logging.level);
        }
    }

    /// Validate configuration
    ///
    /// The timeout hierarchy (probe <= request <= total deadline) is a hard
    /// startup requirement.
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.endpoint.probe_timeout_secs > self.endpoint.request_timeout_secs {
            anyhow::bail!(
                "endpoint.probe_timeout_secs ({}) must not exceed endpoint.request_timeout_secs ({})",
                self.endpoint.probe_timeout_secs,
                self.endpoint.request_timeout_secs
            );
        }
        if self.endpoint.request_timeout_secs > self.endpoint.default_timeout_secs {
            anyhow::bail!(
                "endpoint.request_timeout_secs ({}) must not exceed endpoint.default_timeout_secs ({})",
                self.endpoint.request_timeout_secs,
                self.endpoint.default_timeout_secs
            );
        }
        if self.endpoint.default_timeout_secs == 0 {
            anyhow::bail!("endpoint.default_timeout_secs must be > 0");
        }

        if let Some(rate_limit) = &self.endpoint.rate_limit {
            if rate_limit.requests_per_sec <= 0.0 {
                anyhow::bail!("endpoint.rate_limit.requests_per_sec must be > 0");
            }
            if rate_limit.burst == 0 {
                anyhow::bail!("endpoint.rate_limit.burst must be > 0");
            }
        }

        let inference = &self.inference;
        if !(0.0 < inference.optional_threshold
            && inference.optional_threshold <= inference.cardinality_threshold
            && inference.cardinality_threshold <= 1.0)
        {
            anyhow::bail!(
                "inference thresholds must satisfy 0 < optional_threshold <= cardinality_threshold <= 1"
            );
        }
        if !(0.0..=1.0).contains(&inference.min_confidence) {
            anyhow::bail!("inference.min_confidence must be within [0, 1]");
        }

        if self.llm.max_tokens == 0 {
            anyhow::bail!("llm.max_tokens must be > 0");
        }

        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    // =========================
    // Component option builders
    // =========================

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            timeout: Duration::from_secs(self.endpoint.probe_timeout_secs),
            verify_ssl: self.endpoint.verify_ssl,
            user_agent: self.endpoint.user_agent.clone(),
            auth: None,
            retry_attempts: self.endpoint.max_retries.max(1),
            retry_delay: Duration::from_millis(self.retry.base_backoff_ms),
            retry_backoff: 2.0,
        }
    }

    pub fn execution_options(&self) -> ExecutionOptions {
        ExecutionOptions {
            timeout: Duration::from_secs(self.endpoint.request_timeout_secs),
            retry_on_405: true,
            user_agent: self.endpoint.user_agent.clone(),
        }
    }

    pub fn detection_options(&self) -> DetectionOptions {
        DetectionOptions {
            overall_timeout: Duration::from_secs(self.endpoint.default_timeout_secs / 2),
            fast_mode: self.discovery.fast_mode,
            progressive_timeout: self.discovery.progressive_timeout,
            collect_statistics: self.discovery.collect_statistics,
            statistics: StatisticsOptions {
                sample_limit: self.discovery.max_samples,
                query_timeout: Duration::from_secs(self.endpoint.probe_timeout_secs),
                user_agent: self.endpoint.user_agent.clone(),
                ..StatisticsOptions::default()
            },
            user_agent: self.endpoint.user_agent.clone(),
            ..DetectionOptions::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_validation_retries: self.retry.max_validation_retries,
            max_execution_retries: self.retry.max_execution_retries,
            base_backoff: Duration::from_millis(self.retry.base_backoff_ms),
            default_limit: self.retry.default_limit,
        }
    }

    pub fn inference_options(&self) -> InferenceOptions {
        InferenceOptions {
            cardinality_threshold: self.inference.cardinality_threshold,
            optional_threshold: self.inference.optional_threshold,
            min_confidence: self.inference.min_confidence,
            ..InferenceOptions::default()
        }
    }

    pub fn llm_provider(&self) -> LlmProvider {
        LlmProvider {
            api_base: self.llm.api_base.clone(),
            model_name: self.llm.model.clone(),
            api_key: self.llm.api_key.clone(),
            max_tokens: self.llm.max_tokens,
            temperature: self.llm.temperature,
            timeout_seconds: self.llm.timeout_secs,
        }
    }
}

// =========================
// Helpers for parsing values
// =========================

fn parse_duration_to_secs(input: &str) -> Result<u64, String> {
    // Accept plain numbers (treated as seconds)
    if let Ok(val) = input.parse::<u64>() {
        return Ok(val);
    }

    let s = input.trim().to_lowercase();
    let (num_str, unit) = s.split_at(s.chars().take_while(|c| c.is_ascii_digit()).count());
    if num_str.is_empty() || unit.is_empty() {
        return Err("missing number or unit".into());
    }
    let n: u64 = num_str.parse().map_err(|_| "invalid number".to_string())?;
    match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => Ok(n),
        "m" | "min" | "mins" | "minute" | "minutes" => Ok(n * 60),
        "h" | "hr" | "hour" | "hours" => Ok(n * 60 * 60),
        _ => Err(format!("unsupported unit: {}", unit)),
    }
}

// Custom serde deserializer to support numeric or human-friendly string values
fn deserialize_duration_secs<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;
    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = u64;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a number of seconds or a string like '30s', '5m', '1h'")
        }
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v)
        }
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if v >= 0 { Ok(v as u64) } else { Err(E::custom("negative not allowed")) }
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(v).map_err(E::custom)
        }
        fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(&v).map_err(E::custom)
        }
    }
    deserializer.deserialize_any(Visitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_satisfy_timeout_hierarchy() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.endpoint.probe_timeout_secs <= config.endpoint.request_timeout_secs);
        assert!(config.endpoint.request_timeout_secs <= config.endpoint.default_timeout_secs);
    }

    #[test]
    fn violated_timeout_hierarchy_is_a_startup_error() {
        let mut config = Config::default();
        config.endpoint.probe_timeout_secs = 60;
        config.endpoint.request_timeout_secs = 30;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.endpoint.request_timeout_secs = 300;
        assert!(config.validate().is_err());
    }

    #[test]
    fn threshold_ordering_is_enforced() {
        let mut config = Config::default();
        config.inference.optional_threshold = 0.95;
        config.inference.cardinality_threshold = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_human_durations() {
        assert_eq!(parse_duration_to_secs("90"), Ok(90));
        assert_eq!(parse_duration_to_secs("90s"), Ok(90));
        assert_eq!(parse_duration_to_secs("2m"), Ok(120));
        assert_eq!(parse_duration_to_secs("1h"), Ok(3600));
        assert!(parse_duration_to_secs("soon").is_err());
    }

    #[test]
    fn toml_sections_deserialize() {
        let config: Config = toml::from_str(
            r#"
            [endpoint]
            default_timeout_secs = "2m"
            request_timeout_secs = 30
            probe_timeout_secs = 5

            [retry]
            max_validation_retries = 1
            max_execution_retries = 2

            [llm]
            model = "test-model"
            "#,
        )
        .expect("parse config");

        assert_eq!(config.endpoint.default_timeout_secs, 120);
        assert_eq!(config.retry.max_validation_retries, 1);
        assert_eq!(config.llm.model, "test-model");
        assert!(config.validate().is_ok());
    }
}
