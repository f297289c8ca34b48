//! Search configuration with sensible defaults.
//!
//! [`SearchConfig`] describes the backend registry, the aggregate deadline,
//! the result cache and the global rate limit. Every field has a default so a
//! partial TOML table deserializes cleanly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SearchError;
use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::rate_limit::RateLimitConfig;
use crate::resilience::retry::RetryPolicy;
use crate::types::{BackendDescriptor, BackendKind};

/// Default bound on a whole aggregated search.
pub const DEFAULT_AGGREGATE_DEADLINE: Duration = Duration::from_secs(10);

/// How per-backend weights enter fusion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Contributions are scaled by each backend's configured weight.
    #[default]
    Weighted,
    /// Every backend counts with weight 1.0.
    Simple,
}

/// Configuration for one backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Unique name used in query `sources` and in `backend_status`.
    pub name: String,
    /// Adapter implementation. Defaults to the kind whose name equals `name`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<BackendKind>,
    /// Override for the backend's API root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Per-attempt deadline in milliseconds.
    pub timeout_ms: u64,
    /// Retries after the first attempt, for transient failures only.
    pub max_retries: u32,
    /// Relative trust multiplier applied during fusion.
    pub weight: f64,
    pub enabled: bool,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryPolicy,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: None,
            base_url: None,
            timeout_ms: 8_000,
            max_retries: 2,
            weight: 1.0,
            enabled: true,
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl BackendConfig {
    /// Default configuration for `kind`, named after it.
    pub fn for_kind(kind: BackendKind) -> Self {
        Self {
            name: kind.name().to_string(),
            ..Default::default()
        }
    }

    /// Adapter kind, falling back to the kind named like this backend.
    pub fn resolved_kind(&self) -> Option<BackendKind> {
        self.kind.or_else(|| BackendKind::from_name(&self.name))
    }

    /// Per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Registry entry for this backend.
    pub fn descriptor(&self) -> BackendDescriptor {
        BackendDescriptor {
            name: self.name.clone(),
            weight: self.weight,
            timeout: self.timeout(),
            max_retries: self.max_retries,
            enabled: self.enabled,
        }
    }
}

/// Configuration for the aggregation engine.
///
/// Use [`Default::default()`] for sensible defaults, or construct with
/// field overrides for custom behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Bound on a whole aggregated search. `None` uses
    /// [`DEFAULT_AGGREGATE_DEADLINE`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate_deadline_ms: Option<u64>,
    /// How long fused results stay cached. Set to 0 to disable caching.
    pub cache_ttl_secs: u64,
    /// Maximum number of cached queries.
    pub cache_capacity: u64,
    /// Interval of the background sweep that purges expired entries.
    pub cache_sweep_interval_secs: u64,
    /// How long a call may wait for a rate-limit token before failing fast.
    pub rate_limit_grace_ms: u64,
    /// Bucket shared by every backend.
    pub global_rate_limit: RateLimitConfig,
    pub merge_strategy: MergeStrategy,
    /// User-Agent sent to backends. `None` uses the crate default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub backends: Vec<BackendConfig>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            aggregate_deadline_ms: None,
            cache_ttl_secs: 600,
            cache_capacity: 100,
            cache_sweep_interval_secs: 60,
            rate_limit_grace_ms: 250,
            global_rate_limit: RateLimitConfig {
                capacity: 20,
                refill_rate: 10.0,
            },
            merge_strategy: MergeStrategy::Weighted,
            user_agent: None,
            backends: vec![
                BackendConfig::for_kind(BackendKind::DuckDuckGo),
                BackendConfig {
                    weight: 1.2,
                    ..BackendConfig::for_kind(BackendKind::Arxiv)
                },
                BackendConfig {
                    base_url: Some("http://localhost:8888".into()),
                    enabled: false,
                    ..BackendConfig::for_kind(BackendKind::SearX)
                },
            ],
        }
    }
}

impl SearchConfig {
    /// Bound on a whole aggregated search.
    pub fn aggregate_deadline(&self) -> Duration {
        self.aggregate_deadline_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_AGGREGATE_DEADLINE)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn rate_limit_grace(&self) -> Duration {
        Duration::from_millis(self.rate_limit_grace_ms)
    }

    /// Names of every enabled backend, in configuration order.
    pub fn enabled_backends(&self) -> Vec<String> {
        self.backends
            .iter()
            .filter(|b| b.enabled)
            .map(|b| b.name.clone())
            .collect()
    }

    /// Look up a backend by name.
    pub fn backend(&self, name: &str) -> Option<&BackendConfig> {
        self.backends.iter().find(|b| b.name == name)
    }

    /// Validates this configuration, returning an error if any field is invalid.
    ///
    /// Checks:
    /// - backend names are non-empty and unique
    /// - every backend resolves to a known kind
    /// - weights are finite and non-negative
    /// - timeouts, breaker thresholds and bucket sizes are greater than 0
    /// - at least one backend is enabled
    /// - `cache_capacity` is greater than 0 when caching is enabled
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.aggregate_deadline_ms == Some(0) {
            return Err(SearchError::Config(
                "aggregate_deadline_ms must be greater than 0".into(),
            ));
        }
        if self.cache_ttl_secs > 0 && self.cache_capacity == 0 {
            return Err(SearchError::Config(
                "cache_capacity must be greater than 0".into(),
            ));
        }
        self.global_rate_limit.validate("global")?;

        let mut seen = std::collections::HashSet::new();
        for backend in &self.backends {
            let name = backend.name.trim();
            if name.is_empty() {
                return Err(SearchError::Config("backend name must not be empty".into()));
            }
            if !seen.insert(name) {
                return Err(SearchError::Config(format!(
                    "duplicate backend name: {name}"
                )));
            }
            if backend.resolved_kind().is_none() {
                return Err(SearchError::Config(format!(
                    "{name}: unknown backend kind; set `kind` explicitly"
                )));
            }
            if !backend.weight.is_finite() || backend.weight < 0.0 {
                return Err(SearchError::Config(format!(
                    "{name}: weight must be a non-negative number"
                )));
            }
            if backend.timeout_ms == 0 {
                return Err(SearchError::Config(format!(
                    "{name}: timeout_ms must be greater than 0"
                )));
            }
            if backend.circuit_breaker.failure_threshold == 0 {
                return Err(SearchError::Config(format!(
                    "{name}: failure_threshold must be greater than 0"
                )));
            }
            backend.rate_limit.validate(name)?;
            backend.retry.validate(name)?;
        }

        if !self.backends.iter().any(|b| b.enabled) {
            return Err(SearchError::Config(
                "at least one backend must be enabled".into(),
            ));
        }
        Ok(())
    }
}
