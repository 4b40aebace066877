//! Client configuration.
//!
//! [`ClientConfig`] is the single configuration structure for the SDK. Every
//! field has a default, so a TOML file only needs the values it changes:
//!
//! ```toml
//! base_url = "https://jobs.example.com/api"
//!
//! [cache]
//! ttl_ms = 2000
//!
//! [circuit_breaker]
//! failure_threshold = 3
//! backoff = "exponential"
//!
//! [pool]
//! max_connections = 4
//! retry_attempts = 2
//! ```
//!
//! Durations are stored as integer milliseconds (or seconds where noted) and
//! exposed as [`Duration`] through accessor methods.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Default maximum concurrent operations (browser per-origin connection limit).
pub const DEFAULT_MAX_CONNECTIONS: usize = 6;

/// Default retry attempts after the initial attempt.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Largest accepted `pool.max_connections`.
const MAX_CONNECTIONS_LIMIT: usize = 100;

/// Largest accepted `pool.retry_attempts`.
const MAX_RETRY_ATTEMPTS: u32 = 10;

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that failed to load.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`ClientConfig`].
    #[error("failed to parse config: {source}")]
    Parse {
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more values are out of range.
    #[error("invalid config: {}", .problems.join("; "))]
    Invalid {
        /// Every problem found, in field order.
        problems: Vec<String>,
    },
}

/// Root configuration for [`OptimizedClient`](crate::client::OptimizedClient)
/// and [`HttpJobClient`](crate::api::HttpJobClient).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Base URL of the job API; job paths are appended to it.
    pub base_url: String,

    /// Bearer token sent with every request.
    pub api_token: Option<String>,

    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Whole-request timeout of the HTTP client in seconds.
    ///
    /// The pool's per-attempt timeout usually fires first; this is the
    /// backstop for result downloads when the pool is disabled.
    pub request_timeout_secs: u64,

    /// Response cache settings.
    pub cache: CacheConfig,

    /// Circuit breaker settings, applied to every breaker in the registry.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Connection pool settings.
    pub pool: PoolConfig,

    /// Status polling settings for `wait_for_completion`.
    pub polling: PollConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            api_token: None,
            connect_timeout_secs: 10,
            request_timeout_secs: 300,
            cache: CacheConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            pool: PoolConfig::default(),
            polling: PollConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Parses a TOML document and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|source| ConfigError::Parse { source })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges, reporting every problem at once.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] listing each bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if Url::parse(&self.base_url).is_err() {
            problems.push(format!("base_url `{}` is not a valid URL", self.base_url));
        }
        if self.connect_timeout_secs == 0 {
            problems.push("connect_timeout_secs must be greater than 0".to_string());
        }
        if self.request_timeout_secs == 0 {
            problems.push("request_timeout_secs must be greater than 0".to_string());
        }

        if self.cache.max_size == 0 {
            problems.push("cache.max_size must be greater than 0".to_string());
        }
        if self.cache.ttl_ms == 0 {
            problems.push("cache.ttl_ms must be greater than 0".to_string());
        }
        if self.cache.cleanup_interval_ms == 0 {
            problems.push("cache.cleanup_interval_ms must be greater than 0".to_string());
        }

        let breaker = &self.circuit_breaker;
        if breaker.failure_threshold == 0 {
            problems.push("circuit_breaker.failure_threshold must be greater than 0".to_string());
        }
        if breaker.success_threshold == 0 {
            problems.push("circuit_breaker.success_threshold must be greater than 0".to_string());
        }
        if breaker.half_open_max_calls == 0 {
            problems
                .push("circuit_breaker.half_open_max_calls must be greater than 0".to_string());
        }
        if breaker.backoff == BackoffMode::Exponential && breaker.backoff_multiplier < 1.0 {
            problems.push("circuit_breaker.backoff_multiplier must be at least 1.0".to_string());
        }

        let pool = &self.pool;
        if !(1..=MAX_CONNECTIONS_LIMIT).contains(&pool.max_connections) {
            problems.push(format!(
                "pool.max_connections {} must be between 1 and {MAX_CONNECTIONS_LIMIT}",
                pool.max_connections
            ));
        }
        if pool.retry_attempts > MAX_RETRY_ATTEMPTS {
            problems.push(format!(
                "pool.retry_attempts {} must be at most {MAX_RETRY_ATTEMPTS}",
                pool.retry_attempts
            ));
        }
        if pool.timeout_ms == 0 {
            problems.push("pool.timeout_ms must be greater than 0".to_string());
        }
        if pool.retry_max_delay_ms < pool.retry_base_delay_ms {
            problems.push("pool.retry_max_delay_ms must be >= pool.retry_base_delay_ms".to_string());
        }

        let polling = &self.polling;
        if polling.initial_interval_ms == 0 {
            problems.push("polling.initial_interval_ms must be greater than 0".to_string());
        }
        if polling.max_interval_ms < polling.initial_interval_ms {
            problems
                .push("polling.max_interval_ms must be >= polling.initial_interval_ms".to_string());
        }
        if polling.timeout_ms == 0 {
            problems.push("polling.timeout_ms must be greater than 0".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { problems })
        }
    }

    /// TCP connect timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Whole-request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Response cache settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Cache status reads.
    pub enabled: bool,

    /// Time a cached status stays valid, in milliseconds.
    pub ttl_ms: u64,

    /// Maximum number of cached entries.
    pub max_size: usize,

    /// Interval of the background expiry sweep, in milliseconds.
    pub cleanup_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: 5_000,
            max_size: 100,
            cleanup_interval_ms: 60_000,
        }
    }
}

impl CacheConfig {
    /// Entry TTL.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Sweep interval.
    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

/// How long an open circuit waits before letting a trial through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffMode {
    /// Always wait `recovery_timeout_ms`.
    #[default]
    Fixed,
    /// Wait `min(recovery * multiplier^min(failures, 10), max_backoff)`.
    Exponential,
}

/// Circuit breaker settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Guard remote calls with circuit breakers.
    pub enabled: bool,

    /// Failures that open a closed circuit.
    pub failure_threshold: u32,

    /// Consecutive half-open successes that close the circuit.
    pub success_threshold: u32,

    /// Base wait before an open circuit allows a trial, in milliseconds.
    pub recovery_timeout_ms: u64,

    /// Fixed or exponential recovery wait.
    pub backoff: BackoffMode,

    /// Growth factor of the exponential recovery wait.
    pub backoff_multiplier: f64,

    /// Upper bound of the exponential recovery wait, in milliseconds.
    pub max_backoff_ms: u64,

    /// Trials allowed in flight while half-open.
    pub half_open_max_calls: u32,

    /// A success while closed clears the failure count.
    pub reset_on_success: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout_ms: 30_000,
            backoff: BackoffMode::Fixed,
            backoff_multiplier: 2.0,
            max_backoff_ms: 300_000,
            half_open_max_calls: 1,
            reset_on_success: true,
        }
    }
}

impl CircuitBreakerConfig {
    /// Base recovery wait.
    #[must_use]
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    /// Upper bound of the exponential recovery wait.
    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Connection pool settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Queue and bound remote calls. When disabled every call runs once, directly.
    pub enabled: bool,

    /// Maximum operations in flight.
    pub max_connections: usize,

    /// Per-attempt timeout, in milliseconds.
    pub timeout_ms: u64,

    /// Retries after the initial attempt.
    pub retry_attempts: u32,

    /// Backoff before the first retry, in milliseconds; doubles per retry.
    pub retry_base_delay_ms: u64,

    /// Backoff cap, in milliseconds.
    pub retry_max_delay_ms: u64,

    /// Random jitter added to each backoff, up to this many milliseconds.
    pub retry_jitter_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            timeout_ms: 30_000,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 10_000,
            retry_jitter_ms: 0,
        }
    }
}

impl PoolConfig {
    /// Per-attempt timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Backoff before the first retry.
    #[must_use]
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Backoff cap.
    #[must_use]
    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    /// Jitter bound.
    #[must_use]
    pub fn retry_jitter(&self) -> Duration {
        Duration::from_millis(self.retry_jitter_ms)
    }
}

/// Status polling settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollConfig {
    /// Delay between status reads at the start of a wait, in milliseconds.
    pub initial_interval_ms: u64,

    /// Elapsed wait after which the interval starts doubling, in milliseconds.
    pub slowdown_after_ms: u64,

    /// Largest delay between status reads, in milliseconds.
    pub max_interval_ms: u64,

    /// Overall wait deadline, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 2_000,
            slowdown_after_ms: 30_000,
            max_interval_ms: 30_000,
            timeout_ms: 600_000,
        }
    }
}

impl PollConfig {
    /// Initial delay between status reads.
    #[must_use]
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    /// Elapsed time after which the interval grows.
    #[must_use]
    pub fn slowdown_after(&self) -> Duration {
        Duration::from_millis(self.slowdown_after_ms)
    }

    /// Largest delay between status reads.
    #[must_use]
    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    /// Overall wait deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Loads and validates a TOML configuration file.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read, otherwise the
/// errors of [`ClientConfig::from_toml_str`].
pub fn load_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = ClientConfig::from_toml_str(&raw)?;
    debug!(path = %path.display(), base_url = %config.base_url, "loaded client config");
    Ok(config)
}
