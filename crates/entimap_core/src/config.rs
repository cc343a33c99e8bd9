//! Context configuration.
//!
//! All three structs deserialize with per-field defaults, so a host can load
//! a partial document:
//!
//! ```
//! use entimap_core::Config;
//!
//! let config: Config = serde_json::from_str(r#"{"default_namespace": "staging"}"#).unwrap();
//! assert_eq!(config.default_namespace.as_deref(), Some("staging"));
//! assert_eq!(config.retry.max_attempts, 3);
//! ```

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Configuration for a [`Context`](crate::Context).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Namespace used when neither an explicit argument nor a session
    /// override names one. `None` is the store's default namespace.
    pub default_namespace: Option<String>,

    /// Number of results requested from the adapter per page.
    pub query_batch_size: usize,

    /// Transaction retry policy.
    pub retry: RetryConfig,

    /// Cache tier settings.
    pub cache: CacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_namespace: None,
            query_batch_size: 100,
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the process-wide default namespace.
    #[must_use]
    pub fn default_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.default_namespace = Some(namespace.into());
        self
    }

    /// Sets the query page size.
    #[must_use]
    pub fn query_batch_size(mut self, size: usize) -> Self {
        self.query_batch_size = size;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the cache settings.
    #[must_use]
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Checks that every value is in range.
    pub fn validate(&self) -> CoreResult<()> {
        if self.query_batch_size == 0 {
            return Err(CoreError::invalid_config("query_batch_size must be at least 1"));
        }
        self.retry.validate()
    }
}

/// Exponential backoff policy for conflicting transactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first conflict.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Whether to add up to 25% random jitter.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Creates a policy with `max_attempts` and default delays.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// A policy that never sleeps, for tests.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub const fn initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub const fn max_backoff(mut self, delay: Duration) -> Self {
        self.max_backoff = delay;
        self
    }

    /// Sets the growth factor.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Checks that every value is in range.
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_attempts == 0 {
            return Err(CoreError::invalid_config("retry.max_attempts must be at least 1"));
        }
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(CoreError::invalid_config("retry.multiplier must be at least 1.0"));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(CoreError::invalid_config(
                "retry.initial_backoff must not exceed retry.max_backoff",
            ));
        }
        Ok(())
    }

    /// Delay to wait after the given failed attempt (1-based).
    ///
    /// `min(initial * multiplier^(attempt-1), max)`, plus up to 25% jitter.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base = self.initial_backoff.as_nanos() as f64 * self.multiplier.powi(exponent);
        let capped = base.min(self.max_backoff.as_nanos() as f64);
        let jitter = if self.jitter && capped > 0.0 {
            capped * 0.25 * rand::thread_rng().gen::<f64>()
        } else {
            0.0
        };
        Duration::from_nanos((capped + jitter) as u64)
    }
}

/// Settings for [`CachedAdapter`](crate::adapter::CachedAdapter).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false every call passes straight to the base adapter.
    pub enabled: bool,
    /// Prefix prepended to every cache key.
    pub key_prefix: String,
    /// Lifetime of populated entries. `None` keeps them until invalidated.
    pub ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: "entimap:".to_string(),
            ttl: None,
        }
    }
}

impl CacheConfig {
    /// A configuration with caching turned off.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Sets the key prefix.
    #[must_use]
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Sets the entry lifetime.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}
