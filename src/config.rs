//! Dispatcher configuration.
//!
//! Everything a [`QueryDispatcher`](crate::dispatch::QueryDispatcher) needs is
//! passed in at construction, so tests can run many independently configured
//! dispatchers side by side. Durations are written as milliseconds in JSON.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Result cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false every lookup is a miss and nothing is stored.
    pub enabled: bool,
    /// Lifetime of a ready entry (and of a permanent failure).
    #[serde(rename = "ttl_ms", with = "millis")]
    pub ttl: Duration,
    /// Lifetime of a transient failure. Zero disables negative caching.
    #[serde(rename = "negative_ttl_ms", with = "millis")]
    pub negative_ttl: Duration,
    /// Soft bound on stored entries; least recently used are evicted first.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(3600),
            negative_ttl: Duration::from_secs(5),
            max_entries: 10_000,
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker threads. Bounds backend concurrency.
    pub workers: usize,
    /// Maximum queued tasks before submissions are rejected.
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

/// Best-match decision settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// A lone candidate scoring strictly above this is a match.
    pub match_threshold: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.9,
        }
    }
}

/// Top-level dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Settings shared by the candidate, extension and column caches.
    pub cache: CacheConfig,
    /// Worker pool sizing.
    pub pool: PoolConfig,
    /// Best-match rule.
    pub matching: MatchConfig,
    /// Deadline for a whole batch, measured from submission.
    #[serde(rename = "batch_timeout_ms", with = "millis")]
    pub batch_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            pool: PoolConfig::default(),
            matching: MatchConfig::default(),
            batch_timeout: Duration::from_secs(30),
        }
    }
}

impl DispatcherConfig {
    /// Parses and validates a JSON configuration document.
    ///
    /// Missing fields take their defaults.
    pub fn from_json_str(s: &str) -> Result<Self, ValidationError> {
        let cfg: Self = serde_json::from_str(s).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: &str| {
            Err(ValidationError::InvalidConfig {
                reason: reason.to_string(),
            })
        };

        if self.pool.workers == 0 {
            return invalid("pool.workers must be at least 1");
        }
        if self.pool.queue_capacity == 0 {
            return invalid("pool.queue_capacity must be at least 1");
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            return invalid("cache.max_entries must be at least 1 when the cache is enabled");
        }
        if self.batch_timeout.is_zero() {
            return invalid("batch_timeout_ms must be positive");
        }
        let t = self.matching.match_threshold;
        if !t.is_finite() || !(0.0..=1.0).contains(&t) {
            return invalid("matching.match_threshold must be within [0.0, 1.0]");
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis().min(u128::from(u64::MAX)) as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
