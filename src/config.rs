//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Validity window of a cached aggregate.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Window used for "recently updated" and update frequency.
pub const DEFAULT_RECENCY_WINDOW: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default poll interval of a dashboard.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(30_000);

/// Engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a cached aggregate stays valid.
    /// Default: 5 minutes
    pub cache_ttl: Duration,

    /// Max cached aggregates before least-recently-used eviction.
    /// Default: 1024
    pub cache_capacity: usize,

    /// Window for the recency and update-frequency counts.
    /// Default: 7 days
    pub recency_window: Duration,

    /// Number of executions delivered by an execution feed.
    /// Default: 50
    pub execution_feed_limit: usize,

    /// Extra attempts for a failed store read.
    /// Default: 2
    pub store_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_capacity: 1024,
            recency_window: DEFAULT_RECENCY_WINDOW,
            execution_feed_limit: 50,
            store_retries: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"cache_capacity": 16, "store_retries": 0}"#).unwrap();

        assert_eq!(config.cache_capacity, 16);
        assert_eq!(config.store_retries, 0);
        assert_eq!(config.cache_ttl, DEFAULT_CACHE_TTL);
        assert_eq!(config.execution_feed_limit, 50);
    }
}
