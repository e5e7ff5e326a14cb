//! Engine configuration.
//!
//! Every block deserializes with field-level defaults so a partial config
//! file (or none at all) yields a working engine.

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::merge::MergeConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Write-through cache behavior.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// TTL in seconds used when the request doesn't carry its own.
    #[serde(default = "default_cache_ttl_secs")]
    pub default_ttl_secs: u64,
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,
}

fn default_cache_enabled() -> bool {
    true
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_cache_max_size() -> usize {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            default_ttl_secs: default_cache_ttl_secs(),
            max_size: default_cache_max_size(),
        }
    }
}

/// Telemetry and query-logging knobs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PerformanceConfig {
    #[serde(default = "default_enable_metrics")]
    pub enable_metrics: bool,
    #[serde(default)]
    pub log_queries: bool,
    #[serde(default = "default_slow_query_threshold_ms")]
    pub slow_query_threshold_ms: u64,
}

fn default_enable_metrics() -> bool {
    true
}
fn default_slow_query_threshold_ms() -> u64 {
    1000
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            enable_metrics: default_enable_metrics(),
            log_queries: false,
            slow_query_threshold_ms: default_slow_query_threshold_ms(),
        }
    }
}

/// Hybrid fan-out. Off by default; when enabled and a cache is present the
/// engine overrides the cache-primary strategy with hybrid.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HybridConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub merge: MergeConfig,
}

/// Governance wiring: where policy files live.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GovernanceConfig {
    pub policy_dir: PathBuf,
    /// Bound on the process-wide tokenization map.
    #[serde(default = "default_token_map_capacity")]
    pub token_map_capacity: u32,
}

fn default_token_map_capacity() -> u32 {
    100_000
}

impl GovernanceConfig {
    pub fn new(policy_dir: impl Into<PathBuf>) -> Self {
        Self {
            policy_dir: policy_dir.into(),
            token_map_capacity: default_token_map_capacity(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub hybrid: HybridConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub governance: Option<GovernanceConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.cache.enabled);
        assert_eq!(config.cache.default_ttl_secs, 300);
        assert_eq!(config.performance.slow_query_threshold_ms, 1000);
        assert!(!config.hybrid.enabled);
        assert!(config.governance.is_none());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"hybrid": {"enabled": true}}"#).unwrap();
        assert!(config.hybrid.enabled);
        assert_eq!(config.cache.default_ttl_secs, 300);
        assert!(config.performance.enable_metrics);
    }

    #[test]
    fn test_governance_block() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"governance": {"policy_dir": "/etc/unisearch/policies"}}"#,
        )
        .unwrap();
        let governance = config.governance.unwrap();
        assert_eq!(
            governance.policy_dir,
            PathBuf::from("/etc/unisearch/policies")
        );
        assert_eq!(governance.token_map_capacity, 100_000);
    }
}
