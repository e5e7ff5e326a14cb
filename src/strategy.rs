//! Strategy selection: which backend serves a request, and which one
//! backs it up.
//!
//! A pure function of the cache backend's presence, its breaker state,
//! and its last health observation. The hybrid override (when hybrid
//! search is enabled and the cache is primary-worthy) is applied by the
//! engine on top of the decision returned here.

use crate::types::{HealthStatus, Strategy, StrategyDecision};

/// Latency at which a connected cache is no longer preferred as primary.
const CACHE_LATENCY_CEILING_MS: i64 = 1000;

/// Decide the (primary, fallback) pair for one request.
///
/// Rules are evaluated in order; the first match wins.
pub fn select_strategy(
    has_cache: bool,
    cache_breaker_open: bool,
    cache_health: Option<&HealthStatus>,
) -> StrategyDecision {
    if !has_cache {
        return StrategyDecision {
            primary: Strategy::Database,
            fallback: Strategy::Database,
            reason: "no cache configured".to_string(),
        };
    }

    if cache_breaker_open {
        return StrategyDecision {
            primary: Strategy::Database,
            fallback: Strategy::Database,
            reason: "cache breaker open".to_string(),
        };
    }

    if let Some(health) = cache_health {
        if health.is_connected
            && health.is_search_available
            && health.latency_ms < CACHE_LATENCY_CEILING_MS
        {
            return StrategyDecision {
                primary: Strategy::Cache,
                fallback: Strategy::Database,
                reason: format!("cache healthy ({}ms)", health.latency_ms),
            };
        }

        if health.is_connected && !health.is_search_available {
            return StrategyDecision {
                primary: Strategy::Database,
                fallback: Strategy::Cache,
                reason: "degraded cache".to_string(),
            };
        }
    }

    StrategyDecision {
        primary: Strategy::Database,
        fallback: Strategy::Database,
        reason: "cache unavailable".to_string(),
    }
}
