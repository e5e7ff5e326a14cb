//! Circuit breaker protecting backend calls from cascading failures.
//!
//! States: Closed -> Open -> HalfOpen -> Closed
//! - Closed: requests pass through; consecutive failures trip the circuit
//! - Open: requests are rejected without touching the backend
//! - HalfOpen: recovery probing; enough successes close the circuit again

use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

/// Configuration for circuit breaker behavior.
///
/// `health_cache_ttl_secs` lives here because the breaker and the health
/// cache are tuned together: both decide how quickly the engine reacts to
/// a backend transition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CircuitBreakerConfig {
    /// Failures before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
    /// Successful probes in half-open before closing
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Freshness window for memoized health probes
    #[serde(default = "default_health_cache_ttl_secs")]
    pub health_cache_ttl_secs: u64,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_recovery_timeout_secs() -> u64 {
    60
}
fn default_success_threshold() -> u32 {
    3
}
fn default_health_cache_ttl_secs() -> u64 {
    30
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            success_threshold: default_success_threshold(),
            health_cache_ttl_secs: default_health_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Default)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    total_failures: u64,
    total_successes: u64,
    total_rejections: u64,
}

/// Per-backend failure-isolation state machine.
///
/// Shared across requests behind an `Arc`; every mutation is a point
/// update under the interior lock so concurrent requests never lose a
/// counter increment.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: RwLock<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: &str, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            inner: RwLock::new(BreakerInner::default()),
        }
    }

    /// Current state without side effects.
    pub fn state(&self) -> CircuitState {
        self.inner.read().unwrap().state
    }

    /// Whether calls must be rejected right now.
    ///
    /// Observing an expired recovery timeout transitions Open -> HalfOpen,
    /// so the first caller after the window becomes the probe.
    pub fn is_open(&self) -> bool {
        let mut inner = self.inner.write().unwrap();
        if inner.state != CircuitState::Open {
            return false;
        }

        let recovery = Duration::from_secs(self.config.recovery_timeout_secs);
        if let Some(last_failure) = inner.last_failure_time {
            if last_failure.elapsed() >= recovery {
                inner.state = CircuitState::HalfOpen;
                inner.success_count = 0;
                eprintln!(
                    "[breaker:{}] entering half-open after {}s recovery",
                    self.name, self.config.recovery_timeout_secs
                );
                return false;
            }
        }
        inner.total_rejections += 1;
        true
    }

    /// Record a successful call through the breaker.
    pub fn record_success(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.total_successes += 1;

        match inner.state {
            CircuitState::Closed => {
                // Successes walk the failure count back toward zero rather
                // than clearing it, so a flapping backend still trips.
                inner.failure_count = inner.failure_count.saturating_sub(1);
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    eprintln!(
                        "[breaker:{}] closed after {} successful probes",
                        self.name, self.config.success_threshold
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call through the breaker. Timeouts count as failures.
    pub fn record_failure(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.total_failures += 1;
        inner.failure_count += 1;
        inner.last_failure_time = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    eprintln!(
                        "[breaker:{}] opened after {} consecutive failures",
                        self.name, inner.failure_count
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.success_count = 0;
                eprintln!("[breaker:{}] reopened after probe failure", self.name);
            }
            CircuitState::Open => {}
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.read().unwrap().failure_count
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.read().unwrap();
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            total_rejections: inner.total_rejections,
        }
    }
}

/// Point-in-time breaker statistics, exposed through engine stats.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub total_rejections: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(
        failure_threshold: u32,
        recovery_secs: u64,
        success_threshold: u32,
    ) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            recovery_timeout_secs: recovery_secs,
            success_threshold,
            ..Default::default()
        }
    }

    #[test]
    fn test_starts_closed() {
        let breaker = CircuitBreaker::new("test", CircuitBreakerConfig::default());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(!breaker.is_open());
    }

    #[test]
    fn test_opens_at_threshold() {
        let breaker = CircuitBreaker::new("test", config(3, 60, 2));

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.is_open());
    }

    #[test]
    fn test_success_decrements_failure_count() {
        let breaker = CircuitBreaker::new("test", config(3, 60, 2));

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success(); // 2 -> 1
        breaker.record_failure(); // 1 -> 2
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 2);

        breaker.record_failure(); // 2 -> 3, trips
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_failure_count_never_underflows() {
        let breaker = CircuitBreaker::new("test", config(3, 60, 2));
        breaker.record_success();
        breaker.record_success();
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn test_half_open_recovery() {
        let breaker = CircuitBreaker::new("test", config(2, 0, 2));

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(10));

        // Observation after the recovery window transitions to half-open
        assert!(!breaker.is_open());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("test", config(2, 0, 2));

        breaker.record_failure();
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(10));
        assert!(!breaker.is_open()); // transitions to half-open

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.stats().success_count, 0);
    }

    #[test]
    fn test_rejections_counted_while_open() {
        let breaker = CircuitBreaker::new("test", config(1, 600, 2));
        breaker.record_failure();

        assert!(breaker.is_open());
        assert!(breaker.is_open());
        assert_eq!(breaker.stats().total_rejections, 2);
    }

    #[test]
    fn test_stats() {
        let breaker = CircuitBreaker::new("cache", CircuitBreakerConfig::default());
        breaker.record_success();
        breaker.record_success();
        breaker.record_failure();

        let stats = breaker.stats();
        assert_eq!(stats.name, "cache");
        assert_eq!(stats.total_successes, 2);
        assert_eq!(stats.total_failures, 1);
        assert_eq!(stats.state, CircuitState::Closed);
    }
}
