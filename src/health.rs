//! Short-TTL memoization of backend health probes.
//!
//! Health probes are network calls; the engine consults health on every
//! request, so probes are cached per backend and refreshed only once the
//! TTL expires. A failed probe falls back to the last known status when
//! one exists, so a transient probe error doesn't flip strategy selection.

use crate::error::SearchError;
use crate::types::HealthStatus;
use std::collections::HashMap;
use std::future::Future;
use std::sync::RwLock;
use std::time::{Duration, Instant};

pub struct HealthCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, (HealthStatus, Instant)>>,
}

impl HealthCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Return the cached status when fresh, otherwise probe and store.
    ///
    /// On probe failure the stale entry is returned when present; with no
    /// prior observation a synthetic unhealthy status carries the error.
    pub async fn get_or_probe<F, Fut>(&self, backend: &str, probe: F) -> HealthStatus
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<HealthStatus, SearchError>>,
    {
        if let Some(fresh) = self.fresh_entry(backend) {
            return fresh;
        }

        match probe().await {
            Ok(status) => {
                self.entries
                    .write()
                    .unwrap()
                    .insert(backend.to_string(), (status.clone(), Instant::now()));
                status
            }
            Err(error) => {
                eprintln!("[health:{}] probe failed: {}", backend, error);
                self.stale_entry(backend)
                    .unwrap_or_else(|| HealthStatus::unreachable(error.to_string()))
            }
        }
    }

    /// Last observed status regardless of freshness.
    pub fn last_observed(&self, backend: &str) -> Option<HealthStatus> {
        self.stale_entry(backend)
    }

    /// Drop the entry so the next lookup probes immediately.
    pub fn invalidate(&self, backend: &str) {
        self.entries.write().unwrap().remove(backend);
    }

    fn fresh_entry(&self, backend: &str) -> Option<HealthStatus> {
        let entries = self.entries.read().unwrap();
        entries.get(backend).and_then(|(status, observed_at)| {
            (observed_at.elapsed() < self.ttl).then(|| status.clone())
        })
    }

    fn stale_entry(&self, backend: &str) -> Option<HealthStatus> {
        self.entries
            .read()
            .unwrap()
            .get(backend)
            .map(|(status, _)| status.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HealthState;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn healthy(latency_ms: i64) -> HealthStatus {
        HealthStatus {
            is_connected: true,
            is_search_available: true,
            latency_ms,
            memory_usage: "1MB".to_string(),
            key_count: 10,
            last_sync: None,
            errors: Vec::new(),
            status: HealthState::Healthy,
        }
    }

    #[tokio::test]
    async fn test_fresh_entry_skips_probe() {
        let cache = HealthCache::new(Duration::from_secs(30));
        let probes = AtomicU32::new(0);

        for _ in 0..3 {
            let status = cache
                .get_or_probe("cache", || async {
                    probes.fetch_add(1, Ordering::SeqCst);
                    Ok(healthy(10))
                })
                .await;
            assert!(status.is_connected);
        }
        assert_eq!(probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_reprobes() {
        let cache = HealthCache::new(Duration::from_millis(0));
        let probes = AtomicU32::new(0);

        for _ in 0..2 {
            cache
                .get_or_probe("cache", || async {
                    probes.fetch_add(1, Ordering::SeqCst);
                    Ok(healthy(10))
                })
                .await;
        }
        assert_eq!(probes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_probe_failure_returns_stale() {
        let cache = HealthCache::new(Duration::from_millis(0));
        cache.get_or_probe("cache", || async { Ok(healthy(42)) }).await;

        let status = cache
            .get_or_probe("cache", || async {
                Err(SearchError::CacheConnection("refused".into()))
            })
            .await;
        assert!(status.is_connected);
        assert_eq!(status.latency_ms, 42);
    }

    #[tokio::test]
    async fn test_probe_failure_without_history_is_unhealthy() {
        let cache = HealthCache::new(Duration::from_secs(30));
        let status = cache
            .get_or_probe("cache", || async {
                Err(SearchError::CacheConnection("refused".into()))
            })
            .await;
        assert!(!status.is_connected);
        assert_eq!(status.status, HealthState::Unhealthy);
        assert_eq!(status.latency_ms, -1);
        assert!(status.errors[0].contains("refused"));
    }

    #[tokio::test]
    async fn test_invalidate_forces_probe() {
        let cache = HealthCache::new(Duration::from_secs(30));
        let probes = AtomicU32::new(0);

        cache
            .get_or_probe("db", || async {
                probes.fetch_add(1, Ordering::SeqCst);
                Ok(healthy(5))
            })
            .await;
        cache.invalidate("db");
        cache
            .get_or_probe("db", || async {
                probes.fetch_add(1, Ordering::SeqCst);
                Ok(healthy(5))
            })
            .await;
        assert_eq!(probes.load(Ordering::SeqCst), 2);
    }
}
