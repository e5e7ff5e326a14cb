//! Reference in-memory cache backend.
//!
//! A TTL key/value map (the write-through target) plus an indexed
//! document snapshot served through the common search surface.

use super::{paginate, passes_filters, score_match, sort_results};
use crate::error::{Result, SearchError};
use crate::provider::{BackendProvider, CacheProvider};
use crate::types::{HealthState, HealthStatus, SearchOptions, SearchResult};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

struct CacheEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

pub struct MemoryCache {
    name: String,
    connected: AtomicBool,
    entries: DashMap<String, CacheEntry>,
    docs: RwLock<Vec<SearchResult>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            name: "memory-cache".to_string(),
            connected: AtomicBool::new(false),
            entries: DashMap::new(),
            docs: RwLock::new(Vec::new()),
        }
    }

    /// Replace the searchable snapshot.
    pub fn index(&self, docs: Vec<SearchResult>) {
        *self.docs.write().unwrap() = docs;
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SearchError::CacheConnection(
                "memory cache not connected".to_string(),
            ))
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendProvider for MemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        self.ensure_connected()?;

        let docs = self.docs.read().unwrap();
        let mut matched = Vec::new();
        for doc in docs.iter() {
            if !passes_filters(doc, &options.filters) {
                continue;
            }
            if let Some((match_kind, score)) = score_match(doc, query) {
                let mut hit = doc.clone();
                hit.match_kind = match_kind;
                hit.set_score(score);
                matched.push(hit);
            }
        }
        drop(docs);

        sort_results(&mut matched, options.sort_by, options.sort_order);
        Ok(paginate(matched, options))
    }

    async fn check_health(&self) -> Result<HealthStatus> {
        let started = Instant::now();
        let connected = self.connected.load(Ordering::SeqCst);
        let key_count = self.entries.len() as u64;
        let doc_count = self.docs.read().unwrap().len() as u64;
        let latency_ms = started.elapsed().as_millis() as i64;

        Ok(HealthStatus {
            is_connected: connected,
            is_search_available: connected,
            latency_ms,
            memory_usage: format!("{}KB", (key_count + doc_count) / 2),
            key_count: key_count + doc_count,
            last_sync: None,
            errors: Vec::new(),
            status: if connected {
                HealthState::Healthy
            } else {
                HealthState::Unhealthy
            },
        })
    }
}

#[async_trait]
impl CacheProvider for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.ensure_connected()?;

        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Ok(Some(entry.value.clone()));
            }
        }
        // Expired entries are dropped lazily on read
        self.entries.remove_if(key, |_, entry| entry.is_expired());
        Ok(None)
    }

    async fn set(&self, key: &str, value: Value, ttl_secs: Option<u64>) -> Result<()> {
        self.ensure_connected()?;
        let expires_at = ttl_secs.map(|secs| Instant::now() + Duration::from_secs(secs));
        self.entries
            .insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.ensure_connected()?;
        self.entries.remove(key);
        Ok(())
    }

    async fn clear(&self, pattern: Option<&str>) -> Result<()> {
        self.ensure_connected()?;
        match pattern {
            None => self.entries.clear(),
            Some(pattern) => {
                let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
                if pattern.ends_with('*') {
                    self.entries.retain(|key, _| !key.starts_with(prefix));
                } else {
                    self.entries.remove(pattern);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::synthetic_patient;
    use serde_json::json;

    async fn connected_cache() -> MemoryCache {
        let cache = MemoryCache::new();
        cache.connect().await.unwrap();
        cache
    }

    #[tokio::test]
    async fn test_kv_round_trip() {
        let cache = connected_cache().await;
        cache.set("k1", json!({"a": 1}), None).await.unwrap();
        assert_eq!(cache.get("k1").await.unwrap(), Some(json!({"a": 1})));

        cache.delete("k1").await.unwrap();
        assert_eq!(cache.get("k1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = connected_cache().await;
        cache.set("gone", json!(1), Some(0)).await.unwrap();
        assert_eq!(cache.get("gone").await.unwrap(), None);

        cache.set("kept", json!(2), Some(3600)).await.unwrap();
        assert_eq!(cache.get("kept").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_clear_with_prefix_pattern() {
        let cache = connected_cache().await;
        cache.set("search:a", json!(1), None).await.unwrap();
        cache.set("search:b", json!(2), None).await.unwrap();
        cache.set("meta:c", json!(3), None).await.unwrap();

        cache.clear(Some("search:*")).await.unwrap();
        assert_eq!(cache.get("search:a").await.unwrap(), None);
        assert_eq!(cache.get("search:b").await.unwrap(), None);
        assert_eq!(cache.get("meta:c").await.unwrap(), Some(json!(3)));

        cache.clear(None).await.unwrap();
        assert_eq!(cache.get("meta:c").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_disconnected_operations_fail_typed() {
        let cache = MemoryCache::new();
        let err = cache.get("k").await.unwrap_err();
        assert!(matches!(err, SearchError::CacheConnection(_)));

        let err = cache
            .search("q", &SearchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::CacheConnection(_)));
    }

    #[tokio::test]
    async fn test_search_over_indexed_docs() {
        let cache = connected_cache().await;
        cache.index((1..=10).map(|i| synthetic_patient("healthcare", i)).collect());

        let results = cache
            .search("patient 3", &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "hea-3");
    }

    #[tokio::test]
    async fn test_health_counts_keys_and_docs() {
        let cache = connected_cache().await;
        cache.set("k", json!(1), None).await.unwrap();
        cache.index(vec![synthetic_patient("healthcare", 1)]);

        let health = cache.check_health().await.unwrap();
        assert_eq!(health.key_count, 2);
        assert_eq!(health.status, HealthState::Healthy);
    }
}
