//! Search orchestration.
//!
//! The engine resolves a strategy from live health and breaker state,
//! dispatches the primary backend through its breaker, falls back on
//! failure, write-through-caches successful database results, and runs
//! the governance pipeline for secure searches. Partial failures return
//! an empty result set with the error strings in the performance block;
//! only timeouts, hybrid double-failures, and governance problems surface
//! as errors.

use crate::backends::passes_filters;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerStats};
use crate::config::EngineConfig;
use crate::error::{Result, SearchError};
use crate::governance::{redact_query, DataGovernance, RowFilter};
use crate::health::HealthCache;
use crate::merge::merge_results;
use crate::metrics;
use crate::provider::{BackendProvider, CacheProvider};
use crate::strategy::select_strategy;
use crate::types::{
    HealthStatus, SearchFilters, SearchOptions, SearchPerformance, SearchResponse, SearchResult,
    SecureSearchResponse, SecurityContext, Strategy, StrategyDecision,
};
use chrono::Utc;
use md5::{Digest, Md5};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct SearchEngine {
    database: Arc<dyn BackendProvider>,
    cache: Option<Arc<dyn CacheProvider>>,
    config: EngineConfig,
    database_breaker: Arc<CircuitBreaker>,
    cache_breaker: Arc<CircuitBreaker>,
    health: HealthCache,
    governance: Option<Arc<DataGovernance>>,
}

impl SearchEngine {
    pub fn new(
        database: Arc<dyn BackendProvider>,
        cache: Option<Arc<dyn CacheProvider>>,
        config: EngineConfig,
    ) -> Self {
        let breaker_config = config.circuit_breaker.clone();
        let governance = config
            .governance
            .as_ref()
            .map(|governance_config| Arc::new(DataGovernance::new(governance_config)));
        Self {
            database,
            cache,
            database_breaker: Arc::new(CircuitBreaker::new("database", breaker_config.clone())),
            cache_breaker: Arc::new(CircuitBreaker::new("cache", breaker_config.clone())),
            health: HealthCache::new(Duration::from_secs(breaker_config.health_cache_ttl_secs)),
            governance,
            config,
        }
    }

    /// Replace the governance service, e.g. to install a custom audit sink.
    pub fn with_governance(mut self, governance: Arc<DataGovernance>) -> Self {
        self.governance = Some(governance);
        self
    }

    pub fn governance(&self) -> Option<&Arc<DataGovernance>> {
        self.governance.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn connect(&self) -> Result<()> {
        self.database.connect().await?;
        if let Some(cache) = &self.cache {
            cache.connect().await?;
        }
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.database.disconnect().await?;
        if let Some(cache) = &self.cache {
            cache.disconnect().await?;
        }
        Ok(())
    }

    /// Intelligent search with automatic fallback.
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchResponse> {
        let started = Instant::now();
        self.with_timeout(options, self.search_inner(query, options, started))
            .await
    }

    /// Fan out to both backends and merge, when hybrid search is enabled.
    /// Falls back to the normal path otherwise.
    pub async fn hybrid_search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        if !self.config.hybrid.enabled || self.cache.is_none() {
            return self.search(query, options).await;
        }
        let started = Instant::now();
        self.with_timeout(options, self.hybrid_inner(query, options, started))
            .await
    }

    /// Governed search: row-level security, column masking, and an audit
    /// entry for every request, success or failure. Failures surface as
    /// an access denial carrying the underlying error message.
    pub async fn secure_search(
        &self,
        query: &str,
        context: &SecurityContext,
        options: &SearchOptions,
    ) -> Result<SecureSearchResponse> {
        let governance = self
            .governance
            .as_ref()
            .ok_or(SearchError::GovernanceNotConfigured)?;
        let started = Instant::now();
        let dataset = options
            .filters
            .custom
            .get("dataset")
            .and_then(Value::as_str)
            .unwrap_or("default")
            .to_string();

        match self
            .secure_search_inner(governance, query, context, options, &dataset)
            .await
        {
            Ok(response) => Ok(response),
            Err(error) => {
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                if let Err(audit_error) = governance
                    .audit_search(
                        query,
                        context,
                        &dataset,
                        0,
                        elapsed_ms,
                        false,
                        Some(error.to_string()),
                        0,
                    )
                    .await
                {
                    eprintln!("[governance:audit] failed to record failure: {}", audit_error);
                }
                Err(SearchError::AccessDenied {
                    user_id: context.user_id.clone(),
                    user_role: context.user_role.clone(),
                    message: error.to_string(),
                })
            }
        }
    }

    /// Health of the cache backend, memoized per the health-cache TTL.
    pub async fn cache_health(&self) -> Option<HealthStatus> {
        let cache = self.cache.as_ref()?;
        Some(
            self.health
                .get_or_probe("cache", || cache.check_health())
                .await,
        )
    }

    /// Health of the database backend, memoized per the health-cache TTL.
    pub async fn database_health(&self) -> HealthStatus {
        self.health
            .get_or_probe("database", || self.database.check_health())
            .await
    }

    /// Combined service statistics: backend health, breakers, and the
    /// strategy the engine would pick right now.
    pub async fn search_stats(&self) -> EngineStats {
        let cache_health = self.cache_health().await;
        let database_health = self.database_health().await;
        let mut circuit_breakers = vec![self.database_breaker.stats()];
        if self.cache.is_some() {
            circuit_breakers.push(self.cache_breaker.stats());
        }

        EngineStats {
            cache_health,
            database_health,
            circuit_breakers,
            recommended_strategy: self.resolve_strategy().await,
            configuration: EngineStatsConfig {
                hybrid_enabled: self.config.hybrid.enabled,
                governance_enabled: self.governance.is_some(),
                metrics_enabled: self.config.performance.enable_metrics,
                cache_configured: self.cache.is_some(),
            },
        }
    }

    /// Drop cached entries, optionally by `prefix*` pattern.
    pub async fn clear_cache(&self, pattern: Option<&str>) -> Result<()> {
        let Some(cache) = &self.cache else {
            return Ok(());
        };
        cache.clear(pattern).await?;
        eprintln!("[search] cache cleared");
        Ok(())
    }

    /// The strategy the engine would use for a request right now.
    pub async fn resolve_strategy(&self) -> StrategyDecision {
        let has_cache = self.cache.is_some();
        let breaker_open = has_cache && self.cache_breaker.is_open();
        let cache_health = if has_cache && !breaker_open {
            self.cache_health().await
        } else {
            None
        };

        let decision = select_strategy(has_cache, breaker_open, cache_health.as_ref());
        if decision.primary == Strategy::Cache && self.config.hybrid.enabled {
            return StrategyDecision {
                primary: Strategy::Hybrid,
                fallback: Strategy::Database,
                reason: format!("hybrid enabled; {}", decision.reason),
            };
        }
        decision
    }

    async fn search_inner(
        &self,
        query: &str,
        options: &SearchOptions,
        started: Instant,
    ) -> Result<SearchResponse> {
        let decision = self.resolve_strategy().await;
        if self.config.performance.log_queries {
            eprintln!(
                "[search] using {} strategy: {}",
                decision.primary.as_str(),
                decision.reason
            );
        }

        if decision.primary == Strategy::Hybrid {
            return self.hybrid_inner(query, options, started).await;
        }

        let response = match self.dispatch(decision.primary, query, options).await {
            Ok(results) => {
                if decision.primary == Strategy::Database
                    && options.cache_enabled
                    && !results.is_empty()
                {
                    self.write_through(query, options, &results).await;
                }
                let taken = decision.primary;
                self.build_response(query, started, results, decision, taken, Vec::new())
            }
            Err(primary_error) => {
                eprintln!(
                    "[search] {} search failed, trying fallback: {}",
                    decision.primary.as_str(),
                    primary_error
                );
                if !options.fallback_enabled || !primary_error.is_recoverable() {
                    return Err(primary_error);
                }

                match self.dispatch(decision.fallback, query, options).await {
                    Ok(results) => {
                        let taken = decision.fallback;
                        self.build_response(
                            query,
                            started,
                            results,
                            decision,
                            taken,
                            vec![primary_error.to_string()],
                        )
                    }
                    Err(fallback_error) => self.build_response(
                        query,
                        started,
                        Vec::new(),
                        decision,
                        Strategy::Database,
                        vec![primary_error.to_string(), fallback_error.to_string()],
                    ),
                }
            }
        };

        self.finish(query, &response);
        Ok(response)
    }

    async fn hybrid_inner(
        &self,
        query: &str,
        options: &SearchOptions,
        started: Instant,
    ) -> Result<SearchResponse> {
        let (cache_outcome, db_outcome) = tokio::join!(
            self.search_with_cache(query, options),
            self.search_with_database(query, options)
        );

        let mut response = match (cache_outcome, db_outcome) {
            (Ok(cache_results), Ok(db_results)) => {
                let cache_count = cache_results.len();
                let db_count = db_results.len();
                let merged = merge_results(cache_results, db_results, &self.config.hybrid.merge);
                let decision = StrategyDecision {
                    primary: Strategy::Hybrid,
                    fallback: Strategy::Database,
                    reason: format!(
                        "hybrid merge: {} cache + {} database results",
                        cache_count, db_count
                    ),
                };
                let mut response = self.build_response(
                    query,
                    started,
                    merged,
                    decision,
                    Strategy::Hybrid,
                    Vec::new(),
                );
                response
                    .metadata
                    .insert("cache_results".into(), json!(cache_count));
                response.metadata.insert("db_results".into(), json!(db_count));
                response
            }
            (Ok(cache_results), Err(db_error)) => {
                let decision = StrategyDecision {
                    primary: Strategy::Cache,
                    fallback: Strategy::Database,
                    reason: "database failed, using cache results only".to_string(),
                };
                self.build_response(
                    query,
                    started,
                    cache_results,
                    decision,
                    Strategy::Cache,
                    vec![format!("database error: {}", db_error)],
                )
            }
            (Err(cache_error), Ok(db_results)) => {
                let decision = StrategyDecision {
                    primary: Strategy::Database,
                    fallback: Strategy::Cache,
                    reason: "cache failed, using database results only".to_string(),
                };
                self.build_response(
                    query,
                    started,
                    db_results,
                    decision,
                    Strategy::Database,
                    vec![format!("cache error: {}", cache_error)],
                )
            }
            (Err(cache_error), Err(db_error)) => {
                return Err(SearchError::HybridSearchFailure {
                    cache_error: cache_error.to_string(),
                    database_error: db_error.to_string(),
                });
            }
        };

        response.metadata.insert("hybrid_search".into(), json!(true));
        self.finish(query, &response);
        Ok(response)
    }

    async fn secure_search_inner(
        &self,
        governance: &Arc<DataGovernance>,
        query: &str,
        context: &SecurityContext,
        options: &SearchOptions,
        dataset: &str,
    ) -> Result<SecureSearchResponse> {
        let compiled = governance.compile(dataset, &context.user_role)?;

        // Row-level security narrows the provider query when it can be
        // expressed as an equality filter; results are re-filtered below
        // either way.
        let mut secured_options = options.clone();
        if compiled.row_filter == RowFilter::RegionInAllowedRegions {
            if let [region] = context.allowed_regions.as_slice() {
                secured_options
                    .filters
                    .custom
                    .insert("region".into(), json!(region));
            }
        }

        let response = self.search(query, &secured_options).await?;
        let visible = governance.apply_row_security(response.results, &compiled, context);
        let masked = governance.mask_results(visible, &compiled);

        let mut performance = response.performance;
        performance.result_count = masked.len();

        let audit_id = governance
            .audit_search(
                query,
                context,
                dataset,
                masked.len(),
                performance.search_time_ms,
                true,
                None,
                compiled.masks.len(),
            )
            .await?;

        let mut metadata = response.metadata;
        metadata.insert("user_id".into(), json!(context.user_id));
        metadata.insert("user_role".into(), json!(context.user_role));
        metadata.insert("security_applied".into(), json!(true));
        metadata.insert("masked_fields".into(), json!(compiled.masked_fields()));

        Ok(SecureSearchResponse {
            results: masked,
            performance,
            strategy: response.strategy,
            audit_id,
            compliance_status: Some("COMPLIANT".to_string()),
            metadata,
        })
    }

    async fn dispatch(
        &self,
        strategy: Strategy,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        match strategy {
            Strategy::Cache => self.search_with_cache(query, options).await,
            Strategy::Database | Strategy::Hybrid => {
                self.search_with_database(query, options).await
            }
        }
    }

    async fn search_with_cache(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let cache = self.cache.as_ref().ok_or_else(|| {
            SearchError::CacheConnection("cache provider not configured".to_string())
        })?;
        let results =
            through_breaker(&self.cache_breaker, "cache", || cache.search(query, options)).await?;
        Ok(refilter(results, &options.filters))
    }

    async fn search_with_database(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let results = through_breaker(&self.database_breaker, "database", || {
            self.database.search(query, options)
        })
        .await?;
        Ok(refilter(results, &options.filters))
    }

    /// Store database results under the canonical key so the next
    /// identical query can be served from the cache. Failures only warn;
    /// caching is an optimization, not a dependency.
    async fn write_through(&self, query: &str, options: &SearchOptions, results: &[SearchResult]) {
        let Some(cache) = &self.cache else {
            return;
        };
        let key = cache_key(query, options);
        let ttl = options
            .cache_ttl
            .unwrap_or(self.config.cache.default_ttl_secs);
        match serde_json::to_value(results) {
            Ok(payload) => {
                if let Err(error) = cache.set(&key, payload, Some(ttl)).await {
                    eprintln!("[search] failed to cache results: {}", error);
                }
            }
            Err(error) => eprintln!("[search] failed to serialize results for cache: {}", error),
        }
    }

    async fn with_timeout<F>(&self, options: &SearchOptions, fut: F) -> Result<SearchResponse>
    where
        F: Future<Output = Result<SearchResponse>>,
    {
        match options.timeout_ms {
            Some(timeout_ms) => tokio::time::timeout(Duration::from_millis(timeout_ms), fut)
                .await
                .map_err(|_| SearchError::Timeout { timeout_ms })?,
            None => fut.await,
        }
    }

    fn build_response(
        &self,
        query: &str,
        started: Instant,
        results: Vec<SearchResult>,
        decision: StrategyDecision,
        taken: Strategy,
        errors: Vec<String>,
    ) -> SearchResponse {
        let performance = SearchPerformance {
            search_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            result_count: results.len(),
            strategy: taken,
            cache_hit: matches!(taken, Strategy::Cache | Strategy::Hybrid),
            errors,
        };

        let mut metadata = Map::new();
        metadata.insert("query".into(), json!(redact_query(query)));
        metadata.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));

        SearchResponse {
            results,
            performance,
            strategy: decision,
            metadata,
        }
    }

    fn finish(&self, query: &str, response: &SearchResponse) {
        let performance = &response.performance;
        if self.config.performance.enable_metrics {
            metrics::observe_search(
                performance.strategy.as_str(),
                !response.results.is_empty(),
                performance.search_time_ms,
            );
        }

        let threshold = self.config.performance.slow_query_threshold_ms as f64;
        let slow = performance.search_time_ms > threshold;
        if self.config.performance.log_queries || slow {
            let preview: String = redact_query(query).chars().take(50).collect();
            eprintln!(
                "[search] '{}': {} results in {:.1}ms via {} ({})",
                preview,
                performance.result_count,
                performance.search_time_ms,
                performance.strategy.as_str(),
                response.strategy.reason
            );
            if slow {
                eprintln!(
                    "[search] slow query: {:.1}ms for '{}'",
                    performance.search_time_ms, preview
                );
            }
        }
    }
}

/// A provider may ignore filters it cannot translate, so every result
/// set coming back from a backend is re-filtered here before the engine
/// uses it.
fn refilter(results: Vec<SearchResult>, filters: &SearchFilters) -> Vec<SearchResult> {
    if filters.is_empty() {
        return results;
    }
    results
        .into_iter()
        .filter(|result| passes_filters(result, filters))
        .collect()
}

/// Run one backend operation through a breaker. The breaker observes
/// every failure the operation raises; open circuits reject without
/// touching the backend.
async fn through_breaker<F, Fut>(
    breaker: &CircuitBreaker,
    backend: &str,
    op: F,
) -> Result<Vec<SearchResult>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<SearchResult>>>,
{
    if breaker.is_open() {
        return Err(SearchError::CircuitBreakerOpen {
            backend: backend.to_string(),
            failure_count: breaker.failure_count(),
        });
    }
    match op().await {
        Ok(results) => {
            breaker.record_success();
            Ok(results)
        }
        Err(error) => {
            breaker.record_failure();
            Err(error)
        }
    }
}

/// Canonical write-through cache key: `search:` + MD5 of the sorted-key
/// JSON of the query and the options that shape the result set.
pub fn cache_key(query: &str, options: &SearchOptions) -> String {
    let canonical = json!({
        "query": query,
        "limit": options.limit,
        "offset": options.offset,
        "sort_by": options.sort_by,
        "sort_order": options.sort_order,
        "filters": options.filters,
    });
    format!("search:{:x}", Md5::digest(canonical.to_string().as_bytes()))
}

/// Combined service statistics.
#[derive(Debug, Serialize)]
pub struct EngineStats {
    pub cache_health: Option<HealthStatus>,
    pub database_health: HealthStatus,
    pub circuit_breakers: Vec<CircuitBreakerStats>,
    pub recommended_strategy: StrategyDecision,
    pub configuration: EngineStatsConfig,
}

#[derive(Debug, Serialize)]
pub struct EngineStatsConfig {
    pub hybrid_enabled: bool,
    pub governance_enabled: bool,
    pub metrics_enabled: bool,
    pub cache_configured: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryProvider;
    use crate::config::{GovernanceConfig, HybridConfig};
    use crate::governance::audit::MemoryAuditSink;
    use crate::types::{HealthState, MatchKind, ResultKind};
    use async_trait::async_trait;
    use dashmap::DashMap;
    use std::io::Write;
    use std::sync::atomic::{AtomicU32, Ordering};

    const ALWAYS: u32 = u32::MAX;

    /// Scripted backend: serves canned results, fails on demand, and
    /// records every search call and cache write.
    struct StubBackend {
        name: String,
        results: Vec<SearchResult>,
        failures_remaining: AtomicU32,
        search_calls: AtomicU32,
        delay: Option<Duration>,
        health: HealthStatus,
        cache_flavored: bool,
        kv: DashMap<String, (Value, Option<u64>)>,
    }

    impl StubBackend {
        fn database(results: Vec<SearchResult>) -> Self {
            Self {
                name: "stub-db".to_string(),
                results,
                failures_remaining: AtomicU32::new(0),
                search_calls: AtomicU32::new(0),
                delay: None,
                health: healthy_status(5),
                cache_flavored: false,
                kv: DashMap::new(),
            }
        }

        fn cache(results: Vec<SearchResult>) -> Self {
            Self {
                name: "stub-cache".to_string(),
                cache_flavored: true,
                health: healthy_status(10),
                ..Self::database(results)
            }
        }

        fn failing(mut self, times: u32) -> Self {
            self.failures_remaining = AtomicU32::new(times);
            self
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn with_health(mut self, health: HealthStatus) -> Self {
            self.health = health;
            self
        }

        fn search_calls(&self) -> u32 {
            self.search_calls.load(Ordering::SeqCst)
        }

        fn connection_error(&self) -> SearchError {
            if self.cache_flavored {
                SearchError::CacheConnection("stub cache down".to_string())
            } else {
                SearchError::DatabaseConnection("stub database down".to_string())
            }
        }
    }

    fn healthy_status(latency_ms: i64) -> HealthStatus {
        HealthStatus {
            is_connected: true,
            is_search_available: true,
            latency_ms,
            memory_usage: "1MB".to_string(),
            key_count: 1,
            last_sync: None,
            errors: Vec::new(),
            status: HealthState::Healthy,
        }
    }

    fn degraded_status() -> HealthStatus {
        HealthStatus {
            is_search_available: false,
            status: HealthState::Degraded,
            ..healthy_status(10)
        }
    }

    #[async_trait]
    impl BackendProvider for StubBackend {
        fn name(&self) -> &str {
            &self.name
        }

        async fn connect(&self) -> Result<()> {
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }

        async fn is_connected(&self) -> bool {
            true
        }

        async fn search(&self, _query: &str, _options: &SearchOptions) -> Result<Vec<SearchResult>> {
            self.search_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let remaining = self.failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                if remaining != ALWAYS {
                    self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
                }
                return Err(self.connection_error());
            }
            Ok(self.results.clone())
        }

        async fn check_health(&self) -> Result<HealthStatus> {
            Ok(self.health.clone())
        }
    }

    #[async_trait]
    impl CacheProvider for StubBackend {
        async fn get(&self, key: &str) -> Result<Option<Value>> {
            Ok(self.kv.get(key).map(|entry| entry.0.clone()))
        }

        async fn set(&self, key: &str, value: Value, ttl_secs: Option<u64>) -> Result<()> {
            self.kv.insert(key.to_string(), (value, ttl_secs));
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.kv.remove(key);
            Ok(())
        }

        async fn clear(&self, _pattern: Option<&str>) -> Result<()> {
            self.kv.clear();
            Ok(())
        }
    }

    fn doc(id: &str, score: i64) -> SearchResult {
        SearchResult::new(id, ResultKind::HealthcareData, id.to_uppercase(), score, MatchKind::Title)
    }

    fn engine_with(
        db: Arc<StubBackend>,
        cache: Option<Arc<StubBackend>>,
        config: EngineConfig,
    ) -> SearchEngine {
        SearchEngine::new(
            db,
            cache.map(|c| c as Arc<dyn CacheProvider>),
            config,
        )
    }

    #[tokio::test]
    async fn test_no_cache_strategy_is_database_both_ways() {
        let engine = engine_with(
            Arc::new(StubBackend::database(vec![doc("a", 80)])),
            None,
            EngineConfig::default(),
        );
        let decision = engine.resolve_strategy().await;
        assert_eq!(decision.primary, Strategy::Database);
        assert_eq!(decision.fallback, Strategy::Database);
    }

    #[tokio::test]
    async fn test_healthy_cache_serves_hit() {
        // Cache reports 10ms latency and serves the query
        let cache = Arc::new(StubBackend::cache(vec![doc("hit", 90)]));
        let engine = engine_with(
            Arc::new(StubBackend::database(vec![doc("db", 40)])),
            Some(Arc::clone(&cache)),
            EngineConfig::default(),
        );

        let response = engine
            .search("asthma", &SearchOptions::default())
            .await
            .unwrap();

        assert_eq!(response.strategy.primary, Strategy::Cache);
        assert_eq!(response.strategy.reason, "cache healthy (10ms)");
        assert!(response.performance.cache_hit);
        assert_eq!(response.results[0].id, "hit");
        assert!(response.performance.errors.is_empty());
    }

    #[tokio::test]
    async fn test_breaker_opens_after_repeated_cache_failures() {
        let cache = Arc::new(StubBackend::cache(vec![doc("never", 1)]).failing(ALWAYS));
        let db = Arc::new(StubBackend::database(vec![doc("db", 40)]));
        let engine = engine_with(Arc::clone(&db), Some(Arc::clone(&cache)), EngineConfig::default());

        // Five failures trip the breaker (threshold 5); every request
        // still succeeds via the database fallback.
        for _ in 0..5 {
            let response = engine
                .search("asthma", &SearchOptions::default())
                .await
                .unwrap();
            assert_eq!(response.results[0].id, "db");
            assert_eq!(response.performance.errors.len(), 1);
        }
        assert_eq!(cache.search_calls(), 5);

        // Sixth request: breaker short-circuits, cache never touched
        let response = engine
            .search("asthma", &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(response.strategy.primary, Strategy::Database);
        assert!(response.strategy.reason.contains("breaker open"));
        assert!(!response.performance.cache_hit);
        assert_eq!(cache.search_calls(), 5);
    }

    #[tokio::test]
    async fn test_fallback_serves_results_with_error_trail() {
        let cache = Arc::new(StubBackend::cache(vec![doc("c", 80)]).failing(1));
        let db = Arc::new(StubBackend::database(vec![doc("d", 60)]));
        let engine = engine_with(db, Some(cache), EngineConfig::default());

        let response = engine
            .search("flu", &SearchOptions::default())
            .await
            .unwrap();

        assert_eq!(response.performance.strategy, Strategy::Database);
        assert!(!response.performance.cache_hit);
        assert_eq!(response.results[0].id, "d");
        assert_eq!(response.performance.errors.len(), 1);
        assert!(response.performance.errors[0].contains("stub cache down"));
    }

    #[tokio::test]
    async fn test_both_backends_down_returns_empty_with_errors() {
        let cache = Arc::new(StubBackend::cache(Vec::new()).failing(ALWAYS));
        let db = Arc::new(StubBackend::database(Vec::new()).failing(ALWAYS));
        let engine = engine_with(db, Some(cache), EngineConfig::default());

        let response = engine
            .search("anything", &SearchOptions::default())
            .await
            .unwrap();

        assert!(response.results.is_empty());
        assert_eq!(response.performance.errors.len(), 2);
        assert!(!response.performance.cache_hit);
    }

    #[tokio::test]
    async fn test_fallback_disabled_surfaces_primary_error() {
        let cache = Arc::new(StubBackend::cache(Vec::new()).failing(ALWAYS));
        let db = Arc::new(StubBackend::database(vec![doc("d", 60)]));
        let engine = engine_with(Arc::clone(&db), Some(cache), EngineConfig::default());

        let options = SearchOptions {
            fallback_enabled: false,
            ..Default::default()
        };
        let err = engine.search("flu", &options).await.unwrap_err();
        assert!(matches!(err, SearchError::CacheConnection(_)));
        assert_eq!(db.search_calls(), 0);
    }

    #[tokio::test]
    async fn test_results_refiltered_when_provider_ignores_filters() {
        // StubBackend ignores filters entirely; the engine re-filters
        let db = Arc::new(StubBackend::database(vec![doc("a", 80), doc("b", 60)]));
        let engine = engine_with(Arc::clone(&db), None, EngineConfig::default());

        let options = SearchOptions {
            filters: SearchFilters {
                kinds: Some(vec![ResultKind::User]),
                ..Default::default()
            },
            ..Default::default()
        };
        let response = engine.search("q", &options).await.unwrap();
        assert_eq!(db.search_calls(), 1);
        assert!(response.results.is_empty());

        let options = SearchOptions {
            filters: SearchFilters {
                kinds: Some(vec![ResultKind::HealthcareData]),
                ..Default::default()
            },
            ..Default::default()
        };
        let response = engine.search("q", &options).await.unwrap();
        assert_eq!(response.results.len(), 2);
    }

    #[tokio::test]
    async fn test_hybrid_results_refiltered() {
        let cache = Arc::new(StubBackend::cache(vec![doc("a", 80)]));
        let db = Arc::new(StubBackend::database(vec![doc("b", 90)]));
        let engine = engine_with(db, Some(cache), hybrid_config());

        let options = SearchOptions {
            filters: SearchFilters {
                kinds: Some(vec![ResultKind::User]),
                ..Default::default()
            },
            ..Default::default()
        };
        let response = engine.search("q", &options).await.unwrap();
        assert_eq!(response.strategy.primary, Strategy::Hybrid);
        assert!(response.results.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_is_enforced() {
        let db = Arc::new(
            StubBackend::database(vec![doc("slow", 10)]).slow(Duration::from_millis(200)),
        );
        let engine = engine_with(db, None, EngineConfig::default());

        let options = SearchOptions {
            timeout_ms: Some(20),
            ..Default::default()
        };
        let err = engine.search("q", &options).await.unwrap_err();
        assert!(matches!(err, SearchError::Timeout { timeout_ms: 20 }));
    }

    #[tokio::test]
    async fn test_database_results_write_through_to_cache() {
        // Degraded cache: connected but not searchable, so the database is
        // primary while the key/value surface still works.
        let cache = Arc::new(StubBackend::cache(Vec::new()).with_health(degraded_status()));
        let db = Arc::new(StubBackend::database(vec![doc("d1", 70), doc("d2", 50)]));
        let engine = engine_with(db, Some(Arc::clone(&cache)), EngineConfig::default());

        let options = SearchOptions::default();
        let response = engine.search("flu", &options).await.unwrap();
        assert_eq!(response.performance.strategy, Strategy::Database);

        let key = cache_key("flu", &options);
        let stored = cache.kv.get(&key).expect("write-through entry");
        assert_eq!(stored.1, Some(300));
        assert_eq!(stored.0.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_write_through_skipped_when_cache_disabled() {
        let cache = Arc::new(StubBackend::cache(Vec::new()).with_health(degraded_status()));
        let db = Arc::new(StubBackend::database(vec![doc("d1", 70)]));
        let engine = engine_with(db, Some(Arc::clone(&cache)), EngineConfig::default());

        let options = SearchOptions {
            cache_enabled: false,
            ..Default::default()
        };
        engine.search("flu", &options).await.unwrap();
        assert!(cache.kv.is_empty());
    }

    fn hybrid_config() -> EngineConfig {
        EngineConfig {
            hybrid: HybridConfig {
                enabled: true,
                merge: Default::default(),
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_hybrid_merges_both_sides() {
        let cache = Arc::new(StubBackend::cache(vec![doc("a", 80), doc("b", 60)]));
        let db = Arc::new(StubBackend::database(vec![doc("b", 90), doc("c", 50)]));
        let engine = engine_with(db, Some(cache), hybrid_config());

        let response = engine
            .search("q", &SearchOptions::default())
            .await
            .unwrap();

        assert_eq!(response.strategy.primary, Strategy::Hybrid);
        assert_eq!(response.performance.strategy, Strategy::Hybrid);
        assert!(response.performance.cache_hit);
        let ids: Vec<&str> = response.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
        assert_eq!(response.results[0].relevance_score, 69);
        assert_eq!(response.metadata["hybrid_search"], json!(true));
    }

    #[tokio::test]
    async fn test_hybrid_survives_database_failure() {
        let cache = Arc::new(StubBackend::cache(vec![doc("a", 80)]));
        let db = Arc::new(StubBackend::database(Vec::new()).failing(ALWAYS));
        let engine = engine_with(db, Some(cache), hybrid_config());

        let response = engine
            .search("q", &SearchOptions::default())
            .await
            .unwrap();

        assert_eq!(response.strategy.primary, Strategy::Cache);
        assert!(response.strategy.reason.contains("database failed"));
        assert_eq!(response.results[0].id, "a");
        assert_eq!(response.performance.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_hybrid_survives_cache_failure() {
        let cache = Arc::new(StubBackend::cache(Vec::new()).failing(ALWAYS));
        let db = Arc::new(StubBackend::database(vec![doc("d", 40)]));
        let engine = engine_with(db, Some(cache), hybrid_config());

        let response = engine
            .search("q", &SearchOptions::default())
            .await
            .unwrap();

        assert_eq!(response.strategy.primary, Strategy::Database);
        assert!(response.strategy.reason.contains("cache failed"));
        assert!(!response.performance.cache_hit);
        assert_eq!(response.results[0].id, "d");
    }

    #[tokio::test]
    async fn test_hybrid_double_failure_surfaces() {
        let cache = Arc::new(StubBackend::cache(Vec::new()).failing(ALWAYS));
        let db = Arc::new(StubBackend::database(Vec::new()).failing(ALWAYS));
        let engine = engine_with(db, Some(cache), hybrid_config());

        let err = engine
            .search("q", &SearchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::HybridSearchFailure { .. }));
    }

    #[tokio::test]
    async fn test_cache_key_is_canonical() {
        let options = SearchOptions::default();
        let key = cache_key("asthma", &options);
        assert!(key.starts_with("search:"));
        assert_eq!(key.len(), "search:".len() + 32);
        assert_eq!(key, cache_key("asthma", &options));

        let other = SearchOptions {
            limit: 5,
            ..Default::default()
        };
        assert_ne!(key, cache_key("asthma", &other));
        assert_ne!(key, cache_key("diabetes", &options));
    }

    #[tokio::test]
    async fn test_search_stats_reports_breakers_and_strategy() {
        let cache = Arc::new(StubBackend::cache(vec![doc("a", 10)]));
        let db = Arc::new(StubBackend::database(vec![doc("b", 10)]));
        let engine = engine_with(db, Some(cache), EngineConfig::default());

        let stats = engine.search_stats().await;
        assert!(stats.cache_health.unwrap().is_connected);
        assert!(stats.database_health.is_connected);
        assert_eq!(stats.circuit_breakers.len(), 2);
        assert_eq!(stats.recommended_strategy.primary, Strategy::Cache);
        assert!(stats.configuration.cache_configured);
        assert!(!stats.configuration.hybrid_enabled);
    }

    const GOVERNED_POLICY: &str = r#"
roles:
  - id: business_user
    row_filter: "region in ${user.allowed_regions}"
    column_masks:
      ssn: redact_part
  - id: admin
    row_filter: "true"
"#;

    fn governed_engine(dir: &tempfile::TempDir) -> (SearchEngine, Arc<MemoryAuditSink>) {
        let mut file = std::fs::File::create(dir.path().join("healthcare.yaml")).unwrap();
        file.write_all(GOVERNED_POLICY.as_bytes()).unwrap();

        let provider = Arc::new(MemoryProvider::new());
        provider.seed_synthetic("healthcare", 20);
        let governance_config = GovernanceConfig {
            policy_dir: dir.path().to_path_buf(),
            token_map_capacity: 1024,
        };
        let config = EngineConfig {
            governance: Some(governance_config.clone()),
            ..Default::default()
        };
        let sink = Arc::new(MemoryAuditSink::new());
        let governance = DataGovernance::new(&governance_config)
            .with_audit_sink(Arc::clone(&sink) as Arc<dyn crate::governance::audit::AuditSink>);
        let engine =
            SearchEngine::new(provider, None, config).with_governance(Arc::new(governance));
        (engine, sink)
    }

    fn governed_options() -> SearchOptions {
        let mut options = SearchOptions::default();
        options
            .filters
            .custom
            .insert("dataset".into(), json!("healthcare"));
        options
    }

    #[tokio::test]
    async fn test_secure_search_filters_rows_and_masks_fields() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _sink) = governed_engine(&dir);
        engine.connect().await.unwrap();

        let mut context = SecurityContext::new("u1", "business_user");
        context.allowed_regions = vec!["NE".to_string()];

        let response = engine
            .secure_search("patient", &context, &governed_options())
            .await
            .unwrap();

        assert!(!response.results.is_empty());
        for result in &response.results {
            assert_eq!(result.metadata["region"], json!("NE"));
            let ssn = result.metadata["ssn"].as_str().unwrap();
            assert!(ssn.starts_with("*******"), "ssn not masked: {}", ssn);
        }
        assert!(!response.audit_id.is_empty());
        assert_eq!(response.compliance_status.as_deref(), Some("COMPLIANT"));
        assert_eq!(response.metadata["masked_fields"], json!(["ssn"]));

        // The audit entry is retrievable by the id the response carries
        let sink = engine.governance().unwrap().audit_sink();
        let entry = sink.get(&response.audit_id).await.unwrap().unwrap();
        assert!(entry.success);
        assert_eq!(entry.result_count, Some(response.results.len()));
        assert!(entry.sensitive_data_accessed);
    }

    #[tokio::test]
    async fn test_secure_search_without_governance_fails() {
        let engine = engine_with(
            Arc::new(StubBackend::database(Vec::new())),
            None,
            EngineConfig::default(),
        );
        let context = SecurityContext::new("u1", "admin");
        let err = engine
            .secure_search("q", &context, &SearchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::GovernanceNotConfigured));
    }

    #[tokio::test]
    async fn test_secure_search_failure_writes_audit_entry() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, sink) = governed_engine(&dir);
        engine.connect().await.unwrap();

        let context = SecurityContext::new("u1", "admin");
        let mut options = SearchOptions::default();
        options
            .filters
            .custom
            .insert("dataset".into(), json!("no_such_dataset"));

        let err = engine
            .secure_search("patient", &context, &options)
            .await
            .unwrap_err();
        match err {
            SearchError::AccessDenied {
                user_id,
                user_role,
                message,
            } => {
                assert_eq!(user_id, "u1");
                assert_eq!(user_role, "admin");
                assert!(message.contains("policy"));
            }
            other => panic!("expected access denial, got {:?}", other),
        }

        // The failure still produced exactly one audit entry
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn test_relevance_scores_bounded_end_to_end() {
        let cache = Arc::new(StubBackend::cache(vec![doc("a", 100), doc("b", 97)]));
        let db = Arc::new(StubBackend::database(vec![doc("a", 100), doc("c", 99)]));
        let config = EngineConfig {
            hybrid: HybridConfig {
                enabled: true,
                merge: crate::merge::MergeConfig {
                    cache_weight: 0.9,
                    db_weight: 0.9,
                    ..Default::default()
                },
            },
            ..Default::default()
        };
        let engine = engine_with(db, Some(cache), config);

        let response = engine
            .search("q", &SearchOptions::default())
            .await
            .unwrap();
        for result in &response.results {
            assert!(result.relevance_score <= 100);
        }
    }
}
