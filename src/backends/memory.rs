//! Reference in-memory database backend.
//!
//! Holds named datasets of documents and serves substring search over
//! them with filter, sort, and paging support. A deterministic synthetic
//! patient generator covers demos and tests without external data.

use super::{paginate, passes_filters, score_match, sort_results};
use crate::error::{Result, SearchError};
use crate::provider::BackendProvider;
use crate::types::{
    HealthState, HealthStatus, MatchKind, ResultKind, SearchOptions, SearchResult,
};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Instant;

const CONDITIONS: [&str; 5] = ["asthma", "diabetes", "hypertension", "flu", "allergy"];

/// Per-dataset stats surfaced through the `/tables` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetStats {
    pub name: String,
    pub rows: usize,
}

pub struct MemoryProvider {
    name: String,
    connected: AtomicBool,
    datasets: RwLock<HashMap<String, Vec<SearchResult>>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self {
            name: "memory".to_string(),
            connected: AtomicBool::new(false),
            datasets: RwLock::new(HashMap::new()),
        }
    }

    /// Register a dataset, stamping each document with its dataset name so
    /// `filters.custom["dataset"]` can scope a query.
    pub fn register_dataset(&self, dataset: &str, mut docs: Vec<SearchResult>) {
        for doc in &mut docs {
            doc.metadata
                .insert("dataset".to_string(), json!(dataset));
        }
        self.datasets
            .write()
            .unwrap()
            .insert(dataset.to_string(), docs);
    }

    /// Materialize `count` deterministic patient documents into `dataset`.
    pub fn seed_synthetic(&self, dataset: &str, count: usize) {
        let docs = (1..=count)
            .map(|i| synthetic_patient(dataset, i))
            .collect();
        self.register_dataset(dataset, docs);
        eprintln!("[memory:{}] seeded {} rows into {}", self.name, count, dataset);
    }

    /// Snapshot of a dataset's documents, e.g. to mirror into a cache index.
    pub fn dataset_docs(&self, dataset: &str) -> Vec<SearchResult> {
        self.datasets
            .read()
            .unwrap()
            .get(dataset)
            .cloned()
            .unwrap_or_default()
    }

    pub fn dataset_stats(&self) -> Vec<DatasetStats> {
        let datasets = self.datasets.read().unwrap();
        let mut stats: Vec<DatasetStats> = datasets
            .iter()
            .map(|(name, docs)| DatasetStats {
                name: name.clone(),
                rows: docs.len(),
            })
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendProvider for MemoryProvider {
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
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SearchError::DatabaseConnection(
                "memory provider not connected".to_string(),
            ));
        }

        let datasets = self.datasets.read().unwrap();
        let mut matched = Vec::new();
        for docs in datasets.values() {
            for doc in docs {
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
        }
        drop(datasets);

        sort_results(&mut matched, options.sort_by, options.sort_order);
        Ok(paginate(matched, options))
    }

    async fn check_health(&self) -> Result<HealthStatus> {
        let started = Instant::now();
        let connected = self.connected.load(Ordering::SeqCst);
        let row_count: usize = {
            let datasets = self.datasets.read().unwrap();
            datasets.values().map(Vec::len).sum()
        };
        let latency_ms = started.elapsed().as_millis() as i64;

        Ok(HealthStatus {
            is_connected: connected,
            is_search_available: connected,
            latency_ms,
            memory_usage: format!("{}KB", row_count / 2),
            key_count: row_count as u64,
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

/// Deterministic synthetic patient document.
///
/// Region alternates NE/SW by row parity and conditions cycle through a
/// fixed set, so governance tests can rely on the distribution.
pub fn synthetic_patient(dataset: &str, i: usize) -> SearchResult {
    let prefix: String = dataset.chars().take(3).collect();
    let condition = CONDITIONS[i % CONDITIONS.len()];
    let region = if i % 2 == 1 { "NE" } else { "SW" };

    let mut doc = SearchResult::new(
        format!("{}-{}", prefix, i),
        ResultKind::HealthcareData,
        format!("Patient {}", i),
        50,
        MatchKind::Name,
    );
    doc.category = Some(condition.to_string());
    doc.visibility = Some("private".to_string());
    doc.metadata.insert("name".into(), json!(format!("Patient {}", i)));
    doc.metadata
        .insert("ssn".into(), json!(format!("123-45-{:04}", i)));
    doc.metadata.insert("dob".into(), json!("1986-03-15"));
    doc.metadata
        .insert("address".into(), json!("123 Main St, Gotham"));
    doc.metadata.insert("region".into(), json!(region));
    doc.metadata.insert("condition".into(), json!(condition));
    doc.metadata
        .insert("clinician_id".into(), json!(format!("clin-{}", i % 50)));
    doc
}
