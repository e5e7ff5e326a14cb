//! Hybrid result merging.
//!
//! Three algorithms over two result lists keyed by result id. All sorts
//! are stable, so equal-score results keep their input order (cache
//! first). Weighted scores use `f64::round`, i.e. ties round half away
//! from zero, and the same rounding applies to every merge.

use crate::types::SearchResult;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeAlgorithm {
    Union,
    Intersection,
    #[default]
    Weighted,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MergeConfig {
    #[serde(default)]
    pub algorithm: MergeAlgorithm,
    #[serde(default = "default_cache_weight")]
    pub cache_weight: f64,
    #[serde(default = "default_db_weight")]
    pub db_weight: f64,
}

fn default_cache_weight() -> f64 {
    0.7
}
fn default_db_weight() -> f64 {
    0.3
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            algorithm: MergeAlgorithm::default(),
            cache_weight: default_cache_weight(),
            db_weight: default_db_weight(),
        }
    }
}

/// Merge two result lists according to the configured algorithm.
pub fn merge_results(
    cache_results: Vec<SearchResult>,
    db_results: Vec<SearchResult>,
    config: &MergeConfig,
) -> Vec<SearchResult> {
    match config.algorithm {
        MergeAlgorithm::Union => union_merge(cache_results, db_results),
        MergeAlgorithm::Intersection => intersection_merge(cache_results, db_results),
        MergeAlgorithm::Weighted => {
            weighted_merge(cache_results, db_results, config.cache_weight, config.db_weight)
        }
    }
}

/// All unique ids, cache results first, then score-descending.
fn union_merge(cache_results: Vec<SearchResult>, db_results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged = Vec::with_capacity(cache_results.len() + db_results.len());

    for result in cache_results.into_iter().chain(db_results) {
        if seen.insert(result.id.clone()) {
            merged.push(result);
        }
    }

    merged.sort_by(|a, b| b.relevance_score.cmp(&a.relevance_score));
    merged
}

/// Ids present in both sources; the higher-scoring instance survives.
fn intersection_merge(
    cache_results: Vec<SearchResult>,
    db_results: Vec<SearchResult>,
) -> Vec<SearchResult> {
    let mut db_by_id: HashMap<String, SearchResult> = db_results
        .into_iter()
        .map(|result| (result.id.clone(), result))
        .collect();

    let mut merged: Vec<SearchResult> = cache_results
        .into_iter()
        .filter_map(|cache_result| {
            db_by_id.remove(&cache_result.id).map(|db_result| {
                if cache_result.relevance_score >= db_result.relevance_score {
                    cache_result
                } else {
                    db_result
                }
            })
        })
        .collect();

    merged.sort_by(|a, b| b.relevance_score.cmp(&a.relevance_score));
    merged
}

/// Weighted combination: per-source weighted scores, summed when an id
/// appears in both lists. Metadata records the provenance and the score
/// arithmetic so callers can explain a ranking.
fn weighted_merge(
    cache_results: Vec<SearchResult>,
    db_results: Vec<SearchResult>,
    cache_weight: f64,
    db_weight: f64,
) -> Vec<SearchResult> {
    // Insertion order (cache first) is the tie-break for the final sort.
    let mut order: Vec<String> = Vec::with_capacity(cache_results.len() + db_results.len());
    let mut by_id: HashMap<String, SearchResult> = HashMap::new();

    for result in cache_results {
        let original = result.relevance_score;
        let weighted = (original as f64 * cache_weight).round() as i64;
        let mut merged = result;
        merged.set_score(weighted);
        merged.metadata.insert("source".into(), json!("cache"));
        merged.metadata.insert("original_score".into(), json!(original));
        merged.metadata.insert("weighted_score".into(), json!(weighted));
        order.push(merged.id.clone());
        by_id.insert(merged.id.clone(), merged);
    }

    for result in db_results {
        let original = result.relevance_score;
        let weighted = (original as f64 * db_weight).round() as i64;

        match by_id.entry(result.id.clone()) {
            Entry::Occupied(mut occupied) => {
                let existing = occupied.get_mut();
                let cache_score = existing.relevance_score as i64;
                let combined = cache_score + weighted;
                existing.set_score(combined);
                existing.metadata.insert("source".into(), json!("hybrid"));
                existing.metadata.insert("cache_score".into(), json!(cache_score));
                existing.metadata.insert("database_score".into(), json!(weighted));
                existing.metadata.insert("combined_score".into(), json!(combined));
            }
            Entry::Vacant(vacant) => {
                let mut merged = result;
                merged.set_score(weighted);
                merged.metadata.insert("source".into(), json!("database"));
                merged.metadata.insert("original_score".into(), json!(original));
                merged.metadata.insert("weighted_score".into(), json!(weighted));
                order.push(merged.id.clone());
                vacant.insert(merged);
            }
        }
    }

    let mut merged: Vec<SearchResult> = order
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .collect();
    merged.sort_by(|a, b| b.relevance_score.cmp(&a.relevance_score));
    merged
}
