//! Reference backend implementations and the matching/filter/sort
//! helpers they share.
//!
//! Real deployments plug in their own providers; these two exist so the
//! engine, the governance layer, and the HTTP surface can run end to end
//! without external services.

pub mod memory;
pub mod memory_cache;

use crate::types::{MatchKind, SearchFilters, SearchOptions, SearchResult, SortBy, SortOrder};
use serde_json::Value;

/// Score a stored document against a query.
///
/// Returns the match kind and relevance for the strongest matching field,
/// or `None` when the document doesn't match. An empty query matches
/// everything at the document's stored relevance.
pub(crate) fn score_match(doc: &SearchResult, query: &str) -> Option<(MatchKind, i64)> {
    if query.is_empty() {
        return Some((doc.match_kind.clone(), doc.relevance_score as i64));
    }
    let query = query.to_lowercase();
    let title = doc.title.to_lowercase();

    if title == query {
        return Some((MatchKind::Title, 100));
    }
    if title.contains(&query) {
        return Some((MatchKind::Title, 85));
    }
    if let Some(author) = &doc.author {
        if author.to_lowercase().contains(&query) {
            return Some((MatchKind::Author, 75));
        }
    }
    if let Some(description) = &doc.description {
        if description.to_lowercase().contains(&query) {
            return Some((MatchKind::Description, 70));
        }
    }
    if let Some(category) = &doc.category {
        if category.to_lowercase().contains(&query) {
            return Some((MatchKind::Category, 60));
        }
    }
    if let Some(tags) = &doc.tags {
        if tags.iter().any(|tag| tag.to_lowercase().contains(&query)) {
            return Some((MatchKind::Tag, 55));
        }
    }
    let metadata_hit = doc.metadata.values().any(|value| match value {
        Value::String(text) => text.to_lowercase().contains(&query),
        _ => false,
    });
    if metadata_hit {
        return Some((MatchKind::Custom("metadata".to_string()), 50));
    }
    None
}

/// Whether a document passes every requested filter.
pub(crate) fn passes_filters(doc: &SearchResult, filters: &SearchFilters) -> bool {
    if let Some(kinds) = &filters.kinds {
        if !kinds.contains(&doc.kind) {
            return false;
        }
    }
    if let Some(categories) = &filters.categories {
        match &doc.category {
            Some(category) if categories.contains(category) => {}
            _ => return false,
        }
    }
    if let Some(languages) = &filters.languages {
        match &doc.language {
            Some(language) if languages.contains(language) => {}
            _ => return false,
        }
    }
    if let Some(visibility) = &filters.visibility {
        match &doc.visibility {
            Some(vis) if visibility.contains(vis) => {}
            _ => return false,
        }
    }
    if let Some(range) = &filters.date_range {
        match doc.created_at {
            Some(created_at) => {
                if range.start.is_some_and(|start| created_at < start) {
                    return false;
                }
                if range.end.is_some_and(|end| created_at > end) {
                    return false;
                }
            }
            None => return false,
        }
    }
    for (key, expected) in &filters.custom {
        if doc.metadata.get(key) != Some(expected) {
            return false;
        }
    }
    true
}

/// Sort in place per the requested key and order. Stable, so equal keys
/// keep their match order.
pub(crate) fn sort_results(results: &mut [SearchResult], sort_by: SortBy, sort_order: SortOrder) {
    use std::cmp::Ordering;

    let key_cmp = |a: &SearchResult, b: &SearchResult| -> Ordering {
        match sort_by {
            SortBy::Relevance => a.relevance_score.cmp(&b.relevance_score),
            SortBy::Date => a.created_at.cmp(&b.created_at),
            SortBy::Name => a.title.cmp(&b.title),
            SortBy::Views => views_of(a).cmp(&views_of(b)),
            SortBy::Custom => Ordering::Equal,
        }
    };
    match sort_order {
        SortOrder::Asc => results.sort_by(key_cmp),
        SortOrder::Desc => results.sort_by(|a, b| key_cmp(b, a)),
    }
}

fn views_of(doc: &SearchResult) -> i64 {
    doc.metadata
        .get("views")
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

/// Apply `offset`/`limit` paging.
pub(crate) fn paginate(results: Vec<SearchResult>, options: &SearchOptions) -> Vec<SearchResult> {
    results
        .into_iter()
        .skip(options.offset)
        .take(options.limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResultKind;
    use serde_json::json;

    fn doc(id: &str, title: &str) -> SearchResult {
        SearchResult::new(id, ResultKind::Book, title, 50, MatchKind::Title)
    }

    #[test]
    fn test_score_match_prefers_title() {
        let mut d = doc("1", "Asthma Care Handbook");
        d.description = Some("asthma treatment".to_string());

        let (kind, score) = score_match(&d, "asthma").unwrap();
        assert_eq!(kind, MatchKind::Title);
        assert_eq!(score, 85);

        let (kind, score) = score_match(&d, "asthma care handbook").unwrap();
        assert_eq!(kind, MatchKind::Title);
        assert_eq!(score, 100);
    }

    #[test]
    fn test_score_match_falls_through_fields() {
        let mut d = doc("1", "Handbook");
        d.description = Some("covers diabetes".to_string());
        d.category = Some("endocrinology".to_string());

        let (kind, _) = score_match(&d, "diabetes").unwrap();
        assert_eq!(kind, MatchKind::Description);

        let (kind, _) = score_match(&d, "endocrin").unwrap();
        assert_eq!(kind, MatchKind::Category);

        assert!(score_match(&d, "nonexistent").is_none());
    }

    #[test]
    fn test_score_match_reaches_metadata() {
        let mut d = doc("1", "Patient 7");
        d.metadata.insert("region".into(), json!("NE"));

        let (kind, score) = score_match(&d, "ne").unwrap();
        assert_eq!(kind, MatchKind::Custom("metadata".to_string()));
        assert_eq!(score, 50);
    }

    #[test]
    fn test_custom_filter_matches_metadata() {
        let mut d = doc("1", "Patient 7");
        d.metadata.insert("dataset".into(), json!("healthcare"));

        let mut filters = SearchFilters::default();
        filters
            .custom
            .insert("dataset".into(), json!("healthcare"));
        assert!(passes_filters(&d, &filters));

        filters.custom.insert("dataset".into(), json!("retail"));
        assert!(!passes_filters(&d, &filters));
    }

    #[test]
    fn test_kind_filter() {
        let d = doc("1", "A Book");
        let filters = SearchFilters {
            kinds: Some(vec![ResultKind::User]),
            ..Default::default()
        };
        assert!(!passes_filters(&d, &filters));

        let filters = SearchFilters {
            kinds: Some(vec![ResultKind::Book, ResultKind::User]),
            ..Default::default()
        };
        assert!(passes_filters(&d, &filters));
    }

    #[test]
    fn test_sort_and_paginate() {
        let mut results = vec![doc("a", "Alpha"), doc("b", "Beta"), doc("c", "Gamma")];
        results[0].set_score(10);
        results[1].set_score(90);
        results[2].set_score(50);

        sort_results(&mut results, SortBy::Relevance, SortOrder::Desc);
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);

        sort_results(&mut results, SortBy::Name, SortOrder::Asc);
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let options = SearchOptions {
            limit: 1,
            offset: 1,
            ..Default::default()
        };
        let page = paginate(results, &options);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "b");
    }
}
