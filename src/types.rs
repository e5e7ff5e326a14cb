//! Core types shared across the search engine, providers, and governance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Kind of entity a search result refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Book,
    User,
    BookClub,
    Author,
    Qa,
    FinancialData,
    HealthcareData,
    RetailData,
    EducationData,
    RealEstateData,
    #[serde(untagged)]
    Custom(String),
}

/// Which field of the underlying record matched the query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Title,
    Author,
    Description,
    Username,
    Name,
    Tag,
    Category,
    Language,
    Isbn,
    Uploader,
    Question,
    Answer,
    #[serde(untagged)]
    Custom(String),
}

fn clamp_score<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    let raw = i64::deserialize(deserializer)?;
    Ok(raw.clamp(0, 100) as u8)
}

/// A single search result.
///
/// `relevance_score` is clamped to [0, 100] on construction and again after
/// every transformation (merging, masking) that rewrites it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub kind: ResultKind,
    pub title: String,
    #[serde(deserialize_with = "clamp_score")]
    pub relevance_score: u8,
    pub match_kind: MatchKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl SearchResult {
    /// Create a result with the score clamped into the valid range.
    pub fn new(
        id: impl Into<String>,
        kind: ResultKind,
        title: impl Into<String>,
        relevance_score: i64,
        match_kind: MatchKind,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            title: title.into(),
            relevance_score: relevance_score.clamp(0, 100) as u8,
            match_kind,
            subtitle: None,
            description: None,
            author: None,
            category: None,
            language: None,
            visibility: None,
            created_at: None,
            tags: None,
            url: None,
            metadata: Map::new(),
        }
    }

    /// Replace the relevance score, clamping into [0, 100].
    pub fn set_score(&mut self, score: i64) {
        self.relevance_score = score.clamp(0, 100) as u8;
    }
}

/// Sort key for search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    Relevance,
    Date,
    Views,
    Name,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Inclusive creation-date window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

/// Filters a provider may honor natively; the engine re-applies them
/// post-hoc so a provider that ignores some is still correct.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<ResultKind>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub languages: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub custom: Map<String, Value>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.kinds.is_none()
            && self.categories.is_none()
            && self.languages.is_none()
            && self.visibility.is_none()
            && self.date_range.is_none()
            && self.custom.is_empty()
    }
}

/// Per-call search options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub filters: SearchFilters,
    #[serde(default)]
    pub sort_by: SortBy,
    #[serde(default)]
    pub sort_order: SortOrder,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    /// Write-through TTL in seconds; falls back to the engine's cache config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl: Option<u64>,
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,
    /// Overall request deadline in milliseconds, enforced by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn default_limit() -> usize {
    20
}
fn default_true() -> bool {
    true
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            offset: 0,
            filters: SearchFilters::default(),
            sort_by: SortBy::default(),
            sort_order: SortOrder::default(),
            cache_enabled: true,
            cache_ttl: None,
            fallback_enabled: true,
            timeout_ms: None,
        }
    }
}

/// Caller clearance level used by governance policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearanceLevel {
    Public,
    Internal,
    Confidential,
    Restricted,
}

/// Identity and session attributes of the caller, attached to every
/// secure search and carried into audit entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityContext {
    pub user_id: String,
    pub user_role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clearance_level: Option<ClearanceLevel>,
    #[serde(default = "new_session_id")]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Regions the caller may see; consumed by `region in
    /// ${user.allowed_regions}` row filters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_regions: Vec<String>,
}

fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

impl SecurityContext {
    /// Context with a fresh session id and current timestamp.
    pub fn new(user_id: impl Into<String>, user_role: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_role: user_role.into(),
            institution_id: None,
            clearance_level: None,
            session_id: new_session_id(),
            ip_address: None,
            user_agent: None,
            timestamp: Utc::now(),
            allowed_regions: Vec::new(),
        }
    }
}

/// Coarse health classification reported by a backend probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    #[default]
    Healthy,
    Degraded,
    Unhealthy,
}

/// Backend health snapshot. `latency_ms = -1` means unknown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub is_connected: bool,
    pub is_search_available: bool,
    pub latency_ms: i64,
    pub memory_usage: String,
    pub key_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub status: HealthState,
}

impl HealthStatus {
    /// Synthetic status for a backend that could not be probed.
    pub fn unreachable(error: impl Into<String>) -> Self {
        Self {
            is_connected: false,
            is_search_available: false,
            latency_ms: -1,
            memory_usage: "0".to_string(),
            key_count: 0,
            last_sync: None,
            errors: vec![error.into()],
            status: HealthState::Unhealthy,
        }
    }
}

/// Which execution path a request takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Cache,
    Database,
    Hybrid,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Cache => "cache",
            Strategy::Database => "database",
            Strategy::Hybrid => "hybrid",
        }
    }
}

/// The (primary, fallback) pair chosen for one request, with a
/// human-readable reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyDecision {
    pub primary: Strategy,
    pub fallback: Strategy,
    pub reason: String,
}

/// Per-request telemetry returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPerformance {
    pub search_time_ms: f64,
    pub result_count: usize,
    pub strategy: Strategy,
    pub cache_hit: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub performance: SearchPerformance,
    pub strategy: StrategyDecision,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// Response from `secure_search`: masked results plus the id of the
/// audit entry written for the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecureSearchResponse {
    pub results: Vec<SearchResult>,
    pub performance: SearchPerformance,
    pub strategy: StrategyDecision,
    pub audit_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance_status: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}
