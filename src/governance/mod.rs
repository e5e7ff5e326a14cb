//! Data governance: row-level security, column masking, and auditing.
//!
//! A policy file per dataset maps roles to a row-filter expression and a
//! column mask plan. Policies are compiled per request into a predicate
//! plus mask list, applied to every result before it is returned.

pub mod audit;
pub mod masking;

use crate::config::GovernanceConfig;
use crate::error::{Result, SearchError};
use crate::types::{SearchResult, SecurityContext};
use audit::{AuditAction, AuditEntry, AuditSink, MemoryAuditSink};
use masking::{apply_mask, MaskKind, TokenMap};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, RwLock};

/// Row filter expressions recognized by the compiler.
///
/// Exactly three forms are understood; anything else falls back to
/// allow-all with a warning. This mirrors the policy files this engine
/// ships with rather than a general expression language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFilter {
    AllowAll,
    /// `region in ${user.allowed_regions}`
    RegionInAllowedRegions,
    /// `clinician_id == ${user.id}`
    ClinicianIsCaller,
}

impl RowFilter {
    fn compile(expression: &str) -> Self {
        let expression = expression.trim();
        if matches!(expression, "" | "true" | "TRUE" | "1") {
            return RowFilter::AllowAll;
        }
        if expression.contains("region in ${user.allowed_regions}") {
            return RowFilter::RegionInAllowedRegions;
        }
        if expression.contains("clinician_id == ${user.id}") {
            return RowFilter::ClinicianIsCaller;
        }
        eprintln!(
            "[governance] unsupported row filter {:?}, allowing all rows",
            expression
        );
        RowFilter::AllowAll
    }

    /// Whether the caller may see this row.
    pub fn allows(&self, row: &SearchResult, context: &SecurityContext) -> bool {
        match self {
            RowFilter::AllowAll => true,
            RowFilter::RegionInAllowedRegions => row
                .metadata
                .get("region")
                .and_then(Value::as_str)
                .map(|region| context.allowed_regions.iter().any(|r| r == region))
                .unwrap_or(false),
            RowFilter::ClinicianIsCaller => row
                .metadata
                .get("clinician_id")
                .and_then(Value::as_str)
                .map(|clinician| clinician == context.user_id)
                .unwrap_or(false),
        }
    }
}

/// One dataset's policy file: a list of role entries.
#[derive(Debug, Clone, Deserialize)]
pub struct Policy {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub roles: Vec<RolePolicy>,
}

fn default_version() -> String {
    "v1".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RolePolicy {
    pub id: String,
    #[serde(default = "default_row_filter")]
    pub row_filter: String,
    #[serde(default)]
    pub column_masks: BTreeMap<String, String>,
}

fn default_row_filter() -> String {
    "true".to_string()
}

/// Policy compiled for one (dataset, role) pair.
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    pub role: String,
    pub row_filter: RowFilter,
    pub masks: Vec<(String, MaskKind)>,
}

impl CompiledPolicy {
    pub fn masked_fields(&self) -> Vec<String> {
        self.masks.iter().map(|(field, _)| field.clone()).collect()
    }
}

static SENSITIVE_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

fn sensitive_patterns() -> &'static [Regex] {
    SENSITIVE_PATTERNS.get_or_init(|| {
        [
            r"\b\d{3}-\d{2}-\d{4}\b",                              // US SSN
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b", // email
            r"\b\d{3}-\d{3}-\d{4}\b",                              // US phone
        ]
        .iter()
        .map(|pattern| Regex::new(pattern).expect("static sensitive pattern"))
        .collect()
    })
}

/// Whether a query string contains something that shouldn't hit a log.
pub fn contains_sensitive(query: &str) -> bool {
    sensitive_patterns().iter().any(|p| p.is_match(query))
}

/// The query as safe to log or persist.
pub fn redact_query(query: &str) -> String {
    if contains_sensitive(query) {
        "[REDACTED]".to_string()
    } else {
        query.to_string()
    }
}

/// Governance service: owns the policy cache, the tokenization map, and
/// the audit sink.
pub struct DataGovernance {
    policy_dir: PathBuf,
    policies: RwLock<HashMap<String, Arc<Policy>>>,
    tokens: TokenMap,
    audit: Arc<dyn AuditSink>,
}

impl DataGovernance {
    pub fn new(config: &GovernanceConfig) -> Self {
        Self {
            policy_dir: config.policy_dir.clone(),
            policies: RwLock::new(HashMap::new()),
            tokens: TokenMap::new(config.token_map_capacity),
            audit: Arc::new(MemoryAuditSink::new()),
        }
    }

    /// Replace the default in-memory audit sink.
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    pub fn audit_sink(&self) -> Arc<dyn AuditSink> {
        Arc::clone(&self.audit)
    }

    /// Load (or return the cached) policy for a dataset.
    pub fn load_policy(&self, dataset: &str) -> Result<Arc<Policy>> {
        if let Some(policy) = self.policies.read().unwrap().get(dataset) {
            return Ok(Arc::clone(policy));
        }

        let policy = Arc::new(self.read_policy_file(dataset)?);
        eprintln!(
            "[governance] loaded policy for {} (version {}, {} roles)",
            dataset,
            policy.version,
            policy.roles.len()
        );
        self.policies
            .write()
            .unwrap()
            .insert(dataset.to_string(), Arc::clone(&policy));
        Ok(policy)
    }

    /// Re-read a dataset's policy file; the cache entry is replaced only
    /// when the on-disk version differs. Returns whether it changed.
    pub fn refresh_policy(&self, dataset: &str) -> Result<bool> {
        let fresh = self.read_policy_file(dataset)?;
        let mut policies = self.policies.write().unwrap();
        let changed = policies
            .get(dataset)
            .map(|cached| cached.version != fresh.version)
            .unwrap_or(true);
        if changed {
            eprintln!(
                "[governance] policy for {} updated to version {}",
                dataset, fresh.version
            );
            policies.insert(dataset.to_string(), Arc::new(fresh));
        }
        Ok(changed)
    }

    fn read_policy_file(&self, dataset: &str) -> Result<Policy> {
        let path = self.policy_dir.join(format!("{}.yaml", dataset));
        let raw = std::fs::read_to_string(&path).map_err(|error| {
            SearchError::Policy(format!("cannot read {}: {}", path.display(), error))
        })?;
        serde_yaml::from_str(&raw).map_err(|error| {
            SearchError::Policy(format!("cannot parse {}: {}", path.display(), error))
        })
    }

    /// Compile the policy for a role. Unknown roles get allow-all with no
    /// masks, the same as a role entry that specifies nothing.
    pub fn compile(&self, dataset: &str, role: &str) -> Result<CompiledPolicy> {
        let policy = self.load_policy(dataset)?;
        let entry = policy.roles.iter().find(|r| r.id == role);

        let (row_filter, masks) = match entry {
            Some(role_policy) => {
                let masks = role_policy
                    .column_masks
                    .iter()
                    .filter_map(|(field, kind)| match MaskKind::parse(kind) {
                        Some(parsed) => Some((field.clone(), parsed)),
                        None => {
                            eprintln!(
                                "[governance] unknown mask kind {:?} for field {} in {}",
                                kind, field, dataset
                            );
                            None
                        }
                    })
                    .collect();
                (RowFilter::compile(&role_policy.row_filter), masks)
            }
            None => (RowFilter::AllowAll, Vec::new()),
        };

        Ok(CompiledPolicy {
            role: role.to_string(),
            row_filter,
            masks,
        })
    }

    /// Drop rows the caller's row filter forbids.
    pub fn apply_row_security(
        &self,
        results: Vec<SearchResult>,
        compiled: &CompiledPolicy,
        context: &SecurityContext,
    ) -> Vec<SearchResult> {
        results
            .into_iter()
            .filter(|row| compiled.row_filter.allows(row, context))
            .collect()
    }

    /// Rewrite masked fields on every result.
    pub fn mask_results(
        &self,
        mut results: Vec<SearchResult>,
        compiled: &CompiledPolicy,
    ) -> Vec<SearchResult> {
        for result in &mut results {
            for (field, kind) in &compiled.masks {
                mask_field(result, field, kind, &self.tokens);
            }
        }
        results
    }

    /// Write one audit entry and return its id.
    #[allow(clippy::too_many_arguments)]
    pub async fn audit_search(
        &self,
        query: &str,
        context: &SecurityContext,
        resource: &str,
        result_count: usize,
        search_time_ms: f64,
        success: bool,
        error_message: Option<String>,
        masked_field_count: usize,
    ) -> Result<String> {
        let mut entry = AuditEntry::new(context, AuditAction::Search, resource);
        let sensitive = contains_sensitive(query);
        entry.query = Some(redact_query(query));
        entry.result_count = Some(result_count);
        entry.search_time_ms = Some(search_time_ms);
        entry.success = success;
        entry.error_message = error_message;
        entry.sensitive_data_accessed = masked_field_count > 0;
        if sensitive {
            entry.compliance_flags.push("sensitive_query".to_string());
        }

        let id = entry.id.clone();
        self.audit.record(entry).await?;
        Ok(id)
    }
}

/// Apply one mask to a result, resolving the field name against the
/// typed descriptor fields first and the metadata map second. Fields the
/// result doesn't carry are left untouched.
fn mask_field(result: &mut SearchResult, field: &str, kind: &MaskKind, tokens: &TokenMap) {
    let masked_string = |value: &str| -> Option<String> {
        match apply_mask(kind, &Value::String(value.to_string()), tokens) {
            Value::String(text) => Some(text),
            _ => None,
        }
    };

    match field {
        "title" => {
            result.title = masked_string(&result.title.clone()).unwrap_or_default();
        }
        "subtitle" => mask_optional(&mut result.subtitle, masked_string),
        "description" => mask_optional(&mut result.description, masked_string),
        "author" => mask_optional(&mut result.author, masked_string),
        "category" => mask_optional(&mut result.category, masked_string),
        "language" => mask_optional(&mut result.language, masked_string),
        "visibility" => mask_optional(&mut result.visibility, masked_string),
        "url" => mask_optional(&mut result.url, masked_string),
        other => {
            if let Some(value) = result.metadata.get(other).cloned() {
                let masked = apply_mask(kind, &value, tokens);
                result.metadata.insert(other.to_string(), masked);
            }
        }
    }
}

fn mask_optional(slot: &mut Option<String>, mask: impl Fn(&str) -> Option<String>) {
    if let Some(value) = slot.take() {
        *slot = mask(&value);
    }
}
