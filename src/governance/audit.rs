//! Audit trail for governed search access.
//!
//! Every secure search writes one entry, success or failure. Durable
//! storage is deliberately out of scope; `AuditSink` is the hook a
//! deployment implements, and the in-memory sink backs tests and demos.

use crate::error::Result;
use crate::types::SecurityContext;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Search,
    Access,
    Export,
    Modify,
}

/// One governed access, as persisted by the audit sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub user_role: String,
    pub action: AuditAction,
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_time_ms: Option<f64>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution_id: Option<String>,
    pub sensitive_data_accessed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compliance_flags: Vec<String>,
}

impl AuditEntry {
    /// New entry for the given caller, with a generated id.
    pub fn new(context: &SecurityContext, action: AuditAction, resource: impl Into<String>) -> Self {
        let timestamp = Utc::now();
        let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
        Self {
            id: format!("audit_{}_{}", timestamp.timestamp(), suffix),
            timestamp,
            user_id: context.user_id.clone(),
            user_role: context.user_role.clone(),
            action,
            resource: resource.into(),
            query: None,
            result_count: None,
            search_time_ms: None,
            success: true,
            error_message: None,
            ip_address: context.ip_address.clone(),
            user_agent: context.user_agent.clone(),
            session_id: Some(context.session_id.clone()),
            institution_id: context.institution_id.clone(),
            sensitive_data_accessed: false,
            compliance_flags: Vec::new(),
        }
    }
}

/// Where audit entries go. Implementations must be safe for concurrent use.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<()>;

    /// Fetch a previously recorded entry by id.
    async fn get(&self, id: &str) -> Result<Option<AuditEntry>>;
}

/// Process-local sink; entries live as long as the process.
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: DashMap<String, AuditEntry>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<()> {
        self.entries.insert(entry.id.clone(), entry);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<AuditEntry>> {
        Ok(self.entries.get(id).map(|entry| entry.clone()))
    }
}
