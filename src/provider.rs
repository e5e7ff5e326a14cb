//! Backend provider contracts.
//!
//! A provider is polymorphic over the capability set: connect, disconnect,
//! connection check, search, and health probe. Cache providers additionally
//! expose a key/value surface used for write-through caching. All failures
//! are typed `SearchError`s, never sentinel values.
//!
//! Providers own their connection pools; the engine never manages
//! individual connections.

use crate::error::Result;
use crate::types::{HealthStatus, SearchOptions, SearchResult};
use async_trait::async_trait;
use serde_json::Value;

/// Common operational surface shared by database and cache backends.
///
/// `search` must honor `limit`, `offset`, and the requested ordering; it
/// may ignore filters it cannot translate, because the engine re-applies
/// them post-hoc.
#[async_trait]
pub trait BackendProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    async fn is_connected(&self) -> bool;

    async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>>;

    async fn check_health(&self) -> Result<HealthStatus>;
}

/// Cache backends add a key/value surface on top of the common one.
#[async_trait]
pub trait CacheProvider: BackendProvider {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store a value under `key`; `ttl_secs = None` means no expiry.
    async fn set(&self, key: &str, value: Value, ttl_secs: Option<u64>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove entries matching `pattern` (a `prefix*` glob), or everything
    /// when no pattern is given.
    async fn clear(&self, pattern: Option<&str>) -> Result<()>;
}
