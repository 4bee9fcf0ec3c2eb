//! Document store abstraction for docquery.
//!
//! The database driver is an external collaborator. `DocumentStore` is the
//! narrow operation surface the core needs from it; requests arrive already
//! rendered into the MongoDB dialect.

pub mod eval;
mod mock;
mod types;

pub use mock::{FailingStore, MemoryStore};
pub use types::{
    as_date, date_to_plain_string, date_value, parse_date_text, Document, FindRequest,
    UpdateOutcome, UpdateRequest,
};

use crate::config::StoreConfig;
use crate::error::{DocQueryError, Result, StoreError};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Result type for store calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Databases every server carries that are never user data.
pub const SYSTEM_DATABASES: [&str; 3] = ["admin", "local", "config"];

/// Opens the store described by the configuration.
///
/// Only the fixture-backed memory store ships with the core; a real driver
/// plugs in by implementing `DocumentStore`.
pub fn open(config: &StoreConfig) -> Result<Arc<dyn DocumentStore>> {
    let path = config
        .fixture
        .as_deref()
        .ok_or_else(|| DocQueryError::config("No fixture configured for the memory store"))?;
    Ok(Arc::new(MemoryStore::from_fixture_file(path)?))
}

/// Operations the core needs from a document database driver.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Names of all databases on the server.
    async fn list_databases(&self) -> StoreResult<Vec<String>>;

    /// Names of all collections in a database.
    async fn list_collections(&self, database: &str) -> StoreResult<Vec<String>>;

    /// Up to `n` documents of a collection in natural order.
    async fn sample_documents(
        &self,
        database: &str,
        collection: &str,
        n: usize,
    ) -> StoreResult<Vec<Document>>;

    /// Filtered, projected, sorted and paginated documents.
    async fn find(
        &self,
        database: &str,
        collection: &str,
        request: &FindRequest,
    ) -> StoreResult<Vec<Document>>;

    /// Number of documents matching a filter.
    async fn count(&self, database: &str, collection: &str, filter: &Document)
        -> StoreResult<u64>;

    /// Runs an aggregation pipeline.
    async fn aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: &[Document],
    ) -> StoreResult<Vec<Document>>;

    /// Inserts documents, returning their ids in order.
    async fn insert(
        &self,
        database: &str,
        collection: &str,
        documents: &[Document],
    ) -> StoreResult<Vec<Value>>;

    /// Applies update operators to matching documents.
    async fn update(
        &self,
        database: &str,
        collection: &str,
        request: &UpdateRequest,
    ) -> StoreResult<UpdateOutcome>;

    /// Deletes the first (or every, when `multi`) matching document.
    async fn delete(
        &self,
        database: &str,
        collection: &str,
        filter: &Document,
        multi: bool,
    ) -> StoreResult<u64>;
}
