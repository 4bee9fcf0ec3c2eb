//! Schema catalog.
//!
//! Discovers the collections of the active database, infers field types from
//! sampled documents, and caches the result as an immutable snapshot. A
//! refresh builds a complete new snapshot and swaps it in with one write, so
//! readers see either the old schema or the new one. A failed refresh leaves
//! the previous snapshot in place.

mod infer;
mod schema;

pub use infer::infer_collection;
pub use schema::{CollectionSchema, FieldInfo, FieldType, SchemaSnapshot};

use crate::config::CatalogConfig;
use crate::db::{DocumentStore, SYSTEM_DATABASES};
use crate::error::{DocQueryError, Result, StoreError};
use futures::future::try_join_all;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Cached schema of the active database.
pub struct SchemaCatalog {
    store: Arc<dyn DocumentStore>,
    sample_size: usize,
    timeout: Duration,
    current: RwLock<Option<Arc<SchemaSnapshot>>>,
    refresh_lock: Mutex<()>,
}

impl SchemaCatalog {
    /// Creates an empty catalog; call `refresh` before reading.
    pub fn new(store: Arc<dyn DocumentStore>, config: &CatalogConfig) -> Self {
        Self {
            store,
            sample_size: config.sample_size,
            timeout: config.refresh_timeout(),
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Creates a catalog pre-loaded with a snapshot.
    pub fn with_snapshot(
        store: Arc<dyn DocumentStore>,
        config: &CatalogConfig,
        snapshot: SchemaSnapshot,
    ) -> Self {
        let catalog = Self::new(store, config);
        catalog.install(Arc::new(snapshot));
        catalog
    }

    /// Rediscovers the schema of `database`.
    pub async fn refresh(&self, database: &str) -> Result<Arc<SchemaSnapshot>> {
        self.refresh_with_cancel(database, &CancellationToken::new())
            .await
    }

    /// Rediscovers the schema of `database`, giving up when `cancel` fires.
    pub async fn refresh_with_cancel(
        &self,
        database: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<SchemaSnapshot>> {
        let started = Instant::now();
        // Waiting behind another refresh counts against the timeout.
        let refresh = async {
            let _guard = self.refresh_lock.lock().await;
            let snapshot = Arc::new(self.discover(database).await?);
            let changed = self
                .current()
                .map(|old| old.content_hash() != snapshot.content_hash())
                .unwrap_or(true);
            self.install(Arc::clone(&snapshot));
            Ok::<_, DocQueryError>((snapshot, changed))
        };

        let refreshed = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                Err(DocQueryError::transient("schema refresh cancelled"))
            }
            outcome = tokio::time::timeout(self.timeout, refresh) => {
                outcome.unwrap_or_else(|_| {
                    Err(DocQueryError::transient(format!(
                        "schema refresh timed out after {}ms",
                        self.timeout.as_millis()
                    )))
                })
            }
        };

        match refreshed {
            Ok((snapshot, changed)) => {
                info!(
                    database,
                    collections = snapshot.collections.len(),
                    changed,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Schema refreshed"
                );
                Ok(snapshot)
            }
            Err(e) => {
                warn!(database, error = %e, "Schema refresh failed; keeping previous snapshot");
                Err(e)
            }
        }
    }

    /// Returns the snapshot for `database`, refreshing only on a cache miss.
    pub async fn ensure_loaded(&self, database: &str) -> Result<Arc<SchemaSnapshot>> {
        match self.current() {
            Some(snapshot) if snapshot.database == database => Ok(snapshot),
            _ => self.refresh(database).await,
        }
    }

    /// Returns the current snapshot.
    pub fn snapshot(&self) -> Result<Arc<SchemaSnapshot>> {
        self.current()
            .ok_or_else(|| DocQueryError::exploration("schema has not been loaded"))
    }

    /// Returns the schema of a collection in the current snapshot.
    pub fn lookup(&self, collection: &str) -> Result<CollectionSchema> {
        self.snapshot()?.lookup(collection).cloned()
    }

    /// Returns the inferred type of a field in the current snapshot.
    pub fn field_type(&self, collection: &str, field: &str) -> Result<FieldType> {
        self.snapshot()?.field_type(collection, field)
    }

    fn current(&self) -> Option<Arc<SchemaSnapshot>> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn install(&self, snapshot: Arc<SchemaSnapshot>) {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(snapshot);
    }

    async fn discover(&self, database: &str) -> Result<SchemaSnapshot> {
        let databases = self
            .store
            .list_databases()
            .await
            .map_err(exploration_error)?
            .into_iter()
            .filter(|name| !SYSTEM_DATABASES.contains(&name.as_str()))
            .collect::<Vec<_>>();

        let names = self
            .store
            .list_collections(database)
            .await
            .map_err(exploration_error)?;
        debug!(database, collections = names.len(), "Sampling collections");

        let sample_size = self.sample_size;
        let schemas = try_join_all(names.iter().map(|name| async move {
            let documents = self
                .store
                .sample_documents(database, name, sample_size)
                .await?;
            Ok::<_, StoreError>(infer_collection(name, &documents))
        }))
        .await
        .map_err(exploration_error)?;

        let mut snapshot = SchemaSnapshot::new(database);
        snapshot.databases = databases;
        for schema in schemas {
            snapshot.collections.insert(schema.name.clone(), schema);
        }
        Ok(snapshot)
    }
}

fn exploration_error(e: StoreError) -> DocQueryError {
    DocQueryError::exploration(e.to_string())
}
