//! In-memory document stores for tests and fixture-driven runs.
//!
//! `MemoryStore` evaluates the rendered MongoDB dialect against documents
//! loaded from a JSON fixture. It can simulate an unreachable server, inject
//! a single failure, add latency, and records every call it receives.
//! `FailingStore` fails every call with a fixed error.

use super::eval;
use super::{Document, DocumentStore, FindRequest, StoreResult, UpdateOutcome, UpdateRequest};
use crate::error::{DocQueryError, Result, StoreError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use tracing::debug;

type Collections = BTreeMap<String, Vec<Document>>;

/// A fixture-backed store holding every database in memory.
#[derive(Debug)]
pub struct MemoryStore {
    databases: RwLock<BTreeMap<String, Collections>>,
    reachable: AtomicBool,
    latency: Option<Duration>,
    injected: Mutex<Option<StoreError>>,
    calls: Mutex<Vec<String>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty, reachable store.
    pub fn new() -> Self {
        Self {
            databases: RwLock::new(BTreeMap::new()),
            reachable: AtomicBool::new(true),
            latency: None,
            injected: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Builds a store from a fixture of the form
    /// `{"<database>": {"<collection>": [documents...]}}`.
    pub fn from_fixture(fixture: &Value) -> Result<Self> {
        let databases = fixture
            .as_object()
            .ok_or_else(|| DocQueryError::config("fixture must be an object of databases"))?;
        let store = Self::new();
        {
            let mut guard = store.write();
            for (db_name, collections) in databases {
                let collections = collections.as_object().ok_or_else(|| {
                    DocQueryError::config(format!(
                        "fixture database '{db_name}' must be an object of collections"
                    ))
                })?;
                let entry = guard.entry(db_name.clone()).or_default();
                for (coll_name, docs) in collections {
                    let docs = docs.as_array().ok_or_else(|| {
                        DocQueryError::config(format!(
                            "fixture collection '{db_name}.{coll_name}' must be an array"
                        ))
                    })?;
                    let docs = docs
                        .iter()
                        .map(|doc| {
                            doc.as_object().cloned().ok_or_else(|| {
                                DocQueryError::config(format!(
                                    "fixture collection '{db_name}.{coll_name}' contains a non-document"
                                ))
                            })
                        })
                        .collect::<Result<Vec<_>>>()?;
                    entry.insert(coll_name.clone(), docs);
                }
            }
        }
        Ok(store)
    }

    /// Loads a fixture from a JSON file.
    pub fn from_fixture_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DocQueryError::config(format!("Failed to read fixture {}: {e}", path.display()))
        })?;
        let fixture: Value = serde_json::from_str(&content).map_err(|e| {
            DocQueryError::config(format!("Invalid fixture {}: {e}", path.display()))
        })?;
        Self::from_fixture(&fixture)
    }

    /// Adds (or replaces) a collection.
    pub fn with_collection(
        self,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
    ) -> Self {
        self.write()
            .entry(database.to_string())
            .or_default()
            .insert(collection.to_string(), documents);
        self
    }

    /// Delays every call by the given duration.
    pub fn with_latency(self, latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..self
        }
    }

    /// Toggles whether calls reach the store at all.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Makes the next call fail with the given error.
    pub fn fail_next(&self, error: StoreError) {
        *self.injected.lock().unwrap_or_else(|e| e.into_inner()) = Some(error);
    }

    /// Names of the operations received so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Current contents of a collection.
    pub fn documents(&self, database: &str, collection: &str) -> Vec<Document> {
        self.read()
            .get(database)
            .and_then(|db| db.get(collection))
            .cloned()
            .unwrap_or_default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Collections>> {
        self.databases.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Collections>> {
        self.databases.write().unwrap_or_else(|e| e.into_inner())
    }

    async fn enter(&self, operation: &str) -> StoreResult<()> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(operation.to_string());
        debug!(operation, "memory store call");
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(StoreError::Unreachable(
                "memory store is offline".to_string(),
            ));
        }
        let injected = self.injected.lock().unwrap_or_else(|e| e.into_inner()).take();
        match injected {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn collection(&self, database: &str, collection: &str) -> Vec<Document> {
        self.documents(database, collection)
    }

    fn generate_id(&self) -> Value {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Value::String(format!("{n:024x}"))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn filtered(docs: Vec<Document>, filter: &Document) -> StoreResult<Vec<Document>> {
    let mut kept = Vec::new();
    for doc in docs {
        if eval::matches(&doc, filter)? {
            kept.push(doc);
        }
    }
    Ok(kept)
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn list_databases(&self) -> StoreResult<Vec<String>> {
        self.enter("list_databases").await?;
        Ok(self.read().keys().cloned().collect())
    }

    async fn list_collections(&self, database: &str) -> StoreResult<Vec<String>> {
        self.enter("list_collections").await?;
        Ok(self
            .read()
            .get(database)
            .map(|db| db.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn sample_documents(
        &self,
        database: &str,
        collection: &str,
        n: usize,
    ) -> StoreResult<Vec<Document>> {
        self.enter("sample_documents").await?;
        Ok(self
            .collection(database, collection)
            .into_iter()
            .take(n)
            .collect())
    }

    async fn find(
        &self,
        database: &str,
        collection: &str,
        request: &FindRequest,
    ) -> StoreResult<Vec<Document>> {
        self.enter("find").await?;
        let mut docs = filtered(self.collection(database, collection), &request.filter)?;
        if !request.sort.is_empty() {
            eval::sort_documents(&mut docs, &request.sort);
        }
        let docs = docs.into_iter().skip(request.skip as usize);
        let docs: Vec<Document> = if request.limit == 0 {
            docs.collect()
        } else {
            docs.take(request.limit as usize).collect()
        };
        match &request.projection {
            Some(spec) => docs.iter().map(|doc| eval::project(doc, spec)).collect(),
            None => Ok(docs),
        }
    }

    async fn count(&self, database: &str, collection: &str, filter: &Document) -> StoreResult<u64> {
        self.enter("count").await?;
        Ok(filtered(self.collection(database, collection), filter)?.len() as u64)
    }

    async fn aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: &[Document],
    ) -> StoreResult<Vec<Document>> {
        self.enter("aggregate").await?;
        let source = self.collection(database, collection);
        eval::run_pipeline(source, pipeline, |other| self.collection(database, other))
    }

    async fn insert(
        &self,
        database: &str,
        collection: &str,
        documents: &[Document],
    ) -> StoreResult<Vec<Value>> {
        self.enter("insert").await?;
        let mut prepared = Vec::with_capacity(documents.len());
        for doc in documents {
            let mut doc = doc.clone();
            if !doc.contains_key("_id") {
                doc.insert("_id".to_string(), self.generate_id());
            }
            prepared.push(doc);
        }

        let mut guard = self.write();
        let target = guard
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();
        for (i, doc) in prepared.iter().enumerate() {
            let id = &doc["_id"];
            let clashes_existing = target
                .iter()
                .any(|existing| existing.get("_id").is_some_and(|e| eval::values_equal(e, id)));
            let clashes_batch = prepared[..i]
                .iter()
                .any(|earlier| eval::values_equal(&earlier["_id"], id));
            if clashes_existing || clashes_batch {
                return Err(StoreError::DuplicateKey(format!(
                    "E11000 duplicate key error collection: {database}.{collection} _id: {id}"
                )));
            }
        }
        let ids = prepared.iter().map(|doc| doc["_id"].clone()).collect();
        target.extend(prepared);
        Ok(ids)
    }

    async fn update(
        &self,
        database: &str,
        collection: &str,
        request: &UpdateRequest,
    ) -> StoreResult<UpdateOutcome> {
        self.enter("update").await?;
        let mut guard = self.write();
        let target = guard
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();

        let mut staged = target.clone();
        let mut outcome = UpdateOutcome::default();
        for doc in staged.iter_mut() {
            if !eval::matches(doc, &request.filter)? {
                continue;
            }
            outcome.matched += 1;
            if eval::apply_update(doc, &request.update)? {
                outcome.modified += 1;
            }
            if !request.multi {
                break;
            }
        }

        if outcome.matched == 0 && request.upsert {
            let mut doc = eval::upsert_seed(&request.filter)?;
            eval::apply_update(&mut doc, &request.update)?;
            let id = match doc.get("_id") {
                Some(id) => id.clone(),
                None => {
                    let id = self.generate_id();
                    doc.insert("_id".to_string(), id.clone());
                    id
                }
            };
            outcome.upserted_id = Some(id);
            staged.push(doc);
        }

        *target = staged;
        Ok(outcome)
    }

    async fn delete(
        &self,
        database: &str,
        collection: &str,
        filter: &Document,
        multi: bool,
    ) -> StoreResult<u64> {
        self.enter("delete").await?;
        let mut guard = self.write();
        let Some(target) = guard
            .get_mut(database)
            .and_then(|db| db.get_mut(collection))
        else {
            return Ok(0);
        };

        let mut kept = Vec::with_capacity(target.len());
        let mut deleted = 0u64;
        for doc in target.iter() {
            if (multi || deleted == 0) && eval::matches(doc, filter)? {
                deleted += 1;
            } else {
                kept.push(doc.clone());
            }
        }
        *target = kept;
        Ok(deleted)
    }
}

/// A store whose every call fails with the same error.
#[derive(Debug, Clone)]
pub struct FailingStore {
    error: StoreError,
}

impl FailingStore {
    /// Creates a failing store returning `error` from every call.
    pub fn new(error: StoreError) -> Self {
        Self { error }
    }

    /// A store that can never be reached.
    pub fn unreachable() -> Self {
        Self::new(StoreError::Unreachable("connection refused".to_string()))
    }
}

#[async_trait]
impl DocumentStore for FailingStore {
    async fn list_databases(&self) -> StoreResult<Vec<String>> {
        Err(self.error.clone())
    }

    async fn list_collections(&self, _database: &str) -> StoreResult<Vec<String>> {
        Err(self.error.clone())
    }

    async fn sample_documents(
        &self,
        _database: &str,
        _collection: &str,
        _n: usize,
    ) -> StoreResult<Vec<Document>> {
        Err(self.error.clone())
    }

    async fn find(
        &self,
        _database: &str,
        _collection: &str,
        _request: &FindRequest,
    ) -> StoreResult<Vec<Document>> {
        Err(self.error.clone())
    }

    async fn count(&self, _database: &str, _collection: &str, _filter: &Document) -> StoreResult<u64> {
        Err(self.error.clone())
    }

    async fn aggregate(
        &self,
        _database: &str,
        _collection: &str,
        _pipeline: &[Document],
    ) -> StoreResult<Vec<Document>> {
        Err(self.error.clone())
    }

    async fn insert(
        &self,
        _database: &str,
        _collection: &str,
        _documents: &[Document],
    ) -> StoreResult<Vec<Value>> {
        Err(self.error.clone())
    }

    async fn update(
        &self,
        _database: &str,
        _collection: &str,
        _request: &UpdateRequest,
    ) -> StoreResult<UpdateOutcome> {
        Err(self.error.clone())
    }

    async fn delete(
        &self,
        _database: &str,
        _collection: &str,
        _filter: &Document,
        _multi: bool,
    ) -> StoreResult<u64> {
        Err(self.error.clone())
    }
}
