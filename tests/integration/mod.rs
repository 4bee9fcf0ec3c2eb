//! Shared helpers for the integration suites.

mod aggregate_test;
mod catalog_test;
mod mutation_test;
mod scenario_test;

use docquery::config::{Config, StoreConfig};
use docquery::db::MemoryStore;
use docquery::engine::{Engine, Outcome};
use docquery::query::ResultEnvelope;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

pub fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("shop.json")
}

/// A fresh store loaded from the shop fixture.
pub fn shop_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::from_fixture_file(&fixture_path()).expect("fixture loads"))
}

/// Default configuration pointed at the `shop` database.
pub fn shop_config() -> Config {
    Config {
        store: StoreConfig {
            database: Some("shop".to_string()),
            fixture: Some(fixture_path()),
        },
        ..Config::default()
    }
}

pub fn engine(store: Arc<MemoryStore>, config: &Config) -> Engine {
    Engine::new(store, config)
}

/// Handles a payload and returns the envelope of a completed outcome.
pub async fn completed(engine: &Engine, payload: Value) -> ResultEnvelope {
    match engine.handle(&payload).await.expect("payload is handled") {
        Outcome::Completed { envelope, .. } => envelope,
        other => panic!("expected a completed outcome, got {other:?}"),
    }
}
