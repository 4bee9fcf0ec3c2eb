//! Schema discovery against the shop fixture.

use super::{engine, shop_config, shop_store};
use docquery::catalog::{FieldType, SchemaCatalog};
use docquery::config::CatalogConfig;
use docquery::engine::Outcome;
use pretty_assertions::assert_eq;
use serde_json::json;

#[tokio::test]
async fn test_refresh_discovers_collections_and_types() {
    let catalog = SchemaCatalog::new(shop_store(), &CatalogConfig::default());
    let snapshot = catalog.refresh("shop").await.unwrap();

    assert_eq!(snapshot.collection_names(), vec!["customers", "orders"]);
    assert_eq!(snapshot.databases, vec!["shop"]);
    assert_eq!(catalog.field_type("orders", "status").unwrap(), FieldType::String);
    assert_eq!(catalog.field_type("orders", "total").unwrap(), FieldType::Number);
    assert_eq!(
        catalog.field_type("customers", "address.city").unwrap(),
        FieldType::String
    );
}

#[tokio::test]
async fn test_failed_refresh_keeps_serving_previous_snapshot() {
    let store = shop_store();
    let catalog = SchemaCatalog::new(store.clone(), &CatalogConfig::default());
    catalog.refresh("shop").await.unwrap();

    store.set_reachable(false);
    let err = catalog.refresh("shop").await.unwrap_err();
    assert_eq!(err.reason_code(), "ExplorationError");
    assert!(err.is_retryable());

    let orders = catalog.lookup("orders").unwrap();
    assert!(orders.has_field("status"));
}

#[tokio::test]
async fn test_unknown_collection_in_intent() {
    let engine = engine(shop_store(), &shop_config());
    let outcome = engine
        .handle(&json!({"category": "find", "collection": "invoices"}))
        .await;
    match outcome {
        Ok(Outcome::Rejected(result)) => {
            assert_eq!(result.reasons()[0].as_str(), "UnknownCollection")
        }
        Err(e) => assert_eq!(e.reason_code(), "UnknownCollection"),
        Ok(other) => panic!("expected the unknown collection to be refused, got {other:?}"),
    }
}

#[tokio::test]
async fn test_engine_refreshes_on_demand() {
    let store = shop_store();
    let engine = engine(store.clone(), &shop_config());
    assert!(engine.catalog().snapshot().is_err());

    engine
        .handle(&json!({"category": "explore", "target": "collections"}))
        .await
        .unwrap();
    assert_eq!(engine.catalog().snapshot().unwrap().database, "shop");
    assert_eq!(
        store
            .calls()
            .iter()
            .filter(|call| *call == "list_collections")
            .count(),
        2
    );
}
