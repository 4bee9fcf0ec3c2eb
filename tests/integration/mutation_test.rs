//! Write paths: confirmation, policy and empty-filter guards.

use super::{completed, engine, shop_config, shop_store};
use docquery::engine::Outcome;
use docquery::safety::SafetyLevel;
use docquery::validate::ReasonCode;
use pretty_assertions::assert_eq;
use serde_json::json;

#[tokio::test]
async fn test_delete_with_empty_filter_is_rejected() {
    let store = shop_store();
    let engine = engine(store.clone(), &shop_config());
    let outcome = engine
        .handle(&json!({
            "category": "mutate",
            "operation": "delete",
            "collection": "orders",
            "filter": {}
        }))
        .await
        .unwrap();

    let Outcome::Rejected(result) = outcome else {
        panic!("expected a rejection");
    };
    assert_eq!(result.reasons(), vec![ReasonCode::EmptyMutationFilter]);
    assert!(!store.calls().iter().any(|call| call == "delete"));
    assert_eq!(store.documents("shop", "orders").len(), 20);
}

#[tokio::test]
async fn test_delete_under_nor_of_empty_branch_is_refused() {
    let store = shop_store();
    let engine = engine(store.clone(), &shop_config());
    let err = engine
        .handle(&json!({
            "category": "mutate",
            "operation": "delete",
            "collection": "orders",
            "filter": {"status": "new", "$nor": [{}]}
        }))
        .await
        .unwrap_err();

    assert_eq!(err.reason_code(), "MalformedParameter");
    assert!(!store.calls().iter().any(|call| call == "delete"));
    assert_eq!(store.documents("shop", "orders").len(), 20);
}

#[tokio::test]
async fn test_delete_under_or_of_empty_branch_needs_all_documents() {
    let store = shop_store();
    let engine = engine(store.clone(), &shop_config());
    let outcome = engine
        .handle(&json!({
            "category": "mutate",
            "operation": "delete",
            "collection": "orders",
            "filter": {"$or": [{}, {"status": "new"}]}
        }))
        .await
        .unwrap();

    let Outcome::Rejected(result) = outcome else {
        panic!("expected a rejection");
    };
    assert_eq!(result.reasons(), vec![ReasonCode::EmptyMutationFilter]);
    assert_eq!(store.documents("shop", "orders").len(), 20);
}

#[tokio::test]
async fn test_delete_waits_for_confirmation() {
    let store = shop_store();
    let engine = engine(store.clone(), &shop_config());
    let outcome = engine
        .handle(&json!({
            "category": "mutate",
            "operation": "delete_many",
            "collection": "orders",
            "filter": {"status": "cancelled"}
        }))
        .await
        .unwrap();

    let Outcome::NeedsConfirmation {
        plan,
        classification,
    } = outcome
    else {
        panic!("expected a confirmation request");
    };
    assert_eq!(classification.level, SafetyLevel::Destructive);
    assert!(classification.warning.is_some());
    assert_eq!(store.documents("shop", "orders").len(), 20);

    let envelope = engine.confirm(plan).await.unwrap();
    let envelope = envelope.envelope().unwrap();
    assert_eq!(envelope.count, 2);
    assert_eq!(envelope.mutation.as_ref().unwrap().deleted, Some(2));
    assert_eq!(store.documents("shop", "orders").len(), 18);
}

#[tokio::test]
async fn test_all_documents_delete_follows_policy() {
    let payload = json!({
        "category": "mutate",
        "operation": "delete",
        "collection": "customers",
        "all_documents": true
    });

    let mut config = shop_config();
    config.policy.allow_all_documents_mutation = false;
    let store = shop_store();
    let outcome = engine(store.clone(), &config).handle(&payload).await.unwrap();
    let Outcome::Rejected(result) = outcome else {
        panic!("expected a rejection");
    };
    assert_eq!(
        result.reasons(),
        vec![ReasonCode::AllDocumentsMutationDisabled]
    );

    let mut config = shop_config();
    config.policy.confirm_mutations = false;
    let store = shop_store();
    let envelope = completed(&engine(store.clone(), &config), payload).await;
    assert_eq!(envelope.count, 4);
    assert!(store.documents("shop", "customers").is_empty());
}

#[tokio::test]
async fn test_update_and_insert_without_confirmation() {
    let mut config = shop_config();
    config.policy.confirm_mutations = false;
    let store = shop_store();
    let engine = engine(store.clone(), &config);

    let updated = completed(
        &engine,
        json!({
            "category": "mutate",
            "operation": "update",
            "collection": "orders",
            "filter": {"status": "new"},
            "update": {"$set": {"status": "shipped"}, "$inc": {"total": 1}}
        }),
    )
    .await;
    assert_eq!(updated.count, 3);
    assert_eq!(updated.mutation.as_ref().unwrap().matched, Some(3));

    let shipped = completed(
        &engine,
        json!({"category": "find", "operation": "count", "collection": "orders", "filter": {"status": "shipped"}}),
    )
    .await;
    assert_eq!(shipped.count, 18);

    let inserted = completed(
        &engine,
        json!({
            "category": "mutate",
            "operation": "insert",
            "collection": "customers",
            "document": {"_id": 5, "name": "Barbara Liskov", "tier": "gold"}
        }),
    )
    .await;
    assert_eq!(inserted.count, 1);
    assert_eq!(inserted.mutation.unwrap().inserted_ids, vec![json!(5)]);
    assert_eq!(store.documents("shop", "customers").len(), 5);
}

#[tokio::test]
async fn test_increment_of_text_field_is_rejected() {
    let engine = engine(shop_store(), &shop_config());
    let outcome = engine
        .handle(&json!({
            "category": "mutate",
            "operation": "update_one",
            "collection": "orders",
            "filter": {"_id": 1},
            "update": {"$inc": {"status": 1}}
        }))
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Rejected(ref r) if r.has(ReasonCode::TypeMismatch)));
}

#[tokio::test]
async fn test_store_failure_becomes_failure_envelope() {
    let mut config = shop_config();
    config.policy.confirm_mutations = false;
    let store = shop_store();
    let engine = engine(store.clone(), &config);
    engine.catalog().refresh("shop").await.unwrap();

    store.set_reachable(false);
    let envelope = completed(
        &engine,
        json!({"category": "find", "collection": "orders", "limit": 1}),
    )
    .await;
    let error = envelope.error.unwrap();
    assert_eq!(error.reason_code, "TransientExecutionError");
}
