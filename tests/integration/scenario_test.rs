//! End-to-end read scenarios: payload in, envelope out.

use super::{completed, engine, shop_config, shop_store};
use docquery::db::MemoryStore;
use docquery::engine::Outcome;
use docquery::intent::{classify, KeywordIntentSource, ScriptedIntentSource};
use docquery::plan::{build, Comparator, FilterExpression, Operation};
use docquery::query::EnvelopeStatus;
use docquery::validate::{PlanValidator, ReasonCode};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;

#[tokio::test]
async fn test_find_with_limit_returns_first_page() {
    let engine = engine(shop_store(), &shop_config());
    let outcome = engine
        .handle(&json!({
            "category": "find",
            "collection": "orders",
            "conditions": [{"field": "status", "op": "eq", "value": "shipped"}],
            "limit": 10
        }))
        .await
        .unwrap();

    let Outcome::Completed { plan, envelope } = outcome else {
        panic!("expected the find to complete");
    };
    let Operation::Find { filter, .. } = &plan.operation else {
        panic!("expected a find plan");
    };
    assert_eq!(
        filter,
        &Some(FilterExpression::condition(
            "status",
            Comparator::Eq,
            json!("shipped")
        ))
    );
    assert_eq!(envelope.status, EnvelopeStatus::Success);
    assert_eq!(envelope.count, 10);
    assert_eq!(envelope.documents.len(), 10);
    assert!(!envelope.was_truncated);
    assert!(envelope
        .documents
        .iter()
        .all(|doc| doc["status"] == json!("shipped")));
}

#[tokio::test]
async fn test_limit_zero_returns_every_match() {
    let engine = engine(shop_store(), &shop_config());
    let envelope = completed(
        &engine,
        json!({
            "category": "find",
            "collection": "orders",
            "filter": {"status": "shipped"},
            "limit": 0
        }),
    )
    .await;
    assert_eq!(envelope.count, 15);
    assert_eq!(envelope.status, EnvelopeStatus::Success);
}

#[tokio::test]
async fn test_cap_marks_unbounded_find_partial() {
    let mut config = shop_config();
    config.execution.max_documents = 4;
    let engine = engine(shop_store(), &config);

    let envelope = completed(&engine, json!({"category": "find", "collection": "orders"})).await;
    assert_eq!(envelope.status, EnvelopeStatus::Partial);
    assert!(envelope.was_truncated);
    assert_eq!(envelope.documents.len(), 4);
}

#[tokio::test]
async fn test_sort_skip_and_projection() {
    let engine = engine(shop_store(), &shop_config());
    let envelope = completed(
        &engine,
        json!({
            "category": "find",
            "collection": "orders",
            "sort": {"total": -1},
            "skip": 1,
            "limit": 2,
            "fields": ["total"]
        }),
    )
    .await;
    assert_eq!(
        envelope.documents,
        vec![
            json!({"_id": 19, "total": 190}).as_object().cloned().unwrap(),
            json!({"_id": 18, "total": 185}).as_object().cloned().unwrap(),
        ]
    );
}

#[tokio::test]
async fn test_numeric_strings_match_number_fields() {
    let engine = engine(shop_store(), &shop_config());
    let envelope = completed(
        &engine,
        json!({
            "category": "find",
            "operation": "count",
            "collection": "orders",
            "filter": {"total": {"$gt": "100"}}
        }),
    )
    .await;
    assert_eq!(envelope.count, 10);
}

#[tokio::test]
async fn test_or_with_empty_branch_matches_every_document() {
    let engine = engine(shop_store(), &shop_config());
    let envelope = completed(
        &engine,
        json!({
            "category": "find",
            "operation": "count",
            "collection": "orders",
            "filter": {"$or": [{}, {"status": "new"}]}
        }),
    )
    .await;
    assert_eq!(envelope.count, 20);

    let err = engine
        .handle(&json!({"category": "find", "collection": "orders", "filter": {"$or": []}}))
        .await
        .unwrap_err();
    assert_eq!(err.reason_code(), "MalformedParameter");
}

#[tokio::test]
async fn test_target_resolved_from_fields() {
    let engine = engine(shop_store(), &shop_config());
    let outcome = engine
        .handle(&json!({"category": "find", "filter": {"tier": "gold"}}))
        .await
        .unwrap();
    let Outcome::Completed { plan, envelope } = outcome else {
        panic!("expected the find to complete");
    };
    assert_eq!(plan.collection.as_deref(), Some("customers"));
    assert_eq!(envelope.count, 2);
}

#[tokio::test]
async fn test_unknown_field_is_rejected_before_the_store() {
    let store = shop_store();
    let engine = engine(store.clone(), &shop_config());
    let outcome = engine
        .handle(&json!({
            "category": "find",
            "collection": "orders",
            "conditions": [
                {"field": "status", "value": "shipped"},
                {"field": "priority", "op": "gt", "value": 2}
            ]
        }))
        .await
        .unwrap();

    let Outcome::Rejected(result) = outcome else {
        panic!("expected a rejection");
    };
    assert!(!result.ok);
    assert_eq!(result.reasons(), vec![ReasonCode::UnknownField]);
    assert!(result.failures[0].detail.contains("priority"));
    assert!(!store.calls().iter().any(|call| call == "find"));
}

#[tokio::test]
async fn test_validation_is_repeatable() {
    let engine = engine(shop_store(), &shop_config());
    let snapshot = engine.catalog().refresh("shop").await.unwrap();
    let intent = classify(&json!({
        "category": "find",
        "collection": "orders",
        "filter": {"status": "shipped", "colour": "red", "total": {"$gte": 20}},
        "limit": -3
    }))
    .unwrap();
    let plan = build(&intent, &snapshot).unwrap();

    let validator = PlanValidator::default();
    let first = validator.validate(&plan, &snapshot);
    let second = validator.validate(&plan, &snapshot);
    assert_eq!(first, second);
    assert!(first.has(ReasonCode::UnknownField));
    assert!(first.has(ReasonCode::NegativePagination));
}

#[tokio::test]
async fn test_explore_collections_and_fields() {
    let engine = engine(shop_store(), &shop_config());

    let collections = completed(
        &engine,
        json!({"category": "explore", "target": "collections"}),
    )
    .await;
    let names: Vec<&Value> = collections.documents.iter().map(|doc| &doc["name"]).collect();
    assert_eq!(names, vec![&json!("customers"), &json!("orders")]);

    let fields = completed(
        &engine,
        json!({"category": "explore", "collection": "customers", "target": "fields"}),
    )
    .await;
    let field_names: Vec<&Value> = fields.documents.iter().map(|doc| &doc["field"]).collect();
    assert!(field_names.contains(&&json!("address.city")));
    assert!(field_names.contains(&&json!("tier")));
}

#[tokio::test]
async fn test_explore_samples_default_size() {
    let engine = engine(shop_store(), &shop_config());
    let envelope = completed(
        &engine,
        json!({"category": "explore", "collection": "orders", "target": "samples"}),
    )
    .await;
    assert_eq!(envelope.count, 5);
}

#[tokio::test]
async fn test_keyword_questions() {
    let engine = engine(shop_store(), &shop_config());
    let outcome = engine
        .ask("What databases are there?", &KeywordIntentSource::new())
        .await
        .unwrap();
    let envelope = outcome.envelope().unwrap();
    assert_eq!(envelope.documents.len(), 1);
    assert_eq!(envelope.documents[0]["name"], json!("shop"));

    let err = engine
        .ask("orders shipped last week", &KeywordIntentSource::new())
        .await
        .unwrap_err();
    assert_eq!(err.reason_code(), "UnrecognizedIntent");
}

#[tokio::test]
async fn test_scripted_source_payload() {
    let engine = engine(shop_store(), &shop_config());
    let source = ScriptedIntentSource::new().with_payload(
        "cancelled",
        json!({"category": "find", "collection": "orders", "filter": {"status": "cancelled"}}),
    );
    let outcome = engine
        .ask("How many cancelled orders?", &source)
        .await
        .unwrap();
    assert_eq!(outcome.envelope().unwrap().count, 2);
    assert!(source.prompts()[0].contains("orders"));
}

#[tokio::test]
async fn test_string_fields_match_operand_text() {
    let store = MemoryStore::from_fixture(&json!({
        "shop": {
            "stores": [
                {"_id": 1, "zip": "00501", "ref": "2024-03-01T10:30:00+02:00"},
                {"_id": 2, "zip": "00210", "ref": "2024-03-02"}
            ]
        }
    }))
    .unwrap();
    let engine = engine(Arc::new(store), &shop_config());

    let by_ref = completed(
        &engine,
        json!({"category": "find", "operation": "count", "collection": "stores",
               "filter": {"ref": "2024-03-01T10:30:00+02:00"}}),
    )
    .await;
    assert_eq!(by_ref.count, 1);

    let by_zip = completed(
        &engine,
        json!({"category": "find", "collection": "stores", "filter": {"zip": {"$gt": "00450"}}}),
    )
    .await;
    assert_eq!(by_zip.count, 1);
    assert_eq!(by_zip.documents[0]["zip"], json!("00501"));
}
