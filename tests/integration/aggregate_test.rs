//! Aggregation pipelines and computed fields.

use super::{completed, engine, shop_config, shop_store};
use docquery::engine::Outcome;
use docquery::plan::{Operation, Stage};
use docquery::validate::ReasonCode;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn stage_names(operation: &Operation) -> Vec<&'static str> {
    match operation {
        Operation::Aggregate { stages } => stages.iter().map(Stage::name).collect(),
        other => panic!("expected an aggregate plan, got {other:?}"),
    }
}

#[tokio::test]
async fn test_limit_moves_after_sort() {
    let engine = engine(shop_store(), &shop_config());
    let outcome = engine
        .handle(&json!({
            "category": "aggregate",
            "collection": "orders",
            "pipeline": [{"$limit": 3}, {"$sort": {"total": -1}}]
        }))
        .await
        .unwrap();

    let Outcome::Completed { plan, envelope } = outcome else {
        panic!("expected the pipeline to complete");
    };
    assert_eq!(stage_names(&plan.operation), vec!["SORT", "LIMIT"]);
    let totals: Vec<&Value> = envelope.documents.iter().map(|doc| &doc["total"]).collect();
    assert_eq!(totals, vec![&json!(200), &json!(190), &json!(185)]);
}

#[tokio::test]
async fn test_top_orders_then_group_keeps_stage_order() {
    let engine = engine(shop_store(), &shop_config());
    let outcome = engine
        .handle(&json!({
            "category": "aggregate",
            "collection": "orders",
            "pipeline": [
                {"$sort": {"total": -1}},
                {"$limit": 3},
                {"$group": {"_id": "$status", "n": {"$count": {}}}},
                {"$sort": {"n": -1}}
            ]
        }))
        .await
        .unwrap();

    let Outcome::Completed { plan, envelope } = outcome else {
        panic!("expected the pipeline to complete");
    };
    assert_eq!(
        stage_names(&plan.operation),
        vec!["SORT", "LIMIT", "GROUP", "SORT"]
    );
    assert_eq!(
        envelope.documents,
        vec![
            json!({"_id": "cancelled", "n": 2}).as_object().cloned().unwrap(),
            json!({"_id": "new", "n": 1}).as_object().cloned().unwrap(),
        ]
    );
}

#[tokio::test]
async fn test_group_counts_by_status() {
    let engine = engine(shop_store(), &shop_config());
    let envelope = completed(
        &engine,
        json!({
            "category": "aggregate",
            "collection": "orders",
            "pipeline": [
                {"$group": {"_id": "$status", "n": {"$count": {}}}},
                {"$sort": {"n": -1}}
            ]
        }),
    )
    .await;

    assert_eq!(envelope.count, 3);
    assert_eq!(envelope.documents[0]["_id"], json!("shipped"));
    assert_eq!(envelope.documents[0]["n"], json!(15));
    assert_eq!(envelope.documents[2]["_id"], json!("cancelled"));
}

#[tokio::test]
async fn test_fields_after_group_are_checked_against_the_new_shape() {
    let engine = engine(shop_store(), &shop_config());
    let outcome = engine
        .handle(&json!({
            "category": "aggregate",
            "collection": "orders",
            "pipeline": [
                {"$group": {"_id": "$status", "spent": {"$sum": "$total"}}},
                {"$match": {"customer_id": 1}}
            ]
        }))
        .await
        .unwrap();

    let Outcome::Rejected(result) = outcome else {
        panic!("expected a rejection");
    };
    assert_eq!(result.reasons(), vec![ReasonCode::UnknownField]);
    assert_eq!(result.failures[0].component, "stage 1 (MATCH)");
}

#[tokio::test]
async fn test_lookup_joins_customers() {
    let engine = engine(shop_store(), &shop_config());
    let envelope = completed(
        &engine,
        json!({
            "category": "aggregate",
            "collection": "orders",
            "pipeline": [
                {"$match": {"_id": 1}},
                {"$lookup": {
                    "from": "customers",
                    "localField": "customer_id",
                    "foreignField": "_id",
                    "as": "customer"
                }},
                {"$match": {"customer.tier": "gold"}}
            ]
        }),
    )
    .await;

    assert_eq!(envelope.count, 1);
    assert_eq!(
        envelope.documents[0]["customer"][0]["name"],
        json!("Ada Lovelace")
    );
}

#[tokio::test]
async fn test_lookup_of_unknown_collection_is_refused() {
    let engine = engine(shop_store(), &shop_config());
    let result = engine
        .handle(&json!({
            "category": "aggregate",
            "collection": "orders",
            "pipeline": [{"$lookup": {
                "from": "invoices",
                "localField": "_id",
                "foreignField": "order_id",
                "as": "invoices"
            }}]
        }))
        .await;
    match result {
        Err(e) => assert_eq!(e.reason_code(), "UnknownCollection"),
        Ok(Outcome::Rejected(r)) => assert!(r.has(ReasonCode::UnknownCollection)),
        Ok(other) => panic!("expected the lookup to be refused, got {other:?}"),
    }
}

#[tokio::test]
async fn test_compute_field_adds_derived_value() {
    let engine = engine(shop_store(), &shop_config());
    let outcome = engine
        .handle(&json!({
            "category": "compute_field",
            "collection": "orders",
            "name": "doubled",
            "expression": {"$multiply": ["$total", 2]},
            "filter": {"status": "new"},
            "sort": {"_id": 1},
            "limit": 2
        }))
        .await
        .unwrap();

    let Outcome::Completed { plan, envelope } = outcome else {
        panic!("expected the computation to complete");
    };
    assert_eq!(
        stage_names(&plan.operation),
        vec!["MATCH", "COMPUTE", "SORT", "LIMIT"]
    );
    let doubled: Vec<Option<f64>> = envelope
        .documents
        .iter()
        .map(|doc| doc["doubled"].as_f64())
        .collect();
    assert_eq!(doubled, vec![Some(320.0), Some(340.0)]);
}

#[tokio::test]
async fn test_compute_field_name_clash_needs_overwrite() {
    let engine = engine(shop_store(), &shop_config());
    let err = engine
        .handle(&json!({
            "category": "compute_field",
            "collection": "orders",
            "name": "total",
            "expression": {"$multiply": ["$total", 2]}
        }))
        .await
        .unwrap_err();
    assert_eq!(err.reason_code(), "MalformedParameter");

    let outcome = engine
        .handle(&json!({
            "category": "compute_field",
            "collection": "orders",
            "name": "total",
            "expression": {"$multiply": ["$total", 2]},
            "overwrite": true,
            "limit": 1
        }))
        .await
        .unwrap();
    assert_eq!(outcome.envelope().unwrap().documents[0]["total"].as_f64(), Some(20.0));
}
