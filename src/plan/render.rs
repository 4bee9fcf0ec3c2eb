//! Rendering plans into the MongoDB query dialect.

use super::{
    Accumulator, AccumulatorOp, FilterExpression, Pagination, Projection, SortKey, Stage,
    UpdatePatch,
};
use crate::db::{Document, FindRequest};
use serde_json::{json, Map, Value};

fn single(key: impl Into<String>, value: Value) -> Document {
    let mut map = Map::new();
    map.insert(key.into(), value);
    map
}

/// Renders a filter. Absent filters match everything.
pub fn filter_document(filter: Option<&FilterExpression>) -> Document {
    match filter {
        Some(filter) => render_filter(filter),
        None => Map::new(),
    }
}

/// Renders one filter node: leaves as `{field: {"$op": value}}`, logical
/// nodes as `{"$and" | "$or" | "$nor": [...]}`.
pub fn render_filter(filter: &FilterExpression) -> Document {
    match filter {
        FilterExpression::Condition {
            field,
            comparator,
            value,
            ..
        } => single(
            field.clone(),
            Value::Object(single(comparator.operator(), value.clone())),
        ),
        FilterExpression::Logical { op, children } => single(
            op.operator(),
            Value::Array(
                children
                    .iter()
                    .map(|child| Value::Object(render_filter(child)))
                    .collect(),
            ),
        ),
    }
}

pub fn projection_document(projection: &Projection) -> Document {
    let mut doc = Map::new();
    match projection {
        Projection::Include { fields, with_id } => {
            for field in fields {
                doc.insert(field.clone(), json!(1));
            }
            if !with_id {
                doc.insert("_id".to_string(), json!(0));
            }
        }
        Projection::Exclude { fields } => {
            for field in fields {
                doc.insert(field.clone(), json!(0));
            }
        }
    }
    doc
}

pub fn sort_document(keys: &[SortKey]) -> Document {
    keys.iter()
        .map(|key| (key.field.clone(), json!(key.direction.sign())))
        .collect()
}

fn accumulator_body(accumulator: &Accumulator) -> Value {
    let arg = match accumulator.op {
        AccumulatorOp::Count => Value::Object(Map::new()),
        _ => accumulator.expr.render(),
    };
    Value::Object(single(accumulator.op.operator(), arg))
}

/// Renders one stage. A LIMIT of 0 means unbounded and renders to nothing.
pub fn stage_document(stage: &Stage) -> Option<Document> {
    let doc = match stage {
        Stage::Match { filter } => single("$match", Value::Object(render_filter(filter))),
        Stage::Group { key, accumulators } => {
            let mut body = single("_id", key.render());
            for accumulator in accumulators {
                body.insert(accumulator.name.clone(), accumulator_body(accumulator));
            }
            single("$group", Value::Object(body))
        }
        Stage::Sort { keys } => single("$sort", Value::Object(sort_document(keys))),
        Stage::Limit { count: 0 } => return None,
        Stage::Limit { count } => single("$limit", json!(count)),
        Stage::Skip { count } => single("$skip", json!(count)),
        Stage::Project { projection } => {
            single("$project", Value::Object(projection_document(projection)))
        }
        Stage::Lookup {
            from,
            local_field,
            foreign_field,
            as_field,
        } => single(
            "$lookup",
            json!({
                "from": from,
                "localField": local_field,
                "foreignField": foreign_field,
                "as": as_field,
            }),
        ),
        Stage::Compute { fields } => single(
            "$addFields",
            Value::Object(
                fields
                    .iter()
                    .map(|computed| (computed.name.clone(), computed.expr.render()))
                    .collect(),
            ),
        ),
    };
    Some(doc)
}

pub fn pipeline(stages: &[Stage]) -> Vec<Document> {
    stages.iter().filter_map(stage_document).collect()
}

/// Renders update operators, omitting the empty ones.
pub fn update_document(patch: &UpdatePatch) -> Document {
    let mut doc = Map::new();
    if !patch.set.is_empty() {
        doc.insert("$set".to_string(), Value::Object(patch.set.clone()));
    }
    if !patch.unset.is_empty() {
        doc.insert(
            "$unset".to_string(),
            Value::Object(
                patch
                    .unset
                    .iter()
                    .map(|field| (field.clone(), json!("")))
                    .collect(),
            ),
        );
    }
    if !patch.inc.is_empty() {
        doc.insert("$inc".to_string(), Value::Object(patch.inc.clone()));
    }
    doc
}

/// Builds the `find` arguments of a FIND plan.
pub fn find_request(
    filter: Option<&FilterExpression>,
    projection: Option<&Projection>,
    sort: &[SortKey],
    pagination: Pagination,
) -> FindRequest {
    FindRequest {
        filter: filter_document(filter),
        projection: projection.map(projection_document),
        sort: sort_document(sort),
        skip: u64::try_from(pagination.skip).unwrap_or(0),
        limit: u64::try_from(pagination.limit).unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Comparator, ComputedField, Expr, ExprOp, LogicalOp};
    use pretty_assertions::assert_eq;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_render_leaf() {
        let filter = FilterExpression::condition("status", Comparator::Eq, json!("shipped"));
        assert_eq!(
            render_filter(&filter),
            doc(json!({"status": {"$eq": "shipped"}}))
        );
    }

    #[test]
    fn test_render_nested_logic() {
        let filter = FilterExpression::and(vec![
            FilterExpression::condition("total", Comparator::Gte, json!(10)),
            FilterExpression::Logical {
                op: LogicalOp::Nor,
                children: vec![FilterExpression::condition(
                    "status",
                    Comparator::In,
                    json!(["void", "lost"]),
                )],
            },
        ]);
        assert_eq!(
            render_filter(&filter),
            doc(json!({"$and": [
                {"total": {"$gte": 10}},
                {"$nor": [{"status": {"$in": ["void", "lost"]}}]}
            ]}))
        );
        assert_eq!(filter_document(None), Map::new());
    }

    #[test]
    fn test_render_projection_and_sort() {
        let include = Projection::Include {
            fields: vec!["name".into(), "total".into()],
            with_id: false,
        };
        assert_eq!(
            projection_document(&include),
            doc(json!({"name": 1, "total": 1, "_id": 0}))
        );
        let exclude = Projection::Exclude {
            fields: vec!["secret".into()],
        };
        assert_eq!(projection_document(&exclude), doc(json!({"secret": 0})));
        assert_eq!(
            sort_document(&[SortKey::descending("total"), SortKey::ascending("name")]),
            doc(json!({"total": -1, "name": 1}))
        );
    }

    #[test]
    fn test_render_pipeline() {
        let stages = vec![
            Stage::Match {
                filter: FilterExpression::condition("status", Comparator::Eq, json!("new")),
            },
            Stage::Compute {
                fields: vec![ComputedField {
                    name: "gross".into(),
                    expr: Expr::Apply {
                        op: ExprOp::Multiply,
                        args: vec![Expr::field("total"), Expr::literal(json!(2))],
                    },
                }],
            },
            Stage::Group {
                key: Expr::field("customer_id"),
                accumulators: vec![
                    Accumulator {
                        name: "spent".into(),
                        op: AccumulatorOp::Sum,
                        expr: Expr::field("gross"),
                    },
                    Accumulator {
                        name: "orders".into(),
                        op: AccumulatorOp::Count,
                        expr: Expr::literal(json!({})),
                    },
                ],
            },
            Stage::Limit { count: 0 },
            Stage::Skip { count: 1 },
            Stage::Limit { count: 3 },
        ];
        let rendered: Vec<Value> = pipeline(&stages).into_iter().map(Value::Object).collect();
        assert_eq!(
            rendered,
            vec![
                json!({"$match": {"status": {"$eq": "new"}}}),
                json!({"$addFields": {"gross": {"$multiply": ["$total", 2]}}}),
                json!({"$group": {
                    "_id": "$customer_id",
                    "spent": {"$sum": "$gross"},
                    "orders": {"$count": {}}
                }}),
                json!({"$skip": 1}),
                json!({"$limit": 3}),
            ]
        );
    }

    #[test]
    fn test_render_lookup() {
        let stage = Stage::Lookup {
            from: "customers".into(),
            local_field: "customer_id".into(),
            foreign_field: "_id".into(),
            as_field: "customer".into(),
        };
        assert_eq!(
            stage_document(&stage).map(Value::Object),
            Some(json!({"$lookup": {
                "from": "customers",
                "localField": "customer_id",
                "foreignField": "_id",
                "as": "customer"
            }}))
        );
    }

    #[test]
    fn test_update_document() {
        let patch = UpdatePatch {
            set: doc(json!({"status": "shipped"})),
            unset: vec!["draft".into()],
            inc: Map::new(),
        };
        assert_eq!(
            update_document(&patch),
            doc(json!({"$set": {"status": "shipped"}, "$unset": {"draft": ""}}))
        );
    }

    #[test]
    fn test_find_request() {
        let filter = FilterExpression::condition("status", Comparator::Eq, json!("shipped"));
        let request = find_request(
            Some(&filter),
            None,
            &[SortKey::ascending("_id")],
            Pagination::new(0, 10),
        );
        assert_eq!(request.filter, doc(json!({"status": {"$eq": "shipped"}})));
        assert_eq!(request.sort, doc(json!({"_id": 1})));
        assert_eq!(request.limit, 10);
        assert_eq!(request.projection, None);
    }
}
