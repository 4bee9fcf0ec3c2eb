//! Intent to query plan construction.
//!
//! The builder resolves the target collection, simplifies filters, fits
//! coerced values back to the field types the catalog inferred, and lays out
//! aggregation stages. It does not decide whether the plan is allowed to run;
//! that is the validator's job.

use super::{
    pagination_before_sort, Comparator, ComputedField, ExploreTarget, FilterExpression, Mutation,
    Operation, Pagination, QueryPlan, Stage,
};
use crate::catalog::{CollectionSchema, FieldType, SchemaSnapshot};
use crate::error::{DocQueryError, Result};
use crate::intent::{
    numeric_value, restore_string, ComputeFieldParams, ExploreKind, ExploreParams, FindParams,
    Intent, IntentParams, MutateAction, MutateParams,
};
use serde_json::Value;
use tracing::debug;

/// Sample documents returned by EXPLORE when the intent does not say.
pub const DEFAULT_SAMPLE_DOCUMENTS: i64 = 5;

/// Builds plans from intents against a schema snapshot.
#[derive(Debug, Clone)]
pub struct PlanBuilder {
    default_samples: i64,
}

impl Default for PlanBuilder {
    fn default() -> Self {
        Self {
            default_samples: DEFAULT_SAMPLE_DOCUMENTS,
        }
    }
}

/// Builds a plan with default settings.
pub fn build(intent: &Intent, snapshot: &SchemaSnapshot) -> Result<QueryPlan> {
    PlanBuilder::default().build(intent, snapshot)
}

impl PlanBuilder {
    /// Creates a builder returning `default_samples` documents for sample requests.
    pub fn new(default_samples: u64) -> Self {
        Self {
            default_samples: i64::try_from(default_samples).unwrap_or(i64::MAX),
        }
    }

    /// Builds the plan for an intent.
    pub fn build(&self, intent: &Intent, snapshot: &SchemaSnapshot) -> Result<QueryPlan> {
        let database = intent
            .database
            .clone()
            .unwrap_or_else(|| snapshot.database.clone());
        if database != snapshot.database {
            return Err(DocQueryError::exploration(format!(
                "schema for database '{database}' is not loaded"
            )));
        }

        let plan = match &intent.params {
            IntentParams::Explore(params) => self.explore(intent, params, snapshot, database)?,
            IntentParams::Find(params) => {
                let collection = resolve_target(intent, snapshot)?;
                find(params, snapshot.collections.get(&collection), database, collection)?
            }
            IntentParams::Aggregate(params) => {
                let collection = resolve_target(intent, snapshot)?;
                aggregate(params.stages.clone(), snapshot, database, collection)?
            }
            IntentParams::Mutate(params) => {
                let collection = resolve_target(intent, snapshot)?;
                mutate(params, snapshot.collections.get(&collection), database, collection)?
            }
            IntentParams::ComputeField(params) => {
                let collection = resolve_target(intent, snapshot)?;
                compute_field(params, snapshot.collections.get(&collection), database, collection)?
            }
        };

        debug!(plan = %plan.describe(), category = %intent.category(), "Built plan");
        Ok(plan)
    }

    fn explore(
        &self,
        intent: &Intent,
        params: &ExploreParams,
        snapshot: &SchemaSnapshot,
        database: String,
    ) -> Result<QueryPlan> {
        let kind = params.kind.unwrap_or(if intent.collection.is_some() {
            ExploreKind::Fields
        } else {
            ExploreKind::Collections
        });
        let (collection, target) = match kind {
            ExploreKind::Databases => (None, ExploreTarget::Databases),
            ExploreKind::Collections => (None, ExploreTarget::Collections),
            ExploreKind::Fields => (Some(resolve_target(intent, snapshot)?), ExploreTarget::Fields),
            ExploreKind::Samples => (
                Some(resolve_target(intent, snapshot)?),
                ExploreTarget::Samples {
                    count: params.sample_size.unwrap_or(self.default_samples),
                },
            ),
        };
        Ok(QueryPlan::new(
            database,
            collection,
            Operation::Explore { target },
        ))
    }
}

/// Picks the collection a request targets.
///
/// An explicit collection wins. Otherwise the database's only collection is
/// used, then the only collection containing every field the request
/// mentions. Anything else is ambiguous.
pub fn resolve_target(intent: &Intent, snapshot: &SchemaSnapshot) -> Result<String> {
    if let Some(collection) = &intent.collection {
        return Ok(collection.clone());
    }

    let names = snapshot.collection_names();
    match names.as_slice() {
        [] => {
            return Err(DocQueryError::ambiguous(format!(
                "database '{}' has no collections",
                snapshot.database
            )))
        }
        [only] => return Ok(only.clone()),
        _ => {}
    }

    let fields = intent.referenced_fields();
    if fields.is_empty() {
        return Err(DocQueryError::ambiguous(format!(
            "no collection named; candidates: {}",
            names.join(", ")
        )));
    }

    let candidates = snapshot.collections_with_fields(&fields);
    match candidates.as_slice() {
        [only] => Ok(only.to_string()),
        [] => Err(DocQueryError::ambiguous(format!(
            "no collection has all of the fields {}; candidates: {}",
            fields.join(", "),
            names.join(", ")
        ))),
        many => Err(DocQueryError::ambiguous(format!(
            "fields {} exist in several collections: {}",
            fields.join(", "),
            many.join(", ")
        ))),
    }
}

fn find(
    params: &FindParams,
    schema: Option<&CollectionSchema>,
    database: String,
    collection: String,
) -> Result<QueryPlan> {
    let filter = prepare_filter(params.filter.clone(), schema)?;
    let operation = if params.count_only {
        Operation::Count { filter }
    } else {
        Operation::Find {
            filter,
            projection: params.projection.clone(),
            sort: params.sort.clone(),
            pagination: Pagination::new(params.skip.unwrap_or(0), params.limit.unwrap_or(0)),
        }
    };
    Ok(QueryPlan::new(database, Some(collection), operation))
}

fn aggregate(
    stages: Vec<Stage>,
    snapshot: &SchemaSnapshot,
    database: String,
    collection: String,
) -> Result<QueryPlan> {
    let has_lookup = stages.iter().any(|s| matches!(s, Stage::Lookup { .. }));
    if has_lookup && !snapshot.has_collection(&collection) {
        return Err(DocQueryError::unknown_collection(collection));
    }
    for stage in &stages {
        if let Stage::Lookup { from, .. } = stage {
            if !snapshot.has_collection(from) {
                return Err(DocQueryError::unknown_collection(from.clone()));
            }
        }
    }

    // Filters only see the stored field types until the first reshaping stage.
    let mut schema = snapshot.collections.get(&collection);
    let mut prepared = Vec::with_capacity(stages.len());
    for stage in stages {
        match stage {
            Stage::Match { filter } => {
                if let Some(filter) = prepare_filter(Some(filter), schema)? {
                    prepared.push(Stage::Match { filter });
                }
            }
            Stage::Group { .. } | Stage::Project { .. } => {
                schema = None;
                prepared.push(stage);
            }
            other => prepared.push(other),
        }
    }

    Ok(QueryPlan::new(
        database,
        Some(collection),
        Operation::Aggregate {
            stages: order_pagination(prepared),
        },
    ))
}

/// Moves each LIMIT/SKIP run that sits directly ahead of a SORT to directly
/// after it, keeping the run's order. Every other stage keeps its position.
pub fn order_pagination(mut stages: Vec<Stage>) -> Vec<Stage> {
    for (run, sort) in pagination_before_sort(&stages) {
        stages[run.start..=sort].rotate_left(run.len());
    }
    stages
}

fn mutate(
    params: &MutateParams,
    schema: Option<&CollectionSchema>,
    database: String,
    collection: String,
) -> Result<QueryPlan> {
    let mutation = match params.action {
        MutateAction::Insert => {
            if params.all_documents || params.upsert {
                return Err(DocQueryError::unsupported(
                    "insert takes neither all_documents nor upsert",
                ));
            }
            Mutation::Insert {
                documents: params.documents.clone(),
            }
        }
        MutateAction::Update => Mutation::Update {
            filter: prepare_filter(params.filter.clone(), schema)?,
            patch: params.patch.clone(),
            multi: params.multi,
            upsert: params.upsert,
            all_documents: params.all_documents,
        },
        MutateAction::Delete => {
            if params.upsert {
                return Err(DocQueryError::unsupported("upsert applies only to updates"));
            }
            Mutation::Delete {
                filter: prepare_filter(params.filter.clone(), schema)?,
                multi: params.multi,
                all_documents: params.all_documents,
            }
        }
    };
    Ok(QueryPlan::new(
        database,
        Some(collection),
        Operation::Mutate { mutation },
    ))
}

fn compute_field(
    params: &ComputeFieldParams,
    schema: Option<&CollectionSchema>,
    database: String,
    collection: String,
) -> Result<QueryPlan> {
    if let Some(schema) = schema {
        if schema.has_field(&params.name) && !params.overwrite {
            return Err(DocQueryError::malformed(
                "name",
                format!(
                    "field '{}' already exists in '{}'; set overwrite to replace it",
                    params.name, collection
                ),
            ));
        }
    }

    let mut stages = Vec::new();
    if let Some(filter) = prepare_filter(params.filter.clone(), schema)? {
        stages.push(Stage::Match { filter });
    }
    stages.push(Stage::Compute {
        fields: vec![ComputedField {
            name: params.name.clone(),
            expr: params.expression.clone(),
        }],
    });
    if !params.sort.is_empty() {
        stages.push(Stage::Sort {
            keys: params.sort.clone(),
        });
    }
    if let Some(count) = params.skip {
        stages.push(Stage::Skip { count });
    }
    if let Some(count) = params.limit {
        stages.push(Stage::Limit { count });
    }

    Ok(QueryPlan::new(
        database,
        Some(collection),
        Operation::Aggregate { stages },
    ))
}

fn prepare_filter(
    filter: Option<FilterExpression>,
    schema: Option<&CollectionSchema>,
) -> Result<Option<FilterExpression>> {
    let Some(mut filter) = filter.map(FilterExpression::simplify).transpose()?.flatten() else {
        return Ok(None);
    };
    filter.visit_values_mut(&mut |field, comparator, value, original| {
        let original = original.take();
        if let Some(field_type) = schema.and_then(|schema| schema.field_type(field)) {
            let taken = std::mem::take(value);
            *value = fit_value(field_type, comparator, taken, original);
        }
    });
    Ok(Some(filter))
}

/// Adjusts a normalized operand to the inferred type of its field.
///
/// String fields get the operand back exactly as written whenever
/// normalization changed it.
fn fit_value(
    field_type: FieldType,
    comparator: Comparator,
    value: Value,
    original: Option<Value>,
) -> Value {
    if comparator == Comparator::Exists {
        return value;
    }
    if let (FieldType::String, Some(original)) = (field_type, original) {
        return original;
    }
    match (field_type, value) {
        (FieldType::String, Value::Array(items)) => Value::Array(
            items
                .into_iter()
                .map(|item| fit_value(FieldType::String, Comparator::Eq, item, None))
                .collect(),
        ),
        (FieldType::String, value) if crate::db::as_date(&value).is_some() => {
            restore_string(value)
        }
        (FieldType::String, Value::Number(n)) if comparator.is_range() => {
            restore_string(Value::Number(n))
        }
        (FieldType::Number, Value::Array(items)) => Value::Array(
            items
                .into_iter()
                .map(|item| fit_value(FieldType::Number, Comparator::Eq, item, None))
                .collect(),
        ),
        (FieldType::Number, Value::String(text)) => {
            numeric_value(&text).unwrap_or(Value::String(text))
        }
        (_, value) => value,
    }
}
