//! Plan validation.
//!
//! Checks a `QueryPlan` against the schema snapshot and the mutation policy
//! before anything reaches the store. Every failing check is reported, not
//! just the first one, and validating the same plan twice gives the same
//! result.
//!
//! A plan that passes is wrapped in a `ValidatedPlan`, which is the only
//! thing the executor accepts.

mod shape;

pub use shape::Shape;

use crate::catalog::{CollectionSchema, FieldType, SchemaSnapshot};
use crate::config::PolicyConfig;
use crate::plan::{
    pagination_before_sort, Comparator, ExploreTarget, FilterExpression, Mutation, Operation,
    Pagination, QueryPlan, SortKey, Stage, UpdatePatch,
};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use tracing::debug;

/// Why a check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ReasonCode {
    UnknownCollection,
    UnknownField,
    TypeMismatch,
    NegativePagination,
    EmptyMutationFilter,
    AllDocumentsMutationDisabled,
    StageOrder,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownCollection => "UnknownCollection",
            Self::UnknownField => "UnknownField",
            Self::TypeMismatch => "TypeMismatch",
            Self::NegativePagination => "NegativePagination",
            Self::EmptyMutationFilter => "EmptyMutationFilter",
            Self::AllDocumentsMutationDisabled => "AllDocumentsMutationDisabled",
            Self::StageOrder => "StageOrder",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationFailure {
    /// Part of the plan the check looked at, e.g. `filter` or `stage 2 (SORT)`.
    pub component: String,
    pub reason: ReasonCode,
    pub detail: String,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.component, self.detail, self.reason)
    }
}

/// Outcome of validating a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub ok: bool,
    pub failures: Vec<ValidationFailure>,
}

impl ValidationResult {
    fn from_failures(failures: Vec<ValidationFailure>) -> Self {
        Self {
            ok: failures.is_empty(),
            failures,
        }
    }

    /// Returns true if some failure carries `reason`.
    pub fn has(&self, reason: ReasonCode) -> bool {
        self.failures.iter().any(|failure| failure.reason == reason)
    }

    /// Reason codes in the order the checks reported them.
    pub fn reasons(&self) -> Vec<ReasonCode> {
        self.failures.iter().map(|failure| failure.reason).collect()
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ok {
            return f.write_str("valid");
        }
        let lines: Vec<String> = self.failures.iter().map(ToString::to_string).collect();
        f.write_str(&lines.join("; "))
    }
}

/// A plan that passed validation.
///
/// Only `PlanValidator::check` creates one.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPlan {
    plan: QueryPlan,
}

impl ValidatedPlan {
    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    pub fn into_plan(self) -> QueryPlan {
        self.plan
    }
}

/// Validates plans against a snapshot and the mutation policy.
#[derive(Debug, Clone)]
pub struct PlanValidator {
    allow_all_documents: bool,
}

impl Default for PlanValidator {
    fn default() -> Self {
        Self::new(&PolicyConfig::default())
    }
}

impl PlanValidator {
    pub fn new(policy: &PolicyConfig) -> Self {
        Self {
            allow_all_documents: policy.allow_all_documents_mutation,
        }
    }

    /// Runs every check and collects the failures.
    pub fn validate(&self, plan: &QueryPlan, snapshot: &SchemaSnapshot) -> ValidationResult {
        let mut checks = Checks::default();

        let schema = checks.collection(plan, snapshot);
        let shape = schema.map(Shape::of_collection);

        match &plan.operation {
            Operation::Explore { target } => {
                if let ExploreTarget::Samples { count } = target {
                    if *count < 0 {
                        checks.fail(
                            "samples",
                            ReasonCode::NegativePagination,
                            format!("sample count {count} is negative"),
                        );
                    }
                }
            }
            Operation::Find {
                filter,
                projection,
                sort,
                pagination,
            } => {
                if let Some(shape) = &shape {
                    if let Some(filter) = filter {
                        checks.filter("filter", filter, shape);
                    }
                    if let Some(projection) = projection {
                        checks.fields("projection", projection.fields(), shape);
                    }
                    checks.sort("sort", sort, shape);
                }
                checks.pagination(*pagination);
            }
            Operation::Count { filter } => {
                if let (Some(shape), Some(filter)) = (&shape, filter) {
                    checks.filter("filter", filter, shape);
                }
            }
            Operation::Aggregate { stages } => {
                checks.stages(stages, shape, snapshot);
            }
            Operation::Mutate { mutation } => {
                if let (Some(shape), Some(filter)) = (&shape, mutation.filter()) {
                    checks.filter("filter", filter, shape);
                }
                if let (Some(shape), Mutation::Update { patch, .. }) = (&shape, mutation) {
                    checks.patch(patch, shape);
                }
                checks.mutation(mutation, self.allow_all_documents);
            }
        }

        let result = ValidationResult::from_failures(checks.failures);
        debug!(
            plan = %plan.describe(),
            ok = result.ok,
            failures = result.failures.len(),
            "Validated plan"
        );
        result
    }

    /// Validates a plan and, if it passes, wraps it for execution.
    pub fn check(
        &self,
        plan: QueryPlan,
        snapshot: &SchemaSnapshot,
    ) -> std::result::Result<ValidatedPlan, ValidationResult> {
        let result = self.validate(&plan, snapshot);
        if result.ok {
            Ok(ValidatedPlan { plan })
        } else {
            Err(result)
        }
    }
}

#[derive(Default)]
struct Checks {
    failures: Vec<ValidationFailure>,
}

impl Checks {
    fn fail(&mut self, component: impl Into<String>, reason: ReasonCode, detail: impl Into<String>) {
        self.failures.push(ValidationFailure {
            component: component.into(),
            reason,
            detail: detail.into(),
        });
    }

    /// Resolves the target collection. Listings of databases and
    /// collections have none.
    fn collection<'a>(
        &mut self,
        plan: &QueryPlan,
        snapshot: &'a SchemaSnapshot,
    ) -> Option<&'a CollectionSchema> {
        let needs_collection = !matches!(
            plan.operation,
            Operation::Explore {
                target: ExploreTarget::Databases | ExploreTarget::Collections
            }
        );
        if !needs_collection {
            return None;
        }

        let Some(name) = &plan.collection else {
            self.fail(
                "collection",
                ReasonCode::UnknownCollection,
                "plan has no target collection",
            );
            return None;
        };
        if plan.database != snapshot.database {
            self.fail(
                "collection",
                ReasonCode::UnknownCollection,
                format!(
                    "schema for database '{}' is not loaded; cannot resolve '{name}'",
                    plan.database
                ),
            );
            return None;
        }
        match snapshot.collections.get(name) {
            Some(schema) => Some(schema),
            None => {
                self.fail(
                    "collection",
                    ReasonCode::UnknownCollection,
                    format!(
                        "collection '{name}' does not exist in database '{}'",
                        snapshot.database
                    ),
                );
                None
            }
        }
    }

    fn field(&mut self, component: &str, field: &str, shape: &Shape) {
        if !shape.knows(field) {
            self.fail(
                component,
                ReasonCode::UnknownField,
                format!("field '{field}' does not exist"),
            );
        }
    }

    fn fields<'a>(&mut self, component: &str, fields: impl IntoIterator<Item = &'a String>, shape: &Shape) {
        for field in fields {
            self.field(component, field, shape);
        }
    }

    fn sort(&mut self, component: &str, keys: &[SortKey], shape: &Shape) {
        for key in keys {
            self.field(component, &key.field, shape);
        }
    }

    fn filter(&mut self, component: &str, filter: &FilterExpression, shape: &Shape) {
        let mut leaves: Vec<(&str, Comparator, &Value)> = Vec::new();
        filter.visit(&mut |field, comparator, value| leaves.push((field, comparator, value)));
        for (field, comparator, value) in leaves {
            if !shape.knows(field) {
                self.field(component, field, shape);
                continue;
            }
            let Some(field_type) = shape.field_type(field) else {
                continue;
            };
            if let Some(offending) = mismatched_operand(field_type, comparator, value) {
                self.fail(
                    component,
                    ReasonCode::TypeMismatch,
                    format!(
                        "field '{field}' is {field_type} but {comparator} compares it with {} {offending}",
                        FieldType::of(offending)
                    ),
                );
            }
        }
    }

    fn patch(&mut self, patch: &UpdatePatch, shape: &Shape) {
        for (field, delta) in &patch.inc {
            match shape.field_type(field) {
                Some(FieldType::Number | FieldType::Null | FieldType::Mixed) | None => {}
                Some(field_type) => self.fail(
                    "update",
                    ReasonCode::TypeMismatch,
                    format!("cannot increment {field_type} field '{field}' by {delta}"),
                ),
            }
        }
    }

    fn pagination(&mut self, pagination: Pagination) {
        if pagination.skip < 0 {
            self.fail(
                "pagination",
                ReasonCode::NegativePagination,
                format!("skip {} is negative", pagination.skip),
            );
        }
        if pagination.limit < 0 {
            self.fail(
                "pagination",
                ReasonCode::NegativePagination,
                format!("limit {} is negative", pagination.limit),
            );
        }
    }

    fn mutation(&mut self, mutation: &Mutation, allow_all_documents: bool) {
        if matches!(mutation, Mutation::Insert { .. }) {
            return;
        }
        if mutation.filter().is_none() && !mutation.all_documents() {
            self.fail(
                "mutation",
                ReasonCode::EmptyMutationFilter,
                format!(
                    "{} without a filter would touch every document; set all_documents to confirm",
                    mutation.name()
                ),
            );
        }
        if mutation.all_documents() && !allow_all_documents {
            self.fail(
                "mutation",
                ReasonCode::AllDocumentsMutationDisabled,
                format!("all-documents {} is disabled by policy", mutation.name()),
            );
        }
    }

    fn stages(&mut self, stages: &[Stage], mut shape: Option<Shape>, snapshot: &SchemaSnapshot) {
        let misplaced = pagination_before_sort(stages);

        for (index, stage) in stages.iter().enumerate() {
            let component = format!("stage {index} ({})", stage.name());

            if let Some((_, sort_index)) = misplaced.iter().find(|(run, _)| run.contains(&index)) {
                self.fail(
                    &component,
                    ReasonCode::StageOrder,
                    format!(
                        "{} runs directly before the SORT at stage {sort_index}",
                        stage.name()
                    ),
                );
            }

            match stage {
                Stage::Limit { count } | Stage::Skip { count } if *count < 0 => {
                    self.fail(
                        &component,
                        ReasonCode::NegativePagination,
                        format!("{} {count} is negative", stage.name().to_lowercase()),
                    );
                }
                Stage::Lookup {
                    from,
                    foreign_field,
                    ..
                } => match snapshot.collections.get(from) {
                    None => self.fail(
                        &component,
                        ReasonCode::UnknownCollection,
                        format!("lookup collection '{from}' does not exist"),
                    ),
                    Some(foreign) => {
                        self.field(&component, foreign_field, &Shape::of_collection(foreign))
                    }
                },
                _ => {}
            }

            let Some(current) = shape.as_mut() else {
                continue;
            };
            match stage {
                Stage::Match { filter } => self.filter(&component, filter, current),
                other => {
                    for field in other.fields_read() {
                        self.field(&component, field, current);
                    }
                }
            }
            match stage {
                Stage::Group { accumulators, .. } => {
                    current.regroup(accumulators.iter().map(|a| a.name.as_str()))
                }
                Stage::Compute { fields } => {
                    for computed in fields {
                        current.define(&computed.name);
                    }
                }
                Stage::Lookup { as_field, .. } => current.define(as_field),
                Stage::Project { projection } => current.project(projection),
                _ => {}
            }
        }
    }
}

/// Returns the operand that does not fit `field_type`, if any.
fn mismatched_operand<'a>(
    field_type: FieldType,
    comparator: Comparator,
    value: &'a Value,
) -> Option<&'a Value> {
    match comparator {
        Comparator::Exists => None,
        Comparator::Regex => match field_type {
            FieldType::String | FieldType::Array | FieldType::Mixed | FieldType::Null => None,
            _ => Some(value),
        },
        Comparator::In | Comparator::Nin => match value {
            Value::Array(items) => items.iter().find(|item| !fits(field_type, item)),
            other => (!fits(field_type, other)).then_some(other),
        },
        _ => (!fits(field_type, value)).then_some(value),
    }
}

fn fits(field_type: FieldType, value: &Value) -> bool {
    value.is_null()
        || matches!(
            field_type,
            FieldType::Array | FieldType::Object | FieldType::Mixed | FieldType::Null
        )
        || FieldType::of(value) == field_type
}
