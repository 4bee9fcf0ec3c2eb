//! Intent classification.
//!
//! An upstream producer hands over a loosely typed JSON payload. The
//! classifier checks it once and turns it into an `Intent` whose parameters
//! have one fixed shape per category.

mod classifier;
mod normalize;
mod parser;
mod source;

pub use classifier::classify;
pub use normalize::{
    coerce_bool, coerce_integer, normalize_condition_value, numeric_value, restore_string,
};
pub use parser::parse_intent_response;
pub use source::{IntentSource, KeywordIntentSource, QueryKind, ScriptedIntentSource};

use crate::db::Document;
use crate::plan::{Expr, FilterExpression, Projection, SortKey, Stage, UpdatePatch};
use serde::Serialize;
use std::fmt;

/// Category tag of an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentCategory {
    Explore,
    Find,
    Aggregate,
    Mutate,
    ComputeField,
}

impl IntentCategory {
    /// Parses a category tag, ignoring case and `-`/space separators.
    pub fn parse(text: &str) -> Option<Self> {
        let normalized = text.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "explore" => Some(Self::Explore),
            "find" => Some(Self::Find),
            "aggregate" => Some(Self::Aggregate),
            "mutate" => Some(Self::Mutate),
            "compute_field" | "computefield" => Some(Self::ComputeField),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explore => "EXPLORE",
            Self::Find => "FIND",
            Self::Aggregate => "AGGREGATE",
            Self::Mutate => "MUTATE",
            Self::ComputeField => "COMPUTE_FIELD",
        }
    }
}

impl fmt::Display for IntentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an exploration request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExploreKind {
    Databases,
    Collections,
    Fields,
    Samples,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExploreParams {
    /// `None` lets the builder pick from whether a collection was named.
    pub kind: Option<ExploreKind>,
    pub sample_size: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FindParams {
    pub filter: Option<FilterExpression>,
    pub projection: Option<Projection>,
    pub sort: Vec<SortKey>,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
    /// Return only the number of matching documents.
    pub count_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateParams {
    pub stages: Vec<Stage>,
}

/// Write action requested by a MUTATE intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutateAction {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutateParams {
    pub action: MutateAction,
    pub documents: Vec<Document>,
    pub filter: Option<FilterExpression>,
    pub patch: UpdatePatch,
    /// Act on every matching document rather than the first.
    pub multi: bool,
    pub upsert: bool,
    pub all_documents: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComputeFieldParams {
    pub name: String,
    pub expression: Expr,
    pub filter: Option<FilterExpression>,
    pub sort: Vec<SortKey>,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
    /// Allow replacing an existing field of the same name.
    pub overwrite: bool,
}

/// Category-specific parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "category", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentParams {
    Explore(ExploreParams),
    Find(FindParams),
    Aggregate(AggregateParams),
    Mutate(MutateParams),
    ComputeField(ComputeFieldParams),
}

/// A classified request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Intent {
    pub collection: Option<String>,
    pub database: Option<String>,
    pub params: IntentParams,
}

impl Intent {
    pub fn new(params: IntentParams) -> Self {
        Self {
            collection: None,
            database: None,
            params,
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn category(&self) -> IntentCategory {
        match &self.params {
            IntentParams::Explore(_) => IntentCategory::Explore,
            IntentParams::Find(_) => IntentCategory::Find,
            IntentParams::Aggregate(_) => IntentCategory::Aggregate,
            IntentParams::Mutate(_) => IntentCategory::Mutate,
            IntentParams::ComputeField(_) => IntentCategory::ComputeField,
        }
    }

    /// Field paths of the target collection the request mentions.
    ///
    /// Used to pick a collection when the payload does not name one. Fields
    /// defined by the request itself (computed names, lookup outputs) and
    /// everything after a GROUP are not counted.
    pub fn referenced_fields(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut push = |field: &str| {
            if !out.iter().any(|seen| seen == field) {
                out.push(field.to_string());
            }
        };
        match &self.params {
            IntentParams::Explore(_) => {}
            IntentParams::Find(params) => {
                if let Some(filter) = &params.filter {
                    filter.fields().into_iter().for_each(&mut push);
                }
                if let Some(projection) = &params.projection {
                    projection.fields().iter().for_each(|f| push(f));
                }
                params.sort.iter().for_each(|key| push(&key.field));
            }
            IntentParams::Aggregate(params) => {
                let mut defined: Vec<&str> = Vec::new();
                for stage in &params.stages {
                    for field in stage.fields_read() {
                        if !defined.contains(&field) {
                            push(field);
                        }
                    }
                    match stage {
                        Stage::Group { .. } => break,
                        Stage::Compute { fields } => {
                            defined.extend(fields.iter().map(|f| f.name.as_str()))
                        }
                        Stage::Lookup { as_field, .. } => defined.push(as_field),
                        _ => {}
                    }
                }
            }
            IntentParams::Mutate(params) => {
                if let Some(filter) = &params.filter {
                    filter.fields().into_iter().for_each(&mut push);
                }
            }
            IntentParams::ComputeField(params) => {
                params.expression.fields().into_iter().for_each(&mut push);
                if let Some(filter) = &params.filter {
                    filter.fields().into_iter().for_each(&mut push);
                }
                params
                    .sort
                    .iter()
                    .filter(|key| key.field != params.name)
                    .for_each(|key| push(&key.field));
            }
        }
        out
    }
}
