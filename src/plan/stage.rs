//! Building blocks shared by find and aggregate plans.

use super::expr::Expr;
use super::filter::FilterExpression;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::Range;

/// Sort direction of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    /// Parses `1`, `-1`, `"asc"`, `"desc"`, `"ascending"` or `"descending"`.
    pub fn parse(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => match n.as_f64() {
                Some(x) if x > 0.0 => Some(Self::Ascending),
                Some(x) if x < 0.0 => Some(Self::Descending),
                _ => None,
            },
            Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
                "asc" | "ascending" | "1" => Some(Self::Ascending),
                "desc" | "descending" | "-1" => Some(Self::Descending),
                _ => None,
            },
            _ => None,
        }
    }

    /// `1` or `-1`.
    pub fn sign(&self) -> i64 {
        match self {
            Self::Ascending => 1,
            Self::Descending => -1,
        }
    }
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// Field selection: inclusion or exclusion, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Projection {
    /// Keep only `fields`; `_id` too unless `with_id` is false.
    Include { fields: Vec<String>, with_id: bool },
    /// Drop `fields`.
    Exclude { fields: Vec<String> },
}

impl Projection {
    /// The listed field paths.
    pub fn fields(&self) -> &[String] {
        match self {
            Self::Include { fields, .. } | Self::Exclude { fields } => fields,
        }
    }
}

/// Skip/limit pair. A limit of 0 means unbounded.
///
/// Signed so a negative request survives until validation rejects it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub skip: i64,
    pub limit: i64,
}

impl Pagination {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self { skip, limit }
    }

    pub fn is_unbounded(&self) -> bool {
        self.limit == 0
    }
}

/// Group accumulator operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccumulatorOp {
    Sum,
    Avg,
    Min,
    Max,
    First,
    Last,
    Push,
    AddToSet,
    Count,
}

impl AccumulatorOp {
    /// Parses `$sum`, `$avg`, ...
    pub fn parse(name: &str) -> Option<Self> {
        let op = match name {
            "$sum" => Self::Sum,
            "$avg" => Self::Avg,
            "$min" => Self::Min,
            "$max" => Self::Max,
            "$first" => Self::First,
            "$last" => Self::Last,
            "$push" => Self::Push,
            "$addToSet" => Self::AddToSet,
            "$count" => Self::Count,
            _ => return None,
        };
        Some(op)
    }

    pub fn operator(&self) -> &'static str {
        match self {
            Self::Sum => "$sum",
            Self::Avg => "$avg",
            Self::Min => "$min",
            Self::Max => "$max",
            Self::First => "$first",
            Self::Last => "$last",
            Self::Push => "$push",
            Self::AddToSet => "$addToSet",
            Self::Count => "$count",
        }
    }
}

/// Named accumulator of a GROUP stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accumulator {
    pub name: String,
    pub op: AccumulatorOp,
    pub expr: Expr,
}

/// Field added to every document by a COMPUTE stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedField {
    pub name: String,
    pub expr: Expr,
}

/// One step of an aggregation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Stage {
    Match {
        filter: FilterExpression,
    },
    Group {
        key: Expr,
        accumulators: Vec<Accumulator>,
    },
    Sort {
        keys: Vec<SortKey>,
    },
    Limit {
        count: i64,
    },
    Skip {
        count: i64,
    },
    Project {
        projection: Projection,
    },
    Lookup {
        from: String,
        local_field: String,
        foreign_field: String,
        as_field: String,
    },
    Compute {
        fields: Vec<ComputedField>,
    },
}

impl Stage {
    /// Upper-case stage name used in validation details.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Match { .. } => "MATCH",
            Self::Group { .. } => "GROUP",
            Self::Sort { .. } => "SORT",
            Self::Limit { .. } => "LIMIT",
            Self::Skip { .. } => "SKIP",
            Self::Project { .. } => "PROJECT",
            Self::Lookup { .. } => "LOOKUP",
            Self::Compute { .. } => "COMPUTE",
        }
    }

    pub fn is_sort(&self) -> bool {
        matches!(self, Self::Sort { .. })
    }

    /// LIMIT and SKIP.
    pub fn is_pagination(&self) -> bool {
        matches!(self, Self::Limit { .. } | Self::Skip { .. })
    }

    /// Field paths this stage reads from its input documents.
    pub fn fields_read(&self) -> Vec<&str> {
        match self {
            Self::Match { filter } => filter.fields(),
            Self::Group { key, accumulators } => {
                let mut out = key.fields();
                for accumulator in accumulators {
                    for field in accumulator.expr.fields() {
                        if !out.contains(&field) {
                            out.push(field);
                        }
                    }
                }
                out
            }
            Self::Sort { keys } => keys.iter().map(|key| key.field.as_str()).collect(),
            Self::Project { projection } => {
                projection.fields().iter().map(String::as_str).collect()
            }
            Self::Lookup { local_field, .. } => vec![local_field.as_str()],
            Self::Compute { fields } => {
                let mut out = Vec::new();
                for computed in fields {
                    for field in computed.expr.fields() {
                        if !out.contains(&field) {
                            out.push(field);
                        }
                    }
                }
                out
            }
            Self::Limit { .. } | Self::Skip { .. } => Vec::new(),
        }
    }
}

/// Runs of LIMIT/SKIP stages placed directly ahead of a SORT, each paired
/// with the index of that SORT.
///
/// A run counts only when nothing but pagination separates it from the SORT
/// and it does not itself follow a SORT; a LIMIT after a GROUP, MATCH or an
/// earlier SORT is part of the pipeline's meaning and stays put.
pub fn pagination_before_sort(stages: &[Stage]) -> Vec<(Range<usize>, usize)> {
    let mut runs = Vec::new();
    let mut index = 0;
    while index < stages.len() {
        if !stages[index].is_pagination() {
            index += 1;
            continue;
        }
        let start = index;
        while index < stages.len() && stages[index].is_pagination() {
            index += 1;
        }
        let follows_sort = start > 0 && stages[start - 1].is_sort();
        if !follows_sort && stages.get(index).is_some_and(Stage::is_sort) {
            runs.push((start..index, index));
        }
    }
    runs
}
