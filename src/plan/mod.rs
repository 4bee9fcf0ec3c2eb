//! Query plans.
//!
//! A `QueryPlan` is the fully specified, store-agnostic description of one
//! database operation. Plans come out of the builder, go through the
//! validator, and only then reach the executor, which renders them into the
//! MongoDB dialect.

pub mod builder;
mod expr;
mod filter;
pub mod render;
mod stage;

pub use builder::build;
pub use expr::{Expr, ExprOp};
pub use filter::{Comparator, FilterExpression, LogicalOp};
pub use stage::{
    pagination_before_sort, Accumulator, AccumulatorOp, ComputedField, Pagination, Projection,
    SortDirection, SortKey, Stage,
};

use crate::db::Document;
use serde::{Deserialize, Serialize};

/// What an EXPLORE plan looks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExploreTarget {
    /// User databases on the server.
    Databases,
    /// Collections of the plan's database.
    Collections,
    /// Inferred field inventory of the plan's collection.
    Fields,
    /// The first `count` documents of the plan's collection.
    Samples { count: i64 },
}

/// Update operators of an update mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdatePatch {
    #[serde(default, skip_serializing_if = "Document::is_empty")]
    pub set: Document,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unset: Vec<String>,
    #[serde(default, skip_serializing_if = "Document::is_empty")]
    pub inc: Document,
}

impl UpdatePatch {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty() && self.inc.is_empty()
    }

    /// Field paths the patch writes.
    pub fn fields(&self) -> Vec<&str> {
        self.set
            .keys()
            .chain(self.unset.iter())
            .chain(self.inc.keys())
            .map(String::as_str)
            .collect()
    }
}

/// Write operation descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Mutation {
    Insert {
        documents: Vec<Document>,
    },
    Update {
        filter: Option<FilterExpression>,
        patch: UpdatePatch,
        multi: bool,
        upsert: bool,
        all_documents: bool,
    },
    Delete {
        filter: Option<FilterExpression>,
        multi: bool,
        all_documents: bool,
    },
}

impl Mutation {
    /// Lower-case action name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }

    /// The selection filter of an update or delete.
    pub fn filter(&self) -> Option<&FilterExpression> {
        match self {
            Self::Insert { .. } => None,
            Self::Update { filter, .. } | Self::Delete { filter, .. } => filter.as_ref(),
        }
    }

    /// True for updates and deletes that may touch more than one document.
    pub fn is_multi(&self) -> bool {
        match self {
            Self::Insert { documents } => documents.len() > 1,
            Self::Update { multi, .. } | Self::Delete { multi, .. } => *multi,
        }
    }

    /// The explicit all-documents flag.
    pub fn all_documents(&self) -> bool {
        match self {
            Self::Insert { .. } => false,
            Self::Update { all_documents, .. } | Self::Delete { all_documents, .. } => {
                *all_documents
            }
        }
    }
}

/// The operation a plan performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    Explore {
        target: ExploreTarget,
    },
    Find {
        filter: Option<FilterExpression>,
        projection: Option<Projection>,
        sort: Vec<SortKey>,
        pagination: Pagination,
    },
    Count {
        filter: Option<FilterExpression>,
    },
    Aggregate {
        stages: Vec<Stage>,
    },
    Mutate {
        mutation: Mutation,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Explore { .. } => "explore",
            Self::Find { .. } => "find",
            Self::Count { .. } => "count",
            Self::Aggregate { .. } => "aggregate",
            Self::Mutate { mutation } => mutation.name(),
        }
    }
}

/// A complete, store-agnostic description of one database operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub database: String,
    /// Target collection; absent only for database and collection listings.
    pub collection: Option<String>,
    pub operation: Operation,
}

impl QueryPlan {
    pub fn new(
        database: impl Into<String>,
        collection: Option<String>,
        operation: Operation,
    ) -> Self {
        Self {
            database: database.into(),
            collection,
            operation,
        }
    }

    /// Returns true if executing the plan cannot change stored data.
    pub fn is_read_only(&self) -> bool {
        !matches!(self.operation, Operation::Mutate { .. })
    }

    /// Short human-readable description for logs.
    pub fn describe(&self) -> String {
        match &self.collection {
            Some(collection) => format!(
                "{} {}.{}",
                self.operation.name(),
                self.database,
                collection
            ),
            None => format!("{} {}", self.operation.name(), self.database),
        }
    }
}
