//! Plan safety classification.
//!
//! Grades query plans as safe, mutating, or destructive to determine
//! whether user confirmation is required before execution.

use crate::plan::{Mutation, Operation, QueryPlan};
use serde::Serialize;
use std::fmt;

/// Safety level classification for query plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SafetyLevel {
    /// Read-only plans that can be auto-executed (explore, find, count, aggregate).
    Safe,
    /// Plans that write data and require confirmation (insert, update).
    Mutating,
    /// Plans that remove or rewrite data wholesale, requiring confirmation
    /// with a warning (delete, all-documents update).
    Destructive,
}

impl SafetyLevel {
    /// Returns true if this safety level requires user confirmation.
    pub fn requires_confirmation(&self) -> bool {
        matches!(self, Self::Mutating | Self::Destructive)
    }

    /// Returns true if this safety level should show a warning.
    pub fn requires_warning(&self) -> bool {
        matches!(self, Self::Destructive)
    }
}

impl fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Safe => write!(f, "Safe"),
            Self::Mutating => write!(f, "Mutating"),
            Self::Destructive => write!(f, "Destructive"),
        }
    }
}

/// Result of classifying a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationResult {
    /// The determined safety level.
    pub level: SafetyLevel,
    /// Operation name, e.g. `find` or `delete`.
    pub operation: String,
    /// Optional warning message for the user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl ClassificationResult {
    /// Creates a new classification result.
    pub fn new(level: SafetyLevel, operation: impl Into<String>) -> Self {
        Self {
            level,
            operation: operation.into(),
            warning: None,
        }
    }

    /// Creates a classification result with a warning message.
    pub fn with_warning(
        level: SafetyLevel,
        operation: impl Into<String>,
        warning: impl Into<String>,
    ) -> Self {
        Self {
            level,
            operation: operation.into(),
            warning: Some(warning.into()),
        }
    }

    /// Returns true if user confirmation is required.
    pub fn requires_confirmation(&self) -> bool {
        self.level.requires_confirmation()
    }

    /// Returns true if a warning should be displayed.
    pub fn requires_warning(&self) -> bool {
        self.level.requires_warning()
    }
}

/// Classifies a plan by what executing it can do to stored data.
pub fn classify_plan(plan: &QueryPlan) -> ClassificationResult {
    let Operation::Mutate { mutation } = &plan.operation else {
        return ClassificationResult::new(SafetyLevel::Safe, plan.operation.name());
    };
    let target = plan.collection.as_deref().unwrap_or("?");

    match mutation {
        Mutation::Insert { .. } => ClassificationResult::new(SafetyLevel::Mutating, "insert"),
        Mutation::Update { filter: None, .. } => ClassificationResult::with_warning(
            SafetyLevel::Destructive,
            "update",
            format!("This will update every document in '{target}'"),
        ),
        Mutation::Update { .. } => ClassificationResult::new(SafetyLevel::Mutating, "update"),
        Mutation::Delete { filter: None, .. } => ClassificationResult::with_warning(
            SafetyLevel::Destructive,
            "delete",
            format!("This will delete every document in '{target}'"),
        ),
        Mutation::Delete { multi, .. } => ClassificationResult::with_warning(
            SafetyLevel::Destructive,
            "delete",
            if *multi {
                format!("This will delete all matching documents in '{target}'")
            } else {
                format!("This will delete one document in '{target}'")
            },
        ),
    }
}
