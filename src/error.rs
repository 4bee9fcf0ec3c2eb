//! Error types for docquery.
//!
//! `DocQueryError` covers every failure that aborts a request or a catalog
//! refresh. `StoreError` is what a `DocumentStore` reports; the executor
//! adapter classifies it before anything leaves the core.

use thiserror::Error;

/// Main error type for docquery operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocQueryError {
    /// The payload has no category tag, or the tag is not one we know.
    #[error("Unrecognized intent: {0}")]
    UnrecognizedIntent(String),

    /// A required parameter is missing or has the wrong shape.
    #[error("Malformed parameter '{param}': {detail}")]
    MalformedParameter { param: String, detail: String },

    /// The referenced collection is not in the schema catalog.
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    /// The referenced field is not in the collection's inferred schema.
    #[error("Unknown field '{field}' in collection '{collection}'")]
    UnknownField { collection: String, field: String },

    /// No single target collection could be resolved.
    #[error("Ambiguous target: {0}")]
    AmbiguousTarget(String),

    /// The intent category has no construction rule for the request.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Connection-level failure or timeout; safe to retry.
    #[error("Transient execution error: {0}")]
    TransientExecution(String),

    /// The store rejected the operation; must not be retried.
    #[error("Operation error: {0}")]
    Operation(String),

    /// Schema discovery failed; the previous snapshot remains valid.
    #[error("Exploration error: {0}")]
    Exploration(String),

    /// Configuration errors (invalid config file, bad fixture path, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal application errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DocQueryError {
    /// Creates an unrecognized-intent error with the given message.
    pub fn unrecognized(msg: impl Into<String>) -> Self {
        Self::UnrecognizedIntent(msg.into())
    }

    /// Creates a malformed-parameter error for `param`.
    pub fn malformed(param: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::MalformedParameter {
            param: param.into(),
            detail: detail.into(),
        }
    }

    /// Creates an unknown-collection error.
    pub fn unknown_collection(name: impl Into<String>) -> Self {
        Self::UnknownCollection(name.into())
    }

    /// Creates an unknown-field error.
    pub fn unknown_field(collection: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            collection: collection.into(),
            field: field.into(),
        }
    }

    /// Creates an ambiguous-target error with the given message.
    pub fn ambiguous(msg: impl Into<String>) -> Self {
        Self::AmbiguousTarget(msg.into())
    }

    /// Creates an unsupported-operation error with the given message.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedOperation(msg.into())
    }

    /// Creates a transient execution error with the given message.
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientExecution(msg.into())
    }

    /// Creates an operation error with the given message.
    pub fn operation(msg: impl Into<String>) -> Self {
        Self::Operation(msg.into())
    }

    /// Creates an exploration error with the given message.
    pub fn exploration(msg: impl Into<String>) -> Self {
        Self::Exploration(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::UnrecognizedIntent(_) | Self::MalformedParameter { .. } => "Intent Error",
            Self::UnknownCollection(_)
            | Self::UnknownField { .. }
            | Self::AmbiguousTarget(_)
            | Self::UnsupportedOperation(_) => "Plan Error",
            Self::TransientExecution(_) | Self::Operation(_) => "Execution Error",
            Self::Exploration(_) => "Exploration Error",
            Self::Config(_) => "Configuration Error",
            Self::Internal(_) => "Internal Error",
        }
    }

    /// Stable machine-readable code for the caller.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::UnrecognizedIntent(_) => "UnrecognizedIntent",
            Self::MalformedParameter { .. } => "MalformedParameter",
            Self::UnknownCollection(_) => "UnknownCollection",
            Self::UnknownField { .. } => "UnknownField",
            Self::AmbiguousTarget(_) => "AmbiguousTarget",
            Self::UnsupportedOperation(_) => "UnsupportedOperation",
            Self::TransientExecution(_) => "TransientExecutionError",
            Self::Operation(_) => "OperationError",
            Self::Exploration(_) => "ExplorationError",
            Self::Config(_) => "ConfigError",
            Self::Internal(_) => "InternalError",
        }
    }

    /// Returns true if the caller may resubmit the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientExecution(_) | Self::Exploration(_))
    }

    /// Returns true if the caller should ask the user a clarifying question.
    pub fn needs_clarification(&self) -> bool {
        matches!(
            self,
            Self::UnrecognizedIntent(_)
                | Self::MalformedParameter { .. }
                | Self::UnknownCollection(_)
                | Self::UnknownField { .. }
                | Self::AmbiguousTarget(_)
        )
    }
}

/// Result type alias using DocQueryError.
pub type Result<T> = std::result::Result<T, DocQueryError>;

/// Failure reported by a `DocumentStore` implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The server could not be reached at all.
    #[error("store unreachable: {0}")]
    Unreachable(String),

    /// An established connection dropped mid-operation.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The store gave up waiting on the operation.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// A unique index (including `_id`) rejected a write.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Any other write constraint violation.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// The store could not interpret the request.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl StoreError {
    /// Returns true for connection-level failures that are safe to retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unreachable(_) | Self::ConnectionLost(_) | Self::Timeout(_)
        )
    }

    /// Stable machine-readable code for the failure.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Unreachable(_) => "Unreachable",
            Self::ConnectionLost(_) => "ConnectionLost",
            Self::Timeout(_) => "Timeout",
            Self::DuplicateKey(_) => "DuplicateKey",
            Self::Constraint(_) => "ConstraintViolation",
            Self::InvalidOperation(_) => "InvalidOperation",
        }
    }
}
