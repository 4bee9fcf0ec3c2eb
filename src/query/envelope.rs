//! Structured execution results.

use crate::db::Document;
use crate::error::StoreError;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// Overall status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
    Success,
    /// The result was cut at the configured document cap.
    Partial,
    Failure,
}

/// Whether a failed execution may succeed when resubmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Transient,
    Operation,
}

impl FailureKind {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Transient => "TransientExecutionError",
            Self::Operation => "OperationError",
        }
    }
}

/// Why an execution failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvelopeError {
    pub kind: FailureKind,
    pub reason_code: String,
    /// Store-level code such as `DuplicateKey`, when the store reported one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    pub detail: String,
}

/// What a write did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MutationSummary {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inserted_ids: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upserted_id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<u64>,
}

/// Result of executing one validated plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultEnvelope {
    pub status: EnvelopeStatus,
    /// Documents returned, counted, or written, depending on the operation.
    pub count: u64,
    pub documents: Vec<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutation: Option<MutationSummary>,
    pub was_truncated: bool,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EnvelopeError>,
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

impl ResultEnvelope {
    /// Envelope for a read. `capped` marks a result cut at the document cap.
    pub fn documents(documents: Vec<Document>, capped: bool, elapsed: Duration) -> Self {
        Self {
            status: if capped {
                EnvelopeStatus::Partial
            } else {
                EnvelopeStatus::Success
            },
            count: documents.len() as u64,
            documents,
            mutation: None,
            was_truncated: capped,
            execution_time_ms: millis(elapsed),
            error: None,
        }
    }

    /// Envelope for a count.
    pub fn counted(count: u64, elapsed: Duration) -> Self {
        Self {
            count,
            ..Self::documents(Vec::new(), false, elapsed)
        }
    }

    /// Envelope for a write affecting `count` documents.
    pub fn written(count: u64, summary: MutationSummary, elapsed: Duration) -> Self {
        Self {
            count,
            mutation: Some(summary),
            ..Self::documents(Vec::new(), false, elapsed)
        }
    }

    /// Envelope for a failed execution.
    pub fn failure(
        kind: FailureKind,
        cause: Option<&str>,
        detail: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            status: EnvelopeStatus::Failure,
            count: 0,
            documents: Vec::new(),
            mutation: None,
            was_truncated: false,
            execution_time_ms: millis(elapsed),
            error: Some(EnvelopeError {
                kind,
                reason_code: kind.reason_code().to_string(),
                cause: cause.map(str::to_string),
                detail: detail.into(),
            }),
        }
    }

    /// Envelope for a store failure, classified as transient or not.
    pub fn store_failure(error: &StoreError, elapsed: Duration) -> Self {
        let kind = if error.is_transient() {
            FailureKind::Transient
        } else {
            FailureKind::Operation
        };
        Self::failure(kind, Some(error.reason_code()), error.to_string(), elapsed)
    }

    pub fn is_success(&self) -> bool {
        self.status != EnvelopeStatus::Failure
    }
}
