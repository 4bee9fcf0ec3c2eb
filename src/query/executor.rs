//! Plan execution against a document store.
//!
//! Renders validated plans into the store dialect, enforces the execution
//! timeout and document cap, and wraps every outcome in a `ResultEnvelope`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::envelope::{FailureKind, MutationSummary, ResultEnvelope};
use crate::catalog::infer_collection;
use crate::config::ExecutionConfig;
use crate::db::{Document, DocumentStore, StoreResult, UpdateRequest, SYSTEM_DATABASES};
use crate::error::StoreError;
use crate::plan::render::{self, filter_document, find_request, update_document};
use crate::plan::{ExploreTarget, Mutation, Operation, QueryPlan, Stage};
use crate::validate::ValidatedPlan;

/// Documents sampled when an EXPLORE plan asks for a field inventory.
const FIELD_SAMPLE_SIZE: usize = 50;

/// What a successful store call produced, before it becomes an envelope.
enum Output {
    Documents { documents: Vec<Document>, limit: usize },
    Counted(u64),
    Written { count: u64, summary: MutationSummary },
}

/// Executes validated plans.
pub struct ExecutorAdapter {
    store: Arc<dyn DocumentStore>,
    timeout: Duration,
    max_documents: usize,
    sample_size: usize,
}

impl ExecutorAdapter {
    /// Creates an adapter with the configured timeout and document cap.
    pub fn new(store: Arc<dyn DocumentStore>, config: &ExecutionConfig) -> Self {
        Self {
            store,
            timeout: config.timeout(),
            max_documents: config.max_documents,
            sample_size: FIELD_SAMPLE_SIZE,
        }
    }

    /// Sets how many documents a field inventory samples.
    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    /// Overrides the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Executes a plan. Never fails: errors come back inside the envelope.
    pub async fn execute(&self, plan: &ValidatedPlan) -> ResultEnvelope {
        self.execute_with_cancel(plan, &CancellationToken::new())
            .await
    }

    /// Executes a plan, giving up early when `cancel` fires.
    pub async fn execute_with_cancel(
        &self,
        plan: &ValidatedPlan,
        cancel: &CancellationToken,
    ) -> ResultEnvelope {
        let plan = plan.plan();
        let start = Instant::now();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = tokio::time::timeout(self.timeout, self.run(plan)) => Some(result),
        };

        let envelope = match outcome {
            None => ResultEnvelope::failure(
                FailureKind::Transient,
                Some("Cancelled"),
                "execution was cancelled",
                start.elapsed(),
            ),
            Some(Err(_)) => ResultEnvelope::failure(
                FailureKind::Transient,
                Some("Timeout"),
                format!("execution timed out after {}s", self.timeout.as_secs_f64()),
                start.elapsed(),
            ),
            Some(Ok(Err(error))) => ResultEnvelope::store_failure(&error, start.elapsed()),
            Some(Ok(Ok(output))) => self.finish(plan, output, start.elapsed()),
        };

        match &envelope.error {
            Some(error) => warn!(
                plan = %plan.describe(),
                reason = %error.reason_code,
                detail = %error.detail,
                "Plan execution failed"
            ),
            None => info!(
                plan = %plan.describe(),
                status = ?envelope.status,
                count = envelope.count,
                elapsed_ms = envelope.execution_time_ms,
                "Executed plan"
            ),
        }
        envelope
    }

    fn finish(&self, plan: &QueryPlan, output: Output, elapsed: Duration) -> ResultEnvelope {
        match output {
            Output::Documents {
                mut documents,
                limit,
            } => {
                if limit > 0 && documents.len() > limit {
                    warn!(
                        plan = %plan.describe(),
                        received = documents.len(),
                        limit,
                        "Store returned more documents than requested"
                    );
                    documents.truncate(limit);
                }
                let capped = documents.len() > self.max_documents;
                if capped {
                    warn!(
                        plan = %plan.describe(),
                        cap = self.max_documents,
                        "Result truncated at document cap"
                    );
                    documents.truncate(self.max_documents);
                }
                ResultEnvelope::documents(documents, capped, elapsed)
            }
            Output::Counted(count) => ResultEnvelope::counted(count, elapsed),
            Output::Written { count, summary } => ResultEnvelope::written(count, summary, elapsed),
        }
    }

    async fn run(&self, plan: &QueryPlan) -> StoreResult<Output> {
        let db = plan.database.as_str();
        match &plan.operation {
            Operation::Explore { target } => self.explore(plan, target).await,
            Operation::Find {
                filter,
                projection,
                sort,
                pagination,
            } => {
                let mut request = find_request(filter.as_ref(), projection.as_ref(), sort, *pagination);
                let limit = request.limit as usize;
                if request.limit == 0 {
                    // One past the cap is enough to tell that the cap was hit.
                    request.limit = self.max_documents as u64 + 1;
                }
                let documents = self.store.find(db, target(plan)?, &request).await?;
                Ok(Output::Documents { documents, limit })
            }
            Operation::Count { filter } => {
                let count = self
                    .store
                    .count(db, target(plan)?, &filter_document(filter.as_ref()))
                    .await?;
                Ok(Output::Counted(count))
            }
            Operation::Aggregate { stages } => {
                let documents = self
                    .store
                    .aggregate(db, target(plan)?, &render::pipeline(stages))
                    .await?;
                Ok(Output::Documents {
                    documents,
                    limit: pipeline_limit(stages),
                })
            }
            Operation::Mutate { mutation } => self.mutate(plan, mutation).await,
        }
    }

    async fn explore(&self, plan: &QueryPlan, target_kind: &ExploreTarget) -> StoreResult<Output> {
        let db = plan.database.as_str();
        let documents = match target_kind {
            ExploreTarget::Databases => self
                .store
                .list_databases()
                .await?
                .into_iter()
                .filter(|name| !SYSTEM_DATABASES.contains(&name.as_str()))
                .map(|name| named(&name))
                .collect(),
            ExploreTarget::Collections => {
                let mut names = self.store.list_collections(db).await?;
                names.sort();
                names.iter().map(|name| named(name)).collect()
            }
            ExploreTarget::Fields => {
                let collection = target(plan)?;
                let samples = self
                    .store
                    .sample_documents(db, collection, self.sample_size)
                    .await?;
                let schema = infer_collection(collection, &samples);
                schema
                    .fields
                    .iter()
                    .map(|(path, info)| {
                        object(json!({
                            "field": path,
                            "type": info.field_type,
                            "occurrences": info.occurrences,
                            "samples": info.samples,
                        }))
                    })
                    .collect()
            }
            ExploreTarget::Samples { count } => {
                let count = usize::try_from(*count).unwrap_or(0);
                let documents = self
                    .store
                    .sample_documents(db, target(plan)?, count)
                    .await?;
                return Ok(Output::Documents {
                    documents,
                    limit: count,
                });
            }
        };
        Ok(Output::Documents {
            documents,
            limit: 0,
        })
    }

    async fn mutate(&self, plan: &QueryPlan, mutation: &Mutation) -> StoreResult<Output> {
        let db = plan.database.as_str();
        let collection = target(plan)?;
        match mutation {
            Mutation::Insert { documents } => {
                let ids = self.store.insert(db, collection, documents).await?;
                Ok(Output::Written {
                    count: ids.len() as u64,
                    summary: MutationSummary {
                        inserted_ids: ids,
                        ..MutationSummary::default()
                    },
                })
            }
            Mutation::Update {
                filter,
                patch,
                multi,
                upsert,
                ..
            } => {
                let request = UpdateRequest {
                    filter: filter_document(filter.as_ref()),
                    update: update_document(patch),
                    multi: *multi || filter.is_none(),
                    upsert: *upsert,
                };
                let outcome = self.store.update(db, collection, &request).await?;
                Ok(Output::Written {
                    count: outcome.modified,
                    summary: MutationSummary {
                        matched: Some(outcome.matched),
                        modified: Some(outcome.modified),
                        upserted_id: outcome.upserted_id,
                        ..MutationSummary::default()
                    },
                })
            }
            Mutation::Delete { filter, multi, .. } => {
                let deleted = self
                    .store
                    .delete(
                        db,
                        collection,
                        &filter_document(filter.as_ref()),
                        *multi || filter.is_none(),
                    )
                    .await?;
                Ok(Output::Written {
                    count: deleted,
                    summary: MutationSummary {
                        deleted: Some(deleted),
                        ..MutationSummary::default()
                    },
                })
            }
        }
    }
}

fn target(plan: &QueryPlan) -> StoreResult<&str> {
    plan.collection
        .as_deref()
        .ok_or_else(|| StoreError::InvalidOperation("plan has no target collection".to_string()))
}

fn object(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

fn named(name: &str) -> Document {
    object(json!({ "name": name }))
}

/// Largest number of documents a pipeline can produce, or 0 if unbounded.
///
/// Only LIMIT stages after the last GROUP count; no other stage can grow the
/// number of documents.
fn pipeline_limit(stages: &[Stage]) -> usize {
    let after_group = stages
        .iter()
        .rposition(|stage| matches!(stage, Stage::Group { .. }))
        .map_or(0, |index| index + 1);
    stages[after_group..]
        .iter()
        .filter_map(|stage| match stage {
            Stage::Limit { count } if *count > 0 => usize::try_from(*count).ok(),
            _ => None,
        })
        .min()
        .unwrap_or(0)
}
