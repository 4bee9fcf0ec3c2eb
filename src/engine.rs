//! Request orchestration.
//!
//! Runs one intent payload through classification, plan building,
//! validation, safety grading, and execution.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::catalog::{SchemaCatalog, SchemaSnapshot};
use crate::config::Config;
use crate::db::DocumentStore;
use crate::error::{DocQueryError, Result};
use crate::intent::{classify, IntentSource};
use crate::plan::builder::PlanBuilder;
use crate::plan::QueryPlan;
use crate::query::{ExecutorAdapter, ResultEnvelope};
use crate::safety::{classify_plan, ClassificationResult};
use crate::validate::{PlanValidator, ValidationResult};

/// What happened to a request that got as far as a plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// The plan failed validation and never reached the store.
    Rejected(ValidationResult),
    /// The plan writes data and waits for `Engine::confirm`.
    NeedsConfirmation {
        plan: QueryPlan,
        classification: ClassificationResult,
    },
    /// The plan ran; the envelope says how it went.
    Completed {
        plan: QueryPlan,
        envelope: ResultEnvelope,
    },
}

impl Outcome {
    /// The envelope of a completed request.
    pub fn envelope(&self) -> Option<&ResultEnvelope> {
        match self {
            Self::Completed { envelope, .. } => Some(envelope),
            _ => None,
        }
    }
}

/// Drives requests from payload to result.
pub struct Engine {
    catalog: Arc<SchemaCatalog>,
    builder: PlanBuilder,
    validator: PlanValidator,
    adapter: ExecutorAdapter,
    confirm_mutations: bool,
    default_database: Option<String>,
}

impl Engine {
    /// Creates an engine over `store` with an empty catalog.
    pub fn new(store: Arc<dyn DocumentStore>, config: &Config) -> Self {
        let catalog = Arc::new(SchemaCatalog::new(Arc::clone(&store), &config.catalog));
        Self::with_catalog(catalog, store, config)
    }

    /// Creates an engine sharing an existing catalog.
    pub fn with_catalog(
        catalog: Arc<SchemaCatalog>,
        store: Arc<dyn DocumentStore>,
        config: &Config,
    ) -> Self {
        Self {
            catalog,
            builder: PlanBuilder::new(config.explore.sample_documents),
            validator: PlanValidator::new(&config.policy),
            adapter: ExecutorAdapter::new(store, &config.execution)
                .with_sample_size(config.catalog.sample_size),
            confirm_mutations: config.policy.confirm_mutations,
            default_database: config.store.database.clone(),
        }
    }

    pub fn catalog(&self) -> &Arc<SchemaCatalog> {
        &self.catalog
    }

    /// Handles one intent payload.
    pub async fn handle(&self, payload: &Value) -> Result<Outcome> {
        self.handle_with_cancel(payload, &CancellationToken::new())
            .await
    }

    /// Handles one intent payload, giving up early when `cancel` fires.
    pub async fn handle_with_cancel(
        &self,
        payload: &Value,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let intent = classify(payload)?;
        let database = self.database_for(intent.database.as_deref())?;
        let snapshot = self.snapshot_for(&database, cancel).await?;
        let plan = self.builder.build(&intent, &snapshot)?;
        debug!(plan = %plan.describe(), "Handling plan");
        Ok(self.run(plan, &snapshot, false, cancel).await)
    }

    /// Turns free text into a payload with `source`, then handles it.
    pub async fn ask(&self, text: &str, source: &dyn IntentSource) -> Result<Outcome> {
        let database = self.database_for(None)?;
        let snapshot = self
            .snapshot_for(&database, &CancellationToken::new())
            .await?;
        let payload = source.produce(text, &snapshot).await?;
        self.handle(&payload).await
    }

    /// Executes a plan the caller confirmed.
    ///
    /// The plan is validated again against the current snapshot, since the
    /// schema may have changed while it waited.
    pub async fn confirm(&self, plan: QueryPlan) -> Result<Outcome> {
        let cancel = CancellationToken::new();
        let snapshot = self.snapshot_for(&plan.database, &cancel).await?;
        info!(plan = %plan.describe(), "Executing confirmed plan");
        Ok(self.run(plan, &snapshot, true, &cancel).await)
    }

    async fn run(
        &self,
        plan: QueryPlan,
        snapshot: &SchemaSnapshot,
        confirmed: bool,
        cancel: &CancellationToken,
    ) -> Outcome {
        let validated = match self.validator.check(plan, snapshot) {
            Ok(validated) => validated,
            Err(result) => {
                info!(failures = %result, "Plan rejected");
                return Outcome::Rejected(result);
            }
        };

        let classification = classify_plan(validated.plan());
        if self.confirm_mutations && !confirmed && classification.requires_confirmation() {
            return Outcome::NeedsConfirmation {
                plan: validated.into_plan(),
                classification,
            };
        }

        let envelope = self.adapter.execute_with_cancel(&validated, cancel).await;
        Outcome::Completed {
            plan: validated.into_plan(),
            envelope,
        }
    }

    fn database_for(&self, requested: Option<&str>) -> Result<String> {
        if let Some(database) = requested.or(self.default_database.as_deref()) {
            return Ok(database.to_string());
        }
        self.catalog
            .snapshot()
            .map(|snapshot| snapshot.database.clone())
            .map_err(|_| DocQueryError::config("No database selected; set [store] database or DOCQUERY_DATABASE"))
    }

    async fn snapshot_for(
        &self,
        database: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<SchemaSnapshot>> {
        match self.catalog.snapshot() {
            Ok(snapshot) if snapshot.database == database => Ok(snapshot),
            _ => self.catalog.refresh_with_cancel(database, cancel).await,
        }
    }
}
