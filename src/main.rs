//! docquery - validated document-database queries from structured intents.

use docquery::cli::Cli;
use docquery::config::Config;
use docquery::db::{self, DocumentStore, SYSTEM_DATABASES};
use docquery::engine::Engine;
use docquery::error::{DocQueryError, Result};
use docquery::intent::KeywordIntentSource;
use docquery::logging;
use serde_json::{json, Value};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse_args();

    if cli.log_file {
        logging::init_file_logging();
    } else {
        logging::init_stderr_logging();
    }

    if let Err(e) = run(cli).await {
        error!("{}: {}", e.category(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let mut config = Config::load_from_file(&config_path)?;

    // CLI arguments win over the file, the environment fills the gaps.
    config.store.merge(&cli.store_config());
    config.store.apply_env_defaults();
    if cli.yes {
        config.policy.confirm_mutations = false;
    }

    let store = db::open(&config.store)?;
    let database = match config.store.database.clone() {
        Some(database) => database,
        None => only_database(store.as_ref()).await?,
    };
    config.store.database = Some(database.clone());

    let engine = Engine::new(store, &config);
    let snapshot = engine.catalog().refresh(&database).await?;

    let mut outputs = Vec::new();
    for payload in cli.read_intents()? {
        outputs.push(render(engine.handle(&payload).await));
    }
    if let Some(text) = &cli.ask {
        outputs.push(render(engine.ask(text, &KeywordIntentSource::new()).await));
    }

    let output = if cli.intent.is_none() && cli.ask.is_none() {
        serde_json::to_value(snapshot.as_ref())
    } else {
        Ok(Value::Array(outputs))
    }
    .map_err(|e| DocQueryError::internal(format!("Failed to serialize output: {e}")))?;

    let text = serde_json::to_string_pretty(&output)
        .map_err(|e| DocQueryError::internal(format!("Failed to serialize output: {e}")))?;
    println!("{text}");
    Ok(())
}

/// Picks the database when the store holds exactly one user database.
async fn only_database(store: &dyn DocumentStore) -> Result<String> {
    let databases: Vec<String> = store
        .list_databases()
        .await
        .map_err(|e| DocQueryError::exploration(e.to_string()))?
        .into_iter()
        .filter(|name| !SYSTEM_DATABASES.contains(&name.as_str()))
        .collect();
    match databases.as_slice() {
        [only] => Ok(only.clone()),
        [] => Err(DocQueryError::config("The fixture contains no databases")),
        many => Err(DocQueryError::config(format!(
            "Several databases available ({}); pick one with --database",
            many.join(", ")
        ))),
    }
}

fn render<T: serde::Serialize>(result: Result<T>) -> Value {
    match result {
        Ok(outcome) => serde_json::to_value(outcome).unwrap_or_else(|e| {
            json!({"outcome": "error", "reason_code": "InternalError", "detail": e.to_string()})
        }),
        Err(e) => json!({
            "outcome": "error",
            "category": e.category(),
            "reason_code": e.reason_code(),
            "retryable": e.is_retryable(),
            "needs_clarification": e.needs_clarification(),
            "detail": e.to_string(),
        }),
    }
}
