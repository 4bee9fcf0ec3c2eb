//! Command-line argument parsing for docquery.

use crate::config::StoreConfig;
use crate::error::{DocQueryError, Result};
use clap::Parser;
use serde_json::Value;
use std::io::Read;
use std::path::PathBuf;

/// Runs document-database intents against a fixture-backed store.
#[derive(Parser, Debug)]
#[command(name = "docquery")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// JSON fixture to load into the in-memory store
    #[arg(short = 'f', long, value_name = "PATH", env = "DOCQUERY_FIXTURE")]
    pub fixture: Option<PathBuf>,

    /// Database to work in
    #[arg(short = 'd', long, value_name = "NAME", env = "DOCQUERY_DATABASE")]
    pub database: Option<String>,

    /// Intent payloads: a JSON object or array of objects (use "-" for stdin)
    #[arg(short = 'i', long, value_name = "PATH")]
    pub intent: Option<String>,

    /// Free-text schema question answered with keyword rules
    #[arg(long, value_name = "TEXT")]
    pub ask: Option<String>,

    /// Execute mutating plans without waiting for confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Write logs to the state directory instead of stderr
    #[arg(long)]
    pub log_file: bool,
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Returns the config file path to use.
    ///
    /// Uses the --config argument if provided, otherwise the default path.
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(crate::config::Config::default_path)
    }

    /// Store settings given on the command line.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            database: self.database.clone(),
            fixture: self.fixture.clone(),
        }
    }

    /// Reads the intent payloads named by --intent.
    pub fn read_intents(&self) -> Result<Vec<Value>> {
        let Some(source) = &self.intent else {
            return Ok(Vec::new());
        };
        let content = if source == "-" {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| DocQueryError::config(format!("Failed to read stdin: {e}")))?;
            buf
        } else {
            std::fs::read_to_string(source).map_err(|e| {
                DocQueryError::config(format!("Failed to read intent file {source}: {e}"))
            })?
        };
        parse_intents(&content)
    }
}

/// Parses a single payload or an array of payloads.
pub fn parse_intents(content: &str) -> Result<Vec<Value>> {
    let value: Value = serde_json::from_str(content)
        .map_err(|e| DocQueryError::config(format!("Intent input is not JSON: {e}")))?;
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(_) => Ok(vec![value]),
        other => Err(DocQueryError::config(format!(
            "Intent input must be an object or an array, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse_args(args: &[&str]) -> Cli {
        Cli::parse_from(args)
    }

    #[test]
    fn test_parse_all_args() {
        let cli = parse_args(&[
            "docquery",
            "--config",
            "/tmp/config.toml",
            "--fixture",
            "shop.json",
            "--database",
            "shop",
            "--intent",
            "-",
            "--yes",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/config.toml")));
        assert_eq!(cli.fixture, Some(PathBuf::from("shop.json")));
        assert_eq!(cli.database, Some("shop".to_string()));
        assert_eq!(cli.intent.as_deref(), Some("-"));
        assert!(cli.yes);
        assert!(!cli.log_file);
    }

    #[test]
    fn test_parse_short_args() {
        let cli = parse_args(&["docquery", "-f", "a.json", "-d", "db", "-i", "q.json", "-y"]);
        assert_eq!(cli.fixture, Some(PathBuf::from("a.json")));
        assert_eq!(cli.database, Some("db".to_string()));
        assert_eq!(cli.intent.as_deref(), Some("q.json"));
        assert!(cli.yes);
    }

    #[test]
    fn test_config_path_default() {
        let cli = parse_args(&["docquery"]);
        assert!(cli.config_path().ends_with("config.toml"));
    }

    #[test]
    fn test_ask() {
        let cli = parse_args(&["docquery", "--ask", "what collections are there"]);
        assert_eq!(cli.ask.as_deref(), Some("what collections are there"));
        assert!(cli.read_intents().unwrap().is_empty());
    }

    #[test]
    fn test_parse_intents() {
        assert_eq!(
            parse_intents(r#"{"category": "find"}"#).unwrap(),
            vec![json!({"category": "find"})]
        );
        assert_eq!(
            parse_intents(r#"[{"category": "find"}, {"category": "explore"}]"#)
                .unwrap()
                .len(),
            2
        );
        assert!(parse_intents("42").is_err());
        assert!(parse_intents("not json").is_err());
    }

    #[test]
    fn test_read_intents_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intents.json");
        std::fs::write(&path, r#"{"category": "explore"}"#).unwrap();
        let cli = parse_args(&["docquery", "--intent", path.to_str().unwrap()]);
        assert_eq!(cli.read_intents().unwrap(), vec![json!({"category": "explore"})]);
    }
}
