//! Configuration management for docquery.
//!
//! Handles loading configuration from TOML files and environment variables.
//! Every field has a default, so an absent or partial file is valid.

use crate::error::{DocQueryError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for docquery.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Schema discovery settings.
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Query execution limits.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Mutation policy.
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Defaults for exploration intents.
    #[serde(default)]
    pub explore: ExploreConfig,

    /// Which store and database to talk to.
    #[serde(default)]
    pub store: StoreConfig,
}

/// Schema discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogConfig {
    /// Documents sampled per collection for type inference.
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    /// Upper bound on a single refresh, in seconds.
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,
}

fn default_sample_size() -> usize {
    50
}

fn default_refresh_timeout() -> u64 {
    30
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            sample_size: default_sample_size(),
            refresh_timeout_secs: default_refresh_timeout(),
        }
    }
}

impl CatalogConfig {
    /// Refresh timeout as a duration.
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }
}

/// Query execution limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionConfig {
    /// Upper bound on a single store call, in seconds.
    #[serde(default = "default_execution_timeout")]
    pub timeout_secs: u64,

    /// Cap on documents returned by an unbounded plan.
    #[serde(default = "default_max_documents")]
    pub max_documents: usize,
}

fn default_execution_timeout() -> u64 {
    30
}

fn default_max_documents() -> usize {
    1000
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_execution_timeout(),
            max_documents: default_max_documents(),
        }
    }
}

impl ExecutionConfig {
    /// Execution timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Mutation policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyConfig {
    /// Whether an explicitly flagged all-documents update/delete may run.
    #[serde(default = "default_true")]
    pub allow_all_documents_mutation: bool,

    /// Whether mutating plans wait for confirmation before executing.
    #[serde(default = "default_true")]
    pub confirm_mutations: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allow_all_documents_mutation: true,
            confirm_mutations: true,
        }
    }
}

/// Defaults for exploration intents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExploreConfig {
    /// Sample documents returned when the intent does not say how many.
    #[serde(default = "default_sample_documents")]
    pub sample_documents: u64,
}

fn default_sample_documents() -> u64 {
    5
}

impl Default for ExploreConfig {
    fn default() -> Self {
        Self {
            sample_documents: default_sample_documents(),
        }
    }
}

/// Store selection.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StoreConfig {
    /// Active database name.
    pub database: Option<String>,

    /// JSON fixture backing the in-memory store.
    pub fixture: Option<PathBuf>,
}

impl StoreConfig {
    /// Merges another config into this one, with the other taking precedence.
    pub fn merge(&mut self, other: &StoreConfig) {
        if other.database.is_some() {
            self.database = other.database.clone();
        }
        if other.fixture.is_some() {
            self.fixture = other.fixture.clone();
        }
    }

    /// Applies environment variables (DOCQUERY_DATABASE, DOCQUERY_FIXTURE) as defaults.
    pub fn apply_env_defaults(&mut self) {
        if self.database.is_none() {
            self.database = std::env::var("DOCQUERY_DATABASE").ok();
        }
        if self.fixture.is_none() {
            self.fixture = std::env::var("DOCQUERY_FIXTURE").ok().map(PathBuf::from);
        }
    }
}

impl Config {
    /// Returns the default config file path for the current platform.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("docquery")
            .join("config.toml")
    }

    /// Loads configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| DocQueryError::config(format!("Failed to read config file: {e}")))?;

        Self::parse_toml(&content, path)
    }

    /// Parses configuration from a TOML string.
    fn parse_toml(content: &str, path: &Path) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| {
            DocQueryError::config(format!(
                "Configuration error in {}:\n  {}",
                path.display(),
                e
            ))
        })?;
        config.check()?;
        Ok(config)
    }

    /// Rejects settings that would make the pipeline unusable.
    pub fn check(&self) -> Result<()> {
        if self.catalog.sample_size == 0 {
            return Err(DocQueryError::config("catalog.sample_size must be at least 1"));
        }
        if self.catalog.refresh_timeout_secs == 0 || self.execution.timeout_secs == 0 {
            return Err(DocQueryError::config("timeouts must be at least 1 second"));
        }
        if self.execution.max_documents == 0 {
            return Err(DocQueryError::config(
                "execution.max_documents must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_parse_valid_config() {
        let toml = r#"
[catalog]
sample_size = 20
refresh_timeout_secs = 5

[execution]
timeout_secs = 10
max_documents = 250

[policy]
allow_all_documents_mutation = false
confirm_mutations = false

[explore]
sample_documents = 3

[store]
database = "shop"
fixture = "/tmp/shop.json"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.catalog.sample_size, 20);
        assert_eq!(config.catalog.refresh_timeout(), Duration::from_secs(5));
        assert_eq!(config.execution.timeout(), Duration::from_secs(10));
        assert_eq!(config.execution.max_documents, 250);
        assert!(!config.policy.allow_all_documents_mutation);
        assert!(!config.policy.confirm_mutations);
        assert_eq!(config.explore.sample_documents, 3);
        assert_eq!(config.store.database, Some("shop".to_string()));
        assert_eq!(config.store.fixture, Some(PathBuf::from("/tmp/shop.json")));
    }

    #[test]
    fn test_missing_optional_fields() {
        let toml = r#"
[store]
database = "shop"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.catalog, CatalogConfig::default());
        assert_eq!(config.execution.max_documents, 1000);
        assert!(config.policy.allow_all_documents_mutation);
        assert!(config.policy.confirm_mutations);
        assert_eq!(config.explore.sample_documents, 5);
        assert_eq!(config.store.fixture, None);
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.catalog.sample_size, 50);
        assert_eq!(config.execution.timeout_secs, 30);
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[execution]\nmax_documents = 7").unwrap();

        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.execution.max_documents, 7);
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[execution\nmax_documents = 7").unwrap();

        let err = Config::load_from_file(file.path()).unwrap_err();
        assert_eq!(err.category(), "Configuration Error");
        assert!(err.to_string().contains("Configuration error in"));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[catalog]\nsample_size = 0").unwrap();

        let err = Config::load_from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("sample_size"));
    }

    #[test]
    fn test_store_merge() {
        let mut base = StoreConfig {
            database: Some("shop".to_string()),
            fixture: Some(PathBuf::from("a.json")),
        };
        base.merge(&StoreConfig {
            database: None,
            fixture: Some(PathBuf::from("b.json")),
        });

        assert_eq!(base.database, Some("shop".to_string()));
        assert_eq!(base.fixture, Some(PathBuf::from("b.json")));
    }
}
