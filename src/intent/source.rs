//! Upstream intent producers.
//!
//! Turning free text into an intent payload is outside the core. An
//! `IntentSource` is whatever does it: a language model client, a rule
//! table, or a script in tests.

use super::parser::parse_intent_response;
use crate::catalog::SchemaSnapshot;
use crate::error::{DocQueryError, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Mutex;

/// Produces an intent payload from free text.
#[async_trait]
pub trait IntentSource: Send + Sync {
    /// Returns the raw JSON payload for `text`, given the current schema.
    async fn produce(&self, text: &str, snapshot: &SchemaSnapshot) -> Result<Value>;
}

/// Coarse request kind recognized by keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    SchemaExploration,
    Insert,
    Update,
    Delete,
    Query,
}

const SCHEMA_KEYWORDS: &[&str] = &[
    "what collections",
    "what tables",
    "show collections",
    "show tables",
    "list collections",
    "what databases",
    "show databases",
    "list databases",
    "what fields",
    "what columns",
    "schema",
    "structure",
    "sample data",
    "example documents",
];

/// Keyword rules for schema-exploration questions.
///
/// Anything that is not a schema question needs a real language model; the
/// source reports it as unrecognized together with the kind of request it
/// looked like.
#[derive(Debug, Clone, Default)]
pub struct KeywordIntentSource;

impl KeywordIntentSource {
    pub fn new() -> Self {
        Self
    }

    /// Classifies text by keywords alone.
    pub fn query_kind(text: &str) -> QueryKind {
        let text = text.to_lowercase();
        if SCHEMA_KEYWORDS.iter().any(|keyword| text.contains(keyword)) {
            return QueryKind::SchemaExploration;
        }
        let mentions = |words: &[&str]| words.iter().any(|word| contains_word(&text, word));
        if mentions(&["add", "insert", "create", "put"]) {
            QueryKind::Insert
        } else if mentions(&["update", "change", "modify", "set"]) {
            QueryKind::Update
        } else if mentions(&["delete", "remove", "drop"]) {
            QueryKind::Delete
        } else {
            QueryKind::Query
        }
    }

    fn explore_payload(text: &str, snapshot: &SchemaSnapshot) -> Value {
        let lowered = text.to_lowercase();
        let collection = snapshot
            .collections
            .keys()
            .find(|name| contains_word(&lowered, &name.to_lowercase()));

        match collection {
            Some(name) => {
                let target = if lowered.contains("sample") || lowered.contains("example") {
                    "samples"
                } else {
                    "fields"
                };
                json!({"category": "explore", "collection": name, "target": target})
            }
            None if lowered.contains("database") => {
                json!({"category": "explore", "target": "databases"})
            }
            None => json!({"category": "explore", "target": "collections"}),
        }
    }
}

#[async_trait]
impl IntentSource for KeywordIntentSource {
    async fn produce(&self, text: &str, snapshot: &SchemaSnapshot) -> Result<Value> {
        match Self::query_kind(text) {
            QueryKind::SchemaExploration => Ok(Self::explore_payload(text, snapshot)),
            kind => Err(DocQueryError::unrecognized(format!(
                "{kind:?} requests need a language model intent source"
            ))),
        }
    }
}

fn contains_word(text: &str, word: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .any(|token| token == word)
}

/// Replays canned model responses for tests and demos.
///
/// Each response is matched by a case-insensitive substring of the request
/// and parsed like real model output.
#[derive(Debug, Default)]
pub struct ScriptedIntentSource {
    responses: Vec<(String, String)>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedIntentSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a response returned when the request contains `pattern`.
    pub fn with_response(mut self, pattern: impl Into<String>, response: impl Into<String>) -> Self {
        self.responses.push((pattern.into(), response.into()));
        self
    }

    /// Adds a payload returned when the request contains `pattern`.
    pub fn with_payload(self, pattern: impl Into<String>, payload: Value) -> Self {
        self.with_response(pattern, format!("```json\n{payload}\n```"))
    }

    /// Prompts seen so far, each holding the schema summary and the request.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl IntentSource for ScriptedIntentSource {
    async fn produce(&self, text: &str, snapshot: &SchemaSnapshot) -> Result<Value> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(format!("{}\nRequest: {}", snapshot.format_for_llm(), text));

        let lowered = text.to_lowercase();
        let response = self
            .responses
            .iter()
            .find(|(pattern, _)| lowered.contains(&pattern.to_lowercase()))
            .map(|(_, response)| response.as_str())
            .ok_or_else(|| DocQueryError::unrecognized(format!("no scripted response for '{text}'")))?;
        parse_intent_response(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CollectionSchema, FieldType};

    fn snapshot() -> SchemaSnapshot {
        SchemaSnapshot::new("shop")
            .with_collection(CollectionSchema::new("orders").with_field("status", FieldType::String))
            .with_collection(CollectionSchema::new("customers").with_field("name", FieldType::String))
    }

    #[test]
    fn test_query_kind() {
        assert_eq!(
            KeywordIntentSource::query_kind("What collections are there?"),
            QueryKind::SchemaExploration
        );
        assert_eq!(
            KeywordIntentSource::query_kind("add a customer named Ada"),
            QueryKind::Insert
        );
        assert_eq!(
            KeywordIntentSource::query_kind("remove cancelled orders"),
            QueryKind::Delete
        );
        assert_eq!(
            KeywordIntentSource::query_kind("orders shipped last week"),
            QueryKind::Query
        );
        // "address" must not count as "add"
        assert_eq!(
            KeywordIntentSource::query_kind("customers by address"),
            QueryKind::Query
        );
    }

    #[tokio::test]
    async fn test_keyword_source_explore_payloads() {
        let source = KeywordIntentSource::new();
        let snapshot = snapshot();

        let payload = source
            .produce("show me the schema of orders", &snapshot)
            .await
            .unwrap();
        assert_eq!(
            payload,
            json!({"category": "explore", "collection": "orders", "target": "fields"})
        );

        let payload = source
            .produce("sample data from customers", &snapshot)
            .await
            .unwrap();
        assert_eq!(payload["target"], "samples");

        let payload = source.produce("what databases exist", &snapshot).await.unwrap();
        assert_eq!(payload["target"], "databases");

        let payload = source.produce("show collections", &snapshot).await.unwrap();
        assert_eq!(payload["target"], "collections");
    }

    #[tokio::test]
    async fn test_keyword_source_rejects_queries() {
        let source = KeywordIntentSource::new();
        let err = source
            .produce("orders over 100 dollars", &snapshot())
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), "UnrecognizedIntent");
    }

    #[tokio::test]
    async fn test_scripted_source() {
        let source = ScriptedIntentSource::new()
            .with_payload("shipped", json!({"category": "find", "collection": "orders"}))
            .with_response("gibberish", "I cannot help with that");

        let payload = source.produce("All SHIPPED orders", &snapshot()).await.unwrap();
        assert_eq!(payload["collection"], "orders");

        let err = source.produce("gibberish", &snapshot()).await.unwrap_err();
        assert_eq!(err.reason_code(), "UnrecognizedIntent");

        let err = source.produce("unscripted", &snapshot()).await.unwrap_err();
        assert!(err.to_string().contains("no scripted response"));

        let prompts = source.prompts();
        assert_eq!(prompts.len(), 3);
        assert!(prompts[0].contains("Collection: orders"));
        assert!(prompts[0].ends_with("Request: All SHIPPED orders"));
    }
}
