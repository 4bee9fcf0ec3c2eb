//! Document and request types exchanged with a `DocumentStore`.
//!
//! Documents are JSON objects in MongoDB extended-JSON form. Dates travel as
//! `{"$date": "<RFC3339>"}` so they survive serialization and can still be
//! told apart from plain strings.

use chrono::{DateTime, NaiveDate, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single stored document.
pub type Document = Map<String, Value>;

/// Arguments of a `find` call, already rendered into the store dialect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindRequest {
    /// Filter document; empty matches everything.
    pub filter: Document,

    /// Projection document, if any.
    pub projection: Option<Document>,

    /// Sort document in key order (`{"field": 1 | -1}`).
    pub sort: Document,

    /// Documents to skip before returning results.
    pub skip: u64,

    /// Maximum number of documents; 0 means no limit.
    pub limit: u64,
}

/// Arguments of an `update` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest {
    /// Filter selecting the documents to update.
    pub filter: Document,

    /// Update operators (`$set`, `$unset`, `$inc`).
    pub update: Document,

    /// Update every match instead of only the first.
    pub multi: bool,

    /// Insert a new document when nothing matches.
    pub upsert: bool,
}

/// Counts reported by an `update` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upserted_id: Option<Value>,
}

/// Wraps a timestamp in the canonical extended-JSON date form.
pub fn date_value(at: DateTime<Utc>) -> Value {
    let mut map = Map::new();
    map.insert(
        "$date".to_string(),
        Value::String(at.to_rfc3339_opts(SecondsFormat::Secs, true)),
    );
    Value::Object(map)
}

/// Reads a canonical date value back into a timestamp.
pub fn as_date(value: &Value) -> Option<DateTime<Utc>> {
    let Value::Object(map) = value else {
        return None;
    };
    if map.len() != 1 {
        return None;
    }
    match map.get("$date")? {
        Value::String(text) => parse_date_text(text),
        Value::Number(millis) => DateTime::from_timestamp_millis(millis.as_i64()?),
        _ => None,
    }
}

/// Parses an ISO-8601 date or datetime string.
///
/// Accepts RFC3339 timestamps, `YYYY-MM-DDTHH:MM:SS` without offset (read as
/// UTC) and bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_date_text(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    None
}

/// Renders a date the way a string-typed field would most likely store it.
pub fn date_to_plain_string(at: DateTime<Utc>) -> String {
    if at.num_seconds_from_midnight() == 0 && at.nanosecond() == 0 {
        at.format("%Y-%m-%d").to_string()
    } else {
        at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}
