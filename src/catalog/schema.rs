//! Schema snapshot types.
//!
//! A snapshot is the inferred structure of one database: its collections,
//! the dotted field paths seen in sampled documents and the type each field
//! most often holds.

use crate::error::{DocQueryError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Inferred type tag of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    Array,
    Object,
    Null,
    Mixed,
}

impl FieldType {
    /// Classifies a single JSON value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Boolean,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) if crate::db::as_date(value).is_some() => Self::Date,
            Value::Object(_) => Self::Object,
        }
    }

    /// Returns the tag as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Array => "array",
            Self::Object => "object",
            Self::Null => "null",
            Self::Mixed => "mixed",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the catalog knows about one field path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    /// Majority type across sampled documents.
    pub field_type: FieldType,

    /// Number of sampled documents containing the field.
    pub occurrences: usize,

    /// A few distinct example values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub samples: Vec<Value>,
}

impl FieldInfo {
    /// Creates field info with no samples.
    pub fn new(field_type: FieldType, occurrences: usize) -> Self {
        Self {
            field_type,
            occurrences,
            samples: Vec::new(),
        }
    }
}

/// Inferred structure of a single collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    /// Collection name.
    pub name: String,

    /// Field path to field info, e.g. `address.city`.
    pub fields: BTreeMap<String, FieldInfo>,

    /// Number of documents the inference looked at.
    pub sample_count: usize,
}

impl CollectionSchema {
    /// Creates an empty collection schema.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Adds a field; used by tests and fixtures.
    pub fn with_field(mut self, path: impl Into<String>, field_type: FieldType) -> Self {
        self.fields
            .insert(path.into(), FieldInfo::new(field_type, self.sample_count));
        self
    }

    /// Returns true if the field path was seen.
    pub fn has_field(&self, path: &str) -> bool {
        self.fields.contains_key(path)
    }

    /// Returns the inferred type of a field path.
    pub fn field_type(&self, path: &str) -> Option<FieldType> {
        self.fields.get(path).map(|info| info.field_type)
    }

    /// Iterates over field paths in sorted order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Top-level field paths only.
    pub fn top_level_fields(&self) -> impl Iterator<Item = &str> {
        self.field_names().filter(|name| !name.contains('.'))
    }
}

/// Immutable view of a database's collections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    /// Database this snapshot describes.
    pub database: String,

    /// User databases visible on the server.
    #[serde(default)]
    pub databases: Vec<String>,

    /// Collections by name.
    pub collections: BTreeMap<String, CollectionSchema>,
}

impl SchemaSnapshot {
    /// Creates an empty snapshot for a database.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Self::default()
        }
    }

    /// Adds a collection; used by tests and fixtures.
    pub fn with_collection(mut self, collection: CollectionSchema) -> Self {
        self.collections.insert(collection.name.clone(), collection);
        self
    }

    /// Returns the schema of a collection.
    pub fn lookup(&self, collection: &str) -> Result<&CollectionSchema> {
        self.collections
            .get(collection)
            .ok_or_else(|| DocQueryError::unknown_collection(collection))
    }

    /// Returns the inferred type of a field.
    pub fn field_type(&self, collection: &str, field: &str) -> Result<FieldType> {
        self.lookup(collection)?
            .field_type(field)
            .ok_or_else(|| DocQueryError::unknown_field(collection, field))
    }

    /// Returns true if the collection exists.
    pub fn has_collection(&self, collection: &str) -> bool {
        self.collections.contains_key(collection)
    }

    /// Collection names in sorted order.
    pub fn collection_names(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    /// Collections whose field set contains every given path.
    pub fn collections_with_fields(&self, fields: &[String]) -> Vec<&str> {
        self.collections
            .values()
            .filter(|schema| fields.iter().all(|field| schema.has_field(field)))
            .map(|schema| schema.name.as_str())
            .collect()
    }

    /// Formats the snapshot for inclusion in an upstream model prompt.
    pub fn format_for_llm(&self) -> String {
        let collections = self
            .collections
            .values()
            .map(|schema| {
                let fields = schema
                    .fields
                    .iter()
                    .map(|(path, info)| format!("  - {}: {}\n", path, info.field_type))
                    .collect::<String>();
                format!("Collection: {}\n{}", schema.name, fields)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let others = self
            .databases
            .iter()
            .filter(|name| **name != self.database)
            .cloned()
            .collect::<Vec<_>>();
        let others = if others.is_empty() {
            String::new()
        } else {
            format!("\nOther databases: {}\n", others.join(", "))
        };

        format!("Database: {}\n\n{}{}", self.database, collections, others)
    }

    /// Hash of the structural content, used to detect schema drift.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.database.hash(&mut hasher);
        self.collections.len().hash(&mut hasher);
        for schema in self.collections.values() {
            schema.name.hash(&mut hasher);
            for (path, info) in &schema.fields {
                path.hash(&mut hasher);
                info.field_type.hash(&mut hasher);
            }
        }
        hasher.finish()
    }
}
