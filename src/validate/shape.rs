//! Document shape tracking through a pipeline.

use crate::catalog::{CollectionSchema, FieldType};
use crate::plan::Projection;
use std::collections::BTreeMap;

/// Field paths known at one point of a pipeline.
///
/// Paths read from the catalog carry their inferred type. Paths defined by
/// the pipeline itself carry none, and any sub-path below them is accepted.
#[derive(Debug, Clone, Default)]
pub struct Shape {
    fields: BTreeMap<String, Option<FieldType>>,
}

impl Shape {
    /// Shape of the documents stored in a collection.
    pub fn of_collection(schema: &CollectionSchema) -> Self {
        let mut fields: BTreeMap<String, Option<FieldType>> = schema
            .fields
            .iter()
            .map(|(path, info)| (path.clone(), Some(info.field_type)))
            .collect();
        fields.entry("_id".to_string()).or_insert(None);
        Self { fields }
    }

    /// Returns true if documents at this point can hold `path`.
    pub fn knows(&self, path: &str) -> bool {
        if self.fields.contains_key(path) {
            return true;
        }
        self.fields.iter().any(|(known, field_type)| {
            field_type.is_none()
                && path.len() > known.len()
                && path.starts_with(known.as_str())
                && path.as_bytes()[known.len()] == b'.'
        })
    }

    /// Inferred type of `path`, when it came from the catalog.
    pub fn field_type(&self, path: &str) -> Option<FieldType> {
        self.fields.get(path).copied().flatten()
    }

    /// Adds a field computed by the pipeline, replacing anything below it.
    pub fn define(&mut self, path: &str) {
        self.remove(path);
        self.fields.insert(path.to_string(), None);
    }

    /// Replaces the shape with the output of a GROUP stage.
    pub fn regroup<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        self.fields.clear();
        self.fields.insert("_id".to_string(), None);
        for name in names {
            self.fields.insert(name.to_string(), None);
        }
    }

    /// Applies a projection.
    pub fn project(&mut self, projection: &Projection) {
        match projection {
            Projection::Include { fields, with_id } => {
                self.fields.retain(|path, _| {
                    (path == "_id" && *with_id)
                        || fields.iter().any(|kept| covers(kept, path))
                });
            }
            Projection::Exclude { fields } => {
                for field in fields {
                    self.remove(field);
                }
            }
        }
    }

    fn remove(&mut self, path: &str) {
        self.fields.retain(|known, _| !covers(path, known));
    }
}

/// Returns true if `path` equals `parent` or lies below it.
fn covers(parent: &str, path: &str) -> bool {
    path == parent
        || (path.len() > parent.len()
            && path.starts_with(parent)
            && path.as_bytes()[parent.len()] == b'.')
}
