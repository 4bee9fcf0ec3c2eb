//! Field type inference over sampled documents.
//!
//! Every field path seen in the sample gets one vote per document for the
//! type it held there. Nulls do not vote unless nothing else was seen. The
//! most common type wins; a tie for first place yields `mixed`.

use super::schema::{CollectionSchema, FieldInfo, FieldType};
use crate::db::Document;
use serde_json::Value;
use std::collections::BTreeMap;

const MAX_SAMPLE_VALUES: usize = 3;

#[derive(Debug, Default)]
struct Tally {
    votes: BTreeMap<FieldType, usize>,
    occurrences: usize,
    samples: Vec<Value>,
}

impl Tally {
    fn record(&mut self, value: &Value) {
        self.occurrences += 1;
        *self.votes.entry(FieldType::of(value)).or_default() += 1;
        let scalar = !matches!(value, Value::Null | Value::Array(_) | Value::Object(_));
        if scalar && self.samples.len() < MAX_SAMPLE_VALUES && !self.samples.contains(value) {
            self.samples.push(value.clone());
        }
    }

    fn winner(&self) -> FieldType {
        let mut ranked: Vec<(FieldType, usize)> = self
            .votes
            .iter()
            .filter(|(field_type, _)| **field_type != FieldType::Null)
            .map(|(field_type, count)| (*field_type, *count))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        match ranked.as_slice() {
            [(_, top), (_, second), ..] if top == second => FieldType::Mixed,
            [(first, _), ..] => *first,
            [] => FieldType::Null,
        }
    }
}

/// Infers the schema of a collection from sampled documents.
pub fn infer_collection(name: &str, documents: &[Document]) -> CollectionSchema {
    let mut tallies: BTreeMap<String, Tally> = BTreeMap::new();
    for doc in documents {
        // A field repeated through an array of objects votes once per document.
        let mut seen: BTreeMap<String, Value> = BTreeMap::new();
        walk(doc, "", &mut seen);
        for (path, value) in seen {
            tallies.entry(path).or_default().record(&value);
        }
    }

    let fields = tallies
        .into_iter()
        .map(|(path, tally)| {
            let info = FieldInfo {
                field_type: tally.winner(),
                occurrences: tally.occurrences,
                samples: tally.samples,
            };
            (path, info)
        })
        .collect();

    CollectionSchema {
        name: name.to_string(),
        fields,
        sample_count: documents.len(),
    }
}

fn walk(doc: &Document, prefix: &str, seen: &mut BTreeMap<String, Value>) {
    for (key, value) in doc {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        seen.entry(path.clone()).or_insert_with(|| value.clone());
        match value {
            Value::Object(nested) if FieldType::of(value) == FieldType::Object => {
                walk(nested, &path, seen);
            }
            Value::Array(items) => {
                for item in items {
                    if let Value::Object(nested) = item {
                        if FieldType::of(item) == FieldType::Object {
                            walk(nested, &path, seen);
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn docs(values: Vec<Value>) -> Vec<Document> {
        values
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn test_majority_vote() {
        let sample = docs(vec![
            json!({"zip": "12345"}),
            json!({"zip": "54321"}),
            json!({"zip": 11111}),
        ]);
        let schema = infer_collection("addresses", &sample);
        assert_eq!(schema.field_type("zip"), Some(FieldType::String));
        assert_eq!(schema.sample_count, 3);
        assert_eq!(schema.fields["zip"].occurrences, 3);
    }

    #[test]
    fn test_tie_is_mixed() {
        let sample = docs(vec![json!({"v": "a"}), json!({"v": 1})]);
        let schema = infer_collection("c", &sample);
        assert_eq!(schema.field_type("v"), Some(FieldType::Mixed));
    }

    #[test]
    fn test_nulls_do_not_vote() {
        let sample = docs(vec![
            json!({"note": null}),
            json!({"note": null}),
            json!({"note": "hi"}),
            json!({"gone": null}),
        ]);
        let schema = infer_collection("c", &sample);
        assert_eq!(schema.field_type("note"), Some(FieldType::String));
        assert_eq!(schema.field_type("gone"), Some(FieldType::Null));
    }

    #[test]
    fn test_nested_and_array_paths() {
        let sample = docs(vec![json!({
            "address": {"city": "Oslo"},
            "items": [{"sku": "a", "qty": 1}, {"sku": "b", "qty": 2}],
            "created": {"$date": "2024-01-01T00:00:00Z"}
        })]);
        let schema = infer_collection("orders", &sample);
        assert_eq!(schema.field_type("address"), Some(FieldType::Object));
        assert_eq!(schema.field_type("address.city"), Some(FieldType::String));
        assert_eq!(schema.field_type("items"), Some(FieldType::Array));
        assert_eq!(schema.field_type("items.sku"), Some(FieldType::String));
        assert_eq!(schema.fields["items.sku"].occurrences, 1);
        assert_eq!(schema.field_type("created"), Some(FieldType::Date));
        assert!(!schema.has_field("created.$date"));
    }

    #[test]
    fn test_samples_are_distinct_and_bounded() {
        let sample = docs(vec![
            json!({"s": "a"}),
            json!({"s": "a"}),
            json!({"s": "b"}),
            json!({"s": "c"}),
            json!({"s": "d"}),
        ]);
        let schema = infer_collection("c", &sample);
        assert_eq!(
            schema.fields["s"].samples,
            vec![json!("a"), json!("b"), json!("c")]
        );
    }

    #[test]
    fn test_empty_sample() {
        let schema = infer_collection("empty", &[]);
        assert!(schema.fields.is_empty());
        assert_eq!(schema.sample_count, 0);
    }
}
