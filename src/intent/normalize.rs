//! Value coercion for loosely typed payloads.

use crate::db::{as_date, date_to_plain_string, date_value, parse_date_text};
use crate::error::{DocQueryError, Result};
use crate::plan::Comparator;
use serde_json::{Number, Value};

/// Parses a numeric string into a JSON number.
///
/// Integers stay integers; non-finite floats are not numbers.
pub fn numeric_value(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return Some(Value::from(n));
    }
    trimmed
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

/// Coerces a pagination or size parameter to an integer.
///
/// Negative values pass through so validation can report them.
pub fn coerce_integer(param: &str, value: &Value) -> Result<i64> {
    let number = match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|x| x.fract() == 0.0 && x.abs() < i64::MAX as f64)
                .map(|x| x as i64)
        }),
        Value::String(text) => match numeric_value(text) {
            Some(Value::Number(n)) => n.as_i64(),
            _ => None,
        },
        _ => None,
    };
    number.ok_or_else(|| {
        DocQueryError::malformed(param, format!("expected an integer, got {value}"))
    })
}

/// Coerces a flag parameter to a boolean.
pub fn coerce_bool(param: &str, value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) if n.as_i64() == Some(0) => Ok(false),
        Value::Number(n) if n.as_i64() == Some(1) => Ok(true),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            _ => Err(DocQueryError::malformed(
                param,
                format!("expected a boolean, got {value}"),
            )),
        },
        _ => Err(DocQueryError::malformed(
            param,
            format!("expected a boolean, got {value}"),
        )),
    }
}

/// Canonicalizes the operand of a filter condition.
///
/// ISO-8601 date strings become `{"$date": ...}` for every comparator.
/// Numeric strings become numbers for range comparators only. List
/// comparators apply the rules to each element.
pub fn normalize_condition_value(comparator: Comparator, value: Value) -> Value {
    match (comparator, value) {
        (Comparator::In | Comparator::Nin, Value::Array(items)) => Value::Array(
            items
                .into_iter()
                .map(|item| normalize_scalar(Comparator::Eq, item))
                .collect(),
        ),
        (Comparator::Exists, Value::String(text)) => {
            match text.trim().to_ascii_lowercase().as_str() {
                "false" | "no" | "0" => Value::Bool(false),
                _ => Value::Bool(true),
            }
        }
        (Comparator::Regex, value) => value,
        (comparator, value) => normalize_scalar(comparator, value),
    }
}

fn normalize_scalar(comparator: Comparator, value: Value) -> Value {
    let Value::String(text) = value else {
        return value;
    };
    if let Some(date) = parse_date_text(&text) {
        return date_value(date);
    }
    if comparator.is_range() {
        if let Some(number) = numeric_value(&text) {
            return number;
        }
    }
    Value::String(text)
}

/// Renders a number or date operand as the string a string-typed field
/// holds, for operands that were never written as text.
pub fn restore_string(value: Value) -> Value {
    if let Some(date) = as_date(&value) {
        return Value::String(date_to_plain_string(date));
    }
    match value {
        Value::Number(n) => Value::String(n.to_string()),
        Value::Array(items) => Value::Array(items.into_iter().map(restore_string).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_numeric_value() {
        assert_eq!(numeric_value("42"), Some(json!(42)));
        assert_eq!(numeric_value(" 2.5 "), Some(json!(2.5)));
        assert_eq!(numeric_value("inf"), None);
        assert_eq!(numeric_value("abc"), None);
        assert_eq!(numeric_value(""), None);
    }

    #[test]
    fn test_coerce_integer() {
        assert_eq!(coerce_integer("limit", &json!(10)).unwrap(), 10);
        assert_eq!(coerce_integer("limit", &json!("10")).unwrap(), 10);
        assert_eq!(coerce_integer("limit", &json!(3.0)).unwrap(), 3);
        assert_eq!(coerce_integer("skip", &json!(-2)).unwrap(), -2);
        let err = coerce_integer("limit", &json!("ten")).unwrap_err();
        assert_eq!(err.reason_code(), "MalformedParameter");
        assert!(coerce_integer("limit", &json!(2.5)).is_err());
    }

    #[test]
    fn test_coerce_bool() {
        assert!(coerce_bool("upsert", &json!(true)).unwrap());
        assert!(coerce_bool("upsert", &json!("yes")).unwrap());
        assert!(!coerce_bool("upsert", &json!(0)).unwrap());
        assert!(coerce_bool("upsert", &json!("maybe")).is_err());
    }

    #[test]
    fn test_dates_become_canonical() {
        assert_eq!(
            normalize_condition_value(Comparator::Gte, json!("2024-03-01")),
            json!({"$date": "2024-03-01T00:00:00Z"})
        );
        assert_eq!(
            normalize_condition_value(Comparator::Eq, json!("2024-03-01T10:30:00+02:00")),
            json!({"$date": "2024-03-01T08:30:00Z"})
        );
    }

    #[test]
    fn test_numeric_strings_only_for_ranges() {
        assert_eq!(normalize_condition_value(Comparator::Gt, json!("100")), json!(100));
        assert_eq!(normalize_condition_value(Comparator::Eq, json!("100")), json!("100"));
        assert_eq!(
            normalize_condition_value(Comparator::In, json!(["a", "2024-01-01"])),
            json!(["a", {"$date": "2024-01-01T00:00:00Z"}])
        );
    }

    #[test]
    fn test_regex_left_alone() {
        assert_eq!(
            normalize_condition_value(Comparator::Regex, json!("2024-01-01")),
            json!("2024-01-01")
        );
    }

    #[test]
    fn test_restore_string() {
        assert_eq!(
            restore_string(json!({"$date": "2024-03-01T00:00:00Z"})),
            json!("2024-03-01")
        );
        assert_eq!(
            restore_string(json!({"$date": "2024-03-01T08:30:00Z"})),
            json!("2024-03-01T08:30:00Z")
        );
        assert_eq!(restore_string(json!(100)), json!("100"));
        assert_eq!(restore_string(json!("x")), json!("x"));
    }
}
