//! Evaluation of the MongoDB query dialect over in-memory documents.
//!
//! Covers the subset the plan renderer emits: filter operators, update
//! operators, aggregation expressions and the pipeline stages `$match`,
//! `$sort`, `$skip`, `$limit`, `$project`, `$addFields`/`$set`, `$group`
//! and `$lookup`.

use std::cmp::Ordering;
use std::collections::HashMap;

use regex::RegexBuilder;
use serde_json::{Map, Number, Value};

use super::types::{as_date, Document};
use crate::error::StoreError;

type EvalResult<T> = std::result::Result<T, StoreError>;

fn invalid(msg: impl Into<String>) -> StoreError {
    StoreError::InvalidOperation(msg.into())
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Collects every value reachable at a dotted path.
///
/// Arrays met on the way are traversed element-wise, so `items.sku` yields
/// the `sku` of each object in `items`.
pub fn resolve<'a>(doc: &'a Document, path: &str) -> Vec<&'a Value> {
    let mut segments = path.split('.');
    let Some(first) = segments.next() else {
        return Vec::new();
    };
    let mut current: Vec<&Value> = doc.get(first).into_iter().collect();
    for segment in segments {
        current = current
            .into_iter()
            .flat_map(|value| step(value, segment))
            .collect();
    }
    current
}

fn step<'a>(value: &'a Value, segment: &str) -> Vec<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment).into_iter().collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_object().and_then(|map| map.get(segment)))
            .collect(),
        _ => Vec::new(),
    }
}

/// Reads a single value following objects only.
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Writes a value at a dotted path, creating intermediate objects.
pub fn set_path(doc: &mut Document, path: &str, value: Value) -> EvalResult<()> {
    let (parents, leaf) = match path.rsplit_once('.') {
        Some((parents, leaf)) => (Some(parents), leaf),
        None => (None, path),
    };
    let mut target = doc;
    if let Some(parents) = parents {
        for segment in parents.split('.') {
            let entry = target
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            target = entry
                .as_object_mut()
                .ok_or_else(|| invalid(format!("cannot create field '{path}' inside a non-object")))?;
        }
    }
    target.insert(leaf.to_string(), value);
    Ok(())
}

/// Removes the value at a dotted path. Returns true if something was removed.
pub fn remove_path(doc: &mut Document, path: &str) -> bool {
    match path.rsplit_once('.') {
        None => doc.remove(path).is_some(),
        Some((parents, leaf)) => {
            let mut target = doc;
            for segment in parents.split('.') {
                match target.get_mut(segment).and_then(Value::as_object_mut) {
                    Some(next) => target = next,
                    None => return false,
                }
            }
            target.remove(leaf).is_some()
        }
    }
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

/// Equality with numeric and date awareness.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => match (as_date(a), as_date(b)) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
    }
}

/// Orders two values of the same type bracket; `None` across brackets.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => match (as_date(a), as_date(b)) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => None,
        },
    }
}

/// Cross-type rank used for sorting, following the BSON comparison order.
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) if as_date(value).is_some() => 6,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order for sorting; missing values sort as null.
pub fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);
    type_rank(a)
        .cmp(&type_rank(b))
        .then_with(|| compare_values(a, b).unwrap_or(Ordering::Equal))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => true,
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Returns true if `doc` satisfies the filter document.
pub fn matches(doc: &Document, filter: &Document) -> EvalResult<bool> {
    for (key, condition) in filter {
        let satisfied = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in sub_filters(key, condition)? {
                    if !matches(doc, sub)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for sub in sub_filters(key, condition)? {
                    if matches(doc, sub)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for sub in sub_filters(key, condition)? {
                    if matches(doc, sub)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            other if other.starts_with('$') => {
                return Err(invalid(format!("unknown top-level operator {other}")))
            }
            field => field_matches(doc, field, condition)?,
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sub_filters<'a>(op: &str, condition: &'a Value) -> EvalResult<Vec<&'a Document>> {
    let items = condition
        .as_array()
        .ok_or_else(|| invalid(format!("{op} expects an array")))?;
    items
        .iter()
        .map(|item| {
            item.as_object()
                .ok_or_else(|| invalid(format!("{op} entries must be documents")))
        })
        .collect()
}

fn is_operator_document(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            !map.is_empty()
                && as_date(value).is_none()
                && map.keys().all(|key| key.starts_with('$'))
        }
        _ => false,
    }
}

fn field_matches(doc: &Document, field: &str, condition: &Value) -> EvalResult<bool> {
    let values = resolve(doc, field);
    if !is_operator_document(condition) {
        return Ok(eq_matches(&values, condition));
    }
    let operators = condition.as_object().map(|map| map.iter()).into_iter().flatten();
    let options = condition
        .get("$options")
        .and_then(Value::as_str)
        .unwrap_or("");
    for (op, arg) in operators {
        let satisfied = match op.as_str() {
            "$eq" => eq_matches(&values, arg),
            "$ne" => !eq_matches(&values, arg),
            "$gt" => range_matches(&values, arg, |o| o == Ordering::Greater),
            "$gte" => range_matches(&values, arg, |o| o != Ordering::Less),
            "$lt" => range_matches(&values, arg, |o| o == Ordering::Less),
            "$lte" => range_matches(&values, arg, |o| o != Ordering::Greater),
            "$in" => in_matches(&values, arg)?,
            "$nin" => !in_matches(&values, arg)?,
            "$exists" => truthy(arg) != values.is_empty(),
            "$regex" => regex_matches(&values, arg, options)?,
            "$options" => true,
            other => return Err(invalid(format!("unknown operator {other}"))),
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Expands array values so comparisons see both the array and its elements.
fn candidates<'a>(values: &[&'a Value]) -> Vec<&'a Value> {
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        out.push(*value);
        if let Value::Array(items) = value {
            out.extend(items.iter());
        }
    }
    out
}

fn eq_matches(values: &[&Value], arg: &Value) -> bool {
    if values.is_empty() {
        return arg.is_null();
    }
    candidates(values)
        .into_iter()
        .any(|candidate| values_equal(candidate, arg))
}

fn range_matches(values: &[&Value], arg: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    candidates(values)
        .into_iter()
        .filter_map(|candidate| compare_values(candidate, arg))
        .any(accept)
}

fn in_matches(values: &[&Value], arg: &Value) -> EvalResult<bool> {
    let options = arg
        .as_array()
        .ok_or_else(|| invalid("$in/$nin expects an array"))?;
    Ok(options.iter().any(|option| eq_matches(values, option)))
}

fn regex_matches(values: &[&Value], arg: &Value, options: &str) -> EvalResult<bool> {
    let pattern = arg
        .as_str()
        .ok_or_else(|| invalid("$regex expects a string pattern"))?;
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .build()
        .map_err(|e| invalid(format!("invalid regex: {e}")))?;
    Ok(candidates(values)
        .into_iter()
        .filter_map(Value::as_str)
        .any(|text| regex.is_match(text)))
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

/// Evaluates an aggregation expression against a document.
pub fn eval_expr(doc: &Document, expr: &Value) -> EvalResult<Value> {
    match expr {
        Value::String(text) if text.starts_with('$') && !text.starts_with("$$") => {
            let found = resolve(doc, &text[1..]);
            Ok(match found.as_slice() {
                [] => Value::Null,
                [single] => (*single).clone(),
                many => Value::Array(many.iter().map(|v| (*v).clone()).collect()),
            })
        }
        Value::Object(map) if map.len() == 1 && as_date(expr).is_none() => {
            let Some((key, arg)) = map.iter().next() else {
                return Ok(Value::Object(Map::new()));
            };
            if key.starts_with('$') {
                eval_operator(doc, key, arg)
            } else {
                let mut out = Map::new();
                out.insert(key.clone(), eval_expr(doc, arg)?);
                Ok(Value::Object(out))
            }
        }
        Value::Object(map) if as_date(expr).is_none() => {
            let mut out = Map::new();
            for (key, value) in map {
                out.insert(key.clone(), eval_expr(doc, value)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|item| eval_expr(doc, item))
                .collect::<EvalResult<Vec<_>>>()?,
        )),
        other => Ok(other.clone()),
    }
}

fn eval_args(doc: &Document, op: &str, arg: &Value) -> EvalResult<Vec<Value>> {
    match arg {
        Value::Array(items) => items.iter().map(|item| eval_expr(doc, item)).collect(),
        single => {
            if matches!(op, "$toUpper" | "$toLower" | "$not") {
                Ok(vec![eval_expr(doc, single)?])
            } else {
                Err(invalid(format!("{op} expects an array of arguments")))
            }
        }
    }
}

fn eval_operator(doc: &Document, op: &str, arg: &Value) -> EvalResult<Value> {
    if op == "$literal" {
        return Ok(arg.clone());
    }
    if op == "$cond" {
        return eval_cond(doc, arg);
    }
    let args = eval_args(doc, op, arg)?;
    match op {
        "$add" | "$multiply" => arithmetic_fold(op, &args),
        "$subtract" | "$divide" | "$mod" => {
            let [left, right] = args.as_slice() else {
                return Err(invalid(format!("{op} expects exactly two arguments")));
            };
            binary_arithmetic(op, left, right)
        }
        "$concat" => {
            let mut out = String::new();
            for value in &args {
                match value {
                    Value::Null => return Ok(Value::Null),
                    Value::String(text) => out.push_str(text),
                    other => return Err(invalid(format!("$concat only supports strings, got {other}"))),
                }
            }
            Ok(Value::String(out))
        }
        "$toUpper" | "$toLower" => {
            let text = match args.first() {
                Some(Value::String(text)) => text.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            Ok(Value::String(if op == "$toUpper" {
                text.to_uppercase()
            } else {
                text.to_lowercase()
            }))
        }
        "$ifNull" => Ok(args
            .iter()
            .find(|value| !value.is_null())
            .cloned()
            .unwrap_or(Value::Null)),
        "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" => {
            let [left, right] = args.as_slice() else {
                return Err(invalid(format!("{op} expects exactly two arguments")));
            };
            let ordering = sort_order(Some(left), Some(right));
            Ok(Value::Bool(match op {
                "$eq" => values_equal(left, right),
                "$ne" => !values_equal(left, right),
                "$gt" => ordering == Ordering::Greater,
                "$gte" => ordering != Ordering::Less,
                "$lt" => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            }))
        }
        "$and" => Ok(Value::Bool(args.iter().all(truthy))),
        "$or" => Ok(Value::Bool(args.iter().any(truthy))),
        "$not" => Ok(Value::Bool(!args.first().is_some_and(truthy))),
        other => Err(invalid(format!("unknown expression operator {other}"))),
    }
}

fn eval_cond(doc: &Document, arg: &Value) -> EvalResult<Value> {
    let (condition, then, otherwise) = match arg {
        Value::Array(items) if items.len() == 3 => (&items[0], &items[1], &items[2]),
        Value::Object(map) => match (map.get("if"), map.get("then"), map.get("else")) {
            (Some(c), Some(t), Some(e)) => (c, t, e),
            _ => return Err(invalid("$cond requires if, then and else")),
        },
        _ => return Err(invalid("$cond requires if, then and else")),
    };
    if truthy(&eval_expr(doc, condition)?) {
        eval_expr(doc, then)
    } else {
        eval_expr(doc, otherwise)
    }
}

fn arithmetic_fold(op: &str, args: &[Value]) -> EvalResult<Value> {
    if args.iter().any(Value::is_null) {
        return Ok(Value::Null);
    }
    let numbers = args
        .iter()
        .map(|value| match value {
            Value::Number(n) => Ok(n),
            other => Err(invalid(format!("{op} only supports numbers, got {other}"))),
        })
        .collect::<EvalResult<Vec<_>>>()?;

    if numbers.iter().all(|n| n.is_i64()) {
        let mut acc: i64 = if op == "$add" { 0 } else { 1 };
        let mut overflowed = false;
        for n in &numbers {
            let x = n.as_i64().unwrap_or_default();
            let next = if op == "$add" {
                acc.checked_add(x)
            } else {
                acc.checked_mul(x)
            };
            match next {
                Some(v) => acc = v,
                None => {
                    overflowed = true;
                    break;
                }
            }
        }
        if !overflowed {
            return Ok(Value::from(acc));
        }
    }
    let floats = numbers.iter().filter_map(|n| n.as_f64());
    let result = if op == "$add" {
        floats.sum::<f64>()
    } else {
        floats.product::<f64>()
    };
    Ok(float_value(result))
}

fn binary_arithmetic(op: &str, left: &Value, right: &Value) -> EvalResult<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    let (Value::Number(a), Value::Number(b)) = (left, right) else {
        return Err(invalid(format!("{op} only supports numbers")));
    };
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        match op {
            "$subtract" => {
                if let Some(v) = x.checked_sub(y) {
                    return Ok(Value::from(v));
                }
            }
            "$mod" => {
                if y == 0 {
                    return Err(invalid("$mod by zero"));
                }
                return Ok(Value::from(x % y));
            }
            _ => {}
        }
    }
    let x = a.as_f64().unwrap_or_default();
    let y = b.as_f64().unwrap_or_default();
    match op {
        "$subtract" => Ok(float_value(x - y)),
        "$divide" if y == 0.0 => Err(invalid("$divide by zero")),
        "$divide" => Ok(float_value(x / y)),
        "$mod" if y == 0.0 => Err(invalid("$mod by zero")),
        _ => Ok(float_value(x % y)),
    }
}

fn float_value(x: f64) -> Value {
    Number::from_f64(x).map(Value::Number).unwrap_or(Value::Null)
}

// ---------------------------------------------------------------------------
// Projection, sort, update
// ---------------------------------------------------------------------------

fn is_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        _ => None,
    }
}

/// Applies a projection document.
pub fn project(doc: &Document, spec: &Document) -> EvalResult<Document> {
    let keep_id = spec.get("_id").and_then(is_flag).unwrap_or(true);
    let mut includes = Vec::new();
    let mut excludes = Vec::new();
    let mut computed = Vec::new();
    for (path, value) in spec {
        if path == "_id" && is_flag(value).is_some() {
            continue;
        }
        match is_flag(value) {
            Some(true) => includes.push(path.as_str()),
            Some(false) => excludes.push(path.as_str()),
            None => computed.push((path.as_str(), value)),
        }
    }
    if !excludes.is_empty() && (!includes.is_empty() || !computed.is_empty()) {
        return Err(invalid("projection cannot mix inclusion and exclusion"));
    }

    if includes.is_empty() && computed.is_empty() {
        let mut out = doc.clone();
        for path in excludes {
            remove_path(&mut out, path);
        }
        if !keep_id {
            out.remove("_id");
        }
        return Ok(out);
    }

    let mut out = Map::new();
    if keep_id {
        if let Some(id) = doc.get("_id") {
            out.insert("_id".to_string(), id.clone());
        }
    }
    for path in includes {
        if let Some(value) = get_path(doc, path) {
            set_path(&mut out, path, value.clone())?;
        }
    }
    for (path, expr) in computed {
        let value = eval_expr(doc, expr)?;
        set_path(&mut out, path, value)?;
    }
    Ok(out)
}

/// Stable sort by a `{"field": 1 | -1}` document.
pub fn sort_documents(docs: &mut [Document], spec: &Document) {
    let keys: Vec<(&str, bool)> = spec
        .iter()
        .map(|(field, dir)| (field.as_str(), dir.as_i64().unwrap_or(1) < 0))
        .collect();
    docs.sort_by(|a, b| {
        for (field, descending) in &keys {
            let left = resolve(a, field).first().copied();
            let right = resolve(b, field).first().copied();
            let ordering = sort_order(left, right);
            let ordering = if *descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Applies update operators in place. Returns true if the document changed.
pub fn apply_update(doc: &mut Document, update: &Document) -> EvalResult<bool> {
    let mut modified = false;
    for (op, body) in update {
        let fields = body
            .as_object()
            .ok_or_else(|| invalid(format!("{op} expects a document")))?;
        for (path, value) in fields {
            if path == "_id" || path.starts_with("_id.") {
                return Err(StoreError::Constraint(
                    "the _id field is immutable".to_string(),
                ));
            }
            match op.as_str() {
                "$set" => {
                    if get_path(doc, path) != Some(value) {
                        set_path(doc, path, value.clone())?;
                        modified = true;
                    }
                }
                "$unset" => modified |= remove_path(doc, path),
                "$inc" => {
                    let Value::Number(delta) = value else {
                        return Err(invalid(format!("$inc on '{path}' needs a number")));
                    };
                    let next = match get_path(doc, path) {
                        None | Some(Value::Null) => Value::Number(delta.clone()),
                        Some(Value::Number(current)) => {
                            arithmetic_fold("$add", &[Value::Number(current.clone()), Value::Number(delta.clone())])?
                        }
                        Some(_) => {
                            return Err(invalid(format!(
                                "cannot apply $inc to non-numeric field '{path}'"
                            )))
                        }
                    };
                    set_path(doc, path, next)?;
                    modified = true;
                }
                other => return Err(invalid(format!("unknown update operator {other}"))),
            }
        }
    }
    Ok(modified)
}

/// Seeds an upserted document from the equality conditions of a filter.
pub fn upsert_seed(filter: &Document) -> EvalResult<Document> {
    let mut seed = Map::new();
    for (key, condition) in filter {
        if key == "$and" {
            for sub in sub_filters(key, condition)? {
                for (k, v) in upsert_seed(sub)? {
                    seed.insert(k, v);
                }
            }
            continue;
        }
        if key.starts_with('$') {
            continue;
        }
        if !is_operator_document(condition) {
            set_path(&mut seed, key, condition.clone())?;
        } else if let Some(value) = condition.get("$eq") {
            set_path(&mut seed, key, value.clone())?;
        }
    }
    Ok(seed)
}

// ---------------------------------------------------------------------------
// Pipelines
// ---------------------------------------------------------------------------

/// Runs an aggregation pipeline. `foreign` yields the documents of another
/// collection in the same database for `$lookup`.
pub fn run_pipeline<F>(
    mut docs: Vec<Document>,
    pipeline: &[Document],
    foreign: F,
) -> EvalResult<Vec<Document>>
where
    F: Fn(&str) -> Vec<Document>,
{
    for stage in pipeline {
        let mut entries = stage.iter();
        let (Some((name, body)), None) = (entries.next(), entries.next()) else {
            return Err(invalid("each pipeline stage must have exactly one key"));
        };
        docs = match name.as_str() {
            "$match" => {
                let filter = stage_document(name, body)?;
                let mut kept = Vec::with_capacity(docs.len());
                for doc in docs {
                    if matches(&doc, filter)? {
                        kept.push(doc);
                    }
                }
                kept
            }
            "$sort" => {
                sort_documents(&mut docs, stage_document(name, body)?);
                docs
            }
            "$skip" => {
                let n = stage_count(name, body)?;
                docs.into_iter().skip(n).collect()
            }
            "$limit" => {
                let n = stage_count(name, body)?;
                if n == 0 {
                    docs
                } else {
                    docs.into_iter().take(n).collect()
                }
            }
            "$project" => {
                let spec = stage_document(name, body)?;
                docs.iter()
                    .map(|doc| project(doc, spec))
                    .collect::<EvalResult<_>>()?
            }
            "$addFields" | "$set" => {
                let spec = stage_document(name, body)?;
                let mut out = Vec::with_capacity(docs.len());
                for mut doc in docs {
                    let mut computed = Vec::with_capacity(spec.len());
                    for (field, expr) in spec {
                        computed.push((field, eval_expr(&doc, expr)?));
                    }
                    for (field, value) in computed {
                        set_path(&mut doc, field, value)?;
                    }
                    out.push(doc);
                }
                out
            }
            "$group" => group(&docs, stage_document(name, body)?)?,
            "$lookup" => lookup(docs, stage_document(name, body)?, &foreign)?,
            other => return Err(invalid(format!("unsupported pipeline stage {other}"))),
        };
    }
    Ok(docs)
}

fn stage_document<'a>(name: &str, body: &'a Value) -> EvalResult<&'a Document> {
    body.as_object()
        .ok_or_else(|| invalid(format!("{name} expects a document")))
}

fn stage_count(name: &str, body: &Value) -> EvalResult<usize> {
    body.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| invalid(format!("{name} expects a non-negative integer")))
}

fn group(docs: &[Document], spec: &Document) -> EvalResult<Vec<Document>> {
    let key_expr = spec
        .get("_id")
        .ok_or_else(|| invalid("$group requires an _id"))?;

    let mut order: Vec<(Value, Vec<&Document>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for doc in docs {
        let key = eval_expr(doc, key_expr)?;
        let slot = *index.entry(key.to_string()).or_insert_with(|| {
            order.push((key.clone(), Vec::new()));
            order.len() - 1
        });
        order[slot].1.push(doc);
    }

    let mut out = Vec::with_capacity(order.len());
    for (key, members) in order {
        let mut row = Map::new();
        row.insert("_id".to_string(), key);
        for (name, accumulator) in spec {
            if name == "_id" {
                continue;
            }
            let (op, arg) = accumulator
                .as_object()
                .and_then(|map| map.iter().next())
                .ok_or_else(|| invalid(format!("accumulator '{name}' must be a document")))?;
            row.insert(name.clone(), accumulate(op, arg, &members)?);
        }
        out.push(row);
    }
    Ok(out)
}

fn accumulate(op: &str, arg: &Value, members: &[&Document]) -> EvalResult<Value> {
    let values = members
        .iter()
        .map(|doc| eval_expr(doc, arg))
        .collect::<EvalResult<Vec<_>>>()?;
    match op {
        "$sum" => {
            let numbers: Vec<Value> = values.into_iter().filter(Value::is_number).collect();
            if numbers.is_empty() {
                Ok(Value::from(0))
            } else {
                arithmetic_fold("$add", &numbers)
            }
        }
        "$avg" => {
            let numbers: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
            if numbers.is_empty() {
                Ok(Value::Null)
            } else {
                Ok(float_value(numbers.iter().sum::<f64>() / numbers.len() as f64))
            }
        }
        "$min" | "$max" => {
            let present = values.into_iter().filter(|v| !v.is_null());
            let picked = if op == "$min" {
                present.min_by(|a, b| sort_order(Some(a), Some(b)))
            } else {
                present.max_by(|a, b| sort_order(Some(a), Some(b)))
            };
            Ok(picked.unwrap_or(Value::Null))
        }
        "$first" => Ok(values.into_iter().next().unwrap_or(Value::Null)),
        "$last" => Ok(values.into_iter().last().unwrap_or(Value::Null)),
        "$push" => Ok(Value::Array(values)),
        "$addToSet" => {
            let mut unique: Vec<Value> = Vec::new();
            for value in values {
                if !unique.iter().any(|seen| values_equal(seen, &value)) {
                    unique.push(value);
                }
            }
            Ok(Value::Array(unique))
        }
        "$count" => Ok(Value::from(members.len() as u64)),
        other => Err(invalid(format!("unknown accumulator {other}"))),
    }
}

fn lookup<F>(docs: Vec<Document>, spec: &Document, foreign: &F) -> EvalResult<Vec<Document>>
where
    F: Fn(&str) -> Vec<Document>,
{
    let field = |key: &str| {
        spec.get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| invalid(format!("$lookup requires '{key}'")))
    };
    let from = field("from")?;
    let local_field = field("localField")?;
    let foreign_field = field("foreignField")?;
    let as_field = field("as")?;

    let foreign_docs = foreign(from);
    let mut out = Vec::with_capacity(docs.len());
    for mut doc in docs {
        let local = candidates(&resolve(&doc, local_field))
            .into_iter()
            .cloned()
            .collect::<Vec<_>>();
        let joined: Vec<Value> = foreign_docs
            .iter()
            .filter(|other| {
                let remote = resolve(other, foreign_field);
                if local.is_empty() {
                    eq_matches(&remote, &Value::Null)
                } else {
                    local.iter().any(|value| eq_matches(&remote, value))
                }
            })
            .map(|other| Value::Object(other.clone()))
            .collect();
        set_path(&mut doc, as_field, Value::Array(joined))?;
        out.push(doc);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_resolve_nested_and_arrays() {
        let d = doc(json!({"a": {"b": 1}, "items": [{"sku": "x"}, {"sku": "y"}]}));
        assert_eq!(resolve(&d, "a.b"), vec![&json!(1)]);
        assert_eq!(resolve(&d, "items.sku"), vec![&json!("x"), &json!("y")]);
        assert!(resolve(&d, "missing").is_empty());
    }

    #[test]
    fn test_matches_comparison_operators() {
        let d = doc(json!({"status": "shipped", "total": 42, "tags": ["a", "b"]}));
        assert!(matches(&d, &doc(json!({"status": "shipped"}))).unwrap());
        assert!(matches(&d, &doc(json!({"total": {"$gt": 40, "$lte": 42}}))).unwrap());
        assert!(!matches(&d, &doc(json!({"total": {"$lt": 42}}))).unwrap());
        assert!(matches(&d, &doc(json!({"tags": "b"}))).unwrap());
        assert!(matches(&d, &doc(json!({"status": {"$in": ["new", "shipped"]}}))).unwrap());
        assert!(matches(&d, &doc(json!({"status": {"$nin": ["new"]}}))).unwrap());
        assert!(matches(&d, &doc(json!({"missing": {"$exists": false}}))).unwrap());
        assert!(matches(&d, &doc(json!({"missing": null}))).unwrap());
        assert!(matches(&d, &doc(json!({"status": {"$regex": "^SHIP", "$options": "i"}}))).unwrap());
    }

    #[test]
    fn test_matches_logical_operators() {
        let d = doc(json!({"status": "shipped", "total": 42}));
        let f = doc(json!({"$or": [{"status": "new"}, {"total": {"$gte": 40}}]}));
        assert!(matches(&d, &f).unwrap());
        let f = doc(json!({"$nor": [{"status": "shipped"}]}));
        assert!(!matches(&d, &f).unwrap());
        let f = doc(json!({"$and": [{"status": "shipped"}, {"total": 42}]}));
        assert!(matches(&d, &f).unwrap());
    }

    #[test]
    fn test_matches_rejects_unknown_operator() {
        let d = doc(json!({"a": 1}));
        let err = matches(&d, &doc(json!({"a": {"$near": 1}}))).unwrap_err();
        assert!(matches!(err, StoreError::InvalidOperation(_)));
    }

    #[test]
    fn test_dates_compare_chronologically() {
        let d = doc(json!({"created": {"$date": "2024-02-01T00:00:00Z"}}));
        let f = doc(json!({"created": {"$gte": {"$date": "2024-01-01T00:00:00Z"}}}));
        assert!(matches(&d, &f).unwrap());
        let f = doc(json!({"created": {"$date": "2024-02-01T00:00:00Z"}}));
        assert!(matches(&d, &f).unwrap());
    }

    #[test]
    fn test_eval_expressions() {
        let d = doc(json!({"price": 10, "qty": 3, "name": "Widget", "discount": null}));
        assert_eq!(eval_expr(&d, &json!({"$multiply": ["$price", "$qty"]})).unwrap(), json!(30));
        assert_eq!(eval_expr(&d, &json!({"$divide": ["$price", 4]})).unwrap(), json!(2.5));
        assert_eq!(
            eval_expr(&d, &json!({"$concat": [{"$toUpper": "$name"}, "!"]})).unwrap(),
            json!("WIDGET!")
        );
        assert_eq!(
            eval_expr(&d, &json!({"$cond": {"if": {"$gt": ["$qty", 2]}, "then": "bulk", "else": "single"}})).unwrap(),
            json!("bulk")
        );
        assert_eq!(eval_expr(&d, &json!({"$ifNull": ["$discount", 0]})).unwrap(), json!(0));
        assert!(eval_expr(&d, &json!({"$divide": ["$price", 0]})).is_err());
    }

    #[test]
    fn test_project_inclusion_and_exclusion() {
        let d = doc(json!({"_id": 1, "a": 1, "b": {"c": 2, "d": 3}}));
        let inc = project(&d, &doc(json!({"b.c": 1}))).unwrap();
        assert_eq!(Value::Object(inc), json!({"_id": 1, "b": {"c": 2}}));
        let exc = project(&d, &doc(json!({"a": 0, "_id": 0}))).unwrap();
        assert_eq!(Value::Object(exc), json!({"b": {"c": 2, "d": 3}}));
        assert!(project(&d, &doc(json!({"a": 1, "b": 0}))).is_err());
    }

    #[test]
    fn test_sort_is_stable() {
        let mut docs = vec![
            doc(json!({"n": 1, "k": "b"})),
            doc(json!({"n": 2, "k": "a"})),
            doc(json!({"n": 3, "k": "b"})),
            doc(json!({"n": 4, "k": "a"})),
        ];
        sort_documents(&mut docs, &doc(json!({"k": 1})));
        let order: Vec<i64> = docs.iter().map(|d| d["n"].as_i64().unwrap()).collect();
        assert_eq!(order, vec![2, 4, 1, 3]);
    }

    #[test]
    fn test_apply_update_operators() {
        let mut d = doc(json!({"_id": 1, "n": 1, "old": true}));
        let changed = apply_update(
            &mut d,
            &doc(json!({"$set": {"s": "x"}, "$inc": {"n": 2}, "$unset": {"old": ""}})),
        )
        .unwrap();
        assert!(changed);
        assert_eq!(Value::Object(d.clone()), json!({"_id": 1, "n": 3, "s": "x"}));
        let err = apply_update(&mut d, &doc(json!({"$set": {"_id": 2}}))).unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[test]
    fn test_pipeline_group_and_lookup() {
        let orders = vec![
            doc(json!({"customer": 1, "total": 10})),
            doc(json!({"customer": 2, "total": 5})),
            doc(json!({"customer": 1, "total": 7})),
        ];
        let pipeline = vec![
            doc(json!({"$group": {"_id": "$customer", "spent": {"$sum": "$total"}, "n": {"$count": {}}}})),
            doc(json!({"$sort": {"spent": -1}})),
            doc(json!({"$lookup": {"from": "customers", "localField": "_id", "foreignField": "id", "as": "who"}})),
        ];
        let out = run_pipeline(orders, &pipeline, |name| {
            assert_eq!(name, "customers");
            vec![doc(json!({"id": 1, "name": "Ada"})), doc(json!({"id": 2, "name": "Bob"}))]
        })
        .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["_id"], json!(1));
        assert_eq!(out[0]["spent"], json!(17));
        assert_eq!(out[0]["n"], json!(2));
        assert_eq!(out[0]["who"][0]["name"], json!("Ada"));
    }

    #[test]
    fn test_upsert_seed_uses_equality_conditions() {
        let seed = upsert_seed(&doc(json!({"sku": "x", "qty": {"$gt": 1}, "kind": {"$eq": "a"}}))).unwrap();
        assert_eq!(Value::Object(seed), json!({"sku": "x", "kind": "a"}));
    }
}
