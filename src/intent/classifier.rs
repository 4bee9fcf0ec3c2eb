//! Payload to `Intent` classification.
//!
//! Parameters may sit at the top level of the payload or inside a nested
//! `parameters` object; when both carry a key the top-level one wins.

use super::normalize::{coerce_bool, coerce_integer, normalize_condition_value, numeric_value};
use super::{
    AggregateParams, ComputeFieldParams, ExploreKind, ExploreParams, FindParams, Intent,
    IntentCategory, IntentParams, MutateAction, MutateParams,
};
use crate::db::{as_date, Document};
use crate::error::{DocQueryError, Result};
use crate::plan::{
    Accumulator, AccumulatorOp, Comparator, ComputedField, Expr, FilterExpression, LogicalOp,
    Projection, SortDirection, SortKey, Stage, UpdatePatch,
};
use serde_json::{Map, Value};
use tracing::debug;

/// Classifies a raw payload into a typed intent.
pub fn classify(payload: &Value) -> Result<Intent> {
    let object = payload
        .as_object()
        .ok_or_else(|| DocQueryError::unrecognized("payload must be a JSON object"))?;

    let category = match object.get("category") {
        Some(Value::String(tag)) => IntentCategory::parse(tag)
            .ok_or_else(|| DocQueryError::unrecognized(format!("unknown category '{tag}'")))?,
        Some(other) => {
            return Err(DocQueryError::unrecognized(format!(
                "category must be a string, got {other}"
            )))
        }
        None => return Err(DocQueryError::unrecognized("payload has no category")),
    };

    let params = Params::merge(object)?;
    let collection = params.string("collection")?;
    let database = params.string("database")?;

    let params = match category {
        IntentCategory::Explore => IntentParams::Explore(explore_params(&params)?),
        IntentCategory::Find => IntentParams::Find(find_params(&params)?),
        IntentCategory::Aggregate => IntentParams::Aggregate(aggregate_params(&params)?),
        IntentCategory::Mutate => IntentParams::Mutate(mutate_params(&params)?),
        IntentCategory::ComputeField => IntentParams::ComputeField(compute_params(&params)?),
    };

    debug!(%category, collection = ?collection, "Classified intent");
    Ok(Intent {
        collection,
        database,
        params,
    })
}

/// Merged view of top-level and nested parameters.
struct Params {
    values: Map<String, Value>,
}

impl Params {
    fn merge(object: &Map<String, Value>) -> Result<Self> {
        let mut values = match object.get("parameters") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(nested)) => nested.clone(),
            Some(_) => {
                return Err(DocQueryError::malformed(
                    "parameters",
                    "must be a JSON object",
                ))
            }
        };
        for (key, value) in object {
            if key != "parameters" && key != "category" {
                values.insert(key.clone(), value.clone());
            }
        }
        Ok(Self { values })
    }

    /// First present, non-null value among `keys`.
    fn get<'a>(&'a self, keys: &[&'a str]) -> Option<(&'a str, &'a Value)> {
        keys.iter().find_map(|key| {
            self.values
                .get(*key)
                .filter(|v| !v.is_null())
                .map(|v| (*key, v))
        })
    }

    fn string(&self, key: &str) -> Result<Option<String>> {
        match self.get(&[key]) {
            None => Ok(None),
            Some((_, Value::String(text))) if text.trim().is_empty() => Ok(None),
            Some((_, Value::String(text))) => Ok(Some(text.trim().to_string())),
            Some((name, other)) => Err(DocQueryError::malformed(
                name,
                format!("expected a string, got {other}"),
            )),
        }
    }

    /// The first alias in `keys` holding a string. Aliases after it are not read.
    fn first_string(&self, keys: &[&str]) -> Result<Option<String>> {
        for key in keys {
            if let Some(text) = self.string(key)? {
                return Ok(Some(text));
            }
        }
        Ok(None)
    }

    fn integer(&self, keys: &[&str]) -> Result<Option<i64>> {
        self.get(keys)
            .map(|(name, value)| coerce_integer(name, value))
            .transpose()
    }

    fn flag(&self, keys: &[&str]) -> Result<bool> {
        Ok(self
            .get(keys)
            .map(|(name, value)| coerce_bool(name, value))
            .transpose()?
            .unwrap_or(false))
    }

    /// Combined `conditions` list and `filter` document.
    fn filter(&self) -> Result<Option<FilterExpression>> {
        let mut parts = Vec::new();
        if let Some((name, value)) = self.get(&["conditions"]) {
            parts.push(parse_filter_value(name, value)?);
        }
        if let Some((name, value)) = self.get(&["filter", "query", "where"]) {
            parts.push(parse_filter_value(name, value)?);
        }
        Ok(match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(FilterExpression::and(parts)),
        })
    }

    fn sort(&self) -> Result<Vec<SortKey>> {
        match self.get(&["sort", "order_by"]) {
            Some((name, value)) => parse_sort(name, value),
            None => Ok(Vec::new()),
        }
    }
}

fn explore_params(params: &Params) -> Result<ExploreParams> {
    let kind = match params.get(&["target", "explore", "kind"]) {
        None => None,
        Some((name, Value::String(text))) => Some(parse_explore_kind(name, text)?),
        Some((name, other)) => {
            return Err(DocQueryError::malformed(
                name,
                format!("expected a string, got {other}"),
            ))
        }
    };
    Ok(ExploreParams {
        kind,
        sample_size: params.integer(&["sample_size", "limit", "n"])?,
    })
}

fn parse_explore_kind(param: &str, text: &str) -> Result<ExploreKind> {
    match text.trim().to_ascii_lowercase().as_str() {
        "databases" | "database" | "dbs" => Ok(ExploreKind::Databases),
        "collections" | "collection" | "tables" => Ok(ExploreKind::Collections),
        "fields" | "schema" | "structure" | "columns" => Ok(ExploreKind::Fields),
        "samples" | "sample" | "examples" | "documents" => Ok(ExploreKind::Samples),
        other => Err(DocQueryError::malformed(
            param,
            format!("unknown exploration target '{other}'"),
        )),
    }
}

fn find_params(params: &Params) -> Result<FindParams> {
    let counting = match params.get(&["operation"]) {
        Some((_, Value::String(op))) => match op.trim().to_ascii_lowercase().as_str() {
            "count" | "count_documents" => true,
            "find" | "find_one" | "query" => false,
            other => {
                return Err(DocQueryError::unsupported(format!(
                    "'{other}' is not a FIND operation"
                )))
            }
        },
        Some((name, other)) => {
            return Err(DocQueryError::malformed(
                name,
                format!("expected a string, got {other}"),
            ))
        }
        None => false,
    };

    Ok(FindParams {
        filter: params.filter()?,
        projection: parse_find_projection(params)?,
        sort: params.sort()?,
        skip: params.integer(&["skip", "offset"])?,
        limit: params.integer(&["limit"])?,
        count_only: counting || params.flag(&["count"])?,
    })
}

fn parse_find_projection(params: &Params) -> Result<Option<Projection>> {
    let include = params.get(&["fields"]);
    let exclude = params.get(&["exclude"]);
    let object = params.get(&["projection"]);

    match (include, exclude, object) {
        (None, None, None) => Ok(None),
        (Some((name, value)), None, None) => Ok(Some(Projection::Include {
            fields: string_list(name, value)?,
            with_id: true,
        })),
        (None, Some((name, value)), None) => Ok(Some(Projection::Exclude {
            fields: string_list(name, value)?,
        })),
        (None, None, Some((name, Value::Object(spec)))) => {
            let (computed, projection) = split_projection(name, spec)?;
            if !computed.is_empty() {
                return Err(DocQueryError::malformed(
                    name,
                    "computed projections need an AGGREGATE or COMPUTE_FIELD intent",
                ));
            }
            Ok(projection)
        }
        (None, None, Some((name, value))) => Ok(Some(Projection::Include {
            fields: string_list(name, value)?,
            with_id: true,
        })),
        _ => Err(DocQueryError::malformed(
            "projection",
            "give one of 'fields', 'exclude' or 'projection'",
        )),
    }
}

/// Splits a `$project`-style document into computed entries and plain flags.
fn split_projection(
    param: &str,
    spec: &Map<String, Value>,
) -> Result<(Vec<ComputedField>, Option<Projection>)> {
    let mut computed = Vec::new();
    let mut include = Vec::new();
    let mut exclude = Vec::new();
    let mut with_id = true;

    for (field, value) in spec {
        if Expr::is_expression(value) {
            computed.push(ComputedField {
                name: field.clone(),
                expr: Expr::parse(value)?,
            });
            continue;
        }
        let keep = coerce_bool(param, value)?;
        match (field.as_str(), keep) {
            ("_id", false) => with_id = false,
            ("_id", true) => {}
            (_, true) => include.push(field.clone()),
            (_, false) => exclude.push(field.clone()),
        }
    }

    if !exclude.is_empty() && (!include.is_empty() || !computed.is_empty()) {
        return Err(DocQueryError::malformed(
            param,
            "cannot mix inclusion and exclusion",
        ));
    }

    let projection = if !exclude.is_empty() {
        if !with_id {
            exclude.insert(0, "_id".to_string());
        }
        Some(Projection::Exclude { fields: exclude })
    } else if !include.is_empty() || !computed.is_empty() {
        include.extend(computed.iter().map(|c| c.name.clone()));
        Some(Projection::Include {
            fields: include,
            with_id,
        })
    } else if !with_id {
        Some(Projection::Exclude {
            fields: vec!["_id".to_string()],
        })
    } else {
        None
    };
    Ok((computed, projection))
}

fn aggregate_params(params: &Params) -> Result<AggregateParams> {
    let (name, value) = params
        .get(&["pipeline", "stages"])
        .ok_or_else(|| DocQueryError::malformed("pipeline", "AGGREGATE requires at least one stage"))?;
    let items = value
        .as_array()
        .ok_or_else(|| DocQueryError::malformed(name, "expected a list of stages"))?;
    if items.is_empty() {
        return Err(DocQueryError::malformed(
            name,
            "AGGREGATE requires at least one stage",
        ));
    }

    let mut stages = Vec::with_capacity(items.len());
    for item in items {
        stages.extend(parse_stage(name, item)?);
    }
    Ok(AggregateParams { stages })
}

fn parse_stage(param: &str, item: &Value) -> Result<Vec<Stage>> {
    let object = item
        .as_object()
        .filter(|map| map.len() == 1)
        .ok_or_else(|| {
            DocQueryError::malformed(param, "each stage must be an object with one key")
        })?;
    let Some((raw_name, body)) = object.iter().next() else {
        return Err(DocQueryError::malformed(param, "empty stage"));
    };
    let name = raw_name.trim_start_matches('$').to_ascii_lowercase();
    let stage_param = format!("${name}");

    let stages = match name.as_str() {
        "match" => vec![Stage::Match {
            filter: parse_filter_value(&stage_param, body)?,
        }],
        "group" => vec![parse_group(&stage_param, body)?],
        "sort" => vec![Stage::Sort {
            keys: parse_sort(&stage_param, body)?,
        }],
        "limit" => vec![Stage::Limit {
            count: coerce_integer(&stage_param, body)?,
        }],
        "skip" => vec![Stage::Skip {
            count: coerce_integer(&stage_param, body)?,
        }],
        "project" => {
            let spec = body
                .as_object()
                .ok_or_else(|| DocQueryError::malformed(&stage_param, "expected a document"))?;
            let (computed, projection) = split_projection(&stage_param, spec)?;
            let mut out = Vec::new();
            if !computed.is_empty() {
                out.push(Stage::Compute { fields: computed });
            }
            if let Some(projection) = projection {
                out.push(Stage::Project { projection });
            }
            out
        }
        "lookup" => vec![parse_lookup(&stage_param, body)?],
        "addfields" | "set" | "compute" => {
            let spec = body
                .as_object()
                .ok_or_else(|| DocQueryError::malformed(&stage_param, "expected a document"))?;
            let fields = spec
                .iter()
                .map(|(field, value)| {
                    Ok(ComputedField {
                        name: field.clone(),
                        expr: Expr::parse(value)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            vec![Stage::Compute { fields }]
        }
        "count" => {
            let output = body
                .as_str()
                .filter(|s| !s.is_empty() && !s.starts_with('$'))
                .ok_or_else(|| DocQueryError::malformed(&stage_param, "expected an output field name"))?;
            vec![
                Stage::Group {
                    key: Expr::literal(Value::Null),
                    accumulators: vec![Accumulator {
                        name: output.to_string(),
                        op: AccumulatorOp::Count,
                        expr: Expr::literal(Value::Object(Map::new())),
                    }],
                },
                Stage::Project {
                    projection: Projection::Include {
                        fields: vec![output.to_string()],
                        with_id: false,
                    },
                },
            ]
        }
        _ => {
            return Err(DocQueryError::unsupported(format!(
                "aggregation stage '{raw_name}'"
            )))
        }
    };
    Ok(stages)
}

fn parse_group(param: &str, body: &Value) -> Result<Stage> {
    let spec = body
        .as_object()
        .ok_or_else(|| DocQueryError::malformed(param, "expected a document"))?;
    let key = spec
        .get("_id")
        .ok_or_else(|| DocQueryError::malformed(param, "GROUP requires an _id key"))?;
    let key = Expr::parse(key)?;

    let mut accumulators = Vec::new();
    for (name, value) in spec {
        if name == "_id" {
            continue;
        }
        let (op_name, arg) = value
            .as_object()
            .filter(|map| map.len() == 1)
            .and_then(|map| map.iter().next())
            .ok_or_else(|| {
                DocQueryError::malformed(param, format!("accumulator '{name}' must be {{\"$op\": expr}}"))
            })?;
        let op = AccumulatorOp::parse(op_name).ok_or_else(|| {
            DocQueryError::malformed(param, format!("unknown accumulator '{op_name}'"))
        })?;
        accumulators.push(Accumulator {
            name: name.clone(),
            op,
            expr: Expr::parse(arg)?,
        });
    }
    Ok(Stage::Group { key, accumulators })
}

fn parse_lookup(param: &str, body: &Value) -> Result<Stage> {
    let spec = body
        .as_object()
        .ok_or_else(|| DocQueryError::malformed(param, "expected a document"))?;
    let field = |keys: &[&str]| -> Result<String> {
        keys.iter()
            .find_map(|key| spec.get(*key).and_then(Value::as_str))
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| DocQueryError::malformed(param, format!("LOOKUP requires '{}'", keys[0])))
    };
    Ok(Stage::Lookup {
        from: field(&["from"])?,
        local_field: field(&["localField", "local_field"])?,
        foreign_field: field(&["foreignField", "foreign_field"])?,
        as_field: field(&["as", "as_field"])?,
    })
}

fn mutate_params(params: &Params) -> Result<MutateParams> {
    let operation = params
        .first_string(&["operation", "action"])?
        .ok_or_else(|| DocQueryError::malformed("operation", "MUTATE requires an operation"))?;

    let (action, multi) = match operation.to_ascii_lowercase().as_str() {
        "insert" | "insert_one" => (MutateAction::Insert, false),
        "insert_many" => (MutateAction::Insert, true),
        "update" | "update_many" => (MutateAction::Update, true),
        "update_one" => (MutateAction::Update, false),
        "delete" | "delete_many" => (MutateAction::Delete, true),
        "delete_one" => (MutateAction::Delete, false),
        other => return Err(DocQueryError::unsupported(format!("mutation '{other}'"))),
    };

    let documents = if action == MutateAction::Insert {
        let documents = insert_documents(params)?;
        if operation.eq_ignore_ascii_case("insert_one") && documents.len() > 1 {
            return Err(DocQueryError::malformed(
                "document",
                "insert_one takes exactly one document",
            ));
        }
        documents
    } else {
        Vec::new()
    };

    let patch = if action == MutateAction::Update {
        let (name, value) = params
            .get(&["update", "patch", "changes"])
            .ok_or_else(|| DocQueryError::malformed("update", "update requires a patch"))?;
        parse_patch(name, value)?
    } else {
        UpdatePatch::default()
    };

    Ok(MutateParams {
        action,
        documents,
        filter: params.filter()?,
        patch,
        multi,
        upsert: params.flag(&["upsert"])?,
        all_documents: params.flag(&["all_documents", "allDocuments"])?,
    })
}

fn insert_documents(params: &Params) -> Result<Vec<Document>> {
    let (name, value) = params
        .get(&["documents", "document"])
        .ok_or_else(|| DocQueryError::malformed("documents", "insert requires at least one document"))?;
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        single => vec![single],
    };
    if items.is_empty() {
        return Err(DocQueryError::malformed(
            name,
            "insert requires at least one document",
        ));
    }
    items
        .into_iter()
        .map(|item| {
            item.as_object()
                .cloned()
                .ok_or_else(|| DocQueryError::malformed(name, "documents must be JSON objects"))
        })
        .collect()
}

fn parse_patch(param: &str, value: &Value) -> Result<UpdatePatch> {
    let spec = value
        .as_object()
        .ok_or_else(|| DocQueryError::malformed(param, "expected a document"))?;
    let mut patch = UpdatePatch::default();

    if !spec.keys().any(|key| key.starts_with('$')) {
        patch.set = spec.clone();
    } else {
        for (op, body) in spec {
            match op.as_str() {
                "$set" => {
                    let fields = body.as_object().ok_or_else(|| {
                        DocQueryError::malformed(param, "$set expects a document")
                    })?;
                    patch.set.extend(fields.clone());
                }
                "$unset" => match body {
                    Value::Object(fields) => patch.unset.extend(fields.keys().cloned()),
                    Value::String(field) => patch.unset.push(field.clone()),
                    Value::Array(_) => patch.unset.extend(string_list(param, body)?),
                    _ => {
                        return Err(DocQueryError::malformed(
                            param,
                            "$unset expects field names",
                        ))
                    }
                },
                "$inc" => {
                    let fields = body.as_object().ok_or_else(|| {
                        DocQueryError::malformed(param, "$inc expects a document")
                    })?;
                    for (field, delta) in fields {
                        let delta = match delta {
                            Value::Number(_) => delta.clone(),
                            Value::String(text) => numeric_value(text).ok_or_else(|| {
                                DocQueryError::malformed(param, format!("$inc of '{field}' is not a number"))
                            })?,
                            _ => {
                                return Err(DocQueryError::malformed(
                                    param,
                                    format!("$inc of '{field}' is not a number"),
                                ))
                            }
                        };
                        patch.inc.insert(field.clone(), delta);
                    }
                }
                other if other.starts_with('$') => {
                    return Err(DocQueryError::unsupported(format!("update operator '{other}'")))
                }
                other => {
                    return Err(DocQueryError::malformed(
                        param,
                        format!("'{other}' mixes plain fields with update operators"),
                    ))
                }
            }
        }
    }

    if patch.is_empty() {
        return Err(DocQueryError::malformed(
            param,
            "update requires at least one field to change",
        ));
    }
    Ok(patch)
}

fn compute_params(params: &Params) -> Result<ComputeFieldParams> {
    let name = params
        .first_string(&["name", "field", "new_field"])?
        .ok_or_else(|| DocQueryError::malformed("name", "COMPUTE_FIELD requires a field name"))?;
    if name.starts_with('$') || name.contains('\0') {
        return Err(DocQueryError::malformed(
            "name",
            format!("'{name}' is not a valid field name"),
        ));
    }
    let (_, expression) = params
        .get(&["expression", "expr"])
        .ok_or_else(|| DocQueryError::malformed("expression", "COMPUTE_FIELD requires an expression"))?;

    Ok(ComputeFieldParams {
        name,
        expression: Expr::parse(expression)?,
        filter: params.filter()?,
        sort: params.sort()?,
        skip: params.integer(&["skip", "offset"])?,
        limit: params.integer(&["limit"])?,
        overwrite: params.flag(&["overwrite"])?,
    })
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Parses either a conditions list or a MongoDB-style filter document.
fn parse_filter_value(param: &str, value: &Value) -> Result<FilterExpression> {
    match value {
        Value::Array(items) => Ok(FilterExpression::and(
            items
                .iter()
                .map(|item| parse_condition_item(param, item))
                .collect::<Result<Vec<_>>>()?,
        )),
        Value::Object(map) if map.contains_key("field") => parse_condition_item(param, value),
        Value::Object(map) => parse_mongo_filter(param, map),
        other => Err(DocQueryError::malformed(
            param,
            format!("expected a list of conditions or a filter document, got {other}"),
        )),
    }
}

/// One entry of a conditions list: a leaf or an `{and|or|nor: [...]}` node.
fn parse_condition_item(param: &str, item: &Value) -> Result<FilterExpression> {
    let object = item
        .as_object()
        .ok_or_else(|| DocQueryError::malformed(param, "conditions must be objects"))?;

    if object.len() == 1 {
        if let Some((key, children)) = object.iter().next() {
            if let Some(op) = LogicalOp::parse(key) {
                let children = logical_items(param, key, op, children)?;
                return Ok(FilterExpression::Logical {
                    op,
                    children: children
                        .iter()
                        .map(|child| parse_condition_item(param, child))
                        .collect::<Result<Vec<_>>>()?,
                });
            }
        }
    }

    let Some(field) = object.get("field").and_then(Value::as_str) else {
        if !object.contains_key("op") && !object.contains_key("value") {
            return parse_mongo_filter(param, object);
        }
        return Err(DocQueryError::malformed(param, "condition requires a 'field'"));
    };
    if field.is_empty() {
        return Err(DocQueryError::malformed(param, "condition field is empty"));
    }

    let comparator = match ["op", "operator", "comparator"]
        .iter()
        .find_map(|key| object.get(*key))
    {
        None => Comparator::Eq,
        Some(Value::String(name)) => Comparator::parse(name).ok_or_else(|| {
            DocQueryError::malformed(param, format!("unknown comparator '{name}'"))
        })?,
        Some(other) => {
            return Err(DocQueryError::malformed(
                param,
                format!("comparator must be a string, got {other}"),
            ))
        }
    };

    let value = match object.get("value") {
        Some(value) => value.clone(),
        None if comparator == Comparator::Exists => Value::Bool(true),
        None => {
            return Err(DocQueryError::malformed(
                param,
                format!("condition on '{field}' has no value"),
            ))
        }
    };
    leaf(param, field, comparator, value)
}

/// The operand list of a logical node. OR and NOR need at least one entry.
fn logical_items<'a>(
    param: &str,
    key: &str,
    op: LogicalOp,
    value: &'a Value,
) -> Result<&'a [Value]> {
    let items = value
        .as_array()
        .ok_or_else(|| DocQueryError::malformed(param, format!("'{key}' expects a list")))?;
    if items.is_empty() && op != LogicalOp::And {
        return Err(DocQueryError::malformed(
            param,
            format!("'{key}' needs at least one condition"),
        ));
    }
    Ok(items)
}

fn parse_mongo_filter(param: &str, map: &Map<String, Value>) -> Result<FilterExpression> {
    let mut children = Vec::new();
    for (key, condition) in map {
        if let Some(op) = LogicalOp::parse(key).filter(|_| key.starts_with('$')) {
            let items = logical_items(param, key, op, condition)?;
            let nested = items
                .iter()
                .map(|item| {
                    item.as_object()
                        .ok_or_else(|| {
                            DocQueryError::malformed(param, format!("'{key}' entries must be objects"))
                        })
                        .and_then(|m| parse_mongo_filter(param, m))
                })
                .collect::<Result<Vec<_>>>()?;
            children.push(FilterExpression::Logical {
                op,
                children: nested,
            });
        } else if key.starts_with('$') {
            return Err(DocQueryError::unsupported(format!("filter operator '{key}'")));
        } else if is_operator_document(condition) {
            children.extend(parse_operator_document(param, key, condition)?);
        } else {
            children.push(leaf(param, key, Comparator::Eq, condition.clone())?);
        }
    }
    Ok(FilterExpression::and(children))
}

fn is_operator_document(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            !map.is_empty() && as_date(value).is_none() && map.keys().all(|k| k.starts_with('$'))
        }
        _ => false,
    }
}

fn parse_operator_document(
    param: &str,
    field: &str,
    condition: &Value,
) -> Result<Vec<FilterExpression>> {
    let Some(operators) = condition.as_object() else {
        return Ok(Vec::new());
    };
    let options = operators.get("$options").and_then(Value::as_str);
    let mut out = Vec::new();
    for (op, arg) in operators {
        if op == "$options" {
            continue;
        }
        let comparator = Comparator::parse(op)
            .ok_or_else(|| DocQueryError::unsupported(format!("filter operator '{op}'")))?;
        let value = match (comparator, options) {
            (Comparator::Regex, Some(flags)) if !flags.is_empty() => match arg {
                Value::String(pattern) => Value::String(format!("(?{flags}){pattern}")),
                other => other.clone(),
            },
            _ => arg.clone(),
        };
        out.push(leaf(param, field, comparator, value)?);
    }
    Ok(out)
}

fn leaf(param: &str, field: &str, comparator: Comparator, value: Value) -> Result<FilterExpression> {
    if comparator.takes_list() && !value.is_array() {
        return Err(DocQueryError::malformed(
            param,
            format!("'{comparator}' on '{field}' expects a list"),
        ));
    }
    if comparator == Comparator::Regex && !value.is_string() {
        return Err(DocQueryError::malformed(
            param,
            format!("regex on '{field}' expects a string pattern"),
        ));
    }
    let normalized = normalize_condition_value(comparator, value.clone());
    Ok(FilterExpression::coerced(field, comparator, value, normalized))
}

// ---------------------------------------------------------------------------
// Sort and lists
// ---------------------------------------------------------------------------

fn parse_sort(param: &str, value: &Value) -> Result<Vec<SortKey>> {
    let direction = |raw: &Value| {
        SortDirection::parse(raw).ok_or_else(|| {
            DocQueryError::malformed(param, format!("invalid sort direction {raw}"))
        })
    };
    let from_name = |name: &str| match name.strip_prefix('-') {
        Some(field) => SortKey::descending(field),
        None => SortKey::ascending(name.trim_start_matches('+')),
    };

    match value {
        Value::String(name) => Ok(vec![from_name(name)]),
        Value::Object(map) if map.contains_key("field") => Ok(vec![sort_entry(param, value)?]),
        Value::Object(map) => map
            .iter()
            .map(|(field, dir)| {
                Ok(SortKey {
                    field: field.clone(),
                    direction: direction(dir)?,
                })
            })
            .collect(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(name) => Ok(from_name(name)),
                Value::Array(pair) if pair.len() == 2 => {
                    let field = pair[0].as_str().ok_or_else(|| {
                        DocQueryError::malformed(param, "sort pair must start with a field name")
                    })?;
                    Ok(SortKey {
                        field: field.to_string(),
                        direction: direction(&pair[1])?,
                    })
                }
                Value::Object(_) => sort_entry(param, item),
                other => Err(DocQueryError::malformed(
                    param,
                    format!("invalid sort entry {other}"),
                )),
            })
            .collect(),
        other => Err(DocQueryError::malformed(
            param,
            format!("invalid sort {other}"),
        )),
    }
}

fn sort_entry(param: &str, item: &Value) -> Result<SortKey> {
    let field = item
        .get("field")
        .and_then(Value::as_str)
        .ok_or_else(|| DocQueryError::malformed(param, "sort entry requires a 'field'"))?;
    let direction = match ["direction", "order", "dir"]
        .iter()
        .find_map(|key| item.get(*key))
    {
        None => SortDirection::Ascending,
        Some(raw) => SortDirection::parse(raw).ok_or_else(|| {
            DocQueryError::malformed(param, format!("invalid sort direction {raw}"))
        })?,
    };
    Ok(SortKey {
        field: field.to_string(),
        direction,
    })
}

fn string_list(param: &str, value: &Value) -> Result<Vec<String>> {
    match value {
        Value::String(text) => Ok(text
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    DocQueryError::malformed(param, "expected a list of field names")
                })
            })
            .collect(),
        other => Err(DocQueryError::malformed(
            param,
            format!("expected a list of field names, got {other}"),
        )),
    }
}
