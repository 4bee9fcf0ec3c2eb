//! Computed-field expressions.

use crate::db::as_date;
use crate::error::{DocQueryError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Operator applied to a list of argument expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExprOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Mod,
    Concat,
    ToUpper,
    ToLower,
    IfNull,
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    And,
    Or,
    Not,
}

impl ExprOp {
    fn parse(name: &str) -> Option<Self> {
        let op = match name {
            "$add" => Self::Add,
            "$subtract" => Self::Subtract,
            "$multiply" => Self::Multiply,
            "$divide" => Self::Divide,
            "$mod" => Self::Mod,
            "$concat" => Self::Concat,
            "$toUpper" => Self::ToUpper,
            "$toLower" => Self::ToLower,
            "$ifNull" => Self::IfNull,
            "$eq" => Self::Eq,
            "$ne" => Self::Ne,
            "$gt" => Self::Gt,
            "$gte" => Self::Gte,
            "$lt" => Self::Lt,
            "$lte" => Self::Lte,
            "$and" => Self::And,
            "$or" => Self::Or,
            "$not" => Self::Not,
            _ => return None,
        };
        Some(op)
    }

    /// The aggregation operator name.
    pub fn operator(&self) -> &'static str {
        match self {
            Self::Add => "$add",
            Self::Subtract => "$subtract",
            Self::Multiply => "$multiply",
            Self::Divide => "$divide",
            Self::Mod => "$mod",
            Self::Concat => "$concat",
            Self::ToUpper => "$toUpper",
            Self::ToLower => "$toLower",
            Self::IfNull => "$ifNull",
            Self::Eq => "$eq",
            Self::Ne => "$ne",
            Self::Gt => "$gt",
            Self::Gte => "$gte",
            Self::Lt => "$lt",
            Self::Lte => "$lte",
            Self::And => "$and",
            Self::Or => "$or",
            Self::Not => "$not",
        }
    }

    /// Accepted argument counts as (min, max).
    fn arity(&self) -> (usize, usize) {
        match self {
            Self::Add | Self::Multiply | Self::Concat | Self::And | Self::Or => (1, usize::MAX),
            Self::Subtract
            | Self::Divide
            | Self::Mod
            | Self::IfNull
            | Self::Eq
            | Self::Ne
            | Self::Gt
            | Self::Gte
            | Self::Lt
            | Self::Lte => (2, 2),
            Self::ToUpper | Self::ToLower | Self::Not => (1, 1),
        }
    }
}

/// An expression evaluated per document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    /// Value at a field path of the current document.
    Field { path: String },
    /// Constant value.
    Literal { value: Value },
    /// Document built from named sub-expressions.
    Object { fields: Vec<(String, Expr)> },
    Apply { op: ExprOp, args: Vec<Expr> },
    Cond {
        test: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

impl Expr {
    /// Field reference shorthand.
    pub fn field(path: impl Into<String>) -> Self {
        Self::Field { path: path.into() }
    }

    /// Literal shorthand.
    pub fn literal(value: Value) -> Self {
        Self::Literal { value }
    }

    /// Returns true if the value is written in expression syntax rather
    /// than as a plain inclusion flag or constant.
    pub fn is_expression(value: &Value) -> bool {
        match value {
            Value::String(text) => text.starts_with('$') && !text.starts_with("$$"),
            Value::Object(map) => {
                as_date(value).is_none()
                    && map.len() == 1
                    && map.keys().all(|key| key.starts_with('$'))
            }
            _ => false,
        }
    }

    /// Parses aggregation expression syntax.
    pub fn parse(value: &Value) -> Result<Self> {
        match value {
            Value::String(text) if text.starts_with("$$") => Err(DocQueryError::malformed(
                "expression",
                format!("variables such as '{text}' are not supported"),
            )),
            Value::String(text) if text.starts_with('$') => {
                let path = &text[1..];
                if path.is_empty() {
                    return Err(DocQueryError::malformed("expression", "empty field reference"));
                }
                Ok(Self::field(path))
            }
            Value::Object(map) if as_date(value).is_none() && Self::is_expression(value) => {
                let Some((name, arg)) = map.iter().next() else {
                    return Ok(Self::literal(value.clone()));
                };
                Self::parse_operator(name, arg)
            }
            Value::Object(map) if as_date(value).is_none() => {
                if let Some(key) = map.keys().find(|key| key.starts_with('$')) {
                    return Err(DocQueryError::malformed(
                        "expression",
                        format!("operator '{key}' must be the only key of its document"),
                    ));
                }
                let fields = map
                    .iter()
                    .map(|(key, sub)| Ok((key.clone(), Self::parse(sub)?)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Self::Object { fields })
            }
            other => Ok(Self::literal(other.clone())),
        }
    }

    fn parse_operator(name: &str, arg: &Value) -> Result<Self> {
        match name {
            "$literal" => Ok(Self::literal(arg.clone())),
            "$cond" => {
                let parts = match arg {
                    Value::Array(items) if items.len() == 3 => {
                        [items[0].clone(), items[1].clone(), items[2].clone()]
                    }
                    Value::Object(map) => {
                        let part = |key: &str| {
                            map.get(key).cloned().ok_or_else(|| {
                                DocQueryError::malformed("expression", format!("$cond requires '{key}'"))
                            })
                        };
                        [part("if")?, part("then")?, part("else")?]
                    }
                    _ => {
                        return Err(DocQueryError::malformed(
                            "expression",
                            "$cond takes [if, then, else] or {if, then, else}",
                        ))
                    }
                };
                let [test, then, otherwise] = parts;
                Ok(Self::Cond {
                    test: Box::new(Self::parse(&test)?),
                    then: Box::new(Self::parse(&then)?),
                    otherwise: Box::new(Self::parse(&otherwise)?),
                })
            }
            _ => {
                let op = ExprOp::parse(name).ok_or_else(|| {
                    DocQueryError::malformed("expression", format!("unsupported operator '{name}'"))
                })?;
                let args = match arg {
                    Value::Array(items) => items.iter().map(Self::parse).collect::<Result<Vec<_>>>()?,
                    single => vec![Self::parse(single)?],
                };
                let (min, max) = op.arity();
                if args.len() < min || args.len() > max {
                    return Err(DocQueryError::malformed(
                        "expression",
                        format!("{name} does not accept {} argument(s)", args.len()),
                    ));
                }
                Ok(Self::Apply { op, args })
            }
        }
    }

    /// Field paths this expression reads, in first-seen order.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Field { path } => {
                if !out.contains(&path.as_str()) {
                    out.push(path);
                }
            }
            Self::Literal { .. } => {}
            Self::Object { fields } => fields.iter().for_each(|(_, e)| e.collect_fields(out)),
            Self::Apply { args, .. } => args.iter().for_each(|e| e.collect_fields(out)),
            Self::Cond {
                test,
                then,
                otherwise,
            } => {
                test.collect_fields(out);
                then.collect_fields(out);
                otherwise.collect_fields(out);
            }
        }
    }

    /// Renders the expression back into aggregation syntax.
    pub fn render(&self) -> Value {
        match self {
            Self::Field { path } => Value::String(format!("${path}")),
            Self::Literal { value } => match value {
                Value::String(text) if text.starts_with('$') => literal_wrapper(value),
                Value::Object(_) | Value::Array(_) => literal_wrapper(value),
                other => other.clone(),
            },
            Self::Object { fields } => Value::Object(
                fields
                    .iter()
                    .map(|(key, e)| (key.clone(), e.render()))
                    .collect(),
            ),
            Self::Apply { op, args } => {
                let mut map = Map::new();
                map.insert(
                    op.operator().to_string(),
                    Value::Array(args.iter().map(Self::render).collect()),
                );
                Value::Object(map)
            }
            Self::Cond {
                test,
                then,
                otherwise,
            } => {
                let mut body = Map::new();
                body.insert("if".to_string(), test.render());
                body.insert("then".to_string(), then.render());
                body.insert("else".to_string(), otherwise.render());
                let mut map = Map::new();
                map.insert("$cond".to_string(), Value::Object(body));
                Value::Object(map)
            }
        }
    }
}

fn literal_wrapper(value: &Value) -> Value {
    let mut map = Map::new();
    map.insert("$literal".to_string(), value.clone());
    Value::Object(map)
}
