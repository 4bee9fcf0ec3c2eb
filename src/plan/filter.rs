//! Filter expression trees.

use crate::error::{DocQueryError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Leaf comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Regex,
    Exists,
}

impl Comparator {
    /// Parses a comparator name or symbolic alias (`>=`, `$gte`, `gte`, ...).
    pub fn parse(text: &str) -> Option<Self> {
        let lowered = text.trim().to_ascii_lowercase();
        let name = lowered.strip_prefix('$').unwrap_or(&lowered);
        let comparator = match name {
            "eq" | "=" | "==" | "equals" => Self::Eq,
            "ne" | "!=" | "<>" | "neq" | "not_equals" => Self::Ne,
            "gt" | ">" => Self::Gt,
            "gte" | ">=" | "ge" => Self::Gte,
            "lt" | "<" => Self::Lt,
            "lte" | "<=" | "le" => Self::Lte,
            "in" => Self::In,
            "nin" | "not_in" => Self::Nin,
            "regex" | "like" | "matches" => Self::Regex,
            "exists" => Self::Exists,
            _ => return None,
        };
        Some(comparator)
    }

    /// The MongoDB query operator for this comparator.
    pub fn operator(&self) -> &'static str {
        match self {
            Self::Eq => "$eq",
            Self::Ne => "$ne",
            Self::Gt => "$gt",
            Self::Gte => "$gte",
            Self::Lt => "$lt",
            Self::Lte => "$lte",
            Self::In => "$in",
            Self::Nin => "$nin",
            Self::Regex => "$regex",
            Self::Exists => "$exists",
        }
    }

    /// Ordering comparators; their operands are coerced to numbers or dates.
    pub fn is_range(&self) -> bool {
        matches!(self, Self::Gt | Self::Gte | Self::Lt | Self::Lte)
    }

    /// Comparators whose operand is a list of candidate values.
    pub fn takes_list(&self) -> bool {
        matches!(self, Self::In | Self::Nin)
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.operator()[1..])
    }
}

/// Boolean combinator of an interior node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOp {
    And,
    Or,
    Nor,
}

impl LogicalOp {
    /// Parses `and`, `$or`, `NOR`, ...
    pub fn parse(text: &str) -> Option<Self> {
        let lowered = text.trim().to_ascii_lowercase();
        match lowered.strip_prefix('$').unwrap_or(&lowered) {
            "and" => Some(Self::And),
            "or" => Some(Self::Or),
            "nor" => Some(Self::Nor),
            _ => None,
        }
    }

    /// The MongoDB query operator for this combinator.
    pub fn operator(&self) -> &'static str {
        match self {
            Self::And => "$and",
            Self::Or => "$or",
            Self::Nor => "$nor",
        }
    }
}

/// A filter over documents: comparison leaves joined by logical nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterExpression {
    Condition {
        field: String,
        comparator: Comparator,
        value: Value,
        /// The operand as written, present while `value` holds a coerced form.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        original: Option<Value>,
    },
    Logical {
        op: LogicalOp,
        children: Vec<FilterExpression>,
    },
}

impl FilterExpression {
    /// Creates a comparison leaf.
    pub fn condition(field: impl Into<String>, comparator: Comparator, value: Value) -> Self {
        Self::Condition {
            field: field.into(),
            comparator,
            value,
            original: None,
        }
    }

    /// Creates a comparison leaf whose operand was coerced from `original`.
    pub fn coerced(
        field: impl Into<String>,
        comparator: Comparator,
        original: Value,
        value: Value,
    ) -> Self {
        let original = (original != value).then_some(original);
        Self::Condition {
            field: field.into(),
            comparator,
            value,
            original,
        }
    }

    /// Creates an AND node.
    pub fn and(children: Vec<FilterExpression>) -> Self {
        Self::Logical {
            op: LogicalOp::And,
            children,
        }
    }

    /// Creates an OR node.
    pub fn or(children: Vec<FilterExpression>) -> Self {
        Self::Logical {
            op: LogicalOp::Or,
            children,
        }
    }

    /// Normalizes the tree.
    ///
    /// Returns `None` when the filter matches every document: an empty AND,
    /// or an OR with a match-all child. AND drops match-all children,
    /// single-child AND/OR nodes collapse into their child and nested nodes
    /// with the same AND/OR combinator are flattened. A NOR over a match-all
    /// child can never match and is refused, as is an OR or NOR without
    /// children.
    pub fn simplify(self) -> Result<Option<Self>> {
        let (op, children) = match self {
            Self::Condition { .. } => return Ok(Some(self)),
            Self::Logical { op, children } => (op, children),
        };
        if children.is_empty() && op != LogicalOp::And {
            return Err(DocQueryError::malformed(
                "filter",
                format!("{} needs at least one condition", op.operator()),
            ));
        }

        let mut flat = Vec::with_capacity(children.len());
        for child in children {
            match (op, child.simplify()?) {
                (LogicalOp::Or, None) => return Ok(None),
                (LogicalOp::Nor, None) => {
                    return Err(DocQueryError::malformed(
                        "filter",
                        "$nor over an empty condition matches no document",
                    ))
                }
                (_, None) => {}
                (
                    LogicalOp::And | LogicalOp::Or,
                    Some(Self::Logical {
                        op: inner,
                        children: grandchildren,
                    }),
                ) if inner == op => flat.extend(grandchildren),
                (_, Some(other)) => flat.push(other),
            }
        }
        Ok(match (op, flat.len()) {
            (_, 0) => None,
            (LogicalOp::And | LogicalOp::Or, 1) => flat.pop(),
            _ => Some(Self::Logical { op, children: flat }),
        })
    }

    /// Field paths referenced by leaves, in first-seen order without repeats.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.visit(&mut |field, _, _| {
            if !out.contains(&field) {
                out.push(field);
            }
        });
        out
    }

    /// Calls `f` for every leaf.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a str, Comparator, &'a Value)) {
        match self {
            Self::Condition {
                field,
                comparator,
                value,
                ..
            } => f(field, *comparator, value),
            Self::Logical { children, .. } => {
                for child in children {
                    child.visit(f);
                }
            }
        }
    }

    /// Calls `f` for every leaf with its operand and the text it was coerced
    /// from, allowing both to be rewritten.
    pub fn visit_values_mut(
        &mut self,
        f: &mut impl FnMut(&str, Comparator, &mut Value, &mut Option<Value>),
    ) {
        match self {
            Self::Condition {
                field,
                comparator,
                value,
                original,
            } => f(field, *comparator, value, original),
            Self::Logical { children, .. } => {
                for child in children {
                    child.visit_values_mut(f);
                }
            }
        }
    }

    /// Number of comparison leaves.
    pub fn leaf_count(&self) -> usize {
        let mut count = 0;
        self.visit(&mut |_, _, _| count += 1);
        count
    }
}
