// Keyword filter DSL: `field__suffix` mappings parsed into a typed expression

mod compile;

pub use compile::{compile, compile_flat};

use crate::error::{MongoliteError, Result};
use serde_json::Value;
use std::fmt;

/// Separator between a field path and its operator suffix.
pub const SUFFIX_DELIMITER: &str = "__";

pub const OR_KEY: &str = "$or";
pub const AND_KEY: &str = "$and";

/// Comparison selected by a key suffix. A key without a suffix is `Eq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Contains,
    IContains,
    StartsWith,
    EndsWith,
    Exists,
    Regex,
}

impl Operator {
    pub const ALL: [Operator; 14] = [
        Operator::Eq,
        Operator::Ne,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::In,
        Operator::Nin,
        Operator::Contains,
        Operator::IContains,
        Operator::StartsWith,
        Operator::EndsWith,
        Operator::Exists,
        Operator::Regex,
    ];

    pub fn from_suffix(suffix: &str) -> Option<Operator> {
        Operator::ALL.into_iter().find(|op| op.suffix() == suffix)
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::In => "in",
            Operator::Nin => "nin",
            Operator::Contains => "contains",
            Operator::IContains => "icontains",
            Operator::StartsWith => "startswith",
            Operator::EndsWith => "endswith",
            Operator::Exists => "exists",
            Operator::Regex => "regex",
        }
    }

    /// Operators compiled to an escaped `$regex`.
    pub fn is_text_match(&self) -> bool {
        matches!(
            self,
            Operator::Contains | Operator::IContains | Operator::StartsWith | Operator::EndsWith
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Typed filter tree built from the flat keyword mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    Comparison {
        field: String,
        op: Operator,
        value: Value,
    },
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
}

impl FilterExpr {
    pub fn comparison(field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        FilterExpr::Comparison {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Parse a flat mapping such as `{"age__gte": 30, "$or": [...]}`.
    /// Top-level keys are AND-ed.
    pub fn parse(mapping: &Value) -> Result<FilterExpr> {
        let object = mapping.as_object().ok_or_else(|| {
            MongoliteError::MalformedFilter(format!("filter must be an object, got {mapping}"))
        })?;

        let mut clauses = Vec::with_capacity(object.len());
        for (key, value) in object {
            clauses.push(parse_entry(key, value)?);
        }

        Ok(match clauses.len() {
            1 => clauses.remove(0),
            _ => FilterExpr::And(clauses),
        })
    }

    /// Whether the expression matches everything.
    pub fn is_empty(&self) -> bool {
        matches!(self, FilterExpr::And(c) if c.is_empty())
    }
}

fn parse_entry(key: &str, value: &Value) -> Result<FilterExpr> {
    if key == OR_KEY || key == AND_KEY {
        return parse_group(key, value);
    }
    if key.starts_with('$') {
        return Err(MongoliteError::UnknownOperator { key: key.to_string() });
    }

    let (field, op) = split_key(key)?;
    check_operand(key, op, value)?;

    Ok(FilterExpr::Comparison {
        field: field.to_string(),
        op,
        value: value.clone(),
    })
}

fn parse_group(key: &str, value: &Value) -> Result<FilterExpr> {
    let items = value.as_array().ok_or_else(|| {
        MongoliteError::MalformedFilter(format!("'{key}' expects a list of filter mappings"))
    })?;
    if items.is_empty() {
        return Err(MongoliteError::MalformedFilter(format!(
            "'{key}' must not be an empty list"
        )));
    }

    let children = items
        .iter()
        .map(FilterExpr::parse)
        .collect::<Result<Vec<_>>>()?;

    Ok(if key == OR_KEY {
        FilterExpr::Or(children)
    } else {
        FilterExpr::And(children)
    })
}

/// Split `field__op`. A tail that is not a known operator is an error;
/// single underscores never split.
fn split_key(key: &str) -> Result<(&str, Operator)> {
    let (field, op) = match key.rsplit_once(SUFFIX_DELIMITER) {
        Some((field, suffix)) => match Operator::from_suffix(suffix) {
            Some(op) => (field, op),
            None => return Err(MongoliteError::UnknownOperator { key: key.to_string() }),
        },
        None => (key, Operator::Eq),
    };

    if field.is_empty() || field.starts_with('.') || field.ends_with('.') || field.contains("..") {
        return Err(MongoliteError::MalformedFilter(format!(
            "'{key}' does not name a field"
        )));
    }
    Ok((field, op))
}

fn check_operand(key: &str, op: Operator, value: &Value) -> Result<()> {
    let problem = match op {
        Operator::In | Operator::Nin if !value.is_array() => Some("expects a list"),
        Operator::Exists if !value.is_boolean() => Some("expects a boolean"),
        Operator::Regex => match value.as_str() {
            Some(pattern) if regex::Regex::new(pattern).is_err() => Some("is not a valid regex"),
            Some(_) => None,
            None => Some("expects a string pattern"),
        },
        op if op.is_text_match() && !(value.is_string() || value.is_number()) => {
            Some("expects a string")
        }
        _ => None,
    };

    match problem {
        Some(msg) => Err(MongoliteError::MalformedFilter(format!("'{key}' {msg}"))),
        None => Ok(()),
    }
}

/// A parsed filter, AND-combining its clauses. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<FilterExpr>,
}

impl Filter {
    pub fn all() -> Self {
        Filter::default()
    }

    /// Parse a flat keyword mapping.
    pub fn parse(mapping: &Value) -> Result<Self> {
        let expr = FilterExpr::parse(mapping)?;
        Ok(Filter::from(expr))
    }

    /// A single `key` condition, e.g. `Filter::field("age__gte", 30)`.
    pub fn field(key: &str, value: impl Into<Value>) -> Result<Self> {
        let expr = parse_entry(key, &value.into())?;
        Ok(Filter::from(expr))
    }

    /// Combine with another filter. Neither input is modified.
    pub fn and(&self, other: &Filter) -> Filter {
        let mut clauses = self.clauses.clone();
        clauses.extend(other.clauses.iter().cloned());
        Filter { clauses }
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clauses(&self) -> &[FilterExpr] {
        &self.clauses
    }

    pub fn to_expr(&self) -> FilterExpr {
        match self.clauses.as_slice() {
            [single] => single.clone(),
            clauses => FilterExpr::And(clauses.to_vec()),
        }
    }
}

impl From<FilterExpr> for Filter {
    fn from(expr: FilterExpr) -> Self {
        match expr {
            FilterExpr::And(clauses) => Filter { clauses },
            other => Filter {
                clauses: vec![other],
            },
        }
    }
}

impl TryFrom<Value> for Filter {
    type Error = MongoliteError;

    fn try_from(value: Value) -> Result<Self> {
        Filter::parse(&value)
    }
}
