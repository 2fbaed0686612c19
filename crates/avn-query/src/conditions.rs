// SPDX-License-Identifier: MIT OR Apache-2.0
//! Conjunctive `where` conditions.
//!
//! A clause like `status = active, priority >= 3` parses into
//! conditions evaluated against a payload (dotted paths) plus the
//! pseudo-fields `slug` and `project`.

use avn_core::{EngineError, paths};
use regex::Regex;
use serde_json::Value;

/// Comparison operator of one condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOp {
    /// `=` / `==`
    Eq,
    /// `!=` / `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `contains`
    Contains,
    /// `!contains`
    NotContains,
    /// `in`
    In,
    /// `not in`
    NotIn,
    /// `~` / `matches` / `regex`
    Matches,
}

/// One parsed condition.
#[derive(Debug, Clone)]
pub struct Condition {
    /// Dotted payload path, or the pseudo-fields `slug` / `project`.
    pub field: String,
    /// Operator.
    pub op: ConditionOp,
    /// Right-hand side, verbatim.
    pub value: String,
}

// Textual operators are matched space-delimited, longest first, so
// `not in` wins over `in` and `!contains` over `contains`.
const TEXTUAL_OPS: &[(&str, ConditionOp)] = &[
    ("not in", ConditionOp::NotIn),
    ("!contains", ConditionOp::NotContains),
    ("contains", ConditionOp::Contains),
    ("matches", ConditionOp::Matches),
    ("regex", ConditionOp::Matches),
    ("in", ConditionOp::In),
];

const SYMBOLIC_OPS: &[(&str, ConditionOp)] = &[
    ("==", ConditionOp::Eq),
    ("!=", ConditionOp::Ne),
    ("<>", ConditionOp::Ne),
    ("<=", ConditionOp::Lte),
    (">=", ConditionOp::Gte),
    ("=", ConditionOp::Eq),
    ("<", ConditionOp::Lt),
    (">", ConditionOp::Gt),
    ("~", ConditionOp::Matches),
];

/// Parse a comma-separated conjunctive clause.
///
/// # Errors
///
/// `invalid_argument` when a condition has no recognizable operator or
/// an empty side.
pub fn parse_conditions(clause: &str) -> Result<Vec<Condition>, EngineError> {
    let mut conditions = Vec::new();
    for part in clause.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        conditions.push(parse_one(part)?);
    }
    Ok(conditions)
}

fn parse_one(input: &str) -> Result<Condition, EngineError> {
    for (token, op) in TEXTUAL_OPS {
        let needle = format!(" {token} ");
        if let Some(index) = input.find(&needle) {
            let field = input[..index].trim();
            let value = input[index + needle.len()..].trim();
            return build(field, *op, value, input);
        }
    }
    for (token, op) in SYMBOLIC_OPS {
        if let Some(index) = input.find(token) {
            let field = input[..index].trim();
            let value = input[index + token.len()..].trim();
            return build(field, *op, value, input);
        }
    }
    Err(EngineError::invalid_argument(format!(
        "condition '{input}' has no recognizable operator"
    )))
}

fn build(field: &str, op: ConditionOp, value: &str, input: &str) -> Result<Condition, EngineError> {
    if field.is_empty() || value.is_empty() {
        return Err(EngineError::invalid_argument(format!(
            "condition '{input}' is incomplete"
        )));
    }
    Ok(Condition {
        field: field.to_string(),
        op,
        value: trim_quotes(value).to_string(),
    })
}

fn trim_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2
        && (bytes[0] == b'"' || bytes[0] == b'\'')
        && bytes[bytes.len() - 1] == bytes[0]
    {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

impl Condition {
    /// Evaluate against a payload; `slug` and `project` come from the
    /// surrounding record.
    #[must_use]
    pub fn matches(&self, payload: &Value, slug: &str, project: &str) -> bool {
        let target: Option<Value> = match self.field.as_str() {
            "slug" | "entity" => Some(Value::String(slug.to_string())),
            "project" => Some(Value::String(project.to_string())),
            path => paths::get(payload, path).cloned(),
        };
        self.eval(target.as_ref())
    }

    fn eval(&self, target: Option<&Value>) -> bool {
        let Some(target) = target else {
            // Absent fields only satisfy negative operators.
            return matches!(self.op, ConditionOp::Ne | ConditionOp::NotContains | ConditionOp::NotIn);
        };
        match self.op {
            ConditionOp::Eq => loose_eq(target, &self.value),
            ConditionOp::Ne => !loose_eq(target, &self.value),
            ConditionOp::Lt => numeric(target, &self.value).is_some_and(|(a, b)| a < b),
            ConditionOp::Lte => numeric(target, &self.value).is_some_and(|(a, b)| a <= b),
            ConditionOp::Gt => numeric(target, &self.value).is_some_and(|(a, b)| a > b),
            ConditionOp::Gte => numeric(target, &self.value).is_some_and(|(a, b)| a >= b),
            ConditionOp::Contains => contains(target, &self.value),
            ConditionOp::NotContains => !contains(target, &self.value),
            ConditionOp::In => in_list(target, &self.value),
            ConditionOp::NotIn => !in_list(target, &self.value),
            ConditionOp::Matches => Regex::new(&self.value)
                .map(|re| re.is_match(&stringify(target)))
                .unwrap_or(false),
        }
    }
}

/// Render a JSON value the way conditions and templates see it.
#[must_use]
pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn loose_eq(target: &Value, rhs: &str) -> bool {
    if let (Some(a), Ok(b)) = (target.as_f64(), rhs.parse::<f64>()) {
        return a == b;
    }
    stringify(target) == rhs
}

fn numeric(target: &Value, rhs: &str) -> Option<(f64, f64)> {
    let lhs = match target {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.parse().ok()?,
        _ => return None,
    };
    Some((lhs, rhs.parse().ok()?))
}

fn contains(target: &Value, rhs: &str) -> bool {
    match target {
        Value::String(s) => s.contains(rhs),
        Value::Array(items) => items.iter().any(|item| loose_eq(item, rhs)),
        _ => false,
    }
}

fn in_list(target: &Value, rhs: &str) -> bool {
    let list = rhs.trim_start_matches('[').trim_end_matches(']');
    let needle = stringify(target);
    list.split(',')
        .map(|item| trim_quotes(item.trim()))
        .any(|item| item == needle)
}
