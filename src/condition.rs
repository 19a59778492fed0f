//! Boolean-logic condition trees. Artifact rules carry their conditions as
//! JSON-logic documents; this module parses them into a small recursive AST
//! and evaluates that against the collated context map. No third-party
//! expression library — the operator set the artifacts use is small and the
//! semantics (inclusive range comparisons, substring, membership, neutral
//! unknowns) have to match the remote service exactly.

use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone)]
pub enum Expr {
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    /// Double negation: coerce to boolean.
    Truthy(Box<Expr>),
    /// Two operands, or three for an inclusive/exclusive chained range like
    /// `{"<": [0, {"var":"allocation"}, 50]}`.
    Compare(CompareOp, Vec<Expr>),
    /// Substring test when the haystack is a string, membership when it is
    /// a list.
    In(Box<Expr>, Box<Expr>),
    /// Dotted path lookup into the context; unknown paths evaluate to null.
    Var(String),
    Literal(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug)]
pub struct ConditionError(pub String);

impl fmt::Display for ConditionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid condition: {}", self.0)
    }
}

impl std::error::Error for ConditionError {}

impl Expr {
    /// Parse a JSON-logic document into an expression tree.
    pub fn parse(value: &Value) -> Result<Expr, ConditionError> {
        match value {
            Value::Object(map) => parse_operator(map),
            other => Ok(Expr::Literal(other.clone())),
        }
    }

    /// Evaluate against a context map, producing a JSON value. Boolean
    /// operators use JSON-logic truthiness (null, false, 0, "" and [] are
    /// falsy).
    pub fn evaluate(&self, context: &Map<String, Value>) -> Value {
        match self {
            Expr::And(operands) => {
                let mut last = Value::Bool(true);
                for operand in operands {
                    last = operand.evaluate(context);
                    if !truthy(&last) {
                        return last;
                    }
                }
                last
            }
            Expr::Or(operands) => {
                let mut last = Value::Bool(false);
                for operand in operands {
                    last = operand.evaluate(context);
                    if truthy(&last) {
                        return last;
                    }
                }
                last
            }
            Expr::Not(operand) => Value::Bool(!truthy(&operand.evaluate(context))),
            Expr::Truthy(operand) => Value::Bool(truthy(&operand.evaluate(context))),
            Expr::Compare(op, operands) => {
                let values: Vec<Value> =
                    operands.iter().map(|o| o.evaluate(context)).collect();
                Value::Bool(compare_chain(*op, &values))
            }
            Expr::In(needle, haystack) => {
                let needle = needle.evaluate(context);
                let haystack = haystack.evaluate(context);
                Value::Bool(contains(&needle, &haystack))
            }
            Expr::Var(path) => lookup(context, path),
            Expr::Literal(value) => value.clone(),
        }
    }

    /// Evaluate to a match verdict.
    pub fn matches(&self, context: &Map<String, Value>) -> bool {
        truthy(&self.evaluate(context))
    }
}

fn parse_operator(map: &Map<String, Value>) -> Result<Expr, ConditionError> {
    if map.len() != 1 {
        return Err(ConditionError(format!(
            "expected a single operator, found {} keys",
            map.len()
        )));
    }
    let (op, args) = map.iter().next().unwrap();
    match op.as_str() {
        "and" => Ok(Expr::And(parse_list(args)?)),
        "or" => Ok(Expr::Or(parse_list(args)?)),
        "!" => Ok(Expr::Not(Box::new(parse_unary(args)?))),
        "!!" => Ok(Expr::Truthy(Box::new(parse_unary(args)?))),
        "==" | "===" => parse_compare(CompareOp::Eq, args),
        "!=" | "!==" => parse_compare(CompareOp::Ne, args),
        "<" => parse_compare(CompareOp::Lt, args),
        "<=" => parse_compare(CompareOp::Le, args),
        ">" => parse_compare(CompareOp::Gt, args),
        ">=" => parse_compare(CompareOp::Ge, args),
        "in" => {
            let operands = parse_list(args)?;
            if operands.len() != 2 {
                return Err(ConditionError("'in' takes two operands".to_string()));
            }
            let mut iter = operands.into_iter();
            Ok(Expr::In(
                Box::new(iter.next().unwrap()),
                Box::new(iter.next().unwrap()),
            ))
        }
        "var" => parse_var(args),
        other => Err(ConditionError(format!("unsupported operator '{other}'"))),
    }
}

fn parse_list(args: &Value) -> Result<Vec<Expr>, ConditionError> {
    match args {
        Value::Array(items) => items.iter().map(Expr::parse).collect(),
        // JSON-logic allows a bare single argument.
        other => Ok(vec![Expr::parse(other)?]),
    }
}

fn parse_unary(args: &Value) -> Result<Expr, ConditionError> {
    let mut operands = parse_list(args)?;
    if operands.len() != 1 {
        return Err(ConditionError("unary operator takes one operand".to_string()));
    }
    Ok(operands.remove(0))
}

fn parse_compare(op: CompareOp, args: &Value) -> Result<Expr, ConditionError> {
    let operands = parse_list(args)?;
    let arity_ok = match op {
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
            operands.len() == 2 || operands.len() == 3
        }
        _ => operands.len() == 2,
    };
    if !arity_ok {
        return Err(ConditionError(format!(
            "comparison takes two (or three, for ranges) operands, found {}",
            operands.len()
        )));
    }
    Ok(Expr::Compare(op, operands))
}

fn parse_var(args: &Value) -> Result<Expr, ConditionError> {
    match args {
        Value::String(path) => Ok(Expr::Var(path.clone())),
        Value::Array(items) => match items.first() {
            Some(Value::String(path)) => Ok(Expr::Var(path.clone())),
            _ => Err(ConditionError("'var' needs a string path".to_string())),
        },
        _ => Err(ConditionError("'var' needs a string path".to_string())),
    }
}

/// JSON-logic truthiness.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

fn lookup(context: &Map<String, Value>, path: &str) -> Value {
    let mut current = context;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        match current.get(segment) {
            Some(Value::Object(inner)) if segments.peek().is_some() => current = inner,
            Some(value) if segments.peek().is_none() => return value.clone(),
            _ => return Value::Null,
        }
    }
    Value::Null
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

fn compare_pair(op: CompareOp, a: &Value, b: &Value) -> bool {
    match op {
        CompareOp::Eq => loose_eq(a, b),
        CompareOp::Ne => !loose_eq(a, b),
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
            match (as_number(a), as_number(b)) {
                (Some(x), Some(y)) => match op {
                    CompareOp::Lt => x < y,
                    CompareOp::Le => x <= y,
                    CompareOp::Gt => x > y,
                    CompareOp::Ge => x >= y,
                    _ => unreachable!(),
                },
                // Fall back to lexicographic ordering for string operands.
                _ => match (a.as_str(), b.as_str()) {
                    (Some(x), Some(y)) => match op {
                        CompareOp::Lt => x < y,
                        CompareOp::Le => x <= y,
                        CompareOp::Gt => x > y,
                        CompareOp::Ge => x >= y,
                        _ => unreachable!(),
                    },
                    _ => false,
                },
            }
        }
    }
}

fn compare_chain(op: CompareOp, values: &[Value]) -> bool {
    values
        .windows(2)
        .all(|pair| compare_pair(op, &pair[0], &pair[1]))
}

fn contains(needle: &Value, haystack: &Value) -> bool {
    match haystack {
        Value::String(text) => needle
            .as_str()
            .map(|needle| text.contains(needle))
            .unwrap_or(false),
        Value::Array(items) => items.iter().any(|item| loose_eq(item, needle)),
        _ => false,
    }
}
