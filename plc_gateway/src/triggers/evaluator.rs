//! Condition matching for trigger tags.
//!
//! A condition is an optional comparison operator followed by a literal,
//! e.g. `>= 10`, `!= "IDLE"`, `true`. An empty condition tests the value's
//! truthiness.

use crate::tags::structures::ValueVariant;

/// Threshold below which a number counts as zero.
pub const ZERO_EPSILON: f64 = 1e-4;
/// Tolerance for numeric equality.
pub const EQUALITY_TOLERANCE: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Ge,
    Le,
    Ne,
    Eq,
    Gt,
    Lt,
}

// Longest operators first so ">=" wins over ">".
const OPERATORS: &[(&str, Operator)] = &[
    (">=", Operator::Ge),
    ("<=", Operator::Le),
    ("!=", Operator::Ne),
    ("==", Operator::Eq),
    (">", Operator::Gt),
    ("<", Operator::Lt),
    ("=", Operator::Eq),
];

/// Split a condition into its operator and target literal.
pub fn parse_condition(condition: &str) -> (Operator, ValueVariant) {
    let condition = condition.trim();
    let (op, rest) = OPERATORS
        .iter()
        .find_map(|(token, op)| condition.strip_prefix(token).map(|rest| (*op, rest)))
        .unwrap_or((Operator::Eq, condition));
    (op, parse_literal(rest.trim()))
}

/// Literal preference: bool keyword, null, number, quoted string, raw text.
pub fn parse_literal(text: &str) -> ValueVariant {
    if text.eq_ignore_ascii_case("true") {
        return ValueVariant::Bool(true);
    }
    if text.eq_ignore_ascii_case("false") {
        return ValueVariant::Bool(false);
    }
    if text.eq_ignore_ascii_case("null") {
        return ValueVariant::Null;
    }
    if let Ok(number) = text.parse::<f64>() {
        return ValueVariant::Float(number);
    }
    for quote in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            return ValueVariant::String(text[1..text.len() - 1].to_string());
        }
    }
    ValueVariant::String(text.to_string())
}

/// Does `value` satisfy `condition`?
pub fn evaluate(value: &ValueVariant, condition: Option<&str>) -> bool {
    match condition {
        Some(c) if !c.trim().is_empty() => {
            let (op, target) = parse_condition(c);
            compare(value, op, &target)
        }
        _ => is_truthy(value),
    }
}

pub fn is_truthy(value: &ValueVariant) -> bool {
    match value {
        ValueVariant::Null => false,
        ValueVariant::Bool(b) => *b,
        ValueVariant::Int(i) => (*i as f64).abs() > ZERO_EPSILON,
        ValueVariant::UInt(u) => (*u as f64) > ZERO_EPSILON,
        ValueVariant::Float(f) => f.abs() > ZERO_EPSILON,
        ValueVariant::String(s) => !(s.is_empty() || s.eq_ignore_ascii_case("false") || s == "0"),
        ValueVariant::DateTime(_) => true,
    }
}

/// Numeric reading of a value; booleans are not numbers here.
fn numeric(value: &ValueVariant) -> Option<f64> {
    match value {
        ValueVariant::Bool(_) => None,
        other => other.as_f64().filter(|f| f.is_finite()),
    }
}

pub fn compare(value: &ValueVariant, op: Operator, target: &ValueVariant) -> bool {
    if value.is_null() || target.is_null() {
        let both_null = value.is_null() && target.is_null();
        return match op {
            Operator::Eq => both_null,
            Operator::Ne => !both_null,
            _ => false,
        };
    }

    if let (Some(a), Some(b)) = (numeric(value), numeric(target)) {
        return match op {
            Operator::Eq => (a - b).abs() < EQUALITY_TOLERANCE,
            Operator::Ne => (a - b).abs() >= EQUALITY_TOLERANCE,
            Operator::Gt => a > b,
            Operator::Lt => a < b,
            Operator::Ge => a >= b,
            Operator::Le => a <= b,
        };
    }

    let equal = value.to_string().to_lowercase() == target.to_string().to_lowercase();
    match op {
        Operator::Eq => equal,
        Operator::Ne => !equal,
        _ => false,
    }
}
