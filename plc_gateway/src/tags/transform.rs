use crate::tags::structures::{Tag, ValueVariant};
use dashmap::DashSet;
use evalexpr::Value;
use tracing::warn;

/// Token replaced by the raw reading inside a transform expression.
pub const VALUE_PLACEHOLDER: &str = "{value}";

/// Applies per-tag transform expressions to raw readings.
///
/// Failures never propagate: the raw value is returned and the first
/// failure for each tag/expression pair is logged.
#[derive(Debug, Default)]
pub struct ValueTransformer {
    reported: DashSet<(String, String)>,
}

impl ValueTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, tag: &Tag, raw: ValueVariant) -> ValueVariant {
        let Some(expression) = tag.transform.as_deref() else {
            return raw;
        };
        if expression.trim().is_empty() {
            return raw;
        }
        match evaluate(expression, &raw)
            .and_then(to_variant)
            .and_then(|value| {
                value
                    .coerce_to(tag.data_type)
                    .ok_or_else(|| format!("result cannot be converted to {:?}", tag.data_type))
            }) {
            Ok(value) => value,
            Err(reason) => {
                let key = (tag.name.clone(), expression.to_string());
                if self.reported.insert(key) {
                    warn!(
                        "Transform '{}' failed for tag '{}': {}. Using raw value.",
                        expression, tag.name, reason
                    );
                }
                raw
            }
        }
    }

    /// Number of distinct failures seen so far.
    pub fn failure_count(&self) -> usize {
        self.reported.len()
    }
}

/// Substitute the reading into `expression` and evaluate it.
pub fn evaluate(expression: &str, raw: &ValueVariant) -> Result<Value, String> {
    let literal = render_literal(raw)?;
    let formula = expression.replace(VALUE_PLACEHOLDER, &literal);
    evalexpr::eval(&formula).map_err(|e| e.to_string())
}

fn render_literal(raw: &ValueVariant) -> Result<String, String> {
    let literal = match raw {
        ValueVariant::Null => "()".to_string(),
        ValueVariant::Bool(b) => b.to_string(),
        ValueVariant::Int(i) if *i < 0 => format!("({})", i),
        ValueVariant::Int(i) => i.to_string(),
        ValueVariant::UInt(u) => match i64::try_from(*u) {
            Ok(i) => i.to_string(),
            Err(_) => render_float(*u as f64)?,
        },
        ValueVariant::Float(f) => render_float(*f)?,
        ValueVariant::String(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        ValueVariant::DateTime(dt) => dt.timestamp_millis().to_string(),
    };
    Ok(literal)
}

fn render_float(f: f64) -> Result<String, String> {
    if !f.is_finite() {
        return Err(format!("non-finite reading {}", f));
    }
    // Keep a fractional part so evalexpr treats the literal as a float.
    let text = if f.fract() == 0.0 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    };
    Ok(if f < 0.0 { format!("({})", text) } else { text })
}

fn to_variant(value: Value) -> Result<ValueVariant, String> {
    match value {
        Value::Boolean(b) => Ok(ValueVariant::Bool(b)),
        Value::Int(i) => Ok(ValueVariant::Int(i)),
        Value::Float(f) => Ok(ValueVariant::Float(f)),
        Value::String(s) => Ok(ValueVariant::String(s)),
        Value::Empty => Err("expression produced no value".to_string()),
        other => Err(format!("unsupported expression result {:?}", other)),
    }
}
