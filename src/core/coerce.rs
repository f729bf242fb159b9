//! Coercion matrix between port data types
//!
//! | from \ to  | number | string | boolean | object | T[]            |
//! |------------|--------|--------|---------|--------|----------------|
//! | number     | =      | text   | != 0    | -      | singleton      |
//! | string     | parse  | =      | parse   | JSON   | singleton      |
//! | boolean    | 1 / 0  | text   | =       | -      | singleton      |
//! | object     | -      | JSON   | -       | =      | -              |
//! | U[]        | -      | lines  | -       | -      | element-wise   |
//!
//! `any` on the target side passes values through unchanged. Audio, image and
//! control-flow only coerce to themselves (or into a singleton array of
//! themselves). Every other pair is a [`TypeMismatch`].

use super::value::{DataType, Value};
use crate::error::TypeMismatch;

/// Coerce `value` to `target`, failing when no rule applies.
pub fn coerce(value: &Value, target: &DataType, port: &str) -> Result<Value, TypeMismatch> {
    if value.conforms_to(target) {
        return Ok(value.clone());
    }

    let mismatch = || TypeMismatch::new(value.data_type(), target.clone(), port);

    match (value, target) {
        (_, DataType::String) => to_text(value).map(Value::String).ok_or_else(mismatch),
        (Value::Number(n), DataType::Boolean) => Ok(Value::Boolean(*n != 0.0 && !n.is_nan())),
        (Value::Boolean(b), DataType::Number) => Ok(Value::Number(if *b { 1.0 } else { 0.0 })),
        (Value::String(s), DataType::Number) => {
            s.trim().parse::<f64>().map(Value::Number).map_err(|_| mismatch())
        }
        (Value::String(s), DataType::Boolean) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Boolean(true)),
            "false" => Ok(Value::Boolean(false)),
            _ => Err(mismatch()),
        },
        (Value::String(s), DataType::Object) => match serde_json::from_str(s) {
            Ok(serde_json::Value::Object(map)) => Ok(Value::Object(map)),
            _ => Err(mismatch()),
        },
        (Value::Array { items, .. }, DataType::Array(element)) => {
            let items = items
                .iter()
                .map(|item| coerce(item, element, port))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| mismatch())?;
            Ok(Value::array((**element).clone(), items))
        }
        (Value::Object(_) | Value::ControlFlow | Value::Array { .. }, DataType::Array(_)) => {
            Err(mismatch())
        }
        (scalar, DataType::Array(element)) => {
            let item = coerce(scalar, element, port).map_err(|_| mismatch())?;
            Ok(Value::array((**element).clone(), vec![item]))
        }
        _ => Err(mismatch()),
    }
}

/// Like [`coerce`], but an absent source stays absent instead of failing.
///
/// A present value that cannot be coerced is still an error.
pub fn coerce_optional(
    value: Option<&Value>,
    target: &DataType,
    port: &str,
) -> Result<Option<Value>, TypeMismatch> {
    value.map(|v| coerce(v, target, port)).transpose()
}

/// Static check used at validation time: does any rule connect the two types?
///
/// `true` does not guarantee success at runtime (e.g. `"abc"` to number).
pub fn coercible(source: &DataType, target: &DataType) -> bool {
    if source == target || *source == DataType::Any || *target == DataType::Any {
        return true;
    }

    match (source, target) {
        (
            DataType::Number | DataType::Boolean | DataType::Object,
            DataType::String,
        ) => true,
        (DataType::Number, DataType::Boolean) | (DataType::Boolean, DataType::Number) => true,
        (DataType::String, DataType::Number | DataType::Boolean | DataType::Object) => true,
        (DataType::Array(from), DataType::Array(to)) => coercible(from, to),
        (DataType::Array(from), DataType::String) => coercible(from, &DataType::String),
        (DataType::Object | DataType::ControlFlow, DataType::Array(_)) => false,
        (scalar, DataType::Array(to)) => coercible(scalar, to),
        _ => false,
    }
}

fn to_text(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Boolean(b) => Some(b.to_string()),
        Value::Object(map) => serde_json::to_string(map).ok(),
        Value::Array { items, .. } => items
            .iter()
            .map(to_text)
            .collect::<Option<Vec<_>>>()
            .map(|parts| parts.join("\n")),
        Value::Audio(_) | Value::Image(_) | Value::ControlFlow => None,
    }
}
