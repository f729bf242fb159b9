//! Value model - port type tags and the tagged values that flow along connections

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Port data type tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataType {
    Number,
    String,
    Boolean,
    Object,
    Array(Box<DataType>),
    Audio,
    Image,
    ControlFlow,
    Any,
}

impl DataType {
    /// Array-of-`element` type
    pub fn array_of(element: DataType) -> Self {
        Self::Array(Box::new(element))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number => write!(f, "number"),
            Self::String => write!(f, "string"),
            Self::Boolean => write!(f, "boolean"),
            Self::Object => write!(f, "object"),
            Self::Array(element) => write!(f, "{}[]", element),
            Self::Audio => write!(f, "audio"),
            Self::Image => write!(f, "image"),
            Self::ControlFlow => write!(f, "control-flow"),
            Self::Any => write!(f, "any"),
        }
    }
}

/// Binary media payload (audio or image)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub media_type: String,
    pub data: Vec<u8>,
}

/// A tagged data value. Serializes as `{ "type": ..., "value": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum Value {
    Number(f64),
    String(String),
    Boolean(bool),
    Object(serde_json::Map<String, serde_json::Value>),
    Array { element: DataType, items: Vec<Value> },
    Audio(Media),
    Image(Media),
    ControlFlow,
}

impl Value {
    pub fn number(n: f64) -> Self {
        Self::Number(n)
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    pub fn boolean(b: bool) -> Self {
        Self::Boolean(b)
    }

    pub fn array(element: DataType, items: Vec<Value>) -> Self {
        Self::Array { element, items }
    }

    /// The type tag this value carries
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Number(_) => DataType::Number,
            Self::String(_) => DataType::String,
            Self::Boolean(_) => DataType::Boolean,
            Self::Object(_) => DataType::Object,
            Self::Array { element, .. } => DataType::array_of(element.clone()),
            Self::Audio(_) => DataType::Audio,
            Self::Image(_) => DataType::Image,
            Self::ControlFlow => DataType::ControlFlow,
        }
    }

    /// Whether the value already satisfies `ty` as it stands. Array items are
    /// checked against the element tag, which deserialized input may violate.
    pub fn conforms_to(&self, ty: &DataType) -> bool {
        match (self, ty) {
            (_, DataType::Any) => true,
            (Self::Array { element, items }, DataType::Array(expected)) => {
                **expected == *element && items.iter().all(|item| item.conforms_to(expected))
            }
            _ => self.data_type() == *ty,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

/// What a port holds after its producer has settled.
///
/// `Absent` means no value was produced (unconnected, or the producer chose
/// not to emit). `Excluded` means the producing branch was not taken.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Present(Arc<Value>),
    Absent,
    Excluded,
}

impl Slot {
    pub fn present(value: Value) -> Self {
        Self::Present(Arc::new(value))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Present(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_excluded(&self) -> bool {
        matches!(self, Self::Excluded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_serializes_as_type_and_value() {
        let json = serde_json::to_string(&Value::number(7.0)).unwrap();
        assert_eq!(json, r#"{"type":"number","value":7.0}"#);

        let parsed: Value = serde_json::from_str(r#"{"type":"string","value":"%"}"#).unwrap();
        assert_eq!(parsed, Value::string("%"));
    }

    #[test]
    fn test_array_data_type() {
        let v = Value::array(DataType::Number, vec![Value::number(1.0)]);
        assert_eq!(v.data_type(), DataType::array_of(DataType::Number));
        assert_eq!(v.data_type().to_string(), "number[]");
    }

    #[test]
    fn test_slot_accessors() {
        assert_eq!(Slot::present(Value::boolean(true)).value(), Some(&Value::Boolean(true)));
        assert!(Slot::Absent.value().is_none());
        assert!(Slot::Excluded.is_excluded());
    }
}
