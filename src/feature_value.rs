use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The declared type of a feature's value.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeatureValueType {
    Boolean,
    String,
    Number,
    /// Raw JSON, carried on the wire as a JSON document encoded in a string.
    Json,
    /// A generic feature; subscribers of this type receive the whole [crate::FeatureState].
    Feature,
}

impl FeatureValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureValueType::Boolean => "BOOLEAN",
            FeatureValueType::String => "STRING",
            FeatureValueType::Number => "NUMBER",
            FeatureValueType::Json => "JSON",
            FeatureValueType::Feature => "FEATURE",
        }
    }
}

impl fmt::Display for FeatureValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A feature value interpreted as one of the typed accessor types.
#[derive(Clone, Debug, PartialEq)]
pub enum FeatureValue {
    Bool(bool),
    Number(f64),
    Str(String),
    Json(String),
}

impl From<bool> for FeatureValue {
    fn from(b: bool) -> FeatureValue {
        FeatureValue::Bool(b)
    }
}

impl From<f64> for FeatureValue {
    fn from(f: f64) -> FeatureValue {
        FeatureValue::Number(f)
    }
}

impl From<String> for FeatureValue {
    fn from(s: String) -> FeatureValue {
        FeatureValue::Str(s)
    }
}

impl FeatureValue {
    /// Interprets a raw wire value as `value_type`.
    ///
    /// Returns None when the value does not have the shape the type requires, e.g. a string
    /// stored on a BOOLEAN feature. JSON values are accepted either as an encoded string or as an
    /// inline object/array, which is re-encoded. FEATURE has no typed representation and always
    /// yields None.
    pub fn from_json(value_type: FeatureValueType, value: &Value) -> Option<FeatureValue> {
        match (value_type, value) {
            (FeatureValueType::Boolean, Value::Bool(b)) => Some(FeatureValue::Bool(*b)),
            (FeatureValueType::Number, Value::Number(n)) => n.as_f64().map(FeatureValue::Number),
            (FeatureValueType::String, Value::String(s)) => Some(FeatureValue::Str(s.clone())),
            (FeatureValueType::Json, Value::String(s)) => Some(FeatureValue::Json(s.clone())),
            (FeatureValueType::Json, Value::Object(_) | Value::Array(_)) => {
                Some(FeatureValue::Json(value.to_string()))
            }
            _ => None,
        }
    }

    pub fn value_type(&self) -> FeatureValueType {
        match self {
            FeatureValue::Bool(_) => FeatureValueType::Boolean,
            FeatureValue::Number(_) => FeatureValueType::Number,
            FeatureValue::Str(_) => FeatureValueType::String,
            FeatureValue::Json(_) => FeatureValueType::Json,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FeatureValue::Bool(b) => Some(*b),
            _ => {
                warn!("feature value is not bool but {:?}", self);
                None
            }
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FeatureValue::Number(f) => Some(*f),
            _ => {
                warn!("feature value is not a number but {:?}", self);
                None
            }
        }
    }

    pub fn as_string(&self) -> Option<String> {
        match self {
            FeatureValue::Str(s) => Some(s.clone()),
            _ => {
                warn!("feature value is not str but {:?}", self);
                None
            }
        }
    }

    pub fn as_json(&self) -> Option<String> {
        match self {
            FeatureValue::Json(s) => Some(s.clone()),
            _ => {
                warn!("feature value is not json but {:?}", self);
                None
            }
        }
    }
}
