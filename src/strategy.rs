use chrono::{SecondsFormat, Utc};
use log::{debug, trace};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use serde_with::{serde_as, DefaultOnNull};

use crate::attribute_value::{f64_to_i64_safe, AttributeValue};
use crate::context::Context;
use crate::matcher;

/// The comparison an attribute predicate applies between a context field and its operands.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Conditional {
    Equals,
    EndsWith,
    StartsWith,
    Greater,
    GreaterEquals,
    Less,
    LessEquals,
    NotEquals,
    Includes,
    Excludes,
    Regex,
    /// A conditional this client does not understand; predicates using it never match.
    #[serde(other)]
    Unknown,
}

/// The type an attribute predicate interprets its field and operands as.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    Boolean,
    String,
    SemanticVersion,
    Number,
    Date,
    Datetime,
    IpAddress,
    /// A type this client does not understand; predicates using it never match.
    #[serde(other)]
    Unknown,
}

/// A typed comparison between one context field and a set of operands.
#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyAttribute {
    #[serde(default)]
    pub id: String,
    pub field_name: String,
    pub conditional: Conditional,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub values: Vec<Value>,
}

/// A rollout strategy: a percentage gate and a set of attribute predicates which, when both pass,
/// select `value` in place of the feature's default.
#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Strategy {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Threshold on the 0..=1,000,000 scale; unset or zero means no percentage gate. Servers may
    /// send it as a float.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_percentage"
    )]
    pub percentage: Option<f64>,
    #[serde(default)]
    pub value: Value,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub attributes: Vec<StrategyAttribute>,
}

impl Strategy {
    /// Checks the percentage gate against the context's precomputed rollout bucket.
    pub fn matches_percentage(&self, bucket: Option<f64>) -> bool {
        let threshold = match self.percentage {
            Some(threshold) if threshold > 0.0 => threshold,
            _ => return true,
        };

        match bucket {
            Some(bucket) if bucket <= threshold => {
                trace!(
                    "strategy id={} matched percentage {} with bucket {}",
                    self.id,
                    threshold,
                    bucket
                );
                true
            }
            Some(bucket) => {
                trace!(
                    "strategy id={} did not match percentage {} with bucket {}",
                    self.id,
                    threshold,
                    bucket
                );
                false
            }
            None => {
                debug!(
                    "strategy id={} has a percentage but the context has no unique key",
                    self.id
                );
                false
            }
        }
    }

    /// Strategies match on attributes if _all_ of their predicates do.
    pub fn matches_attributes(&self, context: &Context) -> bool {
        self.attributes.iter().all(|attr| attr.matches(context))
    }
}

/// Whole thresholds are written back as integers, the way servers send them.
fn serialize_percentage<S>(percentage: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match percentage.and_then(|p| f64_to_i64_safe(p).filter(|i| *i as f64 == p)) {
        Some(whole) => serializer.serialize_some(&whole),
        None => percentage.serialize(serializer),
    }
}

impl StrategyAttribute {
    pub fn is_supported(&self) -> bool {
        self.conditional != Conditional::Unknown && self.field_type != FieldType::Unknown
    }

    fn operands(&self) -> Vec<AttributeValue> {
        self.values
            .iter()
            .filter_map(AttributeValue::from_operand)
            .collect()
    }

    /// The value of the predicate's field in `context`. The field name `now` on a DATE or
    /// DATETIME predicate resolves to the current instant unless the context sets it explicitly.
    fn subject(&self, context: &Context) -> Option<AttributeValue> {
        context.value_of(&self.field_name).or_else(|| {
            if !self.field_name.eq_ignore_ascii_case("now") {
                return None;
            }
            let now = Utc::now();
            match self.field_type {
                FieldType::Date => Some(now.format("%Y-%m-%d").to_string().into()),
                FieldType::Datetime => {
                    Some(now.to_rfc3339_opts(SecondsFormat::Secs, true).into())
                }
                _ => None,
            }
        })
    }

    pub fn matches(&self, context: &Context) -> bool {
        if !self.is_supported() {
            debug!(
                "attribute id={} field={} uses an unsupported type or conditional",
                self.id, self.field_name
            );
            return false;
        }

        let operands = self.operands();

        let subject = match self.subject(context) {
            Some(subject) => subject,
            None => {
                // Only an EQUALS with nothing to compare against tests for absence.
                let absent = operands.is_empty() && self.conditional == Conditional::Equals;
                trace!(
                    "attribute id={} field={} is missing from the context, absence match {}",
                    self.id,
                    self.field_name,
                    absent
                );
                return absent;
            }
        };

        let matched = subject
            .find(|v| matcher::matches(self.field_type, self.conditional, v, &operands))
            .is_some();

        trace!(
            "attribute id={} field={} {:?} {:?} {:?}: {}",
            self.id,
            self.field_name,
            self.field_type,
            self.conditional,
            self.values,
            matched
        );
        matched
    }
}
