use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{serde_as, DefaultOnNull};

use crate::context::Context;
use crate::eval::evaluate;
use crate::feature_value::{FeatureValue, FeatureValueType};
use crate::strategy::Strategy;

/// The state of a single feature as delivered by the server: its declared type, default value,
/// version and rollout strategies.
#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureState {
    #[serde(default)]
    pub id: String,
    pub key: String,
    #[serde(rename = "type")]
    pub value_type: FeatureValueType,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub strategies: Vec<Strategy>,
}

impl FeatureState {
    /// Whether this state should replace `existing` in the cache.
    ///
    /// A missing version counts as version 0, so an unversioned update never replaces an
    /// existing entry, and a versioned update replaces an unversioned one.
    pub fn is_newer_than(&self, existing: &FeatureState) -> bool {
        self.version.unwrap_or(0) > existing.version.unwrap_or(0)
    }

    /// The default value interpreted as the declared type.
    pub fn default_value(&self) -> Option<FeatureValue> {
        FeatureValue::from_json(self.value_type, &self.value)
    }

    /// Resolves the value for `context`: the value of the first matching strategy, or the
    /// default if none match. A strategy value that does not have the declared type falls back to
    /// the default.
    pub fn evaluate(&self, context: &Context) -> Option<FeatureValue> {
        evaluate(&self.strategies, context)
            .and_then(|value| FeatureValue::from_json(self.value_type, value))
            .or_else(|| self.default_value())
    }
}
