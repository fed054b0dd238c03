#![cfg(test)]

use std::collections::HashMap;
use std::sync::Arc;

use crate::feature::FeatureState;
use crate::store::Store;

/// A string feature with one attribute strategy per built-in field.
pub const TEST_FEATURE_1: &str = r#"{
    "id": "feature-1",
    "key": "TestFeature1",
    "type": "STRING",
    "value": "this is the default value",
    "version": 1,
    "strategies": [
        {
            "id": "s1",
            "name": "russians",
            "value": "russians get this",
            "attributes": [
                {"id": "a1", "fieldName": "country", "conditional": "EQUALS", "type": "STRING", "values": ["russia"]}
            ]
        },
        {
            "id": "s2",
            "name": "unix users",
            "value": "unix users get this",
            "attributes": [
                {"id": "a2", "fieldName": "platform", "conditional": "EQUALS", "type": "STRING", "values": ["linux", "macos"]}
            ]
        },
        {
            "id": "s3",
            "name": "not mobile",
            "value": "non-mobile devices get this",
            "attributes": [
                {"id": "a3", "fieldName": "device", "conditional": "NOT_EQUALS", "type": "STRING", "values": ["mobile", "watch"]}
            ]
        },
        {
            "id": "s4",
            "name": "older than 15.23.4",
            "value": "older clients get this",
            "attributes": [
                {"id": "a4", "fieldName": "version", "conditional": "LESS", "type": "SEMANTIC_VERSION", "values": ["15.23.4"]}
            ]
        },
        {
            "id": "s5",
            "name": "15.23.4 or older",
            "value": "15.23.4 gets this",
            "attributes": [
                {"id": "a5", "fieldName": "version", "conditional": "LESS_EQUALS", "type": "SEMANTIC_VERSION", "values": ["15.23.4"]}
            ]
        },
        {
            "id": "s6",
            "name": "newer than 16.0.0",
            "value": "newer clients get this",
            "attributes": [
                {"id": "a6", "fieldName": "version", "conditional": "GREATER", "type": "SEMANTIC_VERSION", "values": ["16.0.0"]}
            ]
        },
        {
            "id": "s7",
            "name": "16.0.0 or newer",
            "value": "16.0.0 gets this",
            "attributes": [
                {"id": "a7", "fieldName": "version", "conditional": "GREATER_EQUALS", "type": "SEMANTIC_VERSION", "values": ["16.0.0"]}
            ]
        }
    ]
}"#;

/// A string feature with 33% and 66% percentage strategies.
pub const TEST_FEATURE_2: &str = r#"{
    "id": "feature-2",
    "key": "TestFeature2",
    "type": "STRING",
    "value": "this is the default value",
    "version": 2,
    "strategies": [
        {"id": "p33", "name": "33 percent", "percentage": 330000, "value": "this is the 33 value", "attributes": []},
        {"id": "p66", "name": "66 percent", "percentage": 660000, "value": "this is the 66 value", "attributes": []}
    ]
}"#;

/// A full snapshot covering every value type.
pub const SNAPSHOT: &str = r#"[
    {"id": "1", "key": "booleanfeature", "type": "BOOLEAN", "value": true, "version": 1},
    {"id": "2", "key": "numberfeature", "type": "NUMBER", "value": 123456789, "version": 1},
    {"id": "3", "key": "stringfeature", "type": "STRING", "value": "this is a string", "version": 1},
    {"id": "4", "key": "jsonfeature", "type": "JSON", "value": "{\"is_crufty\": true}", "version": 1},
    {"id": "5", "key": "mistyped", "type": "BOOLEAN", "value": "not a bool", "version": 1}
]"#;

pub fn feature(json: &str) -> FeatureState {
    serde_json::from_str(json).unwrap()
}

pub fn snapshot() -> Vec<FeatureState> {
    serde_json::from_str(SNAPSHOT).unwrap()
}

pub struct TestStore {
    features: HashMap<String, Arc<FeatureState>>,
}

impl TestStore {
    pub fn new() -> Self {
        let features = snapshot()
            .into_iter()
            .chain([feature(TEST_FEATURE_1), feature(TEST_FEATURE_2)])
            .map(|f| (f.key.clone(), Arc::new(f)))
            .collect();
        Self { features }
    }
}

impl Store for TestStore {
    fn feature(&self, key: &str) -> Option<Arc<FeatureState>> {
        self.features.get(key).cloned()
    }

    fn features(&self) -> HashMap<String, Arc<FeatureState>> {
        self.features.clone()
    }
}
