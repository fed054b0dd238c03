use std::net::IpAddr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use ipnet::IpNet;
use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

lazy_static! {
    static ref VERSION_NUMERIC_COMPONENTS_REGEX: Regex =
        Regex::new(r"^\d+(\.\d+)?(\.\d+)?").unwrap();
}

const FLOAT_TO_INT_MAX: f64 = 9007199254740991_f64;

/// Converting float to int has undefined behaviour for huge floats, so refuse to convert floats
/// with magnitude greater than 2**53 - 1, after which 64-bit floats no longer retain integer
/// precision.
pub(crate) fn f64_to_i64_safe(f: f64) -> Option<i64> {
    if f.abs() <= FLOAT_TO_INT_MAX {
        Some(f as i64)
    } else {
        None
    }
}

/// An attribute value represents a custom value that can be stored in a [crate::Context], or an
/// operand of a [crate::StrategyAttribute].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Stores a string value.
    String(String),
    /// Stores a number.
    Number(f64),
    /// Stores a boolean.
    Bool(bool),
    /// Stores an array of attribute values. A predicate matches an array if any element matches.
    Array(Vec<AttributeValue>),
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> AttributeValue {
        AttributeValue::String(s.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> AttributeValue {
        AttributeValue::String(s)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> AttributeValue {
        AttributeValue::Bool(b)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Number(i as f64)
    }
}

impl From<f64> for AttributeValue {
    fn from(f: f64) -> Self {
        AttributeValue::Number(f)
    }
}

impl<T> From<Vec<T>> for AttributeValue
where
    AttributeValue: From<T>,
{
    fn from(v: Vec<T>) -> AttributeValue {
        v.into_iter().collect()
    }
}

impl<T> FromIterator<T> for AttributeValue
where
    AttributeValue: From<T>,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        AttributeValue::Array(iter.into_iter().map(AttributeValue::from).collect())
    }
}

impl AttributeValue {
    /// Converts a strategy operand from the wire. Nulls and objects are not valid operands and
    /// yield None.
    pub fn from_operand(v: &Value) -> Option<AttributeValue> {
        match v {
            Value::Null => None,
            Value::Bool(b) => Some(AttributeValue::Bool(*b)),
            Value::Number(n) => match n.as_f64() {
                Some(float) => Some(AttributeValue::Number(float)),
                None => {
                    warn!("could not interpret '{:?}' as f64", n);
                    Some(AttributeValue::String(n.to_string()))
                }
            },
            Value::String(s) => Some(AttributeValue::String(s.clone())),
            Value::Array(arr) => Some(AttributeValue::Array(
                arr.iter().filter_map(AttributeValue::from_operand).collect(),
            )),
            Value::Object(_) => {
                warn!("object operands are not supported: {}", v);
                None
            }
        }
    }

    /// Returns None unless self is a String. It will not convert.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Renders a scalar value the way it is compared by the string-based operators. Integral
    /// numbers render without a fractional part.
    #[allow(clippy::float_cmp)]
    pub fn to_match_string(&self) -> Option<String> {
        match self {
            AttributeValue::String(s) => Some(s.clone()),
            AttributeValue::Number(f) => Some(
                f64_to_i64_safe(*f)
                    .filter(|i| *i as f64 == *f)
                    .map(|i| i.to_string())
                    .unwrap_or_else(|| f.to_string()),
            ),
            AttributeValue::Bool(b) => Some(b.to_string()),
            AttributeValue::Array(_) => None,
        }
    }

    /// Returns the wrapped value as a float for numbers and numeric strings, and None otherwise.
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(f) => Some(*f),
            AttributeValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Returns the wrapped value as a bool for booleans and the strings "true" and "false".
    pub fn to_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            AttributeValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Attempt to parse the attribute into a semver version.
    ///
    /// Versions with missing minor or patch components ("2", "2.1") are padded with zeros and
    /// build metadata is discarded. Integral numbers are read as major versions. It will return
    /// None if it cannot parse it.
    pub fn as_semver(&self) -> Option<semver::Version> {
        let version_str = self.to_match_string()?;
        semver::Version::parse(&version_str)
            .ok()
            .or_else(|| AttributeValue::parse_semver_loose(&version_str))
            .map(|mut version| {
                version.build = semver::BuildMetadata::EMPTY;
                version
            })
    }

    fn parse_semver_loose(version_str: &str) -> Option<semver::Version> {
        let parts = VERSION_NUMERIC_COMPONENTS_REGEX.captures(version_str)?;

        let numeric_parts = parts.get(0)?;
        let mut transformed_version_str = numeric_parts.as_str().to_string();

        for i in 1..parts.len() {
            if parts.get(i).is_none() {
                transformed_version_str.push_str(".0");
            }
        }

        let rest = &version_str[numeric_parts.end()..];
        transformed_version_str.push_str(rest);

        semver::Version::parse(&transformed_version_str).ok()
    }

    /// Attempt to interpret the value as an instant in UTC. Accepts RFC3339 timestamps, naive
    /// `YYYY-MM-DDTHH:MM:SS` timestamps (taken as UTC), plain `YYYY-MM-DD` dates (midnight UTC)
    /// and Unix epoch milliseconds as a number.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            AttributeValue::Number(millis) => {
                f64_to_i64_safe(*millis).and_then(DateTime::from_timestamp_millis)
            }
            AttributeValue::String(s) => {
                let s = s.trim();
                DateTime::parse_from_rfc3339(s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok()
                    .or_else(|| {
                        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                            .ok()
                            .map(|naive| naive.and_utc())
                    })
                    .or_else(|| {
                        NaiveDate::parse_from_str(s, "%Y-%m-%d")
                            .ok()
                            .and_then(|date| date.and_hms_opt(0, 0, 0))
                            .map(|naive| naive.and_utc())
                    })
            }
            _ => None,
        }
    }

    /// The value normalized to an ISO date, `YYYY-MM-DD`.
    pub fn to_iso_date(&self) -> Option<String> {
        self.to_datetime()
            .map(|dt| dt.format("%Y-%m-%d").to_string())
    }

    /// The value normalized to an ISO timestamp in UTC with second precision,
    /// `YYYY-MM-DDTHH:MM:SSZ`.
    pub fn to_iso_datetime(&self) -> Option<String> {
        self.to_datetime()
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    /// Parses the value as a single IP address. A CIDR with a host part ("10.0.0.1/24") yields
    /// its address.
    pub fn to_ip(&self) -> Option<IpAddr> {
        let s = self.as_str()?.trim();
        s.parse::<IpAddr>()
            .ok()
            .or_else(|| s.parse::<IpNet>().ok().map(|net| net.addr()))
    }

    /// Parses the value as a network. A bare address is the single-host network.
    pub fn to_ip_net(&self) -> Option<IpNet> {
        let s = self.as_str()?.trim();
        s.parse::<IpNet>()
            .ok()
            .or_else(|| s.parse::<IpAddr>().ok().map(IpNet::from))
    }

    /// Find the AttributeValue based off the provided predicate `p`.
    pub fn find<P>(&self, p: P) -> Option<&AttributeValue>
    where
        P: Fn(&AttributeValue) -> bool,
    {
        match self {
            AttributeValue::String(_) | AttributeValue::Number(_) | AttributeValue::Bool(_) => {
                if p(self) {
                    Some(self)
                } else {
                    None
                }
            }
            AttributeValue::Array(values) => values.iter().find(|v| p(v)),
        }
    }

    /// An empty string or an empty array counts as a missing value.
    pub(crate) fn is_empty(&self) -> bool {
        match self {
            AttributeValue::String(s) => s.is_empty(),
            AttributeValue::Array(values) => values.is_empty(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AttributeValue;
    use serde_json::json;
    use spectral::prelude::*;
    use test_case::test_case;

    #[test]
    fn collect_array() {
        assert_eq!(
            Some(10_i64).into_iter().collect::<AttributeValue>(),
            AttributeValue::Array(vec![AttributeValue::Number(10_f64)])
        );
    }

    #[test]
    fn deserialization() {
        fn test_case(json: &str, expected: AttributeValue) {
            assert_eq!(
                serde_json::from_str::<AttributeValue>(json).unwrap(),
                expected
            );
        }

        test_case("1.0", AttributeValue::Number(1.0));
        test_case("1", AttributeValue::Number(1.0));
        test_case("true", AttributeValue::Bool(true));
        test_case("\"foo\"", AttributeValue::String("foo".to_string()));
        test_case(
            r#"["a", 2]"#,
            AttributeValue::Array(vec!["a".into(), 2_i64.into()]),
        );
    }

    #[test]
    fn operands_drop_nulls_and_objects() {
        assert_that!(AttributeValue::from_operand(&json!(null))).is_none();
        assert_that!(AttributeValue::from_operand(&json!({"a": 1}))).is_none();
        assert_that!(AttributeValue::from_operand(&json!([1, null, "x"])))
            .contains_value(AttributeValue::Array(vec![1_i64.into(), "x".into()]));
    }

    #[test_case(AttributeValue::from(12_i64), "12")]
    #[test_case(AttributeValue::from(12.5), "12.5")]
    #[test_case(AttributeValue::from(true), "true")]
    #[test_case(AttributeValue::from("abc"), "abc")]
    fn match_string(value: AttributeValue, expected: &str) {
        assert_that!(value.to_match_string()).contains_value(expected.to_string());
    }

    #[test_case("1", "1.0.0")]
    #[test_case("1.2", "1.2.0")]
    #[test_case("1.2.3", "1.2.3")]
    #[test_case("1.2.3+build.7", "1.2.3")]
    #[test_case("1.2-beta", "1.2.0-beta")]
    fn loose_semver(input: &str, expected: &str) {
        let parsed = AttributeValue::from(input).as_semver();
        assert_that!(parsed).contains_value(semver::Version::parse(expected).unwrap());
    }

    #[test]
    fn invalid_semver() {
        assert_that!(AttributeValue::from("v1").as_semver()).is_none();
        assert_that!(AttributeValue::from(true).as_semver()).is_none();
        assert_that!(AttributeValue::from(2_i64).as_semver())
            .contains_value(semver::Version::new(2, 0, 0));
    }

    #[test_case("2021-03-04", "2021-03-04", "2021-03-04T00:00:00Z")]
    #[test_case("2021-03-04T10:11:12Z", "2021-03-04", "2021-03-04T10:11:12Z")]
    #[test_case("2021-03-04T10:11:12.345+02:00", "2021-03-04", "2021-03-04T08:11:12Z")]
    #[test_case("2021-03-04T10:11:12", "2021-03-04", "2021-03-04T10:11:12Z")]
    fn iso_normalization(input: &str, date: &str, datetime: &str) {
        let value = AttributeValue::from(input);
        assert_that!(value.to_iso_date()).contains_value(date.to_string());
        assert_that!(value.to_iso_datetime()).contains_value(datetime.to_string());
    }

    #[test]
    fn ip_parsing() {
        let addr = AttributeValue::from("192.168.1.10");
        assert_that!(addr.to_ip()).contains_value("192.168.1.10".parse::<std::net::IpAddr>().unwrap());
        assert_that!(addr.to_ip_net()).contains_value("192.168.1.10/32".parse::<ipnet::IpNet>().unwrap());

        let net = AttributeValue::from("10.0.0.0/8");
        assert_that!(net.to_ip_net()).contains_value("10.0.0.0/8".parse::<ipnet::IpNet>().unwrap());
        assert_that!(AttributeValue::from("not-an-ip").to_ip()).is_none();
    }
}
