use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;

use itertools::Itertools;
use murmur3::murmur3_32;
use serde::{Deserialize, Serialize};

use crate::attribute_value::AttributeValue;

/// Percentages are expressed on a scale of 0 to 1,000,000, where 1,000,000 is 100% and the last
/// four digits are the fractional part of the percentage.
pub const MAX_PERCENTAGE: u32 = 1_000_000;

const MAX_MURMUR3_HASH: f64 = 4_294_967_296.0;

/// The kind of device the caller is running on.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Browser,
    Desktop,
    Embedded,
    Mobile,
    Server,
    Watch,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Browser => "browser",
            Device::Desktop => "desktop",
            Device::Embedded => "embedded",
            Device::Mobile => "mobile",
            Device::Server => "server",
            Device::Watch => "watch",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The operating system the caller is running on.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
    Linux,
    Macos,
    Windows,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
            Platform::Linux => "linux",
            Platform::Macos => "macos",
            Platform::Windows => "windows",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The identity and environment of a caller, used to resolve rollout strategies.
///
/// Contexts are immutable once built; use a [ContextBuilder] to construct one.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Context {
    user_key: Option<String>,
    session: Option<String>,
    device: Option<Device>,
    platform: Option<Platform>,
    country: Option<String>,
    version: Option<String>,
    custom: HashMap<String, AttributeValue>,
}

impl Context {
    pub fn user_key(&self) -> Option<&str> {
        self.user_key.as_deref()
    }

    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    pub fn device(&self) -> Option<Device> {
        self.device
    }

    pub fn platform(&self) -> Option<Platform> {
        self.platform
    }

    pub fn country(&self) -> Option<&str> {
        self.country.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn custom(&self) -> &HashMap<String, AttributeValue> {
        &self.custom
    }

    /// The key used for percentage rollouts: the session id if one is set, otherwise the user
    /// key. Empty strings count as unset.
    pub fn unique_key(&self) -> Option<&str> {
        self.session
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.user_key.as_deref().filter(|k| !k.is_empty()))
    }

    /// The rollout bucket of this context, or None if it has no [Context::unique_key].
    pub fn percentage(&self) -> Option<f64> {
        self.unique_key().map(percentage_for_key)
    }

    /// Looks up a strategy field. `country`, `device`, `platform`, `version`, `userkey` and
    /// `session` are built in; any other name is looked up among the custom attributes. Empty
    /// values are reported as missing.
    pub fn value_of(&self, field: &str) -> Option<AttributeValue> {
        let value = match field {
            "country" => self.country.clone().map(AttributeValue::String),
            "device" => self.device.map(|d| AttributeValue::from(d.as_str())),
            "platform" => self.platform.map(|p| AttributeValue::from(p.as_str())),
            "version" => self.version.clone().map(AttributeValue::String),
            "userkey" => self.user_key.clone().map(AttributeValue::String),
            "session" => self.session.clone().map(AttributeValue::String),
            _ => self.custom.get(field).cloned(),
        };
        value.filter(|v| !v.is_empty())
    }

    /// Serializes the context for server-side evaluation: `name=value` pairs with URL encoded
    /// values, sorted and comma separated. Array values are comma joined before encoding.
    pub fn to_header(&self) -> String {
        let builtins = [
            ("userkey", self.user_key.clone()),
            ("session", self.session.clone()),
            ("device", self.device.map(|d| d.to_string())),
            ("platform", self.platform.map(|p| p.to_string())),
            ("country", self.country.clone()),
            ("version", self.version.clone()),
        ];

        let builtin_pairs = builtins
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| (name.to_string(), v)));

        let custom_pairs = self
            .custom
            .iter()
            .filter_map(|(name, value)| header_value(value).map(|v| (name.clone(), v)));

        builtin_pairs
            .chain(custom_pairs)
            .filter(|(_, value)| !value.is_empty())
            .map(|(name, value)| format!("{}={}", name, urlencoding::encode(&value)))
            .sorted()
            .join(",")
    }
}

fn header_value(value: &AttributeValue) -> Option<String> {
    match value {
        AttributeValue::Array(values) => Some(
            values
                .iter()
                .filter_map(AttributeValue::to_match_string)
                .join(","),
        ),
        other => other.to_match_string(),
    }
}

/// Maps an identity key onto the percentage scale: the Murmur3 x86 32-bit hash (seed 0) of the
/// key's UTF-8 bytes, divided by 2^32 and multiplied by [MAX_PERCENTAGE]. The result is in
/// `[0, 1_000_000)` and is identical across processes and SDK implementations.
pub fn percentage_for_key(key: &str) -> f64 {
    let hash = murmur3_32(&mut Cursor::new(key.as_bytes()), 0).unwrap_or(0);
    hash as f64 / MAX_MURMUR3_HASH * MAX_PERCENTAGE as f64
}

/// Builder for [Context].
#[derive(Clone, Debug, Default)]
pub struct ContextBuilder {
    context: Context,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_key(&mut self, user_key: impl Into<String>) -> &mut Self {
        self.context.user_key = Some(user_key.into());
        self
    }

    pub fn session(&mut self, session: impl Into<String>) -> &mut Self {
        self.context.session = Some(session.into());
        self
    }

    pub fn device(&mut self, device: Device) -> &mut Self {
        self.context.device = Some(device);
        self
    }

    pub fn platform(&mut self, platform: Platform) -> &mut Self {
        self.context.platform = Some(platform);
        self
    }

    pub fn country(&mut self, country: impl Into<String>) -> &mut Self {
        self.context.country = Some(country.into());
        self
    }

    pub fn version(&mut self, version: impl Into<String>) -> &mut Self {
        self.context.version = Some(version.into());
        self
    }

    /// Sets a custom attribute. Setting one of the built-in field names here has no effect on
    /// evaluation, since built-in fields always take precedence.
    pub fn custom(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> &mut Self {
        self.context.custom.insert(name.into(), value.into());
        self
    }

    pub fn build(&self) -> Context {
        self.context.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use spectral::prelude::*;
    use test_case::test_case;

    #[test]
    fn unique_key_prefers_session() {
        let context = ContextBuilder::new().user_key("u").session("s").build();
        assert_that!(context.unique_key()).contains_value("s");

        let context = ContextBuilder::new().user_key("u").session("").build();
        assert_that!(context.unique_key()).contains_value("u");

        let context = ContextBuilder::new().user_key("").build();
        assert_that!(context.unique_key()).is_none();
        assert_that!(context.percentage()).is_none();
    }

    #[test_case("hello", 142760.89)]
    #[test_case("1111111111", 277733.75)]
    #[test_case("4444444444", 471561.52)]
    #[test_case("abc", 702599.76)]
    #[test_case("9999999999", 869316.07)]
    fn percentage_matches_reference_hash(key: &str, expected: f64) {
        assert_that!(percentage_for_key(key)).is_close_to(expected, 0.01);
    }

    #[test]
    fn reference_hash_is_murmur3_x86_32() {
        let hash = murmur3_32(&mut Cursor::new("hello".as_bytes()), 0).unwrap();
        assert_eq!(hash, 0x248bfa47);
    }

    proptest! {
        #[test]
        fn percentage_is_deterministic_and_in_range(key in "\\PC*") {
            let first = percentage_for_key(&key);
            prop_assert_eq!(first, percentage_for_key(&key));
            prop_assert!((0.0..MAX_PERCENTAGE as f64).contains(&first));
        }
    }

    #[test]
    fn value_of_built_in_and_custom_fields() {
        let context = ContextBuilder::new()
            .user_key("user")
            .session("sess")
            .device(Device::Mobile)
            .platform(Platform::Ios)
            .country("new_zealand")
            .version("1.2.3")
            .custom("tier", "gold")
            .custom("empty", "")
            .build();

        assert_that!(context.value_of("country")).contains_value(AttributeValue::from("new_zealand"));
        assert_that!(context.value_of("device")).contains_value(AttributeValue::from("mobile"));
        assert_that!(context.value_of("platform")).contains_value(AttributeValue::from("ios"));
        assert_that!(context.value_of("version")).contains_value(AttributeValue::from("1.2.3"));
        assert_that!(context.value_of("userkey")).contains_value(AttributeValue::from("user"));
        assert_that!(context.value_of("session")).contains_value(AttributeValue::from("sess"));
        assert_that!(context.value_of("tier")).contains_value(AttributeValue::from("gold"));
        assert_that!(context.value_of("empty")).is_none();
        assert_that!(context.value_of("missing")).is_none();
    }

    #[test]
    fn header_is_sorted_and_encoded() {
        let context = ContextBuilder::new()
            .user_key("fred@example.com")
            .device(Device::Browser)
            .country("united_kingdom")
            .version("")
            .custom("roles", vec!["admin", "dev ops"])
            .build();

        assert_eq!(
            context.to_header(),
            "country=united_kingdom,device=browser,roles=admin%2Cdev%20ops,userkey=fred%40example.com"
        );
    }

    #[test]
    fn empty_context_has_empty_header() {
        assert_eq!(Context::default().to_header(), "");
    }
}
