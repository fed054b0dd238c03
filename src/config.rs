use std::env;
use std::time::Duration;

use reqwest::Url;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::stream::SseConfig;

pub const SERVER_ADDRESS_ENV: &str = "FEATUREHUB_SERVER_ADDRESS";
pub const SDK_KEY_ENV: &str = "FEATUREHUB_SDK_KEY";
pub const WAIT_FOR_DATA_ENV: &str = "FEATUREHUB_WAIT_FOR_DATA";

/// Client configuration.
///
/// ```
/// use std::time::Duration;
/// use featurehub_client::Config;
///
/// let config = Config::new("https://features.example.com", "default/env-id/secret")
///     .wait_for_data(true)
///     .ready_timeout(Duration::from_secs(10));
/// assert!(config.validate().is_ok());
/// assert_eq!(
///     config.features_url(),
///     "https://features.example.com/features/default/env-id/secret"
/// );
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    server_address: String,
    sdk_key: String,
    wait_for_data: bool,
    ready_timeout: Option<Duration>,
    context: Option<Context>,
    sse: SseConfig,
}

impl Config {
    pub fn new(server_address: impl Into<String>, sdk_key: impl Into<String>) -> Self {
        Self {
            server_address: server_address.into(),
            sdk_key: sdk_key.into(),
            wait_for_data: false,
            ready_timeout: None,
            context: None,
            sse: SseConfig::default(),
        }
    }

    /// Reads `FEATUREHUB_SERVER_ADDRESS`, `FEATUREHUB_SDK_KEY` and the optional
    /// `FEATUREHUB_WAIT_FOR_DATA` from the environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let server_address = lookup(SERVER_ADDRESS_ENV)
            .ok_or_else(|| Error::BadConfiguration(format!("{} is not set", SERVER_ADDRESS_ENV)))?;
        let sdk_key = lookup(SDK_KEY_ENV)
            .ok_or_else(|| Error::BadConfiguration(format!("{} is not set", SDK_KEY_ENV)))?;

        let wait_for_data = match lookup(WAIT_FOR_DATA_ENV) {
            None => false,
            Some(value) => value.trim().parse::<bool>().map_err(|_| {
                Error::BadConfiguration(format!(
                    "{} must be true or false, got {:?}",
                    WAIT_FOR_DATA_ENV, value
                ))
            })?,
        };

        Ok(Self::new(server_address, sdk_key).wait_for_data(wait_for_data))
    }

    /// Block [crate::Client::connect] until the first snapshot has arrived.
    pub fn wait_for_data(mut self, wait_for_data: bool) -> Self {
        self.wait_for_data = wait_for_data;
        self
    }

    /// Give up waiting for the first snapshot after `timeout`. Only relevant with
    /// [Config::wait_for_data].
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = Some(timeout);
        self
    }

    /// A context sent to the server on connection, for server-side evaluation.
    pub fn context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }

    pub fn sse(mut self, sse: SseConfig) -> Self {
        self.sse = sse;
        self
    }

    pub fn server_address(&self) -> &str {
        &self.server_address
    }

    pub fn sdk_key(&self) -> &str {
        &self.sdk_key
    }

    pub fn is_wait_for_data(&self) -> bool {
        self.wait_for_data
    }

    pub fn get_ready_timeout(&self) -> Option<Duration> {
        self.ready_timeout
    }

    pub fn get_context(&self) -> Option<&Context> {
        self.context.as_ref()
    }

    pub fn get_sse(&self) -> &SseConfig {
        &self.sse
    }

    pub fn validate(&self) -> Result<()> {
        if self.sdk_key.is_empty() {
            return Err(Error::BadConfiguration("SDK key is required".into()));
        }
        if self.sdk_key.split('/').count() < 2 {
            return Err(Error::BadConfiguration(format!(
                "invalid SDK key format: {}",
                self.sdk_key
            )));
        }
        if self.server_address.is_empty() {
            return Err(Error::BadConfiguration("server address is required".into()));
        }
        match Url::parse(&self.server_address) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Ok(()),
            Ok(url) => Err(Error::BadConfiguration(format!(
                "unsupported server address scheme: {}",
                url.scheme()
            ))),
            Err(e) => Err(Error::BadConfiguration(format!(
                "invalid server address {}: {}",
                self.server_address, e
            ))),
        }
    }

    /// The stream endpoint, `<server address>/features/<sdk key>`.
    pub fn features_url(&self) -> String {
        let server = self
            .server_address
            .strip_suffix('/')
            .unwrap_or(&self.server_address);
        format!("{}/features/{}", server, self.sdk_key)
    }
}
