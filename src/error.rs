use thiserror::Error;

/// Errors surfaced by the client.
///
/// Lookup and type errors are returned per call and never panic. Stream errors are either fatal
/// (before the first snapshot has been received) or logged and tolerated (afterwards); decoding
/// errors never reach the caller at all.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Error {
    /// The client was configured with a missing or malformed server address or SDK key.
    #[error("bad configuration: {0}")]
    BadConfiguration(String),

    /// No feature with the given key is present in the local cache.
    #[error("feature not found: {0}")]
    FeatureNotFound(String),

    /// The feature's declared type does not match the requested accessor, or its stored value
    /// cannot be interpreted as its declared type.
    #[error("invalid type: {0}")]
    InvalidType(String),

    /// The remote source reported a failure, or the stream failed before the first snapshot.
    #[error("error from remote source: {0}")]
    FromRemoteSource(String),

    /// No notifier subscription exists for the given key and subscription id.
    #[error("notifier not found: {0}")]
    NotifierNotFound(String),

    /// A notifier callback panicked while being dispatched.
    #[error("notifier callback failed: {0}")]
    CallbackFailed(String),

    /// The client did not receive its first snapshot within the configured timeout.
    #[error("client not ready after {0:?}")]
    NotReady(std::time::Duration),

    /// The transport could not reach the server, or the event stream broke.
    #[error("transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, Error>;
