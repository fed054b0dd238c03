mod analytics;
mod attribute_value;
mod cache;
mod client;
mod config;
mod context;
mod error;
mod eval;
mod feature;
mod feature_value;
mod ingestion;
mod matcher;
mod notifier;
mod store;
mod strategy;
mod stream;
mod test_common;

pub use analytics::*;
pub use attribute_value::*;
pub use cache::*;
pub use client::*;
pub use config::*;
pub use context::*;
pub use error::*;
pub use eval::*;
pub use feature::*;
pub use feature_value::*;
pub use ingestion::*;
pub use notifier::*;
pub use store::*;
pub use strategy::*;
pub use stream::*;
