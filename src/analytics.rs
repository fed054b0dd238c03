use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::feature::FeatureState;

/// Receives analytics events along with a snapshot of every feature at the time of the event.
///
/// No collector ships with the client; applications implement this for their analytics backend
/// and register it with [crate::Client::add_analytics_collector].
#[async_trait]
pub trait AnalyticsCollector: Send + Sync {
    async fn log_event(
        &self,
        action: &str,
        metadata: &HashMap<String, String>,
        features: &HashMap<String, Arc<FeatureState>>,
    ) -> Result<()>;
}
