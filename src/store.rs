use std::collections::HashMap;
use std::sync::Arc;

use crate::feature::FeatureState;

/// Store is an interface for a data store that holds the feature states received by the client.
///
/// Ordinarily, the only implementation of this interface is the in-memory [crate::FeatureCache].
/// Returned states are point-in-time snapshots: a concurrent update replaces the stored entry
/// rather than mutating the one handed out.
pub trait Store: Send + Sync {
    /// Retrieve the feature with key `key`.
    fn feature(&self, key: &str) -> Option<Arc<FeatureState>>;

    /// Retrieve every feature currently held.
    fn features(&self) -> HashMap<String, Arc<FeatureState>>;
}
