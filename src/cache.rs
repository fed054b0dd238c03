use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;

use crate::feature::FeatureState;
use crate::store::Store;

/// The in-memory cache of feature states, keyed by feature key.
///
/// All mutations take the single write lock; reads share the read lock. States are stored behind
/// [Arc] and never mutated in place, so a state returned by [FeatureCache::get] stays valid (if
/// stale) after a concurrent update.
#[derive(Debug, Default)]
pub struct FeatureCache {
    features: RwLock<HashMap<String, Arc<FeatureState>>>,
}

impl FeatureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Arc<FeatureState>> {
        self.features.read().get(key).cloned()
    }

    /// Atomically replaces the whole cache with `features` and returns the previous contents, so
    /// the caller can work out what changed. Keys missing from `features` are dropped.
    pub fn replace_all(&self, features: Vec<FeatureState>) -> HashMap<String, Arc<FeatureState>> {
        let fresh: HashMap<String, Arc<FeatureState>> = features
            .into_iter()
            .map(|feature| (feature.key.clone(), Arc::new(feature)))
            .collect();
        let count = fresh.len();
        let prior = std::mem::replace(&mut *self.features.write(), fresh);
        debug!("replaced cache: {} features, previously {}", count, prior.len());
        prior
    }

    /// Inserts `feature` if its key is not cached yet, or if it is newer than the cached state
    /// (see [FeatureState::is_newer_than]). Returns whether the cache changed.
    pub fn upsert(&self, feature: FeatureState) -> bool {
        let mut features = self.features.write();
        if let Some(existing) = features.get(&feature.key) {
            if !feature.is_newer_than(existing) {
                debug!(
                    "rejected update for key={}: version {:?} is not newer than {:?}",
                    feature.key, feature.version, existing.version
                );
                return false;
            }
        }
        debug!("updated key={} to version {:?}", feature.key, feature.version);
        features.insert(feature.key.clone(), Arc::new(feature));
        true
    }

    pub fn delete(&self, key: &str) -> Option<Arc<FeatureState>> {
        let removed = self.features.write().remove(key);
        if removed.is_some() {
            debug!("deleted key={}", key);
        }
        removed
    }

    /// A copy of the current key to state map.
    pub fn snapshot(&self) -> HashMap<String, Arc<FeatureState>> {
        self.features.read().clone()
    }

    pub fn len(&self) -> usize {
        self.features.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.read().is_empty()
    }
}

impl Store for FeatureCache {
    fn feature(&self, key: &str) -> Option<Arc<FeatureState>> {
        self.get(key)
    }

    fn features(&self) -> HashMap<String, Arc<FeatureState>> {
        self.snapshot()
    }
}
