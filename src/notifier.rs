use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use log::{debug, trace, warn};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::feature::FeatureState;
use crate::feature_value::{FeatureValue, FeatureValueType};

/// Identifies one notifier subscription.
pub type SubscriptionId = Uuid;

/// A typed notifier callback. The callback receives the feature's value converted to its
/// declared type; subscriptions of type [Callback::Feature] receive the whole state.
#[derive(Clone)]
pub enum Callback {
    Boolean(Arc<dyn Fn(bool) + Send + Sync>),
    Number(Arc<dyn Fn(f64) + Send + Sync>),
    String(Arc<dyn Fn(String) + Send + Sync>),
    Json(Arc<dyn Fn(String) + Send + Sync>),
    Feature(Arc<dyn Fn(Arc<FeatureState>) + Send + Sync>),
}

impl Callback {
    pub fn boolean(f: impl Fn(bool) + Send + Sync + 'static) -> Self {
        Callback::Boolean(Arc::new(f))
    }

    pub fn number(f: impl Fn(f64) + Send + Sync + 'static) -> Self {
        Callback::Number(Arc::new(f))
    }

    pub fn string(f: impl Fn(String) + Send + Sync + 'static) -> Self {
        Callback::String(Arc::new(f))
    }

    pub fn json(f: impl Fn(String) + Send + Sync + 'static) -> Self {
        Callback::Json(Arc::new(f))
    }

    pub fn feature(f: impl Fn(Arc<FeatureState>) + Send + Sync + 'static) -> Self {
        Callback::Feature(Arc::new(f))
    }

    pub fn value_type(&self) -> FeatureValueType {
        match self {
            Callback::Boolean(_) => FeatureValueType::Boolean,
            Callback::Number(_) => FeatureValueType::Number,
            Callback::String(_) => FeatureValueType::String,
            Callback::Json(_) => FeatureValueType::Json,
            Callback::Feature(_) => FeatureValueType::Feature,
        }
    }

    /// Converts the feature's value to this callback's type and calls it. Returns
    /// [Error::InvalidType] without calling it if the feature has another declared type or its
    /// value does not have that type.
    pub fn invoke(&self, feature: &Arc<FeatureState>) -> Result<()> {
        if let Callback::Feature(f) = self {
            f(feature.clone());
            return Ok(());
        }

        let expected = self.value_type();
        let value = if feature.value_type == expected {
            FeatureValue::from_json(expected, &feature.value)
        } else {
            None
        };

        match (self, value) {
            (Callback::Boolean(f), Some(FeatureValue::Bool(b))) => f(b),
            (Callback::Number(f), Some(FeatureValue::Number(n))) => f(n),
            (Callback::String(f), Some(FeatureValue::Str(s))) => f(s),
            (Callback::Json(f), Some(FeatureValue::Json(s))) => f(s),
            _ => {
                return Err(Error::InvalidType(format!(
                    "notifier for key={} expects {} but feature is {} with value {}",
                    feature.key, expected, feature.value_type, feature.value
                )))
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback::{}", self.value_type())
    }
}

/// Per-key sets of notifier subscriptions.
///
/// The subscription map has its own lock, independent of the feature cache, and the lock is
/// never held while callbacks run.
#[derive(Debug, Default)]
pub struct NotifierRegistry {
    subscriptions: Mutex<HashMap<String, HashMap<SubscriptionId, Callback>>>,
}

impl NotifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, key: &str, callback: Callback) -> SubscriptionId {
        let id = Uuid::new_v4();
        debug!("adding {} notifier id={} for key={}", callback.value_type(), id, key);
        self.subscriptions
            .lock()
            .entry(key.to_string())
            .or_default()
            .insert(id, callback);
        id
    }

    pub fn add_boolean(&self, key: &str, f: impl Fn(bool) + Send + Sync + 'static) -> SubscriptionId {
        self.add(key, Callback::boolean(f))
    }

    pub fn add_number(&self, key: &str, f: impl Fn(f64) + Send + Sync + 'static) -> SubscriptionId {
        self.add(key, Callback::number(f))
    }

    pub fn add_string(&self, key: &str, f: impl Fn(String) + Send + Sync + 'static) -> SubscriptionId {
        self.add(key, Callback::string(f))
    }

    pub fn add_json(&self, key: &str, f: impl Fn(String) + Send + Sync + 'static) -> SubscriptionId {
        self.add(key, Callback::json(f))
    }

    pub fn add_feature(
        &self,
        key: &str,
        f: impl Fn(Arc<FeatureState>) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.add(key, Callback::feature(f))
    }

    /// Removes one subscription. Returns [Error::NotifierNotFound] if there is no subscription
    /// `id` for `key`.
    pub fn remove(&self, key: &str, id: SubscriptionId) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock();
        let for_key = subscriptions
            .get_mut(key)
            .ok_or_else(|| Error::NotifierNotFound(format!("no notifiers for key={}", key)))?;

        if for_key.remove(&id).is_none() {
            return Err(Error::NotifierNotFound(format!(
                "no notifier id={} for key={}",
                id, key
            )));
        }
        if for_key.is_empty() {
            subscriptions.remove(key);
        }
        debug!("removed notifier id={} for key={}", id, key);
        Ok(())
    }

    /// The number of subscriptions for `key`.
    pub fn count(&self, key: &str) -> usize {
        self.subscriptions
            .lock()
            .get(key)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    fn callbacks(&self, key: &str) -> Vec<(SubscriptionId, Callback)> {
        self.subscriptions
            .lock()
            .get(key)
            .map(|for_key| for_key.iter().map(|(id, cb)| (*id, cb.clone())).collect())
            .unwrap_or_default()
    }

    fn spawn(&self, feature: &Arc<FeatureState>) -> Vec<JoinHandle<Result<()>>> {
        let callbacks = self.callbacks(&feature.key);
        if callbacks.is_empty() {
            trace!("no notifiers for key={}", feature.key);
            return Vec::new();
        }

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(
                    "no async runtime available, notifying {} subscriptions for key={} inline",
                    callbacks.len(),
                    feature.key
                );
                for (id, callback) in callbacks {
                    invoke_logged(id, &callback, feature).ok();
                }
                return Vec::new();
            }
        };

        callbacks
            .into_iter()
            .map(|(id, callback)| {
                let feature = feature.clone();
                handle.spawn_blocking(move || invoke_logged(id, &callback, &feature))
            })
            .collect()
    }

    /// Invokes every subscription for `feature.key`, each as an independent task, without
    /// waiting for any of them. A callback that fails only affects its own subscription.
    pub fn dispatch_all(&self, feature: &Arc<FeatureState>) {
        self.spawn(feature);
    }

    /// Like [NotifierRegistry::dispatch_all], but waits for every callback to finish and
    /// returns the first error, if any.
    pub async fn dispatch_all_and_wait(&self, feature: &Arc<FeatureState>) -> Result<()> {
        let results = join_all(self.spawn(feature)).await;
        let mut first_error = None;
        for result in results {
            let result = result.map_err(|e| Error::CallbackFailed(e.to_string())).and_then(|r| r);
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

fn invoke_logged(id: SubscriptionId, callback: &Callback, feature: &Arc<FeatureState>) -> Result<()> {
    let result = callback.invoke(feature);
    if let Err(e) = &result {
        warn!("notifier id={} skipped: {}", id, e);
    }
    result
}
