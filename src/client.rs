use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::analytics::AnalyticsCollector;
use crate::cache::FeatureCache;
use crate::config::Config;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::feature::FeatureState;
use crate::feature_value::{FeatureValue, FeatureValueType};
use crate::ingestion::{Ingestion, Readiness};
use crate::notifier::{NotifierRegistry, SubscriptionId};
use crate::store::Store;
use crate::stream::{EventStream, SseTransport};

const CHANNEL_CAPACITY: usize = 100;
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A read-only view of the features bound to one [Context].
///
/// Views are cheap to create and share the underlying store with the client they came from.
#[derive(Clone)]
pub struct ContextualClient {
    context: Context,
    store: Arc<dyn Store>,
}

impl fmt::Debug for ContextualClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextualClient")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl ContextualClient {
    pub fn new(context: Context, store: Arc<dyn Store>) -> Self {
        Self { context, store }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn get_feature(&self, key: &str) -> Result<Arc<FeatureState>> {
        self.store
            .feature(key)
            .ok_or_else(|| Error::FeatureNotFound(key.to_string()))
    }

    pub fn get_boolean(&self, key: &str) -> Result<bool> {
        self.typed_value(key, FeatureValueType::Boolean)?
            .as_bool()
            .ok_or_else(|| mismatch(key, FeatureValueType::Boolean))
    }

    pub fn get_number(&self, key: &str) -> Result<f64> {
        self.typed_value(key, FeatureValueType::Number)?
            .as_number()
            .ok_or_else(|| mismatch(key, FeatureValueType::Number))
    }

    pub fn get_string(&self, key: &str) -> Result<String> {
        self.typed_value(key, FeatureValueType::String)?
            .as_string()
            .ok_or_else(|| mismatch(key, FeatureValueType::String))
    }

    /// The value of a JSON feature, as the encoded JSON document.
    pub fn get_raw_json(&self, key: &str) -> Result<String> {
        self.typed_value(key, FeatureValueType::Json)?
            .as_json()
            .ok_or_else(|| mismatch(key, FeatureValueType::Json))
    }

    fn typed_value(&self, key: &str, expected: FeatureValueType) -> Result<FeatureValue> {
        let feature = self.get_feature(key)?;
        if feature.value_type != expected {
            return Err(Error::InvalidType(format!(
                "feature {} is {}, not {}",
                key, feature.value_type, expected
            )));
        }

        let default = feature.default_value().ok_or_else(|| {
            Error::InvalidType(format!("default value of feature {} is not a {}", key, expected))
        })?;

        Ok(feature.evaluate(&self.context).unwrap_or(default))
    }
}

fn mismatch(key: &str, expected: FeatureValueType) -> Error {
    Error::InvalidType(format!("feature {} is not a {}", key, expected))
}

/// A streaming feature client.
///
/// The client owns the ingestion tasks feeding its cache; closing or dropping it stops them,
/// along with the transport.
pub struct Client {
    cache: Arc<FeatureCache>,
    notifiers: Arc<NotifierRegistry>,
    readiness: Arc<Readiness>,
    collectors: Mutex<Vec<Arc<dyn AnalyticsCollector>>>,
    default_view: ContextualClient,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("features", &self.cache.len())
            .field("ready", &self.readiness.is_ready())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Validates `config`, connects to the features endpoint and starts ingestion.
    ///
    /// With [Config::wait_for_data] this only returns once the first snapshot has been applied,
    /// or with the error that prevented it.
    pub async fn connect(config: Config) -> Result<Client> {
        config.validate()?;

        let header = config.get_context().map(Context::to_header);
        let transport = SseTransport::new(config.features_url(), header, config.get_sse().clone());
        Client::start(&config, transport.start(CHANNEL_CAPACITY)).await
    }

    /// Starts ingestion from an already established event feed.
    pub async fn start(config: &Config, stream: EventStream) -> Result<Client> {
        let cache = Arc::new(FeatureCache::new());
        let notifiers = Arc::new(NotifierRegistry::new());
        let readiness = Arc::new(Readiness::new());
        let ingestion = Ingestion::new(cache.clone(), notifiers.clone(), readiness.clone());

        let (events, errors, transport) = stream.into_parts();

        let events_ingestion = ingestion.clone();
        let events_task = tokio::spawn(async move {
            if let Err(e) = events_ingestion.run_events(events).await {
                debug!("event ingestion ended: {}", e);
            }
        });
        let errors_task = tokio::spawn(async move {
            if let Err(e) = ingestion.run_errors(errors).await {
                debug!("error ingestion ended: {}", e);
            }
        });

        let mut tasks = vec![events_task, errors_task];
        tasks.extend(transport);

        let store: Arc<dyn Store> = cache.clone();
        let client = Client {
            cache,
            notifiers,
            readiness,
            collectors: Mutex::new(Vec::new()),
            default_view: ContextualClient::new(Context::default(), store),
            tasks: Mutex::new(tasks),
        };

        if config.is_wait_for_data() {
            info!("waiting for the first feature snapshot");
            client
                .readiness
                .wait(READY_POLL_INTERVAL, config.get_ready_timeout())
                .await?;
        }

        Ok(client)
    }

    /// A view that evaluates strategies against `context`.
    pub fn with_context(&self, context: Context) -> ContextualClient {
        let store: Arc<dyn Store> = self.cache.clone();
        ContextualClient::new(context, store)
    }

    pub fn get_feature(&self, key: &str) -> Result<Arc<FeatureState>> {
        self.default_view.get_feature(key)
    }

    pub fn get_boolean(&self, key: &str) -> Result<bool> {
        self.default_view.get_boolean(key)
    }

    pub fn get_number(&self, key: &str) -> Result<f64> {
        self.default_view.get_number(key)
    }

    pub fn get_string(&self, key: &str) -> Result<String> {
        self.default_view.get_string(key)
    }

    pub fn get_raw_json(&self, key: &str) -> Result<String> {
        self.default_view.get_raw_json(key)
    }

    /// Every feature currently held, keyed by feature key.
    pub fn features(&self) -> HashMap<String, Arc<FeatureState>> {
        self.cache.snapshot()
    }

    pub fn add_notifier_boolean(
        &self,
        key: &str,
        f: impl Fn(bool) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.notifiers.add_boolean(key, f)
    }

    pub fn add_notifier_number(
        &self,
        key: &str,
        f: impl Fn(f64) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.notifiers.add_number(key, f)
    }

    pub fn add_notifier_string(
        &self,
        key: &str,
        f: impl Fn(String) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.notifiers.add_string(key, f)
    }

    pub fn add_notifier_json(
        &self,
        key: &str,
        f: impl Fn(String) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.notifiers.add_json(key, f)
    }

    pub fn add_notifier_feature(
        &self,
        key: &str,
        f: impl Fn(Arc<FeatureState>) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.notifiers.add_feature(key, f)
    }

    pub fn delete_notifier(&self, key: &str, id: SubscriptionId) -> Result<()> {
        self.notifiers.remove(key, id)
    }

    /// Runs `callback` once the first snapshot has been applied, or immediately if it already
    /// has.
    pub fn on_ready(&self, callback: impl FnOnce() + Send + 'static) {
        self.readiness.on_ready(callback)
    }

    pub fn is_ready(&self) -> bool {
        self.readiness.is_ready()
    }

    /// The condition that stopped ingestion, if any.
    pub fn failure(&self) -> Option<Error> {
        self.readiness.failure()
    }

    pub fn add_analytics_collector(&self, collector: Arc<dyn AnalyticsCollector>) {
        self.collectors.lock().push(collector);
    }

    /// Sends `action` to every registered collector with the current features. Every collector is
    /// called; the first error is returned.
    pub async fn log_analytics_event(
        &self,
        action: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        let collectors = self.collectors.lock().clone();
        let features = self.features();

        let mut first_error = None;
        for collector in collectors {
            if let Err(e) = collector.log_event(action, metadata, &features).await {
                warn!("analytics collector failed for action={}: {}", action, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Stops ingestion and the transport. The cache keeps its last contents.
    pub fn close(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        if !tasks.is_empty() {
            info!("closing feature client");
        }
        for task in tasks {
            task.abort();
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}
