use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::cache::FeatureCache;
use crate::error::{Error, Result};
use crate::feature::FeatureState;
use crate::notifier::NotifierRegistry;
use crate::stream::RawEvent;

/// The protocol event tags understood by the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    Ack,
    Bye,
    /// An error reported on the stream; fatal only before the first snapshot.
    Error,
    /// A full snapshot of every feature.
    Features,
    /// A single feature update.
    Feature,
    DeleteFeature,
    /// An application-level failure from the server; always fatal.
    Failure,
    Unknown(String),
}

impl From<&str> for EventKind {
    fn from(tag: &str) -> Self {
        match tag {
            "ack" => EventKind::Ack,
            "bye" => EventKind::Bye,
            "error" => EventKind::Error,
            "features" => EventKind::Features,
            "feature" => EventKind::Feature,
            "delete_feature" => EventKind::DeleteFeature,
            "failure" => EventKind::Failure,
            other => EventKind::Unknown(other.to_string()),
        }
    }
}

type ReadyCallback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct ReadyState {
    ready: bool,
    failure: Option<Error>,
    callbacks: Vec<ReadyCallback>,
}

/// Tracks whether the cache has received its first authoritative data.
///
/// The transition to ready happens once; readiness callbacks run exactly once, on that
/// transition, or immediately if registered afterwards.
#[derive(Default)]
pub struct Readiness {
    state: Mutex<ReadyState>,
}

impl fmt::Debug for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Readiness")
            .field("ready", &state.ready)
            .field("failure", &state.failure)
            .field("callbacks", &state.callbacks.len())
            .finish()
    }
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    /// Marks the client ready. Returns true, and runs the pending callbacks, only on the first
    /// call.
    pub fn mark_ready(&self) -> bool {
        let callbacks = {
            let mut state = self.state.lock();
            if state.ready {
                return false;
            }
            state.ready = true;
            std::mem::take(&mut state.callbacks)
        };
        info!("feature cache is ready");
        for callback in callbacks {
            run_ready_callback(callback);
        }
        true
    }

    pub fn on_ready(&self, callback: impl FnOnce() + Send + 'static) {
        {
            let mut state = self.state.lock();
            if !state.ready {
                state.callbacks.push(Box::new(callback));
                return;
            }
        }
        run_ready_callback(Box::new(callback));
    }

    /// Records a fatal condition. Only the first failure is kept.
    pub fn fail(&self, error: Error) {
        let mut state = self.state.lock();
        if state.failure.is_none() {
            state.failure = Some(error);
        }
    }

    pub fn failure(&self) -> Option<Error> {
        self.state.lock().failure.clone()
    }

    /// Polls every `poll` until ready. Returns the recorded failure if one occurs first, and
    /// [Error::NotReady] once `timeout` (if any) has passed.
    pub async fn wait(&self, poll: Duration, timeout: Option<Duration>) -> Result<()> {
        let started = Instant::now();
        loop {
            {
                let state = self.state.lock();
                if state.ready {
                    return Ok(());
                }
                if let Some(failure) = &state.failure {
                    return Err(failure.clone());
                }
            }
            if let Some(timeout) = timeout {
                if started.elapsed() >= timeout {
                    return Err(Error::NotReady(timeout));
                }
            }
            tokio::time::sleep(poll).await;
        }
    }
}

/// A panicking callback must not take the ingestion task down with it.
fn run_ready_callback(callback: ReadyCallback) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        error!("readiness callback panicked");
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DeletedFeature {
    State { key: String },
    Key(String),
}

impl DeletedFeature {
    fn key(self) -> String {
        match self {
            DeletedFeature::State { key } | DeletedFeature::Key(key) => key,
        }
    }
}

/// Applies protocol events to the cache, dispatches notifiers and tracks readiness.
#[derive(Debug, Clone)]
pub struct Ingestion {
    cache: Arc<FeatureCache>,
    notifiers: Arc<NotifierRegistry>,
    readiness: Arc<Readiness>,
}

impl Ingestion {
    pub fn new(
        cache: Arc<FeatureCache>,
        notifiers: Arc<NotifierRegistry>,
        readiness: Arc<Readiness>,
    ) -> Self {
        Self {
            cache,
            notifiers,
            readiness,
        }
    }

    /// Handles one event. Returns an error only for conditions that end ingestion: a `failure`
    /// event, or an `error` event before the first snapshot. Malformed payloads are logged and
    /// dropped.
    pub fn handle(&self, event: &RawEvent) -> Result<()> {
        match EventKind::from(event.event.as_str()) {
            EventKind::Ack | EventKind::Bye => {
                trace!("received control event={}", event.event);
                Ok(())
            }
            EventKind::Features => {
                self.handle_features(&event.data);
                Ok(())
            }
            EventKind::Feature => {
                self.handle_feature(&event.data);
                Ok(())
            }
            EventKind::DeleteFeature => {
                self.handle_delete(&event.data);
                Ok(())
            }
            EventKind::Error => {
                if self.readiness.is_ready() {
                    error!("error from feature stream: {}", event.data);
                    Ok(())
                } else {
                    Err(Error::FromRemoteSource(format!(
                        "error before first snapshot: {}",
                        event.data
                    )))
                }
            }
            EventKind::Failure => Err(Error::FromRemoteSource(format!(
                "failure from server: {}",
                event.data
            ))),
            EventKind::Unknown(tag) => {
                trace!("ignoring event={}", tag);
                Ok(())
            }
        }
    }

    fn handle_features(&self, data: &str) {
        let features: Vec<FeatureState> = match serde_json::from_str(data) {
            Ok(features) => features,
            Err(e) => {
                warn!("dropping malformed features payload: {}", e);
                return;
            }
        };

        let count = features.len();
        let prior = self.cache.replace_all(features);
        self.readiness.mark_ready();

        for (key, feature) in self.cache.snapshot() {
            let changed = match prior.get(&key) {
                Some(old) => feature.is_newer_than(old),
                None => true,
            };
            if changed {
                self.notifiers.dispatch_all(&feature);
            }
        }

        debug!("received {} features from server", count);
    }

    fn handle_feature(&self, data: &str) {
        let feature: FeatureState = match serde_json::from_str(data) {
            Ok(feature) => feature,
            Err(e) => {
                warn!("dropping malformed feature payload: {}", e);
                return;
            }
        };

        let key = feature.key.clone();
        if !self.cache.upsert(feature) {
            debug!("ignoring old feature key={} from server", key);
            return;
        }

        self.readiness.mark_ready();
        if let Some(feature) = self.cache.get(&key) {
            self.notifiers.dispatch_all(&feature);
        }
    }

    fn handle_delete(&self, data: &str) {
        match serde_json::from_str::<DeletedFeature>(data) {
            Ok(deleted) => {
                self.cache.delete(&deleted.key());
            }
            Err(e) => warn!("dropping malformed delete_feature payload: {}", e),
        }
    }

    /// Consumes the data channel until it closes or a fatal condition occurs. A channel that
    /// closes before the first snapshot is also fatal. Fatal conditions are recorded on the
    /// [Readiness] before being returned.
    pub async fn run_events(&self, mut events: mpsc::Receiver<RawEvent>) -> Result<()> {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.handle(&event) {
                error!("stopping ingestion: {}", e);
                self.readiness.fail(e.clone());
                return Err(e);
            }
        }

        if self.readiness.is_ready() {
            info!("feature stream closed");
            Ok(())
        } else {
            let e = Error::FromRemoteSource("feature stream closed before first snapshot".into());
            error!("stopping ingestion: {}", e);
            self.readiness.fail(e.clone());
            Err(e)
        }
    }

    /// Drains the error channel. Once ready, transport errors are expected to be followed by a
    /// reconnect and are only logged. Before the first snapshot an error means the initial sync
    /// failed: it is recorded on the [Readiness] and draining stops, which also closes the
    /// channel the transport reports into.
    pub async fn run_errors(&self, mut errors: mpsc::Receiver<Error>) -> Result<()> {
        while let Some(e) = errors.recv().await {
            if self.readiness.is_ready() {
                warn!("feature stream error: {}", e);
                continue;
            }

            let e = Error::FromRemoteSource(format!("initial sync failed: {}", e));
            error!("stopping ingestion: {}", e);
            self.readiness.fail(e.clone());
            return Err(e);
        }
        Ok(())
    }
}
