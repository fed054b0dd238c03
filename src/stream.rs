//! The inbound event feed: a pair of channels carrying protocol events and transport errors, and
//! the server-sent events transport that fills them.

use std::time::Duration;

use eventsource_stream::{Event, Eventsource};
use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// Header carrying the serialized client context on the stream request.
pub const CONTEXT_HEADER: &str = "x-featurehub";

/// One protocol event: its tag and undecoded payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawEvent {
    pub event: String,
    pub data: String,
}

impl RawEvent {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }
}

impl From<Event> for RawEvent {
    fn from(event: Event) -> Self {
        Self {
            event: event.event,
            data: event.data,
        }
    }
}

/// The sending half of an event feed, held by a transport.
#[derive(Clone, Debug)]
pub struct EventSink {
    events: mpsc::Sender<RawEvent>,
    errors: mpsc::Sender<Error>,
}

impl EventSink {
    /// Returns false once the receiving side has gone away.
    pub async fn event(&self, event: RawEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Returns false once the receiving side has gone away.
    pub async fn error(&self, error: Error) -> bool {
        self.errors.send(error).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_closed() || self.errors.is_closed()
    }
}

/// The receiving half of an event feed: a data channel, an error channel, and the task producing
/// them, if any.
#[derive(Debug)]
pub struct EventStream {
    events: mpsc::Receiver<RawEvent>,
    errors: mpsc::Receiver<Error>,
    task: Option<JoinHandle<()>>,
}

impl EventStream {
    /// Attaches the producing task, which is aborted along with the client.
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }

    pub fn into_parts(
        self,
    ) -> (
        mpsc::Receiver<RawEvent>,
        mpsc::Receiver<Error>,
        Option<JoinHandle<()>>,
    ) {
        (self.events, self.errors, self.task)
    }
}

/// Creates a connected sink and stream, each channel bounded to `capacity`.
pub fn channel(capacity: usize) -> (EventSink, EventStream) {
    let (events_tx, events_rx) = mpsc::channel(capacity);
    let (errors_tx, errors_rx) = mpsc::channel(capacity);
    (
        EventSink {
            events: events_tx,
            errors: errors_tx,
        },
        EventStream {
            events: events_rx,
            errors: errors_rx,
            task: None,
        },
    )
}

/// Configuration for SSE connection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct SseConfig {
    /// Base delay for reconnection attempts.
    pub reconnect_base_delay: Duration,
    /// Maximum delay for reconnection attempts.
    pub reconnect_max_delay: Duration,
    /// Maximum number of consecutive failed connections (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Whether to use exponential backoff for reconnection.
    pub use_exponential_backoff: bool,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            max_reconnect_attempts: 0,
            use_exponential_backoff: true,
        }
    }
}

impl SseConfig {
    /// The delay before the next connection attempt after `consecutive_failures` failures.
    pub fn backoff(&self, consecutive_failures: u32) -> Duration {
        if !self.use_exponential_backoff {
            return self.reconnect_base_delay;
        }
        let factor = 2u64.saturating_pow(consecutive_failures.min(10));
        let delay_ms = (self.reconnect_base_delay.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.reconnect_max_delay.as_millis() as u64))
    }
}

/// A reconnecting server-sent events connection to the features endpoint.
///
/// Protocol events are forwarded to the data channel. Failures to connect and broken streams are
/// forwarded to the error channel as [Error::Transport] and followed by a reconnect.
#[derive(Debug, Clone)]
pub struct SseTransport {
    url: String,
    context_header: Option<String>,
    config: SseConfig,
}

impl SseTransport {
    pub fn new(url: impl Into<String>, context_header: Option<String>, config: SseConfig) -> Self {
        Self {
            url: url.into(),
            context_header,
            config,
        }
    }

    /// Spawns the connection loop and returns the feed it fills.
    pub fn start(self, capacity: usize) -> EventStream {
        let (sink, stream) = channel(capacity);
        let task = tokio::spawn(async move { self.run(sink).await });
        stream.with_task(task)
    }

    async fn run(self, sink: EventSink) {
        let client = match reqwest::Client::builder().build() {
            Ok(client) => client,
            Err(e) => {
                error!("could not build http client: {}", e);
                sink.error(Error::Transport(e.to_string())).await;
                return;
            }
        };
        let mut consecutive_failures: u32 = 0;

        loop {
            info!("connecting to feature stream url={}", self.url);

            match self.connect_and_forward(&client, &sink).await {
                Ok(()) => {
                    debug!("feature stream ended normally");
                    consecutive_failures = 0;
                }
                Err(e) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    if !sink.error(e).await {
                        break;
                    }
                }
            }

            if sink.is_closed() {
                debug!("feature stream receiver dropped, stopping");
                break;
            }

            if self.config.max_reconnect_attempts > 0
                && consecutive_failures >= self.config.max_reconnect_attempts
            {
                error!(
                    "max reconnection attempts ({}) reached, stopping feature stream",
                    consecutive_failures
                );
                break;
            }

            let delay = self.config.backoff(consecutive_failures);
            warn!(
                "reconnecting to feature stream in {}ms after {} failures",
                delay.as_millis(),
                consecutive_failures
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect_and_forward(&self, client: &reqwest::Client, sink: &EventSink) -> Result<()> {
        let mut request = client
            .get(&self.url)
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache");
        if let Some(header) = &self.context_header {
            request = request.header(CONTEXT_HEADER, header);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "unexpected status {} from {}",
                response.status(),
                self.url
            )));
        }

        info!("feature stream connected");

        let mut events = response.bytes_stream().eventsource();
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    if !sink.event(event.into()).await {
                        return Ok(());
                    }
                }
                Err(e) => return Err(Error::Transport(e.to_string())),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextBuilder;
    use spectral::prelude::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn sse_config_defaults() {
        let config = SseConfig::default();
        assert_eq!(config.reconnect_base_delay, Duration::from_secs(1));
        assert_eq!(config.reconnect_max_delay, Duration::from_secs(30));
        assert_eq!(config.max_reconnect_attempts, 0);
        assert!(config.use_exponential_backoff);
    }

    #[test]
    fn backoff_doubles_up_to_the_maximum() {
        let config = SseConfig::default();
        assert_that!(config.backoff(0)).is_equal_to(Duration::from_secs(1));
        assert_that!(config.backoff(1)).is_equal_to(Duration::from_secs(2));
        assert_that!(config.backoff(4)).is_equal_to(Duration::from_secs(16));
        assert_that!(config.backoff(5)).is_equal_to(Duration::from_secs(30));
        assert_that!(config.backoff(u32::MAX)).is_equal_to(Duration::from_secs(30));

        let flat = SseConfig {
            use_exponential_backoff: false,
            ..SseConfig::default()
        };
        assert_that!(flat.backoff(7)).is_equal_to(Duration::from_secs(1));
    }

    #[tokio::test]
    async fn channel_carries_events_and_errors() {
        let (sink, stream) = channel(4);
        assert!(sink.event(RawEvent::new("ack", "{}")).await);
        assert!(sink.error(Error::Transport("refused".into())).await);

        let (mut events, mut errors, task) = stream.into_parts();
        assert_that!(task).is_none();
        assert_that!(events.recv().await).contains_value(RawEvent::new("ack", "{}"));
        assert_that!(errors.recv().await).contains_value(Error::Transport("refused".into()));

        drop(events);
        assert!(sink.is_closed());
        assert!(!sink.event(RawEvent::new("bye", "")).await);
    }

    /// Accepts one connection, answers it with `body` as an event stream and returns the raw
    /// request head.
    async fn serve_once(listener: TcpListener, body: &'static str) -> String {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }

        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
        String::from_utf8(request).unwrap()
    }

    #[tokio::test]
    async fn transport_forwards_events_with_context_header() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/features/default/env/key", listener.local_addr().unwrap());
        let server = tokio::spawn(serve_once(
            listener,
            "event: ack\ndata: {}\n\nevent: features\ndata: [{\"key\": \"f\"}]\n\n",
        ));

        let header = ContextBuilder::new()
            .user_key("fred@example.com")
            .country("united_kingdom")
            .build()
            .to_header();
        let config = SseConfig {
            reconnect_base_delay: Duration::from_millis(1),
            reconnect_max_delay: Duration::from_millis(5),
            max_reconnect_attempts: 1,
            use_exponential_backoff: false,
        };
        let transport = SseTransport::new(url, Some(header.clone()), config);
        let (mut events, _errors, task) = transport.start(4).into_parts();

        let first = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap();
        assert_that!(first).contains_value(RawEvent::new("ack", "{}"));
        let second = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap();
        assert_that!(second).contains_value(RawEvent::new("features", r#"[{"key": "f"}]"#));

        let request = server.await.unwrap().to_lowercase();
        assert_that!(request.starts_with("get /features/default/env/key ")).is_true();
        assert_that!(request.contains("accept: text/event-stream")).is_true();
        assert_that!(request.contains(&format!("{}: {}", CONTEXT_HEADER, header.to_lowercase())))
            .is_true();

        task.unwrap().abort();
    }

    #[tokio::test]
    async fn transport_omits_context_header_without_context() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/features/a/b", listener.local_addr().unwrap());
        let server = tokio::spawn(serve_once(listener, "event: ack\ndata: {}\n\n"));

        let transport = SseTransport::new(url, None, SseConfig::default());
        let (mut events, _errors, task) = transport.start(4).into_parts();

        let first = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap();
        assert_that!(first).contains_value(RawEvent::new("ack", "{}"));
        let request = server.await.unwrap().to_lowercase();
        assert_that!(request.contains(CONTEXT_HEADER)).is_false();

        task.unwrap().abort();
    }

    #[tokio::test]
    async fn transport_reports_connection_failures() {
        let config = SseConfig {
            reconnect_base_delay: Duration::from_millis(1),
            reconnect_max_delay: Duration::from_millis(5),
            max_reconnect_attempts: 2,
            use_exponential_backoff: true,
        };
        // nothing listens on port 9 locally, so every attempt fails
        let transport = SseTransport::new("http://127.0.0.1:9/features/a/b", None, config);
        let (mut events, mut errors, task) = transport.start(4).into_parts();

        let first = errors.recv().await;
        assert_that!(first).is_some().matches(|e| matches!(e, Error::Transport(_)));
        let second = errors.recv().await;
        assert_that!(second).is_some().matches(|e| matches!(e, Error::Transport(_)));

        // the loop gives up after two failures and closes both channels
        assert_that!(events.recv().await).is_none();
        assert_that!(errors.recv().await).is_none();
        task.unwrap().await.unwrap();
    }
}
