//! Resilient consumption of the control plane's watch endpoint.
//!
//! A watch is an unbounded sequence of newline-delimited JSON frames
//! `{type, object}`. The producer here runs an explicit state machine
//! (Connecting → Streaming → Reconnecting → Stopped) on its own task and
//! feeds consumers through a bounded channel: transient transport failures
//! and server 5xx responses reconnect transparently at the last remembered
//! `resourceVersion`, while any other server error cleanly ends the
//! sequence. The consumer cancels by dropping the stream.

use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::api::ApiClient;

/// Channel capacity between the producer task and the consumer.
const EVENT_BUFFER: usize = 32;

/// Delay before a reconnect attempt in milliseconds.
const RECONNECT_DELAY_MS: u64 = 1000;

/// Type of a watch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventType {
    /// The object appeared.
    Added,
    /// The object changed.
    Modified,
    /// The object disappeared.
    Deleted,
}

impl WatchEventType {
    /// Parses the wire-format event type.
    #[must_use]
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "ADDED" => Some(Self::Added),
            "MODIFIED" => Some(Self::Modified),
            "DELETED" => Some(Self::Deleted),
            _ => None,
        }
    }
}

impl std::fmt::Display for WatchEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Added => "ADDED",
            Self::Modified => "MODIFIED",
            Self::Deleted => "DELETED",
        };
        write!(f, "{s}")
    }
}

/// One event delivered by a watch stream.
#[derive(Debug, Clone)]
pub struct WatchEvent<T> {
    /// What happened to the object.
    pub event_type: WatchEventType,
    /// The object itself.
    pub object: T,
    /// The server's cursor for this event.
    pub resource_version: String,
}

/// Wire frame of the watch protocol.
#[derive(Debug, Deserialize)]
struct WatchFrame {
    #[serde(rename = "type")]
    event_type: String,
    object: Value,
}

/// Phases of the watch producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchPhase {
    /// Opening the first connection.
    Connecting,
    /// Reading frames.
    Streaming,
    /// Re-opening after a transient failure.
    Reconnecting,
    /// Finished; the channel is closed.
    Stopped,
}

/// Builder for a watch over one resource collection.
pub struct Watcher {
    api: ApiClient,
    collection: String,
    resource_version: Option<String>,
    filter: Option<Box<dyn Fn(&Value) -> bool + Send + Sync>>,
}

impl Watcher {
    /// Creates a watcher for a collection.
    #[must_use]
    pub fn new(api: ApiClient, collection: impl Into<String>) -> Self {
        Self {
            api,
            collection: collection.into(),
            resource_version: None,
            filter: None,
        }
    }

    /// Starts from a known `resourceVersion` instead of the beginning.
    #[must_use]
    pub fn from_resource_version(mut self, resource_version: impl Into<String>) -> Self {
        self.resource_version = Some(resource_version.into());
        self
    }

    /// Drops raw objects the filter rejects before deserialization.
    ///
    /// Filtered-out frames still advance the resume cursor.
    #[must_use]
    pub fn with_filter(
        mut self,
        filter: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Spawns the producer task and returns the consumer half.
    ///
    /// The stream is infinite until the consumer drops it or the server
    /// answers with a non-retriable error; it is restartable only by
    /// building a fresh watcher.
    #[must_use]
    pub fn events<T>(self) -> WatchStream<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        tokio::spawn(run_watch::<T>(
            self.api,
            self.collection,
            self.resource_version,
            self.filter,
            tx,
        ));

        WatchStream { rx }
    }
}

/// Consumer half of a watch.
#[derive(Debug)]
pub struct WatchStream<T> {
    rx: mpsc::Receiver<WatchEvent<T>>,
}

impl<T> WatchStream<T> {
    /// Wraps a raw event channel, letting tests drive consumers directly.
    #[cfg(test)]
    pub(crate) const fn from_receiver(rx: mpsc::Receiver<WatchEvent<T>>) -> Self {
        Self { rx }
    }

    /// Next event, or `None` once the stream has ended.
    ///
    /// The stream ending is not an error: it means the watch met a
    /// non-retriable server response or was cancelled.
    pub async fn next(&mut self) -> Option<WatchEvent<T>> {
        self.rx.recv().await
    }
}

/// Producer loop: owns the HTTP stream and the reconnect policy.
#[allow(unused_assignments)] // `phase` tracks state-machine bookkeeping; the `Streaming` write is informational
async fn run_watch<T>(
    api: ApiClient,
    collection: String,
    mut resource_version: Option<String>,
    filter: Option<Box<dyn Fn(&Value) -> bool + Send + Sync>>,
    tx: mpsc::Sender<WatchEvent<T>>,
) where
    T: DeserializeOwned + Send + 'static,
{
    let mut phase = WatchPhase::Connecting;

    while phase != WatchPhase::Stopped {
        if tx.is_closed() {
            debug!("Watch consumer for '{collection}' is gone, stopping");
            break;
        }

        if phase == WatchPhase::Reconnecting {
            tokio::time::sleep(Duration::from_millis(RECONNECT_DELAY_MS)).await;
        }

        let response = match api
            .open_watch(&collection, resource_version.as_deref())
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_retryable() => {
                info!("Watch connection to '{collection}' failed ({e}), reconnecting");
                phase = WatchPhase::Reconnecting;
                continue;
            }
            Err(e) => {
                warn!("Watch on '{collection}' terminated: {e}");
                break;
            }
        };

        phase = WatchPhase::Streaming;
        debug!("Watch stream for '{collection}' established");

        let mut body = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        'streaming: loop {
            let chunk = tokio::select! {
                chunk = body.next() => chunk,
                () = tx.closed() => {
                    debug!("Watch consumer for '{collection}' is gone, stopping");
                    phase = WatchPhase::Stopped;
                    break 'streaming;
                }
            };

            match chunk {
                Some(Ok(bytes)) => {
                    buffer.extend_from_slice(&bytes);

                    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=pos).collect();
                        let line = &line[..line.len() - 1];
                        if line.iter().all(u8::is_ascii_whitespace) {
                            continue;
                        }

                        match deliver_frame(line, &filter, &mut resource_version, &tx).await {
                            FrameOutcome::Delivered | FrameOutcome::Skipped => {}
                            FrameOutcome::Stop => {
                                phase = WatchPhase::Stopped;
                                break 'streaming;
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    // Transport dropped mid-stream; resume at the cursor.
                    info!("Watch transport for '{collection}' lost ({e}), reconnecting");
                    phase = WatchPhase::Reconnecting;
                    break 'streaming;
                }
                None => {
                    // Servers end watch responses periodically; resume.
                    debug!("Watch stream for '{collection}' ended by server, reconnecting");
                    phase = WatchPhase::Reconnecting;
                    break 'streaming;
                }
            }
        }
    }

    debug!("Watch producer for '{collection}' stopped");
}

/// What happened to one parsed frame.
enum FrameOutcome {
    /// Event sent to the consumer.
    Delivered,
    /// Frame filtered out or unrecognized; cursor still advanced.
    Skipped,
    /// Unexpected content or consumer gone; stop the producer.
    Stop,
}

/// Parses one frame, advances the cursor and forwards the event.
async fn deliver_frame<T>(
    line: &[u8],
    filter: &Option<Box<dyn Fn(&Value) -> bool + Send + Sync>>,
    resource_version: &mut Option<String>,
    tx: &mpsc::Sender<WatchEvent<T>>,
) -> FrameOutcome
where
    T: DeserializeOwned,
{
    let frame: WatchFrame = match serde_json::from_slice(line) {
        Ok(frame) => frame,
        Err(e) => {
            error!("Malformed watch frame: {e}");
            return FrameOutcome::Stop;
        }
    };

    // Remember the cursor before filtering so a reconnect resumes past
    // frames the consumer never saw but the server already sent.
    let version = frame
        .object
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
        .map(String::from);
    if let Some(version) = version.clone() {
        *resource_version = Some(version);
    }

    let Some(event_type) = WatchEventType::from_wire(&frame.event_type) else {
        warn!("Unknown watch event type: {}", frame.event_type);
        return FrameOutcome::Skipped;
    };

    if let Some(filter) = filter
        && !filter(&frame.object)
    {
        return FrameOutcome::Skipped;
    }

    let object: T = match serde_json::from_value(frame.object) {
        Ok(object) => object,
        Err(e) => {
            error!("Failed to decode watch object: {e}");
            return FrameOutcome::Stop;
        }
    };

    let event = WatchEvent {
        event_type,
        object,
        resource_version: version.unwrap_or_default(),
    };

    if tx.send(event).await.is_err() {
        return FrameOutcome::Stop;
    }

    FrameOutcome::Delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api_for(server: &MockServer) -> ApiClient {
        let settings = Settings {
            api_url: server.uri(),
            token: None,
            request_timeout_secs: Some(5),
        };
        ApiClient::new(&settings).unwrap()
    }

    fn frame(event_type: &str, name: &str, version: &str) -> String {
        serde_json::json!({
            "type": event_type,
            "object": {
                "metadata": {"name": name, "resourceVersion": version},
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_reconnects_transparently_and_preserves_order() {
        let server = MockServer::start().await;

        // Watch calls 1 and 2 fail transiently; call 3 delivers three events.
        Mock::given(method("GET"))
            .and(path("/api/v1/watch/service"))
            .and(query_param("resourceVersion", "100"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;

        let body = format!(
            "{}\n{}\n{}\n",
            frame("ADDED", "svc-a", "101"),
            frame("MODIFIED", "svc-a", "102"),
            frame("DELETED", "svc-a", "103"),
        );
        Mock::given(method("GET"))
            .and(path("/api/v1/watch/service"))
            .and(query_param("resourceVersion", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/json"))
            .mount(&server)
            .await;

        // After consuming the three frames the producer reconnects at the
        // remembered cursor; answer non-retriably so it stops.
        Mock::given(method("GET"))
            .and(path("/api/v1/watch/service"))
            .and(query_param("resourceVersion", "103"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;

        let mut stream = Watcher::new(api_for(&server), "service")
            .from_resource_version("100")
            .events::<Value>();

        let first = stream.next().await.unwrap();
        assert_eq!(first.event_type, WatchEventType::Added);
        assert_eq!(first.resource_version, "101");

        let second = stream.next().await.unwrap();
        assert_eq!(second.event_type, WatchEventType::Modified);
        assert_eq!(second.resource_version, "102");

        let third = stream.next().await.unwrap();
        assert_eq!(third.event_type, WatchEventType::Deleted);
        assert_eq!(third.resource_version, "103");

        // The 410 on reconnect ends the sequence without an error.
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_non_retriable_open_ends_stream_silently() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/watch/service"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mut stream = Watcher::new(api_for(&server), "service").events::<Value>();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_filter_drops_events_but_advances_cursor() {
        let server = MockServer::start().await;

        let body = format!(
            "{}\n{}\n",
            frame("ADDED", "keep-me", "201"),
            frame("ADDED", "drop-me", "202"),
        );
        Mock::given(method("GET"))
            .and(path("/api/v1/watch/service"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/json"))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        // Reconnect must carry the cursor of the dropped frame.
        Mock::given(method("GET"))
            .and(path("/api/v1/watch/service"))
            .and(query_param("resourceVersion", "202"))
            .respond_with(ResponseTemplate::new(410))
            .expect(1)
            .mount(&server)
            .await;

        let mut stream = Watcher::new(api_for(&server), "service")
            .with_filter(|object| {
                object.pointer("/metadata/name").and_then(Value::as_str) == Some("keep-me")
            })
            .events::<Value>();

        let only = stream.next().await.unwrap();
        assert_eq!(only.resource_version, "201");
        assert!(stream.next().await.is_none());

        server.verify().await;
    }

    #[test]
    fn test_event_type_wire_format() {
        assert_eq!(
            WatchEventType::from_wire("ADDED"),
            Some(WatchEventType::Added)
        );
        assert_eq!(WatchEventType::from_wire("BOOKMARK"), None);
        assert_eq!(WatchEventType::Deleted.to_string(), "DELETED");
    }
}
