//! The WebSocket connection that feeds remote events into the pipeline.
//!
//! The server drops idle connections with close code 1001 and reason
//! "Idle Timeout"; that close triggers a silent reconnect. Any other close,
//! error or drop moves the connection to `Disconnected` and reports once
//! through the error callback. There is no automatic retry after that, only
//! an explicit [`ConnectionHandle::reconnect`].

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use sessync_core::{RawEvent, SessionId};

use crate::error::ConnectionError;
use crate::ingest::{EventOrigin, EventSink};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code the server uses for idle connections.
pub const IDLE_TIMEOUT_CLOSE_CODE: u16 = 1001;
/// Close reason the server uses for idle connections.
pub const IDLE_TIMEOUT_REASON: &str = "Idle Timeout";
/// Reported when a close arrives without a status code.
const NO_STATUS_CODE: u16 = 1005;
/// How long an explicit close waits for the close frame to go out.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Called once per connection failure.
pub type ErrorCallback = Arc<dyn Fn(&ConnectionError) + Send + Sync>;

/// Lifecycle of the event connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying to; see the error callback.
    Disconnected,
    /// Opening, or reopening after an idle timeout.
    Connecting,
    /// Open and delivering events.
    Connected,
    /// Closed by the application. Terminal.
    Closed,
}

/// Where and how to connect.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Base WebSocket URL; `/events/<session>` is appended.
    pub events_url: String,
    /// Keepalive ping period, `None` to disable.
    pub ping_interval: Option<Duration>,
    /// Limit on opening the socket.
    pub connect_timeout: Duration,
    /// Pause before reopening after an idle-timeout close.
    pub idle_reconnect_delay: Duration,
}

impl ConnectionConfig {
    /// Config with default ping (30s), connect timeout (10s) and idle
    /// reconnect delay (500ms).
    pub fn new(events_url: impl Into<String>) -> Self {
        Self {
            events_url: events_url.into(),
            ping_interval: Some(Duration::from_secs(30)),
            connect_timeout: Duration::from_secs(10),
            idle_reconnect_delay: Duration::from_millis(500),
        }
    }
}

/// Derive the events base URL from the REST base (`http` → `ws`,
/// `https` → `wss`).
pub fn events_base_from_rest(rest_url: &str) -> Result<String, ConnectionError> {
    let mut url = Url::parse(rest_url)
        .map_err(|e| ConnectionError::InvalidUrl(format!("{rest_url}: {e}")))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ConnectionError::InvalidUrl(format!(
                "{rest_url}: unsupported scheme {other}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| ConnectionError::InvalidUrl(format!("{rest_url}: cannot use {scheme}")))?;
    Ok(url.as_str().trim_end_matches('/').to_owned())
}

/// Full events URL for one session: `<base>/events/<session>?token=<token>`.
pub fn events_url_for(
    base: &str,
    session_id: &SessionId,
    token: &SecretString,
) -> Result<Url, ConnectionError> {
    let mut url =
        Url::parse(base).map_err(|e| ConnectionError::InvalidUrl(format!("{base}: {e}")))?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|()| ConnectionError::InvalidUrl(format!("{base}: cannot be a base")))?;
        let _ = segments
            .pop_if_empty()
            .push("events")
            .push(session_id.as_str());
    }
    let _ = url
        .query_pairs_mut()
        .append_pair("token", token.expose_secret());
    Ok(url)
}

/// Whether a close frame is the server's idle timeout.
pub fn is_idle_timeout(code: u16, reason: &str) -> bool {
    code == IDLE_TIMEOUT_CLOSE_CODE && reason == IDLE_TIMEOUT_REASON
}

#[derive(Debug)]
enum SocketOutcome {
    IdleTimeout,
    Cancelled,
    Failed(ConnectionError),
}

fn classify_close(frame: Option<&CloseFrame>) -> SocketOutcome {
    let (code, reason) = frame.map_or((NO_STATUS_CODE, ""), |frame| {
        (u16::from(frame.code), frame.reason.as_str())
    });
    if is_idle_timeout(code, reason) {
        SocketOutcome::IdleTimeout
    } else {
        SocketOutcome::Failed(ConnectionError::Closed {
            code,
            reason: reason.to_owned(),
        })
    }
}

async fn next_tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            let _ = interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

struct Shared {
    url: Url,
    display_url: String,
    config: ConnectionConfig,
    sink: EventSink,
    on_error: ErrorCallback,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl Shared {
    /// `Closed` is sticky.
    fn set_state(&self, next: ConnectionState) {
        let _ = self.state.send_if_modified(|current| {
            if *current == ConnectionState::Closed || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn fail(&self, error: ConnectionError) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.set_state(ConnectionState::Disconnected);
        error!(url = %self.display_url, error = %error, "event connection lost");
        (self.on_error)(&error);
    }

    async fn run(self: Arc<Self>) {
        loop {
            self.set_state(ConnectionState::Connecting);
            info!(url = %self.display_url, "opening event connection");
            let opened = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                opened = tokio::time::timeout(
                    self.config.connect_timeout,
                    connect_async(self.url.as_str()),
                ) => opened,
            };
            let ws = match opened {
                Ok(Ok((ws, _response))) => ws,
                Ok(Err(e)) => return self.fail(ConnectionError::Open(e.to_string())),
                Err(_) => {
                    return self.fail(ConnectionError::Open(format!(
                        "timed out after {:?}",
                        self.config.connect_timeout
                    )));
                }
            };
            self.set_state(ConnectionState::Connected);
            info!(url = %self.display_url, "event connection open");

            match self.pump(ws).await {
                SocketOutcome::IdleTimeout => {
                    let delay = self.config.idle_reconnect_delay;
                    info!(?delay, "idle timeout, reconnecting");
                    self.set_state(ConnectionState::Connecting);
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                SocketOutcome::Cancelled => break,
                SocketOutcome::Failed(error) => return self.fail(error),
            }
        }
        self.set_state(ConnectionState::Closed);
        debug!("event connection task stopped");
    }

    async fn pump(&self, ws: WsStream) -> SocketOutcome {
        let (mut ws_tx, mut ws_rx) = ws.split();
        let mut keepalive = self.config.ping_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    let _ = tokio::time::timeout(CLOSE_GRACE, ws_tx.send(Message::Close(None))).await;
                    return SocketOutcome::Cancelled;
                }
                () = next_tick(keepalive.as_mut()) => {
                    trace!("keepalive ping");
                    if let Err(e) = ws_tx.send(Message::Ping(Default::default())).await {
                        return SocketOutcome::Failed(ConnectionError::Transport(e.to_string()));
                    }
                }
                message = ws_rx.next() => match message {
                    Some(Ok(message)) => {
                        if let Some(outcome) = self.on_message(message) {
                            return outcome;
                        }
                    }
                    Some(Err(e)) => {
                        return SocketOutcome::Failed(ConnectionError::Transport(e.to_string()));
                    }
                    None => return SocketOutcome::Failed(ConnectionError::Dropped),
                },
            }
        }
    }

    fn on_message(&self, message: Message) -> Option<SocketOutcome> {
        match message {
            Message::Text(text) => self.deliver(text.as_str()),
            Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => self.deliver(text),
                Err(_) => warn!(len = bytes.len(), "non-UTF-8 binary frame, dropping"),
            },
            Message::Close(frame) => return Some(classify_close(frame.as_ref())),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
        None
    }

    fn deliver(&self, text: &str) {
        match RawEvent::decode(text) {
            Ok(event) => {
                let _ = self.sink.push(event, EventOrigin::Remote);
            }
            Err(error) => warn!(%error, frame = text, "undecodable event, dropping"),
        }
    }
}

/// Control handle for a running connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    /// Start connecting. Must be called inside a Tokio runtime.
    ///
    /// `cancel` stops the connection; cancelling it has the same effect as
    /// [`close`](Self::close).
    pub fn open(
        config: ConnectionConfig,
        session_id: &SessionId,
        token: &SecretString,
        sink: EventSink,
        on_error: ErrorCallback,
        cancel: CancellationToken,
    ) -> Result<Self, ConnectionError> {
        let url = events_url_for(&config.events_url, session_id, token)?;
        let mut display = url.clone();
        display.set_query(None);
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        let handle = Self {
            shared: Arc::new(Shared {
                url,
                display_url: display.to_string(),
                config,
                sink,
                on_error,
                state,
                cancel,
            }),
        };
        handle.shared.set_state(ConnectionState::Connecting);
        drop(tokio::spawn(Arc::clone(&handle.shared).run()));
        Ok(handle)
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Receiver notified on every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Reopen after a failure. Returns `false` unless the connection is
    /// `Disconnected`.
    pub fn reconnect(&self) -> bool {
        if self.shared.cancel.is_cancelled() {
            return false;
        }
        let claimed = self.shared.state.send_if_modified(|current| {
            if *current != ConnectionState::Disconnected {
                return false;
            }
            *current = ConnectionState::Connecting;
            true
        });
        if claimed {
            info!(url = %self.shared.display_url, "manual reconnect");
            drop(tokio::spawn(Arc::clone(&self.shared).run()));
        }
        claimed
    }

    /// Close the connection. Idempotent; later events are discarded.
    pub fn close(&self) {
        self.shared.cancel.cancel();
        self.shared.set_state(ConnectionState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    fn token() -> SecretString {
        SecretString::from("t0k/en")
    }

    #[test]
    fn events_url_appends_session_and_token() {
        let url = events_url_for("ws://localhost:8000", &SessionId::from_raw("s1"), &token()).unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8000/events/s1?token=t0k%2Fen");

        let url = events_url_for("wss://host/api/", &SessionId::from_raw("s1"), &token()).unwrap();
        assert_eq!(url.as_str(), "wss://host/api/events/s1?token=t0k%2Fen");
    }

    #[test]
    fn events_url_rejects_garbage() {
        let err = events_url_for("not a url", &SessionId::from_raw("s1"), &token()).unwrap_err();
        assert_matches!(err, ConnectionError::InvalidUrl(_));
    }

    #[test]
    fn rest_url_maps_to_websocket_scheme() {
        assert_eq!(events_base_from_rest("http://localhost:8000/").unwrap(), "ws://localhost:8000");
        assert_eq!(events_base_from_rest("https://host/api").unwrap(), "wss://host/api");
        assert_matches!(
            events_base_from_rest("ftp://host"),
            Err(ConnectionError::InvalidUrl(_))
        );
    }

    #[test]
    fn only_the_exact_idle_close_is_idle() {
        assert!(is_idle_timeout(1001, "Idle Timeout"));
        assert!(!is_idle_timeout(1001, "Going away"));
        assert!(!is_idle_timeout(1000, "Idle Timeout"));

        let idle = CloseFrame {
            code: CloseCode::Away,
            reason: "Idle Timeout".into(),
        };
        assert_matches!(classify_close(Some(&idle)), SocketOutcome::IdleTimeout);

        let normal = CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        };
        assert_matches!(
            classify_close(Some(&normal)),
            SocketOutcome::Failed(ConnectionError::Closed { code: 1000, ref reason }) if reason == "bye"
        );
        assert_matches!(
            classify_close(None),
            SocketOutcome::Failed(ConnectionError::Closed { code: 1005, .. })
        );
    }
}
