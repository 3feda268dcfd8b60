//! Connection management: dial, handshake, heartbeat and dispatch loops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header};
use tokio_util::sync::CancellationToken;

use crate::Error;
use crate::binder::Delivery;
use crate::protocol::{
    ConnectionEstablished, Inbound, PING_FRAME, PONG_FRAME, classify, decode_event,
    event as event_name, parse_connection_established, parse_error,
};
use crate::session::SessionState;
use crate::types::Event;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub(crate) const DEFAULT_HOST: &str = "ws.pusherapp.com:443";
pub(crate) const DEFAULT_SCHEME: &str = "wss";
pub(crate) const DEFAULT_ORIGIN: &str = "http://localhost/";
pub(crate) const PROTOCOL_VERSION: &str = "7";
pub(crate) const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub(crate) const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
const AGENT_STRING: &str = concat!("pusher-client-rs/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Type aliases for WebSocket split halves
// ---------------------------------------------------------------------------

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub(crate) type WsRead = futures_util::stream::SplitStream<WsStream>;
pub(crate) type WsWrite = futures_util::stream::SplitSink<WsStream, tungstenite::Message>;

// ---------------------------------------------------------------------------
// WebSocket URL construction
// ---------------------------------------------------------------------------

/// `<scheme>://<host>/app/<app_key>?protocol=7`
pub(crate) fn build_ws_url(scheme: &str, host: &str, app_key: &str) -> Result<url::Url, Error> {
    let mut u = url::Url::parse(&format!("{scheme}://{host}/"))
        .map_err(|e| Error::HandshakeFailed(format!("invalid broker URL: {e}")))?;
    u.path_segments_mut()
        .map_err(|()| Error::HandshakeFailed(format!("URL scheme {scheme} cannot carry a path")))?
        .pop_if_empty()
        .push("app")
        .push(app_key);
    u.query_pairs_mut().append_pair("protocol", PROTOCOL_VERSION);
    Ok(u)
}

// ---------------------------------------------------------------------------
// Connect + handshake (used by the bootstrap entry points)
// ---------------------------------------------------------------------------

async fn dial(url: &url::Url, origin: &str) -> Result<(WsWrite, WsRead), Error> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| Error::HandshakeFailed(format!("invalid upgrade request: {e}")))?;
    let origin = HeaderValue::from_str(origin)
        .map_err(|e| Error::HandshakeFailed(format!("invalid origin: {e}")))?;
    request.headers_mut().insert(header::ORIGIN, origin);
    request
        .headers_mut()
        .insert(header::USER_AGENT, HeaderValue::from_static(AGENT_STRING));
    let (ws, _resp) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| Error::HandshakeFailed(format!("dial {url}: {e}")))?;
    Ok(ws.split())
}

/// A websocket message reduced to what the protocol layer cares about.
enum Received {
    Text(String),
    /// Websocket-level ping/pong, answered by tungstenite itself.
    Control,
    Closed,
    Invalid(String),
}

fn received(msg: tungstenite::Message) -> Received {
    match msg {
        tungstenite::Message::Text(text) => Received::Text(text.as_str().to_owned()),
        tungstenite::Message::Binary(data) => match String::from_utf8(data.to_vec()) {
            Ok(text) => Received::Text(text),
            Err(e) => Received::Invalid(format!("binary frame is not UTF-8: {e}")),
        },
        tungstenite::Message::Ping(_)
        | tungstenite::Message::Pong(_)
        | tungstenite::Message::Frame(_) => Received::Control,
        tungstenite::Message::Close(_) => Received::Closed,
    }
}

/// Read the first protocol frame: the welcome frame or a rejection.
async fn wait_for_established(ws_read: &mut WsRead) -> Result<ConnectionEstablished, Error> {
    while let Some(frame) = ws_read.next().await {
        let frame = frame.map_err(|e| Error::HandshakeFailed(format!("receive failed: {e}")))?;
        let text = match received(frame) {
            Received::Text(text) => text,
            Received::Control => continue,
            Received::Closed => break,
            Received::Invalid(reason) => return Err(Error::HandshakeFailed(reason)),
        };
        let event = decode_event(&text)
            .map_err(|e| Error::HandshakeFailed(format!("undecodable first frame: {e}")))?;
        return match event.name.as_str() {
            event_name::CONNECTION_ESTABLISHED => {
                Ok(parse_connection_established(&event.data).unwrap_or_else(|e| {
                    tracing::warn!("Malformed connection_established payload: {e}");
                    ConnectionEstablished::default()
                }))
            }
            event_name::ERROR => {
                let err = parse_error(&event.data).map_err(|e| {
                    Error::HandshakeFailed(format!("undecodable error payload: {e}"))
                })?;
                Err(Error::HandshakeRejected {
                    code: err.code,
                    message: err.message,
                })
            }
            other => Err(Error::HandshakeFailed(format!(
                "unexpected first frame: {other}"
            ))),
        };
    }
    Err(Error::HandshakeFailed(
        "connection closed before connection_established".to_string(),
    ))
}

pub(crate) async fn handshake(
    url: &url::Url,
    origin: &str,
) -> Result<(WsWrite, WsRead, ConnectionEstablished), Error> {
    let (ws_write, mut ws_read) = dial(url, origin).await?;
    let established = wait_for_established(&mut ws_read).await?;
    Ok((ws_write, ws_read, established))
}

// ---------------------------------------------------------------------------
// Transport writer
// ---------------------------------------------------------------------------

/// Write half of the connection plus its closed state.
///
/// Sends are serialized by the mutex, so frames from the heartbeat loop, the
/// dispatch loop and API calls never interleave. Cancelling `closed` is what
/// the dispatch loop observes as the transport going away.
pub(crate) struct Transport {
    writer: Mutex<WsWrite>,
    closed: CancellationToken,
    shut_down: AtomicBool,
}

impl Transport {
    pub fn new(writer: WsWrite) -> Self {
        Self {
            writer: Mutex::new(writer),
            closed: CancellationToken::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn closed_token(&self) -> &CancellationToken {
        &self.closed
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Mark the transport closed without touching the socket. Safe from `Drop`.
    pub fn sever(&self) {
        self.closed.cancel();
    }

    /// Send one text frame. Gives up with [`Error::Closed`] as soon as the
    /// transport is closed, including while waiting on a stalled peer.
    pub async fn send_text(&self, frame: impl Into<String>) -> Result<(), Error> {
        let frame: String = frame.into();
        let mut writer = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(Error::Closed),
            writer = self.writer.lock() => writer,
        };
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(Error::Closed),
            sent = writer.send(tungstenite::Message::text(frame)) => Ok(sent?),
        }
    }

    /// Close the socket. Returns `false` if it was already closed.
    pub async fn close(&self) -> bool {
        self.closed.cancel();
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return false;
        }
        let mut writer = self.writer.lock().await;
        match tokio::time::timeout(CLOSE_TIMEOUT, writer.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("WebSocket close: {e}"),
            Err(_) => tracing::debug!("WebSocket close timed out"),
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Heartbeat loop
// ---------------------------------------------------------------------------

/// Send `pusher:ping` every `interval` until `stop_rx` fires.
///
/// Send failures are ignored here: a broken transport also fails reads, and
/// the dispatch loop closes the session on that.
pub(crate) async fn run_heartbeat(
    transport: Arc<Transport>,
    interval: Duration,
    mut stop_rx: mpsc::Receiver<()>,
) {
    let interval = interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                tracing::debug!("Heartbeat stopped");
                return;
            }
            _ = ticker.tick() => {
                match transport.send_text(PING_FRAME).await {
                    Ok(()) => tracing::trace!("Ping sent"),
                    Err(e) => tracing::debug!("Ping send failed: {e}"),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch loop
// ---------------------------------------------------------------------------

/// Receive frames until the transport fails or closes, then close the session.
pub(crate) async fn run_dispatch_loop(state: Arc<SessionState>, mut ws_read: WsRead) {
    let closed = state.transport.closed_token().clone();

    loop {
        let frame = tokio::select! {
            biased;
            _ = closed.cancelled() => {
                tracing::debug!("Transport closed, dispatch loop exiting");
                break;
            }
            frame = ws_read.next() => frame,
        };

        let text = match frame {
            Some(Ok(msg)) => match received(msg) {
                Received::Text(text) => text,
                Received::Control => continue,
                Received::Closed => {
                    tracing::info!("Connection closed by server");
                    break;
                }
                Received::Invalid(reason) => {
                    tracing::warn!("Invalid frame: {reason}");
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!("WebSocket error: {e}");
                break;
            }
            None => {
                tracing::info!("WebSocket stream ended");
                break;
            }
        };

        let event = match decode_event(&text) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Failed to decode frame: {e}");
                break;
            }
        };

        match classify(event) {
            Inbound::Ping => {
                tracing::trace!("Ping received");
                if let Err(e) = state.transport.send_text(PONG_FRAME).await {
                    tracing::debug!("Pong send failed: {e}");
                }
            }
            Inbound::Pong => {
                tracing::trace!("Pong received");
            }
            Inbound::Error(payload) => {
                tracing::warn!(%payload, "Event error received");
            }
            Inbound::Event(event) => {
                confirm_subscription(&state, &event).await;
                match state.binders.deliver(event, &closed).await {
                    Delivery::Delivered => {}
                    Delivery::Unbound => tracing::trace!("No binding, event dropped"),
                    Delivery::ReceiverGone => {
                        tracing::debug!("Binding receiver dropped, event discarded");
                    }
                    Delivery::Interrupted => break,
                }
            }
        }
    }

    state.close().await;
}

/// Wake a [`Session::subscribe_confirmed`](crate::Session::subscribe_confirmed)
/// waiting on this event's channel.
async fn confirm_subscription(state: &SessionState, event: &Event) {
    let Some(channel) = event.channel.as_deref() else {
        return;
    };
    match event.name.as_str() {
        event_name::SUBSCRIPTION_SUCCEEDED => {
            tracing::debug!(channel, "Subscription succeeded");
            state.pending.resolve(channel, Ok(())).await;
        }
        event_name::SUBSCRIPTION_ERROR => {
            tracing::warn!(channel, payload = %event.data, "Subscription error");
            state.pending.resolve(channel, Err(event.data.clone())).await;
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_ws_url_custom_host() {
        let url = build_ws_url("ws", "127.0.0.1:9000", "app-key").unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:9000/app/app-key?protocol=7");
    }

    #[test]
    fn build_ws_url_default_endpoint() {
        let url = build_ws_url(DEFAULT_SCHEME, DEFAULT_HOST, "abc123").unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.host_str(), Some("ws.pusherapp.com"));
        assert_eq!(url.port_or_known_default(), Some(443));
        assert_eq!(url.path(), "/app/abc123");
        assert_eq!(url.query(), Some("protocol=7"));
    }

    #[test]
    fn build_ws_url_escapes_key() {
        let url = build_ws_url("ws", "localhost:1", "a/b c").unwrap();
        assert_eq!(url.path(), "/app/a%2Fb%20c");
    }

    #[test]
    fn build_ws_url_rejects_bad_host() {
        let err = build_ws_url("ws", "bad host", "k").unwrap_err();
        assert!(matches!(err, Error::HandshakeFailed(_)));
    }

    #[test]
    fn received_classifies_messages() {
        assert!(matches!(
            received(tungstenite::Message::text("hi".to_string())),
            Received::Text(t) if t == "hi"
        ));
        assert!(matches!(
            received(tungstenite::Message::binary(b"{}".to_vec())),
            Received::Text(t) if t == "{}"
        ));
        assert!(matches!(
            received(tungstenite::Message::binary(vec![0xff, 0xfe])),
            Received::Invalid(_)
        ));
        assert!(matches!(
            received(tungstenite::Message::Ping(Default::default())),
            Received::Control
        ));
        assert!(matches!(
            received(tungstenite::Message::Close(None)),
            Received::Closed
        ));
    }
}
