//! Public types for the pusher-client crate.

use std::time::Duration;

use tokio_tungstenite::tungstenite;

use crate::connection::{DEFAULT_HOST, DEFAULT_ORIGIN, DEFAULT_SCHEME};

/// An event received from the broker.
///
/// Only `name` drives routing. `data` is forwarded exactly as the broker sent
/// it and is never parsed by this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Event name (e.g. `"new-message"`, `"pusher_internal:subscription_succeeded"`).
    pub name: String,
    /// Channel the event was published on, when the broker names one.
    pub channel: Option<String>,
    /// Opaque serialized payload.
    pub data: String,
}

/// Timing and buffering knobs. All fields have production defaults.
#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// Interval between two `pusher:ping` frames.
    pub heartbeat_interval: Duration,
    /// Upper bound for dial + welcome frame.
    pub handshake_timeout: Duration,
    /// Capacity of each bound delivery queue.
    pub event_channel_capacity: usize,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: crate::connection::HEARTBEAT_INTERVAL,
            handshake_timeout: crate::connection::HANDSHAKE_TIMEOUT,
            event_channel_capacity: crate::binder::EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// Configuration for [`connect_with_config`](crate::connect_with_config).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Application key the session is opened for.
    pub app_key: String,
    /// Broker `host[:port]`. Defaults to `"ws.pusherapp.com:443"`.
    pub host: String,
    /// URL scheme, `"wss"` or `"ws"`. Defaults to `"wss"`.
    pub scheme: String,
    /// `Origin` header sent with the websocket upgrade.
    pub origin: String,
    /// Optional timing overrides.
    pub timing: Option<TimingConfig>,
}

impl ClientConfig {
    /// Config for the default public endpoint.
    pub fn new(app_key: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            host: DEFAULT_HOST.to_string(),
            scheme: DEFAULT_SCHEME.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            timing: None,
        }
    }

    /// Config for a custom broker.
    pub fn custom(
        app_key: impl Into<String>,
        host: impl Into<String>,
        scheme: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            scheme: scheme.into(),
            ..Self::new(app_key)
        }
    }
}

/// Errors returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("handshake rejected by server: code={code}, {message}")]
    HandshakeRejected { code: i32, message: String },

    #[error("channel {0} already subscribed")]
    AlreadySubscribed(String),

    #[error("not subscribed to channel {0}")]
    NotSubscribed(String),

    #[error("event {0} already bound")]
    AlreadyBound(String),

    #[error("subscription to {channel} rejected: {message}")]
    SubscriptionRejected { channel: String, message: String },

    #[error("no subscription confirmation for {0}")]
    SubscriptionTimeout(String),

    #[error("session closed")]
    Closed,

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    #[error("JSON encode error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_targets_public_endpoint() {
        let config = ClientConfig::new("app-key");
        assert_eq!(config.app_key, "app-key");
        assert_eq!(config.host, "ws.pusherapp.com:443");
        assert_eq!(config.scheme, "wss");
        assert_eq!(config.origin, "http://localhost/");
        assert!(config.timing.is_none());
    }

    #[test]
    fn custom_config_keeps_origin_default() {
        let config = ClientConfig::custom("k", "127.0.0.1:9000", "ws");
        assert_eq!(config.host, "127.0.0.1:9000");
        assert_eq!(config.scheme, "ws");
        assert_eq!(config.origin, "http://localhost/");
    }

    #[test]
    fn timing_defaults() {
        let timing = TimingConfig::default();
        assert_eq!(timing.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(timing.handshake_timeout, Duration::from_secs(30));
        assert_eq!(timing.event_channel_capacity, 1000);
    }

    #[test]
    fn rejected_error_display() {
        let err = Error::HandshakeRejected {
            code: 4001,
            message: "bad key".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "handshake rejected by server: code=4001, bad key"
        );
    }
}
