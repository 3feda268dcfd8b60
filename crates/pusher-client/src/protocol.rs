//! Pusher wire protocol: event names, frame encoding and inbound decoding.
//!
//! Every frame is a single JSON object `{"event": .., "data": .., "channel": ..}`
//! sent as a websocket text message.

use serde::{Deserialize, Serialize};

use crate::types::Event;

// ---------------------------------------------------------------------------
// Event name constants
// ---------------------------------------------------------------------------

pub mod event {
    pub const CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
    pub const ERROR: &str = "pusher:error";
    pub const PING: &str = "pusher:ping";
    pub const PONG: &str = "pusher:pong";
    pub const SUBSCRIBE: &str = "pusher:subscribe";
    pub const UNSUBSCRIBE: &str = "pusher:unsubscribe";
    pub const SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";
    pub const SUBSCRIPTION_ERROR: &str = "pusher:subscription_error";
}

/// Liveness probe sent by the heartbeat loop.
pub const PING_FRAME: &str = r#"{"event":"pusher:ping","data":"{}"}"#;
/// Reply to a server `pusher:ping`.
pub const PONG_FRAME: &str = r#"{"event":"pusher:pong","data":"{}"}"#;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct InboundFrame {
    event: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ChannelFrame<'a> {
    event: &'a str,
    data: ChannelData<'a>,
}

#[derive(Debug, Serialize)]
struct ChannelData<'a> {
    channel: &'a str,
}

/// Structured payload of a `pusher:error` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct RawError {
    #[serde(default)]
    code: Option<i32>,
    #[serde(default)]
    message: Option<String>,
}

/// Payload of `pusher:connection_established`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionEstablished {
    pub socket_id: Option<String>,
    /// Seconds of inactivity after which the server expects a ping.
    pub activity_timeout: Option<u64>,
}

// ---------------------------------------------------------------------------
// Encode / decode helpers
// ---------------------------------------------------------------------------

/// Decode one text frame into an [`Event`].
///
/// Brokers send `data` as a JSON-encoded string. That string is forwarded
/// verbatim; any other JSON value is forwarded as its serialized text.
pub fn decode_event(frame: &str) -> Result<Event, serde_json::Error> {
    let raw: InboundFrame = serde_json::from_str(frame)?;
    let data = match raw.data {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    };
    Ok(Event {
        name: raw.event,
        channel: raw.channel,
        data,
    })
}

/// Parse the payload of a `pusher:error` frame.
pub fn parse_error(data: &str) -> Result<ProtocolError, serde_json::Error> {
    let raw: RawError = serde_json::from_str(data)?;
    Ok(ProtocolError {
        code: raw.code.unwrap_or_default(),
        message: raw.message.unwrap_or_default(),
    })
}

/// Parse the payload of `pusher:connection_established`.
pub fn parse_connection_established(
    data: &str,
) -> Result<ConnectionEstablished, serde_json::Error> {
    serde_json::from_str(data)
}

pub fn subscribe_frame(channel: &str) -> Result<String, serde_json::Error> {
    channel_frame(event::SUBSCRIBE, channel)
}

pub fn unsubscribe_frame(channel: &str) -> Result<String, serde_json::Error> {
    channel_frame(event::UNSUBSCRIBE, channel)
}

fn channel_frame(event: &str, channel: &str) -> Result<String, serde_json::Error> {
    serde_json::to_string(&ChannelFrame {
        event,
        data: ChannelData { channel },
    })
}

// ---------------------------------------------------------------------------
// Frame classification
// ---------------------------------------------------------------------------

/// What the dispatch loop should do with a decoded frame.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    /// Server liveness probe; answer with [`PONG_FRAME`].
    Ping,
    /// Reply to one of our pings.
    Pong,
    /// Runtime protocol error; carries the raw payload.
    Error(String),
    /// Everything else is routed to bound delivery queues.
    Event(Event),
}

pub fn classify(event: Event) -> Inbound {
    match event.name.as_str() {
        event::PING => Inbound::Ping,
        event::PONG => Inbound::Pong,
        event::ERROR => Inbound::Error(event.data),
        _ => Inbound::Event(event),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_string_data_is_forwarded_verbatim() {
        let event = decode_event(
            r#"{"event":"new-message","channel":"chat","data":"{\"text\":\"hi\"}"}"#,
        )
        .unwrap();
        assert_eq!(event.name, "new-message");
        assert_eq!(event.channel.as_deref(), Some("chat"));
        assert_eq!(event.data, r#"{"text":"hi"}"#);
    }

    #[test]
    fn decode_object_data_is_serialized() {
        let event = decode_event(r#"{"event":"pusher:error","data":{"code":4001}}"#).unwrap();
        assert_eq!(event.name, "pusher:error");
        assert_eq!(event.data, r#"{"code":4001}"#);
        assert!(event.channel.is_none());
    }

    #[test]
    fn decode_missing_data() {
        let event = decode_event(r#"{"event":"pusher:pong"}"#).unwrap();
        assert_eq!(event.name, "pusher:pong");
        assert_eq!(event.data, "");
    }

    #[test]
    fn decode_rejects_non_event_frames() {
        assert!(decode_event("not json").is_err());
        assert!(decode_event(r#"{"data":"x"}"#).is_err());
    }

    #[test]
    fn parse_error_payload() {
        let err = parse_error(r#"{"code":4001,"message":"bad key"}"#).unwrap();
        assert_eq!(
            err,
            ProtocolError {
                code: 4001,
                message: "bad key".to_string(),
            }
        );
    }

    #[test]
    fn parse_error_null_code() {
        let err = parse_error(r#"{"code":null,"message":"Existing subscription"}"#).unwrap();
        assert_eq!(err.code, 0);
        assert_eq!(err.message, "Existing subscription");
    }

    #[test]
    fn parse_established_payload() {
        let info =
            parse_connection_established(r#"{"socket_id":"123.456","activity_timeout":120}"#)
                .unwrap();
        assert_eq!(info.socket_id.as_deref(), Some("123.456"));
        assert_eq!(info.activity_timeout, Some(120));
    }

    #[test]
    fn channel_frames_match_wire_shape() {
        assert_eq!(
            subscribe_frame("orders").unwrap(),
            r#"{"event":"pusher:subscribe","data":{"channel":"orders"}}"#
        );
        assert_eq!(
            unsubscribe_frame("orders").unwrap(),
            r#"{"event":"pusher:unsubscribe","data":{"channel":"orders"}}"#
        );
    }

    #[test]
    fn channel_names_are_escaped() {
        let frame = subscribe_frame(r#"we"ird"#).unwrap();
        assert_eq!(
            frame,
            r#"{"event":"pusher:subscribe","data":{"channel":"we\"ird"}}"#
        );
    }

    #[test]
    fn ping_pong_frames_decode() {
        assert_eq!(decode_event(PING_FRAME).unwrap().name, event::PING);
        assert_eq!(decode_event(PONG_FRAME).unwrap().name, event::PONG);
    }

    #[test]
    fn classify_control_frames() {
        let ping = decode_event(PING_FRAME).unwrap();
        assert_eq!(classify(ping), Inbound::Ping);

        let pong = decode_event(PONG_FRAME).unwrap();
        assert_eq!(classify(pong), Inbound::Pong);

        let err = decode_event(r#"{"event":"pusher:error","data":"boom"}"#).unwrap();
        assert_eq!(classify(err), Inbound::Error("boom".to_string()));
    }

    #[test]
    fn classify_application_and_internal_events() {
        let app = decode_event(r#"{"event":"foo","data":"1"}"#).unwrap();
        assert!(matches!(classify(app), Inbound::Event(e) if e.name == "foo"));

        let ok = decode_event(
            r#"{"event":"pusher_internal:subscription_succeeded","channel":"c","data":"{}"}"#,
        )
        .unwrap();
        assert!(matches!(classify(ok), Inbound::Event(e) if e.channel.as_deref() == Some("c")));
    }
}
