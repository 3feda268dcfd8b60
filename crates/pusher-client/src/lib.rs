//! Pusher Channels websocket client.
//!
//! Opens a session with a Pusher-protocol broker, joins channels, and hands
//! received events to callers through per-event-name bindings.
//!
//! # Features
//! - Protocol version 7 JSON text frames
//! - Heartbeat (`pusher:ping`) on a fixed interval, `pusher:pong` replies
//! - Bounded, ordered delivery queue per bound event name
//! - Optional confirmed subscribe (`pusher_internal:subscription_succeeded`)
//!
//! The session does not reconnect: any receive failure closes it and every
//! binding observes closure.
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), pusher_client::Error> {
//! let session = pusher_client::connect("my-app-key").await?;
//! session.subscribe("orders").await?;
//!
//! let mut created = session.bind("order-created").await?;
//! while let Some(event) = created.next().await {
//!     println!("{:?}: {}", event.channel, event.data);
//! }
//! # Ok(())
//! # }
//! ```

mod binder;
mod connection;
pub mod protocol;
mod session;
mod subscription;
mod types;

pub use binder::Binding;
pub use session::{Session, connect, connect_custom, connect_with_config};
pub use types::{ClientConfig, Error, Event, TimingConfig};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Pusher protocol version spoken by this client.
pub const PROTOCOL_VERSION: &str = connection::PROTOCOL_VERSION;
/// Default broker host.
pub const DEFAULT_HOST: &str = connection::DEFAULT_HOST;
/// Default URL scheme.
pub const DEFAULT_SCHEME: &str = connection::DEFAULT_SCHEME;
