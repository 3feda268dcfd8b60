//! Public entry points: [`connect`], [`connect_custom`], [`connect_with_config`]
//! and the [`Session`] handle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::binder::{BinderRegistry, Binding};
use crate::connection::{Transport, build_ws_url, handshake, run_dispatch_loop, run_heartbeat};
use crate::protocol::{ConnectionEstablished, subscribe_frame, unsubscribe_frame};
use crate::subscription::{PendingSubscriptions, SubscriptionRegistry};
use crate::types::{ClientConfig, Error};

/// State shared between the [`Session`] handle and its background tasks.
pub(crate) struct SessionState {
    pub transport: Arc<Transport>,
    pub subscriptions: SubscriptionRegistry,
    pub pending: PendingSubscriptions,
    pub binders: BinderRegistry,
    heartbeat_stop: mpsc::Sender<()>,
    established: ConnectionEstablished,
}

impl SessionState {
    /// Release everything. Safe to call repeatedly and from the dispatch loop.
    ///
    /// The transport is closed before the binder lock is taken, so a dispatch
    /// loop blocked on a full queue lets go of its read lock first.
    pub async fn close(&self) {
        let first = self.transport.close().await;
        let unbound = self.binders.close_all().await;
        self.pending.clear().await;
        // Single slot: if the heartbeat already has a pending stop, this is a no-op.
        let _ = self.heartbeat_stop.try_send(());
        if first {
            tracing::info!(closed_bindings = unbound, "Session closed");
        }
    }
}

/// A live connection to the broker.
///
/// Created by [`connect`] and friends once the broker's welcome frame has been
/// received. A heartbeat task and a dispatch task run in the background for
/// as long as the connection is up.
///
/// The session does not reconnect. When the connection fails, every
/// [`Binding`] yields `None` and further operations return [`Error::Closed`].
/// Dropping the session closes it.
pub struct Session {
    state: Arc<SessionState>,
}

impl Session {
    /// Socket id assigned by the broker in the welcome frame.
    pub fn socket_id(&self) -> Option<&str> {
        self.state.established.socket_id.as_deref()
    }

    /// Inactivity window announced by the broker in the welcome frame.
    pub fn activity_timeout(&self) -> Option<Duration> {
        self.state
            .established
            .activity_timeout
            .map(Duration::from_secs)
    }

    pub fn is_closed(&self) -> bool {
        self.state.transport.is_closed()
    }

    /// Join `channel`.
    ///
    /// Fire-and-forget: the channel is recorded as soon as the subscribe frame
    /// is sent. Use [`subscribe_confirmed`](Self::subscribe_confirmed) to wait
    /// for the broker's acknowledgement.
    pub async fn subscribe(&self, channel: &str) -> Result<(), Error> {
        let state = &self.state;
        let frame = subscribe_frame(channel)?;
        state
            .subscriptions
            .join(channel, move || state.transport.send_text(frame))
            .await?;
        tracing::debug!(channel, "Subscribe sent");
        Ok(())
    }

    /// Join `channel` and wait up to `wait` for the broker to confirm it.
    ///
    /// On rejection or timeout the channel is not left recorded as subscribed.
    /// After a timeout an unsubscribe frame is sent, so a late confirmation
    /// does not leave the socket on the channel.
    pub async fn subscribe_confirmed(&self, channel: &str, wait: Duration) -> Result<(), Error> {
        let state = &self.state;
        let frame = subscribe_frame(channel)?;
        let confirmation = state
            .subscriptions
            .join(channel, move || async move {
                let Some(confirmation) = state.pending.register(channel).await else {
                    return Err(Error::AlreadySubscribed(channel.to_string()));
                };
                if let Err(e) = state.transport.send_text(frame).await {
                    state.pending.cancel(channel).await;
                    return Err(e);
                }
                Ok(confirmation)
            })
            .await?;

        match tokio::time::timeout(wait, confirmation).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(message))) => {
                state.subscriptions.remove(channel).await;
                Err(Error::SubscriptionRejected {
                    channel: channel.to_string(),
                    message,
                })
            }
            // Waiter dropped: the session closed underneath us.
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => {
                state.pending.cancel(channel).await;
                self.abandon(channel).await;
                Err(Error::SubscriptionTimeout(channel.to_string()))
            }
        }
    }

    /// Best-effort leave for a subscription that was never confirmed. The
    /// channel is forgotten even if the unsubscribe frame cannot be sent.
    async fn abandon(&self, channel: &str) {
        let state = &self.state;
        let frame = match unsubscribe_frame(channel) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(channel, "Unsubscribe frame encode failed: {e}");
                state.subscriptions.remove(channel).await;
                return;
            }
        };
        let left = state
            .subscriptions
            .leave(channel, move || async move {
                if let Err(e) = state.transport.send_text(frame).await {
                    tracing::debug!(channel, "Unsubscribe after timeout failed: {e}");
                }
                Ok::<(), Error>(())
            })
            .await;
        if left.is_ok() {
            tracing::debug!(channel, "Unconfirmed subscription abandoned");
        }
    }

    /// Leave `channel`.
    pub async fn unsubscribe(&self, channel: &str) -> Result<(), Error> {
        let state = &self.state;
        let frame = unsubscribe_frame(channel)?;
        state
            .subscriptions
            .leave(channel, move || state.transport.send_text(frame))
            .await?;
        tracing::debug!(channel, "Unsubscribe sent");
        Ok(())
    }

    pub async fn is_subscribed(&self, channel: &str) -> bool {
        self.state.subscriptions.contains(channel).await
    }

    /// Channels currently recorded as subscribed, sorted.
    pub async fn subscribed_channels(&self) -> Vec<String> {
        self.state.subscriptions.channels().await
    }

    /// Start receiving events named `event`.
    ///
    /// Events are routed by name regardless of channel. The returned
    /// [`Binding`] is closed by [`unbind`](Self::unbind) or when the session
    /// closes.
    pub async fn bind(&self, event: &str) -> Result<Binding, Error> {
        self.state
            .binders
            .bind(event, self.state.transport.closed_token())
            .await
    }

    /// Stop receiving events named `event`. The binding's queue is closed; it
    /// still yields events buffered before the call. Returns whether `event`
    /// was bound.
    pub async fn unbind(&self, event: &str) -> bool {
        self.state.binders.unbind(event).await
    }

    pub async fn is_bound(&self, event: &str) -> bool {
        self.state.binders.is_bound(event).await
    }

    /// Close the connection and every binding. Idempotent.
    pub async fn close(&self) {
        self.state.close().await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // The dispatch loop observes this and runs the full close.
        self.state.transport.sever();
    }
}

/// Connect to the default public endpoint.
pub async fn connect(app_key: &str) -> Result<Session, Error> {
    connect_with_config(ClientConfig::new(app_key)).await
}

/// Connect to a custom broker, e.g. `connect_custom(key, "127.0.0.1:6001", "ws")`.
pub async fn connect_custom(app_key: &str, host: &str, scheme: &str) -> Result<Session, Error> {
    connect_with_config(ClientConfig::custom(app_key, host, scheme)).await
}

/// Open the connection, wait for the broker's welcome frame, then start the
/// heartbeat and dispatch tasks.
///
/// Fails with [`Error::HandshakeRejected`] if the broker answers with
/// `pusher:error`, and with [`Error::HandshakeFailed`] on any other failure
/// before the welcome frame. No background task is started on failure.
pub async fn connect_with_config(config: ClientConfig) -> Result<Session, Error> {
    let timing = config.timing.unwrap_or_default();
    let url = build_ws_url(&config.scheme, &config.host, &config.app_key)?;

    let (ws_write, ws_read, established) =
        tokio::time::timeout(timing.handshake_timeout, handshake(&url, &config.origin))
            .await
            .map_err(|_| {
                Error::HandshakeFailed(
                    "timed out waiting for connection_established".to_string(),
                )
            })??;
    tracing::info!(
        socket_id = established.socket_id.as_deref().unwrap_or("-"),
        "Connection established",
    );

    let transport = Arc::new(Transport::new(ws_write));
    let (stop_tx, stop_rx) = mpsc::channel::<()>(1);
    let state = Arc::new(SessionState {
        transport: Arc::clone(&transport),
        subscriptions: SubscriptionRegistry::new(),
        pending: PendingSubscriptions::new(),
        binders: BinderRegistry::new(timing.event_channel_capacity),
        heartbeat_stop: stop_tx,
        established,
    });

    tokio::spawn(run_heartbeat(transport, timing.heartbeat_interval, stop_rx));
    tokio::spawn(run_dispatch_loop(Arc::clone(&state), ws_read));

    Ok(Session { state })
}
