//! Transport supervisor
//!
//! Owns the connection lifecycle and routes inbound traffic to subscribers.
//!
//! Subscriptions are ordered lists per (channel, event): every subscriber
//! of an event receives every message for it, in arrival order. They are
//! held locally, so they survive reconnects and are re-attached to each new
//! session automatically.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::message::{ChannelKind, ChannelMessage, Inbound, PresenceAction, PresenceMember};
use super::replay::ReplayBuffer;
use super::{Transport, TransportConfig};

/// Receiver side of an event subscription
pub type Subscription = mpsc::UnboundedReceiver<ChannelMessage>;

/// Receiver side of a presence subscription
pub type PresenceSubscription = mpsc::UnboundedReceiver<PresenceMember>;

/// Connection lifecycle state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Connect was rejected or the session was lost
    Failed(String),
}

/// Routing table shared between the supervisor and its pump task
struct Router {
    control_channel: String,
    devices_channel: String,
    own_client_id: Option<String>,
    handlers: HashMap<(ChannelKind, String), Vec<mpsc::UnboundedSender<ChannelMessage>>>,
    presence: HashMap<PresenceAction, Vec<mpsc::UnboundedSender<PresenceMember>>>,
    replay: ReplayBuffer,
}

impl Router {
    fn channel_kind(&self, channel: &str) -> Option<ChannelKind> {
        if channel == self.control_channel {
            Some(ChannelKind::Control)
        } else if channel == self.devices_channel {
            Some(ChannelKind::Devices)
        } else {
            None
        }
    }

    fn dispatch(&mut self, message: ChannelMessage) {
        if message.client_id.is_some() && message.client_id == self.own_client_id {
            return;
        }

        let Some(kind) = self.channel_kind(&message.channel) else {
            tracing::debug!(channel = %message.channel, "Message on unknown channel ignored");
            return;
        };

        let key = (kind, message.name.clone());
        let mut delivered = 0usize;
        if let Some(senders) = self.handlers.get_mut(&key) {
            senders.retain(|tx| {
                let ok = tx.send(message.clone()).is_ok();
                delivered += usize::from(ok);
                ok
            });
            if senders.is_empty() {
                self.handlers.remove(&key);
            }
        }

        if delivered > 0 {
            return;
        }

        match kind {
            ChannelKind::Devices => {
                tracing::debug!(event = %message.name, "No subscriber yet, parking device message");
                self.replay.push(message);
            }
            ChannelKind::Control => {
                tracing::trace!(event = %message.name, "No subscriber for control message");
            }
        }
    }

    fn dispatch_presence(&mut self, action: PresenceAction, member: PresenceMember) {
        if let Some(senders) = self.presence.get_mut(&action) {
            senders.retain(|tx| tx.send(member.clone()).is_ok());
        }
    }

    fn subscriber_count(&self) -> usize {
        self.handlers.values().map(Vec::len).sum::<usize>()
            + self.presence.values().map(Vec::len).sum::<usize>()
    }
}

/// Supervises the connection to a pub/sub transport for one room
pub struct TransportSupervisor<T: Transport> {
    transport: Arc<T>,
    config: TransportConfig,
    room: String,
    state: Arc<watch::Sender<ConnectionState>>,
    client_id: RwLock<Option<String>>,
    router: Arc<Mutex<Router>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> TransportSupervisor<T> {
    /// Create a supervisor for a room; nothing connects until [`connect`](Self::connect)
    pub fn new(transport: T, room: impl Into<String>, config: TransportConfig) -> Self {
        let room = room.into();
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        let router = Router {
            control_channel: room.clone(),
            devices_channel: format!("{}-devices", room),
            own_client_id: None,
            handlers: HashMap::new(),
            presence: HashMap::new(),
            replay: ReplayBuffer::with_limits(config.replay_max_messages, config.replay_max_bytes),
        };

        Self {
            transport: Arc::new(transport),
            config,
            room,
            state: Arc::new(state),
            client_id: RwLock::new(None),
            router: Arc::new(Mutex::new(router)),
            pump: Mutex::new(None),
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Name of a logical channel
    pub fn channel_name(&self, kind: ChannelKind) -> String {
        match kind {
            ChannelKind::Control => self.room.clone(),
            ChannelKind::Devices => format!("{}-devices", self.room),
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Watch connection state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.state.borrow() == ConnectionState::Connected
    }

    /// Session identity of the current connection
    pub async fn client_id(&self) -> Option<String> {
        self.client_id.read().await.clone()
    }

    /// Connect and attach both channels of the room
    ///
    /// Existing subscriptions are re-attached to the new session.
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            tracing::debug!(room = %self.room, "Already connected");
            return Ok(());
        }

        self.state.send_replace(ConnectionState::Connecting);

        let client_id = format!("console-{}", Uuid::new_v4());
        let channels = vec![
            self.channel_name(ChannelKind::Control),
            self.channel_name(ChannelKind::Devices),
        ];

        let attached = tokio::time::timeout(
            self.config.connect_timeout,
            self.transport.connect(&client_id, &channels),
        )
        .await;

        let inbound = match attached {
            Ok(Ok(inbound)) => inbound,
            Ok(Err(e)) => return Err(self.fail(e.to_string())),
            Err(_) => return Err(self.fail("timed out waiting for transport".to_string())),
        };

        let subscribers = {
            let mut router = self.router.lock().await;
            router.own_client_id = Some(client_id.clone());
            router.subscriber_count()
        };
        *self.client_id.write().await = Some(client_id.clone());

        let handle = self.spawn_pump(inbound);
        if let Some(previous) = self.pump.lock().await.replace(handle) {
            previous.abort();
        }

        self.state.send_replace(ConnectionState::Connected);
        tracing::info!(
            room = %self.room,
            client_id = %client_id,
            endpoint = %self.config.endpoint,
            subscribers = subscribers,
            "Transport connected"
        );

        Ok(())
    }

    fn fail(&self, reason: String) -> Error {
        tracing::warn!(room = %self.room, reason = %reason, "Transport connect failed");
        self.state.send_replace(ConnectionState::Failed(reason.clone()));
        Error::Connection(reason)
    }

    fn spawn_pump(&self, mut inbound: mpsc::UnboundedReceiver<Inbound>) -> JoinHandle<()> {
        let router = Arc::clone(&self.router);
        let state = Arc::clone(&self.state);
        let room = self.room.clone();

        tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                match event {
                    Inbound::Message(message) => {
                        router.lock().await.dispatch(message);
                    }
                    Inbound::Presence(presence) => {
                        let mut router = router.lock().await;
                        if presence.channel == router.control_channel {
                            router.dispatch_presence(presence.action, presence.member);
                        }
                    }
                    Inbound::Closed { reason } => {
                        tracing::warn!(room = %room, reason = %reason, "Transport session lost");
                        state.send_replace(ConnectionState::Failed(reason));
                        return;
                    }
                }
            }

            tracing::warn!(room = %room, "Transport inbound stream ended");
            state.send_replace(ConnectionState::Disconnected);
        })
    }

    /// Detach from the transport
    ///
    /// Subscriptions stay registered for the next connect; parked replay
    /// messages are dropped with the session.
    pub async fn disconnect(&self) {
        if let Some(handle) = self.pump.lock().await.take() {
            handle.abort();
        }

        if let Some(client_id) = self.client_id.write().await.take() {
            self.transport.disconnect(&client_id).await;
        }

        {
            let mut router = self.router.lock().await;
            router.own_client_id = None;
            router.replay.clear();
        }

        self.state.send_replace(ConnectionState::Disconnected);
        tracing::info!(room = %self.room, "Transport disconnected");
    }

    /// Subscribe to an event on a channel
    ///
    /// Any device-channel messages parked for this event are delivered to
    /// the new subscriber first, in arrival order.
    pub async fn on(&self, channel: ChannelKind, event: &str) -> Subscription {
        self.on_events(channel, &[event]).await
    }

    /// Subscribe to several events of one channel through a single receiver
    ///
    /// Messages for any of `events` arrive on the receiver in transport
    /// arrival order, interleaved as they were published. Parked
    /// device-channel messages for events without a live subscriber are
    /// replayed first, in arrival order.
    pub async fn on_events(&self, channel: ChannelKind, events: &[&str]) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut router = self.router.lock().await;

        if channel == ChannelKind::Devices {
            let unclaimed: Vec<&str> = events
                .iter()
                .copied()
                .filter(|event| {
                    !router
                        .handlers
                        .get(&(channel, event.to_string()))
                        .is_some_and(|senders| senders.iter().any(|s| !s.is_closed()))
                })
                .collect();

            let parked = router
                .replay
                .take_matching(|name| unclaimed.contains(&name));
            if !parked.is_empty() {
                tracing::debug!(events = ?unclaimed, count = parked.len(), "Replaying parked messages");
            }
            for message in parked {
                let _ = tx.send(message);
            }
        }

        for event in events {
            router
                .handlers
                .entry((channel, event.to_string()))
                .or_default()
                .push(tx.clone());
        }
        rx
    }

    /// Drop every subscriber of an event
    pub async fn off(&self, channel: ChannelKind, event: &str) {
        let removed = self
            .router
            .lock()
            .await
            .handlers
            .remove(&(channel, event.to_string()));

        if let Some(senders) = removed {
            tracing::debug!(event = %event, subscribers = senders.len(), "Unsubscribed");
        }
    }

    /// Subscribe to presence changes on the control channel
    pub async fn subscribe_to_presence(&self, action: PresenceAction) -> PresenceSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.router
            .lock()
            .await
            .presence
            .entry(action)
            .or_default()
            .push(tx);
        rx
    }

    /// Current presence members of the control channel
    ///
    /// Empty when no channel is open.
    pub async fn get_presence(&self) -> Result<Vec<PresenceMember>> {
        if !self.is_connected() {
            return Ok(Vec::new());
        }

        self.transport
            .presence(&self.channel_name(ChannelKind::Control))
            .await
            .map_err(|e| Error::Presence(e.to_string()))
    }

    /// Publish a JSON event on the control channel
    pub async fn publish<P: Serialize + ?Sized>(&self, event: &str, payload: &P) -> Result<()> {
        let data = Bytes::from(serde_json::to_vec(payload)?);
        self.publish_raw(ChannelKind::Control, event, data).await
    }

    /// Publish a JSON event on the device channel
    pub async fn publish_to_device_channel<P: Serialize + ?Sized>(
        &self,
        event: &str,
        payload: &P,
    ) -> Result<()> {
        let data = Bytes::from(serde_json::to_vec(payload)?);
        self.publish_raw(ChannelKind::Devices, event, data).await
    }

    /// Publish pre-encoded bytes
    pub async fn publish_raw(&self, channel: ChannelKind, event: &str, data: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let name = self.channel_name(channel);
        self.transport
            .publish(&name, event, data)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        tracing::trace!(channel = %name, event = %event, "Published");
        Ok(())
    }

    /// Number of messages parked for replay
    pub async fn parked_messages(&self) -> usize {
        self.router.lock().await.replay.len()
    }
}
