//! Pub/sub transport plumbing
//!
//! The console talks to its devices over a best-effort publish/subscribe
//! service. The vendor SDK sits behind the [`Transport`] trait; everything
//! above it (channel naming, routing, replay, connection state) lives in
//! [`TransportSupervisor`].
//!
//! ```text
//!   Transport (vendor SDK)          TransportSupervisor              consumers
//!  ┌──────────────────────┐   ┌─────────────────────────────┐
//!  │ {room}               │──►│ pump ──► router             │──► on(Control, "status")
//!  │ {room}-devices       │──►│            │                │──► on(Devices, "devices-list")
//!  │ presence             │──►│            └─► ReplayBuffer │──► subscribe_to_presence(Enter)
//!  └──────────────────────┘   └─────────────────────────────┘
//! ```
//!
//! Delivery is at-most-once and in transport arrival order. Nothing is
//! batched or reordered.

pub mod memory;
pub mod message;
pub mod replay;
pub mod supervisor;

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::config::TransportKey;
use crate::error::TransportError;

pub use memory::{MemoryHub, MemoryTransport};
pub use message::{
    ChannelKind, ChannelMessage, Inbound, PresenceAction, PresenceData, PresenceEvent,
    PresenceMember,
};
pub use replay::ReplayBuffer;
pub use supervisor::{ConnectionState, PresenceSubscription, Subscription, TransportSupervisor};

/// A pub/sub service the console can attach to
///
/// Implementations deliver inbound traffic for every attached channel on
/// the receiver returned by [`connect`](Transport::connect), in arrival
/// order. They may echo the client's own publications; the supervisor
/// filters them by client id.
pub trait Transport: Send + Sync + 'static {
    /// Open a session and attach to `channels`
    ///
    /// Resolves once the service reports the session ready.
    fn connect(
        &self,
        client_id: &str,
        channels: &[String],
    ) -> impl Future<Output = Result<mpsc::UnboundedReceiver<Inbound>, TransportError>> + Send;

    /// Publish an event on a channel
    fn publish(
        &self,
        channel: &str,
        name: &str,
        data: Bytes,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Current presence members of a channel
    fn presence(
        &self,
        channel: &str,
    ) -> impl Future<Output = Result<Vec<PresenceMember>, TransportError>> + Send;

    /// Close the session
    fn disconnect(&self, client_id: &str) -> impl Future<Output = ()> + Send;
}

/// Transport connection settings
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Credential handed to the vendor SDK
    pub key: TransportKey,

    /// Service endpoint
    pub endpoint: String,

    /// Connect must resolve within this time
    pub connect_timeout: Duration,

    /// Replay buffer bound, in messages
    pub replay_max_messages: usize,

    /// Replay buffer bound, in payload bytes
    pub replay_max_bytes: usize,
}

impl TransportConfig {
    pub fn new(key: TransportKey, endpoint: impl Into<String>) -> Self {
        Self {
            key,
            endpoint: endpoint.into(),
            connect_timeout: Duration::from_secs(15),
            replay_max_messages: replay::DEFAULT_REPLAY_MESSAGES,
            replay_max_bytes: replay::DEFAULT_REPLAY_BYTES,
        }
    }

    /// Set connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set replay buffer bounds
    pub fn replay_limits(mut self, max_messages: usize, max_bytes: usize) -> Self {
        self.replay_max_messages = max_messages;
        self.replay_max_bytes = max_bytes;
        self
    }
}
