//! In-process transport
//!
//! A [`MemoryHub`] behaves like a tiny pub/sub service: clients attach to
//! channels, publications fan out to every attached client in publish
//! order, and presence is tracked per channel. Tests and demos play the
//! device side through the hub while a console attaches through a
//! [`MemoryTransport`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TransportError;

use super::message::{ChannelMessage, Inbound, PresenceAction, PresenceEvent, PresenceMember};
use super::Transport;

struct Attachment {
    channels: HashSet<String>,
    tx: mpsc::UnboundedSender<Inbound>,
}

#[derive(Default)]
struct HubState {
    /// When set, connects and presence queries fail with this reason
    unavailable: Option<String>,
    clients: HashMap<String, Attachment>,
    presence: HashMap<String, Vec<PresenceMember>>,
    history: Vec<ChannelMessage>,
}

impl HubState {
    fn fan_out(&mut self, channel: &str, inbound: Inbound) {
        self.clients.retain(|client_id, attachment| {
            if !attachment.channels.contains(channel) {
                return true;
            }
            let delivered = attachment.tx.send(inbound.clone()).is_ok();
            if !delivered {
                tracing::debug!(client_id = %client_id, "Dropping detached memory client");
            }
            delivered
        });
    }
}

/// Shared in-process pub/sub service
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a transport handle attached to this hub
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            hub: self.clone(),
            client_id: Arc::new(Mutex::new(None)),
        }
    }

    /// Make the service refuse connects and presence queries
    pub fn set_unavailable(&self, reason: Option<&str>) {
        self.lock().unavailable = reason.map(str::to_string);
    }

    /// Publish as some client (typically a simulated device)
    pub fn publish_as(&self, client_id: &str, channel: &str, name: &str, data: Bytes) {
        let message = ChannelMessage::new(channel, name, data).from_client(client_id);
        let mut state = self.lock();
        state.history.push(message.clone());
        state.fan_out(channel, Inbound::Message(message));
    }

    /// Publish a JSON payload as some client
    pub fn publish_json(&self, client_id: &str, channel: &str, name: &str, value: &serde_json::Value) {
        let data = Bytes::from(value.to_string());
        self.publish_as(client_id, channel, name, data);
    }

    /// Add a member to a channel's presence set and announce it
    pub fn enter_presence(&self, channel: &str, member: PresenceMember) {
        let mut state = self.lock();
        let members = state.presence.entry(channel.to_string()).or_default();
        let action = if members.iter().any(|m| m.client_id == member.client_id) {
            members.retain(|m| m.client_id != member.client_id);
            PresenceAction::Update
        } else {
            PresenceAction::Enter
        };
        members.push(member.clone());

        let event = PresenceEvent {
            channel: channel.to_string(),
            action,
            member,
        };
        state.fan_out(channel, Inbound::Presence(event));
    }

    /// Remove a member from a channel's presence set and announce it
    pub fn leave_presence(&self, channel: &str, client_id: &str) {
        let mut state = self.lock();
        let Some(members) = state.presence.get_mut(channel) else {
            return;
        };
        let Some(pos) = members.iter().position(|m| m.client_id == client_id) else {
            return;
        };
        let member = members.remove(pos);

        let event = PresenceEvent {
            channel: channel.to_string(),
            action: PresenceAction::Leave,
            member,
        };
        state.fan_out(channel, Inbound::Presence(event));
    }

    /// Drop a client's session as if the service lost it
    pub fn drop_client(&self, client_id: &str, reason: &str) {
        if let Some(attachment) = self.lock().clients.remove(client_id) {
            let _ = attachment.tx.send(Inbound::Closed {
                reason: reason.to_string(),
            });
        }
    }

    /// Every message published so far
    pub fn history(&self) -> Vec<ChannelMessage> {
        self.lock().history.clone()
    }

    /// Messages published on a channel under an event name
    pub fn published(&self, channel: &str, name: &str) -> Vec<ChannelMessage> {
        self.lock()
            .history
            .iter()
            .filter(|m| m.channel == channel && m.name == name)
            .cloned()
            .collect()
    }

    /// Ids of currently attached clients
    pub fn clients(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().clients.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// A console's handle onto a [`MemoryHub`]
#[derive(Clone)]
pub struct MemoryTransport {
    hub: MemoryHub,
    client_id: Arc<Mutex<Option<String>>>,
}

impl MemoryTransport {
    pub fn hub(&self) -> &MemoryHub {
        &self.hub
    }

    fn attached_id(&self) -> Option<String> {
        self.client_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Transport for MemoryTransport {
    async fn connect(
        &self,
        client_id: &str,
        channels: &[String],
    ) -> Result<mpsc::UnboundedReceiver<Inbound>, TransportError> {
        let mut state = self.hub.lock();
        if let Some(ref reason) = state.unavailable {
            return Err(TransportError::Unavailable(reason.clone()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.clients.insert(
            client_id.to_string(),
            Attachment {
                channels: channels.iter().cloned().collect(),
                tx,
            },
        );
        drop(state);

        *self.client_id.lock().unwrap_or_else(PoisonError::into_inner) = Some(client_id.to_string());
        Ok(rx)
    }

    async fn publish(&self, channel: &str, name: &str, data: Bytes) -> Result<(), TransportError> {
        let client_id = self
            .attached_id()
            .ok_or_else(|| TransportError::Rejected("client not attached".into()))?;

        if !self.hub.lock().clients.contains_key(&client_id) {
            return Err(TransportError::Unavailable("session closed".into()));
        }

        self.hub.publish_as(&client_id, channel, name, data);
        Ok(())
    }

    async fn presence(&self, channel: &str) -> Result<Vec<PresenceMember>, TransportError> {
        let state = self.hub.lock();
        if let Some(ref reason) = state.unavailable {
            return Err(TransportError::Unavailable(reason.clone()));
        }
        Ok(state.presence.get(channel).cloned().unwrap_or_default())
    }

    async fn disconnect(&self, client_id: &str) {
        self.hub.lock().clients.remove(client_id);
        let mut attached = self.client_id.lock().unwrap_or_else(PoisonError::into_inner);
        if attached.as_deref() == Some(client_id) {
            *attached = None;
        }
    }
}
