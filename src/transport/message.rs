//! Transport message types
//!
//! Payloads stay as raw `Bytes` until a consumer decodes them, so routing
//! and buffering never pay for JSON parsing.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// The two logical channels opened per room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// `{room}`: lifecycle, status and command envelopes
    Control,
    /// `{room}-devices`: device enumeration sync
    Devices,
}

/// A message received on a channel
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    /// Channel name as known to the transport
    pub channel: String,
    /// Event name
    pub name: String,
    /// Publishing client, when the transport reports it
    pub client_id: Option<String>,
    /// Raw payload (JSON)
    pub data: Bytes,
}

impl ChannelMessage {
    pub fn new(channel: impl Into<String>, name: impl Into<String>, data: Bytes) -> Self {
        Self {
            channel: channel.into(),
            name: name.into(),
            client_id: None,
            data,
        }
    }

    /// Set the publishing client
    pub fn from_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Decode the payload
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.data)
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Presence metadata attached by a member when it joins
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_name: Option<String>,
}

impl PresenceData {
    /// The member's role, from `role` or else `type`
    pub fn role_tag(&self) -> Option<&str> {
        self.role.as_deref().or(self.type_tag.as_deref())
    }
}

/// A presence member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMember {
    pub client_id: String,
    #[serde(default)]
    pub data: PresenceData,
}

impl PresenceMember {
    pub fn new(client_id: impl Into<String>, data: PresenceData) -> Self {
        Self {
            client_id: client_id.into(),
            data,
        }
    }

    /// Member with only a role tag
    pub fn with_role(client_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self::new(
            client_id,
            PresenceData {
                role: Some(role.into()),
                ..Default::default()
            },
        )
    }
}

/// Presence change kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresenceAction {
    Enter,
    Leave,
    Update,
}

/// A presence change on a channel
#[derive(Debug, Clone)]
pub struct PresenceEvent {
    pub channel: String,
    pub action: PresenceAction,
    pub member: PresenceMember,
}

/// Everything a transport can deliver to an attached client
#[derive(Debug, Clone)]
pub enum Inbound {
    /// A published message
    Message(ChannelMessage),
    /// A presence change
    Presence(PresenceEvent),
    /// The transport dropped the session
    Closed { reason: String },
}
