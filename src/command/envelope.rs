//! Command wire types

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Keys owned by the envelope itself; payloads cannot override them
const RESERVED_KEYS: [&str; 4] = ["command", "streamId", "timestamp", "correlationId"];

/// Remote instruction kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    Start,
    Stop,
    UpdateSettings,
    SwitchDevice,
    RequestDevices,
    Reload,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Start => "START",
            CommandKind::Stop => "STOP",
            CommandKind::UpdateSettings => "UPDATE_SETTINGS",
            CommandKind::SwitchDevice => "SWITCH_DEVICE",
            CommandKind::RequestDevices => "REQUEST_DEVICES",
            CommandKind::Reload => "RELOAD",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published command message
///
/// Wire form: `{command, streamId, timestamp, correlationId, ...payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    pub command: CommandKind,
    pub stream_id: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    /// Echoed back by the device in `command-ack`
    pub correlation_id: String,
    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl CommandEnvelope {
    pub fn new(
        stream_id: impl Into<String>,
        command: CommandKind,
        mut payload: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        for key in RESERVED_KEYS {
            if payload.remove(key).is_some() {
                tracing::debug!(key = key, "Reserved key dropped from command payload");
            }
        }

        Self {
            command,
            stream_id: stream_id.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            correlation_id: Uuid::new_v4().to_string(),
            payload,
        }
    }
}

/// Explicit acknowledgement published by a device
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandAck {
    pub stream_id: String,
    pub correlation_id: String,
    /// Kind echoed for logging; unknown kinds are tolerated
    #[serde(default)]
    pub command: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_envelope_wire_format() {
        let payload = json!({"bitrate": 4000}).as_object().cloned().unwrap();
        let envelope = CommandEnvelope::new("cam1", CommandKind::UpdateSettings, payload);
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["command"], "UPDATE_SETTINGS");
        assert_eq!(value["streamId"], "cam1");
        assert_eq!(value["bitrate"], 4000);
        assert!(value["timestamp"].as_i64().unwrap() > 0);
        assert_eq!(
            value["correlationId"].as_str().unwrap(),
            envelope.correlation_id
        );
    }

    #[test]
    fn test_payload_cannot_override_envelope() {
        let payload = json!({"streamId": "other", "command": "STOP", "mode": "hard"})
            .as_object()
            .cloned()
            .unwrap();
        let envelope = CommandEnvelope::new("cam1", CommandKind::Start, payload);
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["streamId"], "cam1");
        assert_eq!(value["command"], "START");
        assert_eq!(value["mode"], "hard");
    }

    #[test]
    fn test_correlation_ids_unique() {
        let a = CommandEnvelope::new("cam1", CommandKind::Start, Default::default());
        let b = CommandEnvelope::new("cam1", CommandKind::Start, Default::default());
        assert_ne!(a.correlation_id, b.correlation_id);
    }

    #[test]
    fn test_ack_tolerates_unknown_command() {
        let ack: CommandAck = serde_json::from_str(
            r#"{"streamId": "cam1", "correlationId": "abc", "command": "SELF_DESTRUCT"}"#,
        )
        .unwrap();
        assert_eq!(ack.correlation_id, "abc");
        assert_eq!(ack.command.as_deref(), Some("SELF_DESTRUCT"));
    }
}
