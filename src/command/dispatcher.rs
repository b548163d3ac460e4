//! Command dispatcher
//!
//! Fire-and-forget: a command is published once, flagged as pending, and
//! either confirmed later or left to expire. Nothing is queued or paced.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::Result;
use crate::registry::EntityRegistry;
use crate::transport::{Transport, TransportSupervisor};

use super::envelope::{CommandEnvelope, CommandKind};
use super::pending::PendingCommands;

/// Event name command envelopes are published under
pub const COMMAND_EVENT: &str = "command";

/// Publishes commands for the devices of one registry
pub struct CommandDispatcher<T: Transport> {
    supervisor: Arc<TransportSupervisor<T>>,
    pending: Arc<PendingCommands>,
}

impl<T: Transport> CommandDispatcher<T> {
    pub fn new(supervisor: Arc<TransportSupervisor<T>>, pending: Arc<PendingCommands>) -> Self {
        Self {
            supervisor,
            pending,
        }
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        self.pending.registry()
    }

    pub fn pending(&self) -> &Arc<PendingCommands> {
        &self.pending
    }

    /// Publish a command and flag it as pending
    ///
    /// Returns the published envelope. A failed publish leaves no pending
    /// flag behind.
    pub async fn send(
        &self,
        device_id: &str,
        command: CommandKind,
        payload: Map<String, Value>,
    ) -> Result<CommandEnvelope> {
        let envelope = CommandEnvelope::new(device_id, command, payload);

        if let Err(e) = self.supervisor.publish(COMMAND_EVENT, &envelope).await {
            tracing::warn!(
                device = %device_id,
                command = %command,
                error = %e,
                "Command publish failed"
            );
            return Err(e);
        }

        self.pending
            .track(device_id, command, &envelope.correlation_id)
            .await;

        tracing::info!(
            kind = %self.registry().kind(),
            device = %device_id,
            command = %command,
            correlation_id = %envelope.correlation_id,
            "Command sent"
        );

        Ok(envelope)
    }

    /// Send the same command to every known device
    ///
    /// Each device gets an independent `send`; a failure for one does not
    /// stop or undo the others. Returns one outcome per device id.
    pub async fn send_to_all(
        &self,
        command: CommandKind,
        payload: Map<String, Value>,
    ) -> Vec<(String, Result<CommandEnvelope>)> {
        let ids = self.registry().ids().await;
        let mut outcomes = Vec::with_capacity(ids.len());

        for id in ids {
            let outcome = self.send(&id, command, payload.clone()).await;
            outcomes.push((id, outcome));
        }

        let failed = outcomes.iter().filter(|(_, r)| r.is_err()).count();
        if failed > 0 {
            tracing::warn!(
                command = %command,
                total = outcomes.len(),
                failed = failed,
                "Bulk command partially failed"
            );
        }

        outcomes
    }

    /// Start streaming/recording
    pub async fn start(&self, device_id: &str) -> Result<CommandEnvelope> {
        self.send(device_id, CommandKind::Start, Map::new()).await
    }

    /// Stop streaming/recording
    pub async fn stop(&self, device_id: &str) -> Result<CommandEnvelope> {
        self.send(device_id, CommandKind::Stop, Map::new()).await
    }

    /// Switch the active camera or microphone
    pub async fn switch_device(
        &self,
        device_id: &str,
        media: &str,
        media_device_id: &str,
    ) -> Result<CommandEnvelope> {
        let mut payload = Map::new();
        payload.insert("mediaType".into(), Value::from(media));
        payload.insert("deviceId".into(), Value::from(media_device_id));
        self.send(device_id, CommandKind::SwitchDevice, payload).await
    }

    /// Clear a pending flag after observing a confirming event
    pub async fn clear_pending(&self, device_id: &str, command: CommandKind) -> bool {
        self.pending.clear(device_id, command).await
    }
}
