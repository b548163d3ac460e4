//! Fleet context
//!
//! Everything the console knows about the devices of one room: a registry
//! and a pending-command table per device kind. Shared by `Arc` between the
//! reconciler, the dispatchers and the UI.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::command::PendingCommands;
use crate::registry::{DeviceKind, DeviceSession, EntityRegistry, RegistryConfig};

/// Registry and pending table for one device kind
#[derive(Clone)]
pub struct DeviceFleet {
    pub registry: Arc<EntityRegistry>,
    pub pending: Arc<PendingCommands>,
}

impl DeviceFleet {
    pub fn new(kind: DeviceKind, config: RegistryConfig, command_timeout: Duration) -> Self {
        let registry = Arc::new(EntityRegistry::with_config(kind, config));
        let pending = Arc::new(PendingCommands::new(Arc::clone(&registry), command_timeout));
        Self { registry, pending }
    }

    pub fn kind(&self) -> DeviceKind {
        self.registry.kind()
    }
}

/// Devices of one room, by kind
pub struct FleetContext {
    room: String,
    streamers: DeviceFleet,
    recorders: DeviceFleet,
}

impl FleetContext {
    pub fn new(room: impl Into<String>, config: RegistryConfig, command_timeout: Duration) -> Self {
        Self {
            room: room.into(),
            streamers: DeviceFleet::new(DeviceKind::Streamer, config.clone(), command_timeout),
            recorders: DeviceFleet::new(DeviceKind::Recorder, config, command_timeout),
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    /// Fleet holding one device kind
    pub fn fleet(&self, kind: DeviceKind) -> &DeviceFleet {
        match kind {
            DeviceKind::Streamer => &self.streamers,
            DeviceKind::Recorder => &self.recorders,
        }
    }

    pub fn streamers(&self) -> &DeviceFleet {
        &self.streamers
    }

    pub fn recorders(&self) -> &DeviceFleet {
        &self.recorders
    }

    /// Both fleets, streamers first
    pub fn fleets(&self) -> [&DeviceFleet; 2] {
        [&self.streamers, &self.recorders]
    }

    /// Kind of the registry currently holding `id`
    pub async fn locate(&self, id: &str) -> Option<DeviceKind> {
        for fleet in self.fleets() {
            if fleet.registry.contains(id).await {
                return Some(fleet.kind());
            }
        }
        None
    }

    /// Snapshot of a device from whichever registry holds it
    pub async fn get(&self, id: &str) -> Option<DeviceSession> {
        for fleet in self.fleets() {
            if let Some(session) = fleet.registry.get_entity(id).await {
                return Some(session);
            }
        }
        None
    }

    /// Remove a device and its pending timers
    pub async fn remove(&self, id: &str) -> Option<DeviceSession> {
        for fleet in self.fleets() {
            if let Some(session) = fleet.registry.remove_entity(id).await {
                fleet.pending.forget_device(id).await;
                return Some(session);
            }
        }
        None
    }

    /// Drop every device and cancel every pending timer
    ///
    /// Returns the number of devices dropped.
    pub async fn clear(&self) -> usize {
        let mut removed = 0;
        for fleet in self.fleets() {
            fleet.pending.cancel_all().await;
            removed += fleet.registry.clear().await;
        }
        removed
    }

    /// Start the elapsed-time tick of both registries
    pub fn spawn_tick_tasks(&self) -> Vec<JoinHandle<()>> {
        self.fleets()
            .iter()
            .map(|fleet| fleet.registry.spawn_tick_task())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandKind;
    use crate::registry::{DiscoverySource, NewEntity};

    fn context() -> FleetContext {
        FleetContext::new("studio", RegistryConfig::default(), Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_locate_and_remove() {
        let fleet = context();
        fleet
            .recorders()
            .registry
            .add_entity("rec1", NewEntity::new("studio", DiscoverySource::Registration))
            .await;

        assert_eq!(fleet.locate("rec1").await, Some(DeviceKind::Recorder));
        assert_eq!(fleet.locate("cam1").await, None);
        assert_eq!(fleet.get("rec1").await.unwrap().kind, DeviceKind::Recorder);

        assert!(fleet.remove("rec1").await.is_some());
        assert!(fleet.remove("rec1").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cancels_pending() {
        let fleet = context();
        let streamers = fleet.streamers();
        streamers
            .registry
            .add_entity("cam1", NewEntity::new("studio", DiscoverySource::Presence))
            .await;
        streamers.pending.track("cam1", CommandKind::Start, "c-1").await;

        assert_eq!(fleet.clear().await, 1);
        assert!(streamers.pending.is_empty().await);
        assert!(streamers.registry.is_empty().await);
    }
}
