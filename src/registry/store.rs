//! Entity registry implementation
//!
//! The canonical in-memory store of device sessions for one device kind.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;

use crate::command::CommandKind;

use super::config::RegistryConfig;
use super::entry::{DeviceKind, DeviceSession, NewEntity};
use super::error::RegistryError;
use super::patch::EntityPatch;

/// Change notification emitted by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Added(String),
    Updated(String),
    Removed(String),
    Cleared,
}

/// Registry of device sessions of a single kind
///
/// Thread-safe via `RwLock`. Readers (UI snapshots, the tick) never block
/// each other.
pub struct EntityRegistry {
    kind: DeviceKind,

    /// Map of device id to session
    entities: RwLock<HashMap<String, DeviceSession>>,

    /// Change notifications for observers
    events: broadcast::Sender<RegistryEvent>,

    config: RegistryConfig,
}

impl EntityRegistry {
    /// Create a new registry with default configuration
    pub fn new(kind: DeviceKind) -> Self {
        Self::with_config(kind, RegistryConfig::default())
    }

    /// Create a new registry with custom configuration
    pub fn with_config(kind: DeviceKind, config: RegistryConfig) -> Self {
        let (events, _) = broadcast::channel(256);

        Self {
            kind,
            entities: RwLock::new(HashMap::new()),
            events,
            config,
        }
    }

    /// Device kind held by this registry
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Create a session if the id is unknown
    ///
    /// Returns `false` without touching the existing session when the id is
    /// already registered.
    pub async fn add_entity(&self, id: &str, data: NewEntity) -> bool {
        let mut entities = self.entities.write().await;

        if entities.contains_key(id) {
            tracing::trace!(kind = %self.kind, device = %id, "Entity already registered");
            return false;
        }

        let session = DeviceSession::new(id.to_string(), self.kind, data, Instant::now());
        tracing::info!(
            kind = %self.kind,
            device = %id,
            name = %session.name,
            status = %session.status,
            origin = ?session.origin,
            "Entity added"
        );
        entities.insert(id.to_string(), session);
        drop(entities);

        let _ = self.events.send(RegistryEvent::Added(id.to_string()));
        true
    }

    /// Insert a session that moved here from another registry
    ///
    /// The session is re-homed to this registry's kind. Returns `false`
    /// without touching the existing session when the id is already
    /// registered.
    pub(crate) async fn insert_session(&self, session: DeviceSession) -> bool {
        let mut entities = self.entities.write().await;

        if entities.contains_key(&session.id) {
            tracing::trace!(kind = %self.kind, device = %session.id, "Entity already registered");
            return false;
        }

        let session = session.into_kind(self.kind);
        let id = session.id.clone();
        tracing::info!(kind = %self.kind, device = %id, status = %session.status, "Entity moved in");
        entities.insert(id.clone(), session);
        drop(entities);

        let _ = self.events.send(RegistryEvent::Added(id));
        true
    }

    /// Merge a partial update into an existing session
    pub async fn update_entity(&self, id: &str, patch: &EntityPatch) -> Result<(), RegistryError> {
        let mut entities = self.entities.write().await;

        let session = entities
            .get_mut(id)
            .ok_or_else(|| self.not_found(id))?;

        let previous = session.status;
        session.apply(patch, Instant::now());

        if session.status != previous {
            tracing::info!(
                kind = %self.kind,
                device = %id,
                from = %previous,
                to = %session.status,
                "Status changed"
            );
        } else {
            tracing::debug!(kind = %self.kind, device = %id, "Entity updated");
        }
        drop(entities);

        let _ = self.events.send(RegistryEvent::Updated(id.to_string()));
        Ok(())
    }

    /// Run a closure against a session under the write lock
    ///
    /// Used for conditional merges that depend on the current state.
    pub(crate) async fn modify<F, R>(&self, id: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut DeviceSession) -> R,
    {
        let mut entities = self.entities.write().await;
        let result = entities.get_mut(id).map(f);
        drop(entities);

        if result.is_some() {
            let _ = self.events.send(RegistryEvent::Updated(id.to_string()));
        }
        result
    }

    /// Remove a session
    pub async fn remove_entity(&self, id: &str) -> Option<DeviceSession> {
        let removed = self.entities.write().await.remove(id);

        if removed.is_some() {
            tracing::info!(kind = %self.kind, device = %id, "Entity removed");
            let _ = self.events.send(RegistryEvent::Removed(id.to_string()));
        }
        removed
    }

    /// Get a snapshot of a session
    pub async fn get_entity(&self, id: &str) -> Option<DeviceSession> {
        self.entities.read().await.get(id).cloned()
    }

    /// Check if a session exists
    pub async fn contains(&self, id: &str) -> bool {
        self.entities.read().await.contains_key(id)
    }

    /// Snapshot of every session, ordered by id
    pub async fn list(&self) -> Vec<DeviceSession> {
        let entities = self.entities.read().await;
        let mut sessions: Vec<DeviceSession> = entities.values().cloned().collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        sessions
    }

    /// Every known id, ordered
    pub async fn ids(&self) -> Vec<String> {
        let entities = self.entities.read().await;
        let mut ids: Vec<String> = entities.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Get total number of sessions
    pub async fn len(&self) -> usize {
        self.entities.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entities.read().await.is_empty()
    }

    /// Remove every session
    ///
    /// Returns the number of sessions dropped.
    pub async fn clear(&self) -> usize {
        let count = {
            let mut entities = self.entities.write().await;
            let count = entities.len();
            entities.clear();
            count
        };

        tracing::info!(kind = %self.kind, removed = count, "Registry cleared");
        let _ = self.events.send(RegistryEvent::Cleared);
        count
    }

    /// Flag a command as in flight
    ///
    /// Returns `false` if the device is unknown.
    pub async fn mark_pending(&self, id: &str, command: CommandKind) -> bool {
        self.modify(id, |s| {
            s.pending_commands.insert(command);
        })
        .await
        .is_some()
    }

    /// Clear an in-flight flag
    ///
    /// Returns `true` if the flag was set.
    pub async fn clear_pending(&self, id: &str, command: &CommandKind) -> bool {
        self.modify(id, |s| s.pending_commands.remove(command))
            .await
            .unwrap_or(false)
    }

    /// Recompute `elapsed` for every active session
    ///
    /// Returns the number of sessions refreshed.
    pub async fn tick(&self) -> usize {
        let now = Instant::now();
        let mut entities = self.entities.write().await;
        let mut refreshed = 0;

        for session in entities.values_mut().filter(|s| s.is_active()) {
            session.refresh_elapsed(now);
            refreshed += 1;
        }

        refreshed
    }

    /// Spawn background tick task
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_tick_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let interval = registry.config.tick_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                registry.tick().await;
            }
        })
    }

    fn not_found(&self, id: &str) -> RegistryError {
        RegistryError::EntityNotFound {
            kind: self.kind,
            id: id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::registry::entry::{DiscoverySource, Status};
    use crate::registry::patch::{DeviceSelectionPatch, DevicesPatch, SettingsPatch};

    fn registration(room: &str) -> NewEntity {
        NewEntity::new(room, DiscoverySource::Registration)
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let registry = EntityRegistry::new(DeviceKind::Streamer);

        assert!(registry.add_entity("cam1", registration("studio").name("Stage left")).await);
        assert!(!registry.add_entity("cam1", registration("other").name("Renamed")).await);

        assert_eq!(registry.len().await, 1);
        let cam = registry.get_entity("cam1").await.unwrap();
        assert_eq!(cam.name, "Stage left");
        assert_eq!(cam.room, "studio");
    }

    #[tokio::test]
    async fn test_registration_then_settings_merge() {
        let registry = EntityRegistry::new(DeviceKind::Streamer);
        registry
            .add_entity("cam1", registration("studio").status(Status::Ready))
            .await;
        assert_eq!(registry.get_entity("cam1").await.unwrap().status, Status::Ready);

        let patch = EntityPatch::settings(SettingsPatch {
            bitrate: Some(2500),
            ..Default::default()
        });
        registry.update_entity("cam1", &patch).await.unwrap();

        let cam = registry.get_entity("cam1").await.unwrap();
        assert_eq!(cam.settings.bitrate, 2500);
        assert_eq!(cam.settings.codec, "h264");
    }

    #[tokio::test]
    async fn test_omitted_fields_survive_updates() {
        let registry = EntityRegistry::new(DeviceKind::Recorder);
        registry.add_entity("rec1", registration("studio")).await;

        let first = EntityPatch {
            settings: Some(SettingsPatch {
                codec: Some("hevc".into()),
                framerate: Some(60),
                ..Default::default()
            }),
            devices: Some(DevicesPatch {
                video: Some(DeviceSelectionPatch {
                    current_id: Some("v1".into()),
                    current_label: Some("Main".into()),
                    available: None,
                }),
                audio: None,
            }),
            ..Default::default()
        };
        registry.update_entity("rec1", &first).await.unwrap();

        let second = EntityPatch {
            settings: Some(SettingsPatch {
                bitrate: Some(12000),
                ..Default::default()
            }),
            devices: Some(DevicesPatch {
                video: None,
                audio: Some(DeviceSelectionPatch {
                    current_id: Some("a1".into()),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        };
        registry.update_entity("rec1", &second).await.unwrap();

        let rec = registry.get_entity("rec1").await.unwrap();
        assert_eq!(rec.settings.codec, "hevc");
        assert_eq!(rec.settings.framerate, 60);
        assert_eq!(rec.settings.bitrate, 12000);
        assert_eq!(rec.settings.resolution, "1920x1080");
        assert_eq!(rec.devices.video.current_id.as_deref(), Some("v1"));
        assert_eq!(rec.devices.video.current_label.as_deref(), Some("Main"));
        assert_eq!(rec.devices.audio.current_id.as_deref(), Some("a1"));
    }

    #[tokio::test]
    async fn test_update_unknown_entity() {
        let registry = EntityRegistry::new(DeviceKind::Streamer);
        let result = registry
            .update_entity("ghost", &EntityPatch::status(Status::Active))
            .await;

        assert!(matches!(
            result,
            Err(RegistryError::EntityNotFound { ref id, .. }) if id == "ghost"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_timing() {
        let registry = EntityRegistry::new(DeviceKind::Streamer);
        registry.add_entity("cam1", registration("studio")).await;

        registry
            .update_entity("cam1", &EntityPatch::status(Status::Active))
            .await
            .unwrap();
        let since = registry.get_entity("cam1").await.unwrap().active_since;
        assert!(since.is_some());

        // A repeated active status keeps the original start
        tokio::time::advance(Duration::from_secs(5)).await;
        registry
            .update_entity("cam1", &EntityPatch::status(Status::Active))
            .await
            .unwrap();
        assert_eq!(registry.get_entity("cam1").await.unwrap().active_since, since);

        registry.tick().await;
        assert_eq!(
            registry.get_entity("cam1").await.unwrap().elapsed,
            Duration::from_secs(5)
        );

        registry
            .update_entity("cam1", &EntityPatch::status(Status::Stopped))
            .await
            .unwrap();
        let cam = registry.get_entity("cam1").await.unwrap();
        assert!(cam.active_since.is_none());
        assert_eq!(cam.elapsed, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_task_updates_elapsed() {
        let registry = Arc::new(EntityRegistry::new(DeviceKind::Recorder));
        registry
            .add_entity("rec1", registration("studio").status(Status::Active))
            .await;
        registry.add_entity("rec2", registration("studio")).await;

        let handle = registry.spawn_tick_task();
        tokio::time::sleep(Duration::from_millis(3500)).await;

        let rec1 = registry.get_entity("rec1").await.unwrap();
        assert_eq!(rec1.elapsed, Duration::from_secs(3));
        assert_eq!(registry.get_entity("rec2").await.unwrap().elapsed, Duration::ZERO);

        handle.abort();
    }

    #[tokio::test]
    async fn test_pending_flags() {
        let registry = EntityRegistry::new(DeviceKind::Streamer);
        registry.add_entity("cam1", registration("studio")).await;

        assert!(registry.mark_pending("cam1", CommandKind::Start).await);
        assert!(!registry.mark_pending("ghost", CommandKind::Start).await);
        assert!(registry.get_entity("cam1").await.unwrap().is_pending(&CommandKind::Start));

        assert!(registry.clear_pending("cam1", &CommandKind::Start).await);
        assert!(!registry.clear_pending("cam1", &CommandKind::Start).await);
    }

    #[tokio::test]
    async fn test_remove_clear_and_events() {
        let registry = EntityRegistry::new(DeviceKind::Streamer);
        let mut events = registry.subscribe();

        registry.add_entity("a", registration("studio")).await;
        registry.add_entity("b", registration("studio")).await;
        assert_eq!(registry.ids().await, vec!["a".to_string(), "b".to_string()]);

        assert!(registry.remove_entity("a").await.is_some());
        assert!(registry.remove_entity("a").await.is_none());
        assert_eq!(registry.clear().await, 1);
        assert!(registry.is_empty().await);

        assert_eq!(events.recv().await.unwrap(), RegistryEvent::Added("a".into()));
        assert_eq!(events.recv().await.unwrap(), RegistryEvent::Added("b".into()));
        assert_eq!(events.recv().await.unwrap(), RegistryEvent::Removed("a".into()));
        assert_eq!(events.recv().await.unwrap(), RegistryEvent::Cleared);
    }
}
