//! Console session
//!
//! One `ConsoleSession` per room connection. It owns the transport
//! supervisor, the fleet, the reconciler and the per-kind dispatchers, plus
//! every background task they need. Disconnecting (or losing the
//! connection) resets the fleet.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::command::CommandDispatcher;
use crate::config::ConsoleConfig;
use crate::discovery::{InventoryClient, Reconciler};
use crate::error::Result;
use crate::preview::{MediaEngine, PreviewNegotiator};
use crate::registry::DeviceKind;
use crate::stats::{ConsoleStats, FleetStats};
use crate::transport::{ConnectionState, Transport, TransportSupervisor};

use super::context::FleetContext;

/// Per-connection console state
pub struct ConsoleSession<T: Transport> {
    config: ConsoleConfig,
    supervisor: Arc<TransportSupervisor<T>>,
    fleet: Arc<FleetContext>,
    reconciler: Arc<Reconciler<T>>,
    streamers: CommandDispatcher<T>,
    recorders: CommandDispatcher<T>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Transport> ConsoleSession<T> {
    /// Build a session; nothing connects until [`connect`](Self::connect)
    pub fn new(transport: T, config: ConsoleConfig) -> Result<Self> {
        let supervisor = Arc::new(TransportSupervisor::new(
            transport,
            config.room.clone(),
            config.transport.clone(),
        ));
        let fleet = Arc::new(FleetContext::new(
            config.room.clone(),
            config.registry.clone(),
            config.dispatch.command_timeout,
        ));

        let mut reconciler = Reconciler::new(
            Arc::clone(&fleet),
            Arc::clone(&supervisor),
            config.discovery.clone(),
        );
        if let Some(ref url) = config.discovery.inventory_url {
            reconciler =
                reconciler.with_inventory(InventoryClient::new(url, config.discovery.inventory_timeout)?);
        }

        let streamers = CommandDispatcher::new(
            Arc::clone(&supervisor),
            Arc::clone(&fleet.streamers().pending),
        );
        let recorders = CommandDispatcher::new(
            Arc::clone(&supervisor),
            Arc::clone(&fleet.recorders().pending),
        );

        Ok(Self {
            config,
            supervisor,
            fleet,
            reconciler: Arc::new(reconciler),
            streamers,
            recorders,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &Arc<TransportSupervisor<T>> {
        &self.supervisor
    }

    pub fn fleet(&self) -> &Arc<FleetContext> {
        &self.fleet
    }

    pub fn reconciler(&self) -> &Arc<Reconciler<T>> {
        &self.reconciler
    }

    /// Dispatcher for one device kind
    pub fn dispatcher(&self, kind: DeviceKind) -> &CommandDispatcher<T> {
        match kind {
            DeviceKind::Streamer => &self.streamers,
            DeviceKind::Recorder => &self.recorders,
        }
    }

    pub fn streamers(&self) -> &CommandDispatcher<T> {
        &self.streamers
    }

    pub fn recorders(&self) -> &CommandDispatcher<T> {
        &self.recorders
    }

    /// Connect and start discovery
    ///
    /// The presence snapshot is applied before this returns; the inventory
    /// probe runs in the background. A failed presence query is logged and
    /// does not fail the connect. A no-op while already connected.
    pub async fn connect(&self) -> Result<()> {
        if self.supervisor.is_connected() {
            tracing::debug!(room = %self.config.room, "Already connected");
            return Ok(());
        }

        self.start_background().await;

        if let Err(e) = self.supervisor.connect().await {
            self.stop_background().await;
            return Err(e);
        }

        if let Err(e) = self.reconciler.sync_presence().await {
            tracing::warn!(room = %self.config.room, error = %e, "Presence snapshot failed");
        }

        let reconciler = Arc::clone(&self.reconciler);
        let probe = tokio::spawn(async move {
            if let Err(e) = reconciler.probe_inventory().await {
                tracing::warn!(error = %e, "Inventory probe failed");
            }
        });
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|task| !task.is_finished());
        tasks.push(probe);
        drop(tasks);

        tracing::info!(room = %self.config.room, "Console connected");
        Ok(())
    }

    async fn start_background(&self) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }

        tasks.push(self.reconciler.start().await);
        tasks.extend(self.fleet.spawn_tick_tasks());
        tasks.push(self.spawn_connection_watch());
    }

    async fn stop_background(&self) {
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            task.abort();
        }
        self.reconciler.shutdown().await;
    }

    /// Clear the fleet when the transport drops the session
    fn spawn_connection_watch(&self) -> JoinHandle<()> {
        let mut state = self.supervisor.watch_state();
        let fleet = Arc::clone(&self.fleet);
        let reconciler = Arc::clone(&self.reconciler);

        tokio::spawn(async move {
            while state.changed().await.is_ok() {
                let current = state.borrow_and_update().clone();
                let reason = match current {
                    ConnectionState::Failed(reason) => reason,
                    ConnectionState::Disconnected => "inbound stream ended".to_string(),
                    _ => continue,
                };

                reconciler.shutdown().await;
                let removed = fleet.clear().await;
                tracing::warn!(reason = %reason, removed = removed, "Connection lost, fleet cleared");
            }
        })
    }

    /// Disconnect and reset every piece of session state
    pub async fn disconnect(&self) {
        self.stop_background().await;
        self.supervisor.disconnect().await;
        let removed = self.fleet.clear().await;

        tracing::info!(room = %self.config.room, removed = removed, "Console disconnected");
    }

    /// Build a preview negotiator over this session's fleet
    pub fn preview<E: MediaEngine>(&self, engine: E) -> Result<PreviewNegotiator<E>> {
        Ok(PreviewNegotiator::new(
            engine,
            self.config.preview.clone(),
            Arc::clone(&self.fleet),
        )?)
    }

    /// Summary of both fleets
    pub async fn stats(&self) -> ConsoleStats {
        ConsoleStats {
            streamers: FleetStats::collect(&self.fleet.streamers().registry).await,
            recorders: FleetStats::collect(&self.fleet.recorders().registry).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::config::TransportKey;
    use crate::error::Error;
    use crate::registry::RegistryEvent;
    use crate::transport::{MemoryHub, MemoryTransport, PresenceMember, TransportConfig};

    fn session(hub: &MemoryHub) -> ConsoleSession<MemoryTransport> {
        let config = ConsoleConfig::new(
            "studio",
            TransportConfig::new(TransportKey::new("k"), "memory://"),
        );
        ConsoleSession::new(hub.transport(), config).unwrap()
    }

    #[tokio::test]
    async fn test_connect_applies_presence_snapshot() {
        let hub = MemoryHub::new();
        hub.enter_presence("studio", PresenceMember::with_role("p1", "streamer"));
        hub.enter_presence("studio", PresenceMember::with_role("r1", "recorder"));
        hub.enter_presence("studio", PresenceMember::with_role("console-x", "console"));

        let console = session(&hub);
        console.connect().await.unwrap();

        let stats = console.stats().await;
        assert_eq!(stats.streamers.total, 1);
        assert_eq!(stats.recorders.total, 1);
        assert_eq!(stats.total(), 2);

        console.disconnect().await;
        assert_eq!(console.stats().await.total(), 0);
        assert_eq!(console.supervisor().state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_failure_stops_background() {
        let hub = MemoryHub::new();
        hub.set_unavailable(Some("maintenance"));

        let console = session(&hub);
        let err = console.connect().await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert!(console.tasks.lock().await.is_empty());

        hub.set_unavailable(None);
        console.connect().await.unwrap();
        assert!(!console.tasks.lock().await.is_empty());
        console.disconnect().await;
    }

    #[tokio::test]
    async fn test_connect_while_connected_is_noop() {
        let hub = MemoryHub::new();
        hub.enter_presence("studio", PresenceMember::with_role("p1", "streamer"));

        let console = session(&hub);
        console.connect().await.unwrap();
        let task_count = console.tasks.lock().await.len();
        assert!(console.fleet().remove("p1").await.is_some());

        for _ in 0..3 {
            console.connect().await.unwrap();
        }
        assert_eq!(console.tasks.lock().await.len(), task_count);
        // No second presence snapshot
        assert!(console.fleet().get("p1").await.is_none());
        console.disconnect().await;
    }

    #[tokio::test]
    async fn test_connection_loss_clears_fleet() {
        let hub = MemoryHub::new();
        let console = session(&hub);
        console.connect().await.unwrap();

        let mut events = console.fleet().streamers().registry.subscribe();
        hub.publish_json(
            "cam1",
            "studio",
            "streamer-ready",
            &json!({"streamId": "cam1", "status": "ready"}),
        );
        assert_eq!(events.recv().await.unwrap(), RegistryEvent::Added("cam1".into()));

        let client_id = console.supervisor().client_id().await.unwrap();
        hub.drop_client(&client_id, "network down");

        let cleared = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cleared, RegistryEvent::Cleared);
        assert!(console.fleet().get("cam1").await.is_none());
    }

    #[tokio::test]
    async fn test_dispatcher_per_kind() {
        let hub = MemoryHub::new();
        let console = session(&hub);

        assert_eq!(
            console.dispatcher(DeviceKind::Recorder).registry().kind(),
            DeviceKind::Recorder
        );
        assert_eq!(console.streamers().registry().kind(), DeviceKind::Streamer);
    }
}
