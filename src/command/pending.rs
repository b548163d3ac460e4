//! Pending command tracking
//!
//! Each dispatched (device, command) pair carries a soft pending flag on the
//! device session plus a timer. The flag goes away when the command is
//! confirmed, acknowledged by correlation id, re-sent (timer restarts), or
//! when the timer fires. Expiry is a soft signal: it is logged and
//! broadcast, never retried or escalated.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::registry::EntityRegistry;

use super::envelope::CommandKind;

/// Raised when a pending command was never confirmed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTimeout {
    pub device_id: String,
    pub command: CommandKind,
    pub correlation_id: String,
    pub timeout: Duration,
}

struct PendingEntry {
    correlation_id: String,
    deadline: Instant,
    timer: JoinHandle<()>,
}

/// A pending command lifted out of one table, to be adopted by another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlight {
    pub command: CommandKind,
    pub correlation_id: String,
    pub deadline: Instant,
}

/// Timeout table for one registry's commands
pub struct PendingCommands {
    registry: Arc<EntityRegistry>,
    timeout: Duration,
    entries: Mutex<HashMap<(String, CommandKind), PendingEntry>>,
    timeouts: broadcast::Sender<CommandTimeout>,
}

impl PendingCommands {
    pub fn new(registry: Arc<EntityRegistry>, timeout: Duration) -> Self {
        let (timeouts, _) = broadcast::channel(64);

        Self {
            registry,
            timeout,
            entries: Mutex::new(HashMap::new()),
            timeouts,
        }
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Receive soft timeout signals
    pub fn subscribe_timeouts(&self) -> broadcast::Receiver<CommandTimeout> {
        self.timeouts.subscribe()
    }

    /// Start tracking a dispatched command
    ///
    /// A previous timer for the same (device, command) is cancelled.
    pub async fn track(self: &Arc<Self>, device_id: &str, command: CommandKind, correlation_id: &str) {
        let deadline = Instant::now() + self.timeout;
        self.track_until(device_id, command, correlation_id, deadline)
            .await;
    }

    /// Track a command that must be confirmed by `deadline`
    ///
    /// A deadline already in the past expires on the next timer poll.
    pub async fn track_until(
        self: &Arc<Self>,
        device_id: &str,
        command: CommandKind,
        correlation_id: &str,
        deadline: Instant,
    ) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let id = device_id.to_string();
        let correlation = correlation_id.to_string();

        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(pending) = weak.upgrade() {
                pending.expire(&id, command, &correlation).await;
            }
        });

        let previous = self.entries.lock().await.insert(
            (device_id.to_string(), command),
            PendingEntry {
                correlation_id: correlation_id.to_string(),
                deadline,
                timer,
            },
        );
        if let Some(previous) = previous {
            previous.timer.abort();
            tracing::debug!(device = %device_id, command = %command, "Pending timer restarted");
        }

        if !self.registry.mark_pending(device_id, command).await {
            tracing::debug!(
                kind = %self.registry.kind(),
                device = %device_id,
                command = %command,
                "Command sent to unregistered device"
            );
        }
    }

    /// Lift every pending command of one device out of this table
    ///
    /// Timers are cancelled and no timeout is raised; the caller is expected
    /// to [`adopt`](Self::adopt) them elsewhere.
    pub async fn take_device(&self, device_id: &str) -> Vec<InFlight> {
        let mut entries = self.entries.lock().await;
        let keys: Vec<(String, CommandKind)> = entries
            .keys()
            .filter(|(id, _)| id == device_id)
            .cloned()
            .collect();

        let mut taken: Vec<InFlight> = keys
            .into_iter()
            .filter_map(|key| entries.remove(&key).map(|entry| (key.1, entry)))
            .map(|(command, entry)| {
                entry.timer.abort();
                InFlight {
                    command,
                    correlation_id: entry.correlation_id,
                    deadline: entry.deadline,
                }
            })
            .collect();
        taken.sort_by_key(|f| f.deadline);
        taken
    }

    /// Track commands lifted from another table, keeping their deadlines
    pub async fn adopt(self: &Arc<Self>, device_id: &str, in_flight: Vec<InFlight>) -> usize {
        let count = in_flight.len();
        for f in in_flight {
            self.track_until(device_id, f.command, &f.correlation_id, f.deadline)
                .await;
        }
        count
    }

    async fn expire(&self, device_id: &str, command: CommandKind, correlation_id: &str) {
        {
            let mut entries = self.entries.lock().await;
            let key = (device_id.to_string(), command);
            match entries.get(&key) {
                Some(entry) if entry.correlation_id == correlation_id => {
                    entries.remove(&key);
                }
                // Superseded by a re-send or already cleared
                _ => return,
            }
        }

        self.registry.clear_pending(device_id, &command).await;

        tracing::warn!(
            kind = %self.registry.kind(),
            device = %device_id,
            command = %command,
            correlation_id = %correlation_id,
            timeout_ms = self.timeout.as_millis() as u64,
            "Command timed out"
        );

        let _ = self.timeouts.send(CommandTimeout {
            device_id: device_id.to_string(),
            command,
            correlation_id: correlation_id.to_string(),
            timeout: self.timeout,
        });
    }

    /// Clear a pending command after a confirming event
    ///
    /// Returns `true` if it was pending.
    pub async fn clear(&self, device_id: &str, command: CommandKind) -> bool {
        let removed = self
            .entries
            .lock()
            .await
            .remove(&(device_id.to_string(), command));

        let Some(entry) = removed else {
            return false;
        };
        entry.timer.abort();
        self.registry.clear_pending(device_id, &command).await;

        tracing::debug!(device = %device_id, command = %command, "Command confirmed");
        true
    }

    /// Clear whichever pending command carries this correlation id
    pub async fn acknowledge(&self, correlation_id: &str) -> Option<(String, CommandKind)> {
        let (key, entry) = {
            let mut entries = self.entries.lock().await;
            let key = entries
                .iter()
                .find(|(_, e)| e.correlation_id == correlation_id)
                .map(|(k, _)| k.clone())?;
            let entry = entries.remove(&key)?;
            (key, entry)
        };

        entry.timer.abort();
        self.registry.clear_pending(&key.0, &key.1).await;

        tracing::debug!(
            device = %key.0,
            command = %key.1,
            correlation_id = %correlation_id,
            "Command acknowledged"
        );
        Some(key)
    }

    /// Drop every pending command of one device
    pub async fn forget_device(&self, device_id: &str) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|(id, _), entry| {
            if id == device_id {
                entry.timer.abort();
                false
            } else {
                true
            }
        });
        before - entries.len()
    }

    /// Cancel every timer; used when the session ends
    pub async fn cancel_all(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let count = entries.len();
        for (_, entry) in entries.drain() {
            entry.timer.abort();
        }
        count
    }

    pub async fn is_pending(&self, device_id: &str, command: CommandKind) -> bool {
        self.entries
            .lock()
            .await
            .contains_key(&(device_id.to_string(), command))
    }

    /// Number of commands in flight
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DeviceKind, DiscoverySource, NewEntity};

    async fn setup(timeout: Duration) -> Arc<PendingCommands> {
        let registry = Arc::new(EntityRegistry::new(DeviceKind::Streamer));
        registry
            .add_entity("cam1", NewEntity::new("studio", DiscoverySource::Registration))
            .await;
        Arc::new(PendingCommands::new(registry, timeout))
    }

    #[tokio::test(start_paused = true)]
    async fn test_expires_exactly_at_timeout() {
        let pending = setup(Duration::from_secs(10)).await;
        let mut timeouts = pending.subscribe_timeouts();
        let start = Instant::now();

        pending.track("cam1", CommandKind::Start, "c-1").await;

        tokio::time::advance(Duration::from_millis(9_999)).await;
        tokio::task::yield_now().await;
        assert!(pending.is_pending("cam1", CommandKind::Start).await);
        let cam = pending.registry().get_entity("cam1").await.unwrap();
        assert!(cam.is_pending(&CommandKind::Start));

        tokio::time::advance(Duration::from_millis(1)).await;
        let timeout = timeouts.recv().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert_eq!(timeout.device_id, "cam1");
        assert_eq!(timeout.command, CommandKind::Start);
        assert_eq!(timeout.correlation_id, "c-1");

        let cam = pending.registry().get_entity("cam1").await.unwrap();
        assert!(!cam.is_pending(&CommandKind::Start));
        assert!(pending.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resend_restarts_timer() {
        let pending = setup(Duration::from_secs(10)).await;
        let mut timeouts = pending.subscribe_timeouts();
        let start = Instant::now();

        pending.track("cam1", CommandKind::Stop, "c-1").await;
        tokio::time::advance(Duration::from_secs(6)).await;
        pending.track("cam1", CommandKind::Stop, "c-2").await;

        let timeout = timeouts.recv().await.unwrap();
        assert_eq!(timeout.correlation_id, "c-2");
        assert_eq!(start.elapsed(), Duration::from_secs(16));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cancels_timer() {
        let pending = setup(Duration::from_secs(10)).await;
        let mut timeouts = pending.subscribe_timeouts();

        pending.track("cam1", CommandKind::Start, "c-1").await;
        assert!(pending.clear("cam1", CommandKind::Start).await);
        assert!(!pending.clear("cam1", CommandKind::Start).await);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(matches!(
            timeouts.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        let cam = pending.registry().get_entity("cam1").await.unwrap();
        assert!(cam.pending_commands.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledge_by_correlation_id() {
        let pending = setup(Duration::from_secs(10)).await;

        pending.track("cam1", CommandKind::Start, "c-1").await;
        pending.track("cam1", CommandKind::UpdateSettings, "c-2").await;

        let acked = pending.acknowledge("c-2").await;
        assert_eq!(acked, Some(("cam1".to_string(), CommandKind::UpdateSettings)));
        assert!(pending.acknowledge("c-2").await.is_none());
        assert!(pending.acknowledge("unknown").await.is_none());

        let cam = pending.registry().get_entity("cam1").await.unwrap();
        assert!(cam.is_pending(&CommandKind::Start));
        assert!(!cam.is_pending(&CommandKind::UpdateSettings));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_and_forget() {
        let pending = setup(Duration::from_secs(10)).await;

        pending.track("cam1", CommandKind::Start, "c-1").await;
        pending.track("cam2", CommandKind::Start, "c-2").await;
        pending.track("cam2", CommandKind::Stop, "c-3").await;

        assert_eq!(pending.forget_device("cam2").await, 2);
        assert_eq!(pending.len().await, 1);
        assert_eq!(pending.cancel_all().await, 1);
        assert!(pending.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adopt_keeps_original_deadline() {
        let from = setup(Duration::from_secs(10)).await;
        let recorders = Arc::new(EntityRegistry::new(DeviceKind::Recorder));
        recorders
            .add_entity("cam1", NewEntity::new("studio", DiscoverySource::Registration))
            .await;
        let to = Arc::new(PendingCommands::new(recorders, Duration::from_secs(10)));
        let mut old_timeouts = from.subscribe_timeouts();
        let mut timeouts = to.subscribe_timeouts();
        let start = Instant::now();

        from.track("cam1", CommandKind::UpdateSettings, "c-1").await;
        tokio::time::advance(Duration::from_secs(4)).await;

        let taken = from.take_device("cam1").await;
        assert_eq!(taken.len(), 1);
        assert!(from.is_empty().await);
        assert_eq!(to.adopt("cam1", taken).await, 1);

        let cam = to.registry().get_entity("cam1").await.unwrap();
        assert!(cam.is_pending(&CommandKind::UpdateSettings));

        let timeout = timeouts.recv().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert_eq!(timeout.correlation_id, "c-1");
        assert!(matches!(
            old_timeouts.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}
