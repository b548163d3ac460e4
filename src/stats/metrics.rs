//! Statistics for device fleets

use std::time::Duration;

use crate::registry::{DeviceKind, DeviceSession, EntityRegistry, Status};

/// Point-in-time summary of one registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetStats {
    /// Device kind summarized
    pub kind: DeviceKind,
    /// Number of known devices
    pub total: usize,
    pub ready: usize,
    /// Streaming or recording
    pub active: usize,
    pub stopped: usize,
    pub error: usize,
    pub offline: usize,
    /// Commands awaiting confirmation, across all devices
    pub pending_commands: usize,
    /// Devices with at least one pending command
    pub devices_with_pending: usize,
    /// Longest current active run
    pub longest_active: Duration,
}

impl FleetStats {
    /// Empty summary
    pub fn new(kind: DeviceKind) -> Self {
        Self {
            kind,
            total: 0,
            ready: 0,
            active: 0,
            stopped: 0,
            error: 0,
            offline: 0,
            pending_commands: 0,
            devices_with_pending: 0,
            longest_active: Duration::ZERO,
        }
    }

    /// Summarize a set of sessions
    pub fn from_sessions(kind: DeviceKind, sessions: &[DeviceSession]) -> Self {
        let mut stats = Self::new(kind);

        for session in sessions {
            stats.total += 1;
            match session.status {
                Status::Ready => stats.ready += 1,
                Status::Active => stats.active += 1,
                Status::Stopped => stats.stopped += 1,
                Status::Error => stats.error += 1,
                Status::Offline => stats.offline += 1,
            }
            if !session.pending_commands.is_empty() {
                stats.devices_with_pending += 1;
                stats.pending_commands += session.pending_commands.len();
            }
            if session.is_active() {
                stats.longest_active = stats.longest_active.max(session.elapsed);
            }
        }

        stats
    }

    /// Summarize a registry's current contents
    pub async fn collect(registry: &EntityRegistry) -> Self {
        Self::from_sessions(registry.kind(), &registry.list().await)
    }

    /// Count of devices in a status
    pub fn count(&self, status: Status) -> usize {
        match status {
            Status::Ready => self.ready,
            Status::Active => self.active,
            Status::Stopped => self.stopped,
            Status::Error => self.error,
            Status::Offline => self.offline,
        }
    }
}

/// Summary of both fleets of a console
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleStats {
    pub streamers: FleetStats,
    pub recorders: FleetStats,
}

impl ConsoleStats {
    /// Devices across both fleets
    pub fn total(&self) -> usize {
        self.streamers.total + self.recorders.total
    }

    /// Active devices across both fleets
    pub fn active(&self) -> usize {
        self.streamers.active + self.recorders.active
    }
}
