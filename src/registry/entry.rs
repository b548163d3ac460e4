//! Device session and state types
//!
//! This module defines the per-device state stored in the registry.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::command::CommandKind;

use super::patch::{DeviceSelectionPatch, EntityPatch, SettingsPatch};

/// Kind of remote capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Live streamer (publishes to a media server)
    Streamer,
    /// Local recorder
    Recorder,
}

impl DeviceKind {
    /// Map a presence role/type tag to a device kind
    pub fn from_role(role: &str) -> Option<Self> {
        match role.trim().to_ascii_lowercase().as_str() {
            "streamer" => Some(DeviceKind::Streamer),
            "recorder" => Some(DeviceKind::Recorder),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Streamer => "streamer",
            DeviceKind::Recorder => "recorder",
        }
    }

    /// Display name used until a better one is known
    pub fn default_name(&self, id: &str) -> String {
        match self {
            DeviceKind::Streamer => format!("Streamer {}", id),
            DeviceKind::Recorder => format!("Recorder {}", id),
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reported device status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ready,
    /// Streaming or recording
    #[serde(alias = "streaming", alias = "recording", alias = "live")]
    Active,
    Stopped,
    Error,
    Offline,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Ready => "ready",
            Status::Active => "active",
            Status::Stopped => "stopped",
            Status::Error => "error",
            Status::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// Which discovery signal introduced (or last vouched for) a device
///
/// Ordered by authority: a registration outranks presence, which outranks
/// an inventory hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiscoverySource {
    Inventory,
    Presence,
    Registration,
}

/// A capture device (camera or microphone) enumerated by the remote side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDevice {
    pub device_id: String,
    #[serde(default)]
    pub label: String,
}

/// Current selection and available choices for one media kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSelection {
    pub current_id: Option<String>,
    pub current_label: Option<String>,
    pub available: Vec<MediaDevice>,
}

impl DeviceSelection {
    /// Whether the remote side has reported anything for this kind
    pub fn is_populated(&self) -> bool {
        self.current_id.is_some() || !self.available.is_empty()
    }

    fn merge(&mut self, patch: &DeviceSelectionPatch) {
        if let Some(ref id) = patch.current_id {
            self.current_id = Some(id.clone());
        }
        if let Some(ref label) = patch.current_label {
            self.current_label = Some(label.clone());
        }
        if let Some(ref available) = patch.available {
            self.available = available.clone();
        }
    }
}

/// Video and audio selections
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Devices {
    pub video: DeviceSelection,
    pub audio: DeviceSelection,
}

/// Kind-specific capture/encode settings
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Target bitrate in kbps
    pub bitrate: u32,
    pub codec: String,
    pub resolution: String,
    pub framerate: u32,
    pub video_muted: bool,
    pub audio_muted: bool,
    /// Publish endpoint (streamers)
    pub endpoint_url: Option<String>,
    /// `sdr` or `hdr`
    pub dynamic_range: String,
    /// Settings this crate has no typed field for
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Settings {
    /// Defaults for a device kind
    pub fn defaults_for(kind: DeviceKind) -> Self {
        let (bitrate, resolution) = match kind {
            DeviceKind::Streamer => (2500, "1280x720"),
            DeviceKind::Recorder => (8000, "1920x1080"),
        };

        Self {
            bitrate,
            codec: "h264".to_string(),
            resolution: resolution.to_string(),
            framerate: 30,
            video_muted: false,
            audio_muted: false,
            endpoint_url: None,
            dynamic_range: "sdr".to_string(),
            extra: serde_json::Map::new(),
        }
    }

    fn merge(&mut self, patch: &SettingsPatch) {
        if let Some(bitrate) = patch.bitrate {
            self.bitrate = bitrate;
        }
        if let Some(ref codec) = patch.codec {
            self.codec = codec.clone();
        }
        if let Some(ref resolution) = patch.resolution {
            self.resolution = resolution.clone();
        }
        if let Some(framerate) = patch.framerate {
            self.framerate = framerate;
        }
        if let Some(muted) = patch.video_muted {
            self.video_muted = muted;
        }
        if let Some(muted) = patch.audio_muted {
            self.audio_muted = muted;
        }
        if let Some(ref url) = patch.endpoint_url {
            self.endpoint_url = Some(url.clone());
        }
        if let Some(ref range) = patch.dynamic_range {
            self.dynamic_range = range.clone();
        }
        for (key, value) in &patch.extra {
            self.extra.insert(key.clone(), value.clone());
        }
    }
}

/// Data for creating a device session
#[derive(Debug, Clone)]
pub struct NewEntity {
    /// Display name; the kind's default name when absent
    pub name: Option<String>,
    pub status: Status,
    pub room: String,
    pub source: DiscoverySource,
    pub platform: Option<String>,
}

impl NewEntity {
    pub fn new(room: impl Into<String>, source: DiscoverySource) -> Self {
        Self {
            name: None,
            status: Status::Ready,
            room: room.into(),
            source,
            platform: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }
}

/// State for a single discovered device
#[derive(Debug, Clone)]
pub struct DeviceSession {
    pub id: String,
    pub kind: DeviceKind,
    pub name: String,
    /// True while `name` is still the kind's placeholder
    pub name_is_default: bool,
    pub status: Status,
    pub room: String,
    pub devices: Devices,
    pub settings: Settings,
    /// Commands dispatched but not yet confirmed or expired
    pub pending_commands: BTreeSet<CommandKind>,
    /// When the device last became active
    pub active_since: Option<Instant>,
    /// Time spent active, recomputed by the registry tick
    pub elapsed: Duration,
    pub last_seen: Instant,
    pub origin: DiscoverySource,
    pub platform: Option<String>,
}

impl DeviceSession {
    pub(super) fn new(id: String, kind: DeviceKind, data: NewEntity, now: Instant) -> Self {
        let (name, name_is_default) = match data.name {
            Some(name) if !name.trim().is_empty() => (name, false),
            _ => (kind.default_name(&id), true),
        };

        let mut session = Self {
            id,
            kind,
            name,
            name_is_default,
            status: Status::Ready,
            room: data.room,
            devices: Devices::default(),
            settings: Settings::defaults_for(kind),
            pending_commands: BTreeSet::new(),
            active_since: None,
            elapsed: Duration::ZERO,
            last_seen: now,
            origin: data.source,
            platform: data.platform,
        };
        session.set_status(data.status, now);
        session
    }

    /// Re-home a session under another device kind
    ///
    /// Devices, timing, platform and user-facing settings carry over.
    /// Bitrate and resolution reset to the new kind's defaults, and a
    /// placeholder name is regenerated. Pending flags are dropped; the
    /// caller re-tracks them in the new kind's table.
    pub(crate) fn into_kind(mut self, kind: DeviceKind) -> Self {
        if self.kind == kind {
            return self;
        }
        let defaults = Settings::defaults_for(kind);
        self.settings.bitrate = defaults.bitrate;
        self.settings.resolution = defaults.resolution;
        if self.name_is_default {
            self.name = kind.default_name(&self.id);
        }
        self.pending_commands.clear();
        self.kind = kind;
        self
    }

    /// Apply a status, maintaining the active timing fields
    pub(super) fn set_status(&mut self, status: Status, now: Instant) {
        if status == Status::Active {
            if self.active_since.is_none() {
                self.active_since = Some(now);
            }
        } else {
            self.active_since = None;
            self.elapsed = Duration::ZERO;
        }
        self.status = status;
    }

    /// Merge a partial update; absent fields keep their value
    pub(super) fn apply(&mut self, patch: &EntityPatch, now: Instant) {
        if let Some(ref name) = patch.name {
            if !name.trim().is_empty() {
                self.name = name.clone();
                self.name_is_default = false;
            }
        }
        if let Some(status) = patch.status {
            self.set_status(status, now);
        }
        if let Some(ref devices) = patch.devices {
            if let Some(ref video) = devices.video {
                self.devices.video.merge(video);
            }
            if let Some(ref audio) = devices.audio {
                self.devices.audio.merge(audio);
            }
        }
        if let Some(ref settings) = patch.settings {
            self.settings.merge(settings);
        }
        self.last_seen = now;
    }

    /// Recompute `elapsed` against `now`
    pub(super) fn refresh_elapsed(&mut self, now: Instant) {
        if let (Status::Active, Some(since)) = (self.status, self.active_since) {
            self.elapsed = now.saturating_duration_since(since);
        }
    }

    /// Whether the device is currently streaming/recording
    pub fn is_active(&self) -> bool {
        self.status == Status::Active
    }

    /// Whether a command of this kind is awaiting confirmation
    pub fn is_pending(&self, kind: &CommandKind) -> bool {
        self.pending_commands.contains(kind)
    }

    /// Whether any device list has been received
    pub fn has_device_metadata(&self) -> bool {
        self.devices.video.is_populated() || self.devices.audio.is_populated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(kind: DeviceKind) -> DeviceSession {
        DeviceSession::new(
            "cam1".to_string(),
            kind,
            NewEntity::new("studio", DiscoverySource::Registration),
            Instant::now(),
        )
    }

    #[test]
    fn test_default_name_and_settings() {
        let s = session(DeviceKind::Recorder);

        assert_eq!(s.name, "Recorder cam1");
        assert!(s.name_is_default);
        assert_eq!(s.settings.bitrate, 8000);
        assert_eq!(s.settings.resolution, "1920x1080");
        assert_eq!(s.status, Status::Ready);
    }

    #[test]
    fn test_blank_name_falls_back_to_default() {
        let s = DeviceSession::new(
            "cam2".to_string(),
            DeviceKind::Streamer,
            NewEntity::new("studio", DiscoverySource::Presence).name("  "),
            Instant::now(),
        );
        assert_eq!(s.name, "Streamer cam2");
        assert!(s.name_is_default);
    }

    #[test]
    fn test_role_mapping() {
        assert_eq!(DeviceKind::from_role("streamer"), Some(DeviceKind::Streamer));
        assert_eq!(DeviceKind::from_role(" Recorder "), Some(DeviceKind::Recorder));
        assert_eq!(DeviceKind::from_role("console"), None);
    }

    #[test]
    fn test_status_aliases() {
        let s: Status = serde_json::from_str("\"streaming\"").unwrap();
        assert_eq!(s, Status::Active);
        let s: Status = serde_json::from_str("\"recording\"").unwrap();
        assert_eq!(s, Status::Active);
        let s: Status = serde_json::from_str("\"offline\"").unwrap();
        assert_eq!(s, Status::Offline);
    }

    #[test]
    fn test_authority_order() {
        assert!(DiscoverySource::Registration > DiscoverySource::Presence);
        assert!(DiscoverySource::Presence > DiscoverySource::Inventory);
    }

    #[test]
    fn test_device_selection_merge_keeps_absent_fields() {
        let mut s = session(DeviceKind::Streamer);
        s.devices.video.current_id = Some("v1".into());
        s.devices.video.current_label = Some("Front".into());

        let patch = DeviceSelectionPatch {
            current_label: Some("Front camera".into()),
            ..Default::default()
        };
        s.devices.video.merge(&patch);

        assert_eq!(s.devices.video.current_id.as_deref(), Some("v1"));
        assert_eq!(s.devices.video.current_label.as_deref(), Some("Front camera"));
    }

    #[test]
    fn test_into_kind_keeps_device_state() {
        let now = Instant::now();
        let mut s = session(DeviceKind::Streamer);
        s.apply(
            &EntityPatch {
                status: Some(Status::Active),
                settings: Some(SettingsPatch {
                    bitrate: Some(4000),
                    framerate: Some(60),
                    endpoint_url: Some("https://media.example.com/cam1/whip".into()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            now,
        );
        s.pending_commands.insert(CommandKind::Stop);

        let moved = s.into_kind(DeviceKind::Recorder);
        assert_eq!(moved.kind, DeviceKind::Recorder);
        assert_eq!(moved.name, "Recorder cam1");
        assert_eq!(moved.status, Status::Active);
        assert_eq!(moved.active_since, Some(now));
        assert_eq!(moved.settings.bitrate, 8000);
        assert_eq!(moved.settings.resolution, "1920x1080");
        assert_eq!(moved.settings.framerate, 60);
        assert_eq!(
            moved.settings.endpoint_url.as_deref(),
            Some("https://media.example.com/cam1/whip")
        );
        assert!(moved.pending_commands.is_empty());
    }
}
