//! Discovery wire payloads
//!
//! Devices publish camelCase JSON. Only `streamId` is required anywhere;
//! everything else is optional and merged when present.

use serde::{Deserialize, Serialize};

use crate::registry::patch::lenient_status;
use crate::registry::{
    DeviceSelectionPatch, DevicesPatch, EntityPatch, MediaDevice, SettingsPatch, Status,
};

/// Registration of a streamer, published when it comes online
pub const STREAMER_READY_EVENT: &str = "streamer-ready";
/// Registration of a recorder, published when it comes online
pub const RECORDER_READY_EVENT: &str = "recorder-ready";
/// Status (and optionally settings) change
pub const STATUS_EVENT: &str = "status";
/// Settings applied on the device
pub const SETTINGS_EVENT: &str = "settings-updated";
/// Device announced it is going away
pub const REMOVED_EVENT: &str = "device-removed";
/// Explicit command acknowledgement
pub const ACK_EVENT: &str = "command-ack";
/// Device enumeration (device channel)
pub const DEVICES_LIST_EVENT: &str = "devices-list";
/// Ask a device to enumerate its hardware (device channel)
pub const REQUEST_DEVICES_EVENT: &str = "request-devices";

/// Authoritative announcement that a device is online
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    #[serde(alias = "id")]
    pub stream_id: String,
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: Option<Status>,
    pub settings: Option<SettingsPatch>,
    pub devices: Option<DevicesPatch>,
}

impl Registration {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            ..Default::default()
        }
    }

    /// Patch applied to an already-known session
    ///
    /// A registration always asserts a status; `ready` when none is given.
    pub(crate) fn to_patch(&self) -> EntityPatch {
        EntityPatch {
            name: self.name.clone(),
            status: Some(self.status.unwrap_or(Status::Ready)),
            devices: self.devices.clone(),
            settings: self.settings.clone(),
        }
    }
}

/// Partial update attributed to one device (`status`, `settings-updated`)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceUpdate {
    #[serde(alias = "id")]
    pub stream_id: String,
    #[serde(flatten)]
    pub patch: EntityPatch,
}

/// Device enumeration published on the device channel
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceList {
    #[serde(alias = "id")]
    pub stream_id: String,
    pub video: Option<Vec<MediaDevice>>,
    pub audio: Option<Vec<MediaDevice>>,
    pub current_video: Option<MediaDevice>,
    pub current_audio: Option<MediaDevice>,
}

impl DeviceList {
    pub(crate) fn to_patch(&self) -> DevicesPatch {
        fn selection(
            available: &Option<Vec<MediaDevice>>,
            current: &Option<MediaDevice>,
        ) -> Option<DeviceSelectionPatch> {
            if available.is_none() && current.is_none() {
                return None;
            }
            Some(DeviceSelectionPatch {
                current_id: current.as_ref().map(|d| d.device_id.clone()),
                current_label: current.as_ref().map(|d| d.label.clone()),
                available: available.clone(),
            })
        }

        DevicesPatch {
            video: selection(&self.video, &self.current_video),
            audio: selection(&self.audio, &self.current_audio),
        }
    }
}

/// Device announced removal
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Removal {
    #[serde(alias = "id")]
    pub stream_id: String,
}

/// Metadata request sent to a device
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMetadataRequest {
    pub stream_id: String,
    pub timestamp: i64,
    /// 1 for the first request, 2 for the retry
    pub attempt: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_minimal() {
        let reg: Registration =
            serde_json::from_str(r#"{"streamId": "cam1", "status": "ready"}"#).unwrap();
        assert_eq!(reg.stream_id, "cam1");
        assert_eq!(reg.status, Some(Status::Ready));
        assert!(reg.name.is_none());
    }

    #[test]
    fn test_registration_patch_defaults_to_ready() {
        let reg = Registration::new("cam1");
        let patch = reg.to_patch();
        assert_eq!(patch.status, Some(Status::Ready));
        assert!(patch.name.is_none());
        assert!(patch.settings.is_none());
    }

    #[test]
    fn test_status_update_with_settings() {
        let update: DeviceUpdate = serde_json::from_str(
            r#"{"streamId": "cam1", "status": "streaming", "settings": {"bitrate": 3000}}"#,
        )
        .unwrap();
        assert_eq!(update.patch.status, Some(Status::Active));
        assert_eq!(update.patch.settings.unwrap().bitrate, Some(3000));
    }

    #[test]
    fn test_unknown_status_keeps_rest_of_update() {
        let update: DeviceUpdate = serde_json::from_str(
            r#"{"streamId": "cam1", "status": "rebooting", "settings": {"bitrate": 3000}}"#,
        )
        .unwrap();
        assert_eq!(update.stream_id, "cam1");
        assert!(update.patch.status.is_none());
        assert_eq!(update.patch.settings.unwrap().bitrate, Some(3000));

        let update: DeviceUpdate =
            serde_json::from_str(r#"{"streamId": "cam1", "status": null}"#).unwrap();
        assert!(update.patch.status.is_none());

        let reg: Registration =
            serde_json::from_str(r#"{"streamId": "cam1", "status": 7, "name": "Main"}"#).unwrap();
        assert!(reg.status.is_none());
        assert_eq!(reg.name.as_deref(), Some("Main"));
    }

    #[test]
    fn test_device_list_patch() {
        let list: DeviceList = serde_json::from_str(
            r#"{
                "streamId": "cam1",
                "video": [{"deviceId": "v1", "label": "Front"}, {"deviceId": "v2", "label": "Back"}],
                "currentVideo": {"deviceId": "v2", "label": "Back"}
            }"#,
        )
        .unwrap();

        let patch = list.to_patch();
        let video = patch.video.unwrap();
        assert_eq!(video.current_id.as_deref(), Some("v2"));
        assert_eq!(video.available.unwrap().len(), 2);
        assert!(patch.audio.is_none());
    }
}
