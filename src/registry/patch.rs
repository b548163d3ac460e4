//! Partial update types
//!
//! Every field is optional. A `None` field leaves the stored value as it
//! is, so a patch can never replace a whole namespace. The types
//! deserialize straight from the camelCase payloads devices publish.

use serde::{Deserialize, Deserializer};

use super::entry::{MediaDevice, Status};

/// Partial update of one device selection
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSelectionPatch {
    pub current_id: Option<String>,
    pub current_label: Option<String>,
    pub available: Option<Vec<MediaDevice>>,
}

/// Partial update of the `devices` namespace
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DevicesPatch {
    pub video: Option<DeviceSelectionPatch>,
    pub audio: Option<DeviceSelectionPatch>,
}

/// Partial update of the `settings` namespace
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub bitrate: Option<u32>,
    pub codec: Option<String>,
    pub resolution: Option<String>,
    pub framerate: Option<u32>,
    pub video_muted: Option<bool>,
    pub audio_muted: Option<bool>,
    pub endpoint_url: Option<String>,
    pub dynamic_range: Option<String>,
    /// Keys without a typed field, merged one by one
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Partial update of a device session
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityPatch {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: Option<Status>,
    pub devices: Option<DevicesPatch>,
    pub settings: Option<SettingsPatch>,
}

/// Decode an optional status, dropping values this crate does not know
///
/// The rest of the payload still applies when a device reports a status
/// from a newer vocabulary.
pub(crate) fn lenient_status<'de, D>(deserializer: D) -> Result<Option<Status>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(value) = Option::<serde_json::Value>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if value.is_null() {
        return Ok(None);
    }
    match serde_json::from_value::<Status>(value.clone()) {
        Ok(status) => Ok(Some(status)),
        Err(_) => {
            tracing::warn!(status = %value, "Unknown device status ignored");
            Ok(None)
        }
    }
}

impl EntityPatch {
    /// Patch that only changes status
    pub fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Patch that only changes settings
    pub fn settings(settings: SettingsPatch) -> Self {
        Self {
            settings: Some(settings),
            ..Default::default()
        }
    }

    /// Patch that only changes device selections
    pub fn devices(devices: DevicesPatch) -> Self {
        Self {
            devices: Some(devices),
            ..Default::default()
        }
    }

    /// Whether the patch carries no change at all
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.status.is_none()
            && self.devices.is_none()
            && self.settings.is_none()
    }
}
