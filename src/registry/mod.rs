//! Entity registry for discovered devices
//!
//! One registry exists per device kind. It is the canonical record of every
//! device the console knows about and the only place device state is
//! mutated. Discovery writes into it, the command dispatcher flags pending
//! commands on it, and the UI reads snapshots from it.
//!
//! # Merge semantics
//!
//! ```text
//!   stored session                 patch                    result
//!   ┌──────────────────┐     ┌──────────────────┐     ┌──────────────────┐
//!   │ settings.bitrate │     │ settings.bitrate │ ──► │ settings.bitrate │ (patched)
//!   │ settings.codec   │     │        -         │     │ settings.codec   │ (kept)
//!   │ devices.video.*  │     │        -         │     │ devices.video.*  │ (kept)
//!   │ devices.audio.id │     │ devices.audio.id │ ──► │ devices.audio.id │ (patched)
//!   └──────────────────┘     └──────────────────┘     └──────────────────┘
//! ```
//!
//! Patches merge field by field inside each namespace; a namespace is never
//! replaced wholesale.

pub mod config;
pub mod entry;
pub mod error;
pub mod patch;
pub mod store;

pub use config::RegistryConfig;
pub use entry::{
    DeviceKind, DeviceSelection, DeviceSession, Devices, DiscoverySource, MediaDevice, NewEntity,
    Settings, Status,
};
pub use error::RegistryError;
pub use patch::{DeviceSelectionPatch, DevicesPatch, EntityPatch, SettingsPatch};
pub use store::{EntityRegistry, RegistryEvent};
