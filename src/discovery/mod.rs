//! Device discovery
//!
//! Three independent sources feed the registries:
//!
//! ```text
//!   registration event ──┐  (authoritative: name, status, kind)
//!   presence enter/snap ─┼──► Reconciler ──► EntityRegistry (per kind)
//!   inventory probe ─────┘  (create-if-absent only)
//! ```
//!
//! Signals can arrive in any order. The first one creates the session;
//! later ones of equal or lower authority only fill gaps.

pub mod events;
pub mod inventory;
pub mod reconciler;

use std::time::Duration;

pub use events::{DeviceList, DeviceMetadataRequest, DeviceUpdate, Registration, Removal};
pub use inventory::{InventoryClient, InventoryItem, InventoryListing};
pub use reconciler::Reconciler;

/// Discovery configuration
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Media-server path listing; the probe is skipped when unset
    pub inventory_url: Option<String>,

    /// HTTP timeout for the inventory probe
    pub inventory_timeout: Duration,

    /// Lower bound of the first metadata request delay
    pub metadata_delay_min: Duration,

    /// Upper bound of the first metadata request delay
    pub metadata_delay_max: Duration,

    /// Delay of the metadata retry, from creation
    pub metadata_retry_delay: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            inventory_url: None,
            inventory_timeout: Duration::from_secs(5),
            metadata_delay_min: Duration::from_millis(500),
            metadata_delay_max: Duration::from_millis(1000),
            metadata_retry_delay: Duration::from_millis(3000),
        }
    }
}

impl DiscoveryConfig {
    /// Set the inventory listing URL
    pub fn inventory_url(mut self, url: impl Into<String>) -> Self {
        self.inventory_url = Some(url.into());
        self
    }

    /// Set the inventory request timeout
    pub fn inventory_timeout(mut self, timeout: Duration) -> Self {
        self.inventory_timeout = timeout;
        self
    }

    /// Set the jitter window of the first metadata request
    pub fn metadata_delay(mut self, min: Duration, max: Duration) -> Self {
        self.metadata_delay_min = min;
        self.metadata_delay_max = max.max(min);
        self
    }

    /// Set the metadata retry delay
    pub fn metadata_retry_delay(mut self, delay: Duration) -> Self {
        self.metadata_retry_delay = delay;
        self
    }
}
