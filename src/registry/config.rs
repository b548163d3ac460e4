//! Registry configuration

use std::time::Duration;

/// Configuration for an [`EntityRegistry`](super::EntityRegistry)
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How often `elapsed` is recomputed for active devices
    pub tick_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
        }
    }
}

impl RegistryConfig {
    /// Set the elapsed tick interval
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }
}
