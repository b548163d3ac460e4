//! Console configuration
//!
//! The only deployment-specific values are the transport key/endpoint pair
//! and the room. Everything else carries a default and a builder setter.
//! Values can also be loaded from `FLEET_*` environment variables.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::command::DispatchConfig;
use crate::discovery::DiscoveryConfig;
use crate::preview::PreviewConfig;
use crate::registry::RegistryConfig;
use crate::transport::TransportConfig;

/// Environment variable holding the room name
pub const ENV_ROOM: &str = "FLEET_ROOM";
/// Environment variable holding the transport key
pub const ENV_TRANSPORT_KEY: &str = "FLEET_TRANSPORT_KEY";
/// Environment variable holding the transport endpoint
pub const ENV_TRANSPORT_ENDPOINT: &str = "FLEET_TRANSPORT_ENDPOINT";
/// Environment variable holding the inventory listing URL
pub const ENV_INVENTORY_URL: &str = "FLEET_INVENTORY_URL";
/// Environment variable overriding the command timeout, in seconds
pub const ENV_COMMAND_TIMEOUT_SECS: &str = "FLEET_COMMAND_TIMEOUT_SECS";
/// Environment variable holding the console origin URL
pub const ENV_ORIGIN: &str = "FLEET_ORIGIN";

/// Configuration errors
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// A required variable is absent
    #[error("missing required configuration: {0}")]
    Missing(&'static str),

    /// A variable is present but unusable
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Transport credential; redacted in `Debug` output
#[derive(Clone, PartialEq, Eq)]
pub struct TransportKey(String);

impl TransportKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw key, for handing to the transport SDK
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TransportKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TransportKey([REDACTED])")
    }
}

/// Complete configuration for one console session
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Room whose devices this console manages
    pub room: String,

    /// Transport connection settings
    pub transport: TransportConfig,

    /// Entity registry settings
    pub registry: RegistryConfig,

    /// Discovery settings
    pub discovery: DiscoveryConfig,

    /// Command dispatch settings
    pub dispatch: DispatchConfig,

    /// Live preview settings
    pub preview: PreviewConfig,
}

impl ConsoleConfig {
    /// Create a config for a room with all other values defaulted
    pub fn new(room: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            room: room.into(),
            transport,
            registry: RegistryConfig::default(),
            discovery: DiscoveryConfig::default(),
            dispatch: DispatchConfig::default(),
            preview: PreviewConfig::default(),
        }
    }

    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Load configuration from a variable map
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let room = required(vars, ENV_ROOM)?;
        let key = required(vars, ENV_TRANSPORT_KEY)?;
        let endpoint = required(vars, ENV_TRANSPORT_ENDPOINT)?;

        let mut config = Self::new(room, TransportConfig::new(TransportKey::new(key), endpoint));

        if let Some(url) = vars.get(ENV_INVENTORY_URL).filter(|v| !v.is_empty()) {
            reqwest::Url::parse(url).map_err(|e| ConfigError::Invalid {
                name: ENV_INVENTORY_URL,
                reason: e.to_string(),
            })?;
            config.discovery.inventory_url = Some(url.clone());
        }

        if let Some(raw) = vars.get(ENV_COMMAND_TIMEOUT_SECS) {
            let secs: u64 = raw.parse().map_err(|_| ConfigError::Invalid {
                name: ENV_COMMAND_TIMEOUT_SECS,
                reason: format!("expected whole seconds, got {raw:?}"),
            })?;
            if secs == 0 {
                return Err(ConfigError::Invalid {
                    name: ENV_COMMAND_TIMEOUT_SECS,
                    reason: "must be greater than zero".into(),
                });
            }
            config.dispatch.command_timeout = Duration::from_secs(secs);
        }

        if let Some(origin) = vars.get(ENV_ORIGIN).filter(|v| !v.is_empty()) {
            let url = reqwest::Url::parse(origin).map_err(|e| ConfigError::Invalid {
                name: ENV_ORIGIN,
                reason: e.to_string(),
            })?;
            config.preview.origin = Some(url);
        }

        Ok(config)
    }

    /// Name of the lifecycle/status/command channel
    pub fn control_channel(&self) -> String {
        self.room.clone()
    }

    /// Name of the device-enumeration channel
    pub fn devices_channel(&self) -> String {
        format!("{}-devices", self.room)
    }

    /// Set the registry configuration
    pub fn registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    /// Set the discovery configuration
    pub fn discovery(mut self, discovery: DiscoveryConfig) -> Self {
        self.discovery = discovery;
        self
    }

    /// Set the dispatch configuration
    pub fn dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Set the preview configuration
    pub fn preview(mut self, preview: PreviewConfig) -> Self {
        self.preview = preview;
        self
    }
}

fn required(vars: &HashMap<String, String>, name: &'static str) -> Result<String, ConfigError> {
    match vars.get(name) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ConfigError::Missing(name)),
    }
}
