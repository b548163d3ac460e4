//! Live preview of one device
//!
//! ```text
//!            start(id)
//!   Idle ──────────────► Requesting ──── first track ───► Connected
//!     │                      │                                │
//!     │ (direct embed)       └── HTTP error / media error ──► Failed
//!     └──────────────────────────────────────────────────────►│
//!                                                             close()
//!                                                               ▼
//!                                                             Closed
//! ```
//!
//! At most one preview is live. Starting another tears the current one
//! down before the new one enters `Requesting`.

pub mod endpoint;
pub mod media;
pub mod negotiator;
pub mod state;

use std::time::Duration;

use reqwest::Url;
use thiserror::Error;

pub use endpoint::{is_local_origin, resolve_endpoint, PlaybackEndpoint};
pub use media::{MediaEngine, MediaKind, MediaSession, TrackInfo};
pub use negotiator::PreviewNegotiator;
pub use state::PreviewState;

/// Preview failures; scoped to the device being previewed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    /// The device is not in any registry
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// No usable playback URL could be derived
    #[error("invalid playback endpoint: {0}")]
    InvalidEndpoint(String),

    /// The offer could not be delivered or the answer not read
    #[error("negotiation request failed: {0}")]
    Network(String),

    /// The endpoint answered with a non-success status
    #[error("negotiation rejected with HTTP {0}")]
    HttpStatus(u16),

    /// The media engine failed
    #[error("media engine error: {0}")]
    Media(String),
}

impl NegotiationError {
    /// HTTP status carried by the error, for display
    pub fn status(&self) -> Option<u16> {
        match self {
            NegotiationError::HttpStatus(status) => Some(*status),
            _ => None,
        }
    }
}

/// Preview configuration
#[derive(Debug, Clone)]
pub struct PreviewConfig {
    /// Hosts that serve playback over plain HTTP (no negotiation)
    pub http_only_hosts: Vec<String>,

    /// Path suffix of publish endpoints
    pub push_suffix: String,

    /// Path suffix of playback endpoints
    pub pull_suffix: String,

    /// Playback base used when the console runs on a local network
    pub local_base: String,

    /// Playback base used otherwise
    pub public_base: String,

    /// Where the console itself is served from
    pub origin: Option<Url>,

    /// Timeout of the offer/answer request
    pub request_timeout: Duration,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            http_only_hosts: Vec::new(),
            push_suffix: "/whip".to_string(),
            pull_suffix: "/whep".to_string(),
            local_base: "http://localhost:8889".to_string(),
            public_base: "https://localhost:8889".to_string(),
            origin: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl PreviewConfig {
    /// Add an HTTP-only playback host
    pub fn http_only_host(mut self, host: impl Into<String>) -> Self {
        self.http_only_hosts.push(host.into());
        self
    }

    /// Set the publish/playback path suffixes
    pub fn suffixes(mut self, push: impl Into<String>, pull: impl Into<String>) -> Self {
        self.push_suffix = push.into();
        self.pull_suffix = pull.into();
        self
    }

    /// Set the local playback base
    pub fn local_base(mut self, base: impl Into<String>) -> Self {
        self.local_base = base.into();
        self
    }

    /// Set the public playback base
    pub fn public_base(mut self, base: impl Into<String>) -> Self {
        self.public_base = base.into();
        self
    }

    /// Set the console origin
    pub fn origin(mut self, origin: Url) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Set the negotiation request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
