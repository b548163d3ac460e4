//! fleet-console: operator console core for remote capture devices
//!
//! Discovers, monitors and commands a room full of streamers and recorders
//! over a best-effort pub/sub transport, and opens a live preview of one
//! device at a time.
//!
//! # Architecture
//!
//! ```text
//!                        ┌──────────────────────┐
//!   pub/sub service ◄───►│ TransportSupervisor  │
//!                        └──────────┬───────────┘
//!                                   │ events, presence
//!                        ┌──────────▼───────────┐      inventory (HTTP)
//!                        │     Reconciler       │◄──────────────────────
//!                        └──────────┬───────────┘
//!                                   │ create / merge / remove
//!                        ┌──────────▼───────────┐
//!       UI snapshots ◄───│ EntityRegistry × 2   │◄─── pending flags ─┐
//!                        └──────────────────────┘                    │
//!                                                        ┌───────────┴────────┐
//!       UI actions ─────────────────────────────────────►│ CommandDispatcher  │
//!                                                        └────────────────────┘
//!       UI preview ──► PreviewNegotiator ──► offer/answer (HTTP) or direct embed
//! ```
//!
//! # Example
//!
//! ```no_run
//! use fleet_console::{ConsoleConfig, ConsoleSession, MemoryHub};
//!
//! # async fn run() -> fleet_console::Result<()> {
//! let config = ConsoleConfig::from_env()?;
//! let hub = MemoryHub::new();
//! let console = ConsoleSession::new(hub.transport(), config)?;
//!
//! console.connect().await?;
//! for cam in console.fleet().streamers().registry.list().await {
//!     println!("{} {}", cam.name, cam.status);
//! }
//! console.streamers().start("cam1").await?;
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod config;
pub mod discovery;
pub mod error;
pub mod preview;
pub mod registry;
pub mod session;
pub mod stats;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use command::{CommandDispatcher, CommandEnvelope, CommandKind, CommandTimeout};
pub use config::{ConfigError, ConsoleConfig, TransportKey};
pub use discovery::{DiscoveryConfig, Reconciler};
pub use error::{Error, Result, TransportError};
pub use preview::{
    MediaEngine, MediaSession, NegotiationError, PlaybackEndpoint, PreviewConfig,
    PreviewNegotiator, PreviewState,
};
pub use registry::{
    DeviceKind, DeviceSession, EntityPatch, EntityRegistry, RegistryConfig, RegistryError, Status,
};
pub use session::{ConsoleSession, FleetContext};
pub use stats::{ConsoleStats, FleetStats};
pub use transport::{
    ChannelKind, ConnectionState, MemoryHub, MemoryTransport, Transport, TransportConfig,
    TransportSupervisor,
};
