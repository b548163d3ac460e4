//! Command dispatch
//!
//! Commands travel as envelopes on the room's control channel. Each one is
//! tracked as pending until a confirming event, an explicit
//! acknowledgement carrying its correlation id, or its timeout.
//!
//! ```text
//!   send(id, START) ──► publish {command, streamId, timestamp, correlationId}
//!         │
//!         └──► pending[(id, START)] + timer ──┬── status "active"  ──► clear
//!                                              ├── command-ack      ──► clear
//!                                              └── 10s elapsed      ──► clear + CommandTimeout
//! ```

pub mod dispatcher;
pub mod envelope;
pub mod pending;

use std::time::Duration;

pub use dispatcher::{CommandDispatcher, COMMAND_EVENT};
pub use envelope::{CommandAck, CommandEnvelope, CommandKind};
pub use pending::{CommandTimeout, InFlight, PendingCommands};

/// Command dispatch configuration
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// How long a command stays pending without confirmation
    pub command_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(10),
        }
    }
}

impl DispatchConfig {
    /// Set the pending-command timeout
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}
