//! Console session management
//!
//! Replaces process-wide state with explicit objects: a [`FleetContext`]
//! holds the devices of a room, a [`ConsoleSession`] owns one connection
//! and everything that runs on it.

pub mod console;
pub mod context;

pub use console::ConsoleSession;
pub use context::{DeviceFleet, FleetContext};
