//! Fleet statistics

pub mod metrics;

pub use metrics::{ConsoleStats, FleetStats};
