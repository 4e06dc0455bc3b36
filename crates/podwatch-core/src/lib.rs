//! # podwatch-core
//!
//! Core logic for the Smart Diaper Pod monitor.
//!
//! This crate provides:
//! - Diaper status classification from moisture and gas readings
//! - The connection lifecycle against an abstract device link
//! - Turning a raw telemetry feed into device snapshots and history events
//! - A time-windowed event history with aggregate statistics
//!
//! ## Architecture
//!
//! - [`telemetry`] - The telemetry sample model and raw sample validation
//! - [`status`] - Status classification and thresholds
//! - [`link`] - The device link capability the radio layer implements
//! - [`connection`] - Connection state machine and its driver
//! - [`adapter`] - Feed processing, device snapshots and event emission
//! - [`history`] - Append-only event history and window queries
//! - [`monitor`] - Facade wiring the above together from configuration
//! - [`format`] - Display labels for timestamps
//! - [`config`] - Configuration loading, saving, and validation
//! - [`error`] - Unified error types for the crate
//! - `simulator` - A simulated pod link (feature `simulator`)

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod adapter;
pub mod config;
pub mod connection;
pub mod error;
pub mod format;
pub mod history;
pub mod link;
pub mod monitor;
#[cfg(feature = "simulator")]
pub mod simulator;
pub mod status;
pub mod telemetry;

// Re-export primary types for convenience
pub use adapter::{DeviceState, FeedSummary, SampleOutcome, TelemetryAdapter};
pub use config::{
    ConfigError, DisplayConfig, HistoryConfig, LinkConfig, LoggingConfig, PodConfig,
    ServerConfig, SimulatorConfig,
};
pub use connection::{
    ConnectionEvent, ConnectionManager, ConnectionState, ConnectionStatus, LinkSettings,
};
pub use error::{PodError, Result};
pub use format::{clock_time, relative_age};
pub use history::{
    EventDetails, EventKind, HistoryEvent, HistoryStats, HistoryStore, HistoryWindow, NewEvent,
};
pub use link::{
    DeviceLink, DiscoveredDevice, FeedHandle, LinkError, LinkResult, RawFeed, SignalQuality,
    Transport,
};
pub use monitor::{HistoryEntry, PodMonitor};
#[cfg(feature = "simulator")]
pub use simulator::SimulatedLink;
pub use status::{classify, DiaperStatus, Thresholds};
pub use telemetry::{Position, RawSample, SampleError, TelemetrySample};
