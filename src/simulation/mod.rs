//! Headless shared-channel simulation
//!
//! Terminals scattered on a plane contend for one radio channel with an
//! RTS/CTS/DATA/ACK handshake. Every transmission is a circle that grows out
//! of its source; overlapping circles spoil each other.

mod broadcast;
mod config;
mod error;
mod geometry;
mod stats;
mod terminal;
mod types;
mod world;

pub use broadcast::{
    Broadcast, BroadcastFinishedSink, BroadcastOutcome, BroadcastState, Message,
};
pub use config::{validate_range, validate_signal, Scenario, SimConfig, TerminalSpec};
pub use error::ConfigurationError;
pub use geometry::{Circle, Vector2D};
pub use stats::{SimStats, TerminalCounters};
pub use terminal::{
    BroadcastEmittedSink, ChannelBusyProbe, NeighborsInRangeProbe, Terminal, TerminalState,
};
pub use types::{
    BroadcastId, MessageId, MessageKind, SimId, TerminalId, MAX_BACKOFF_EXPONENT,
    MAX_CATCH_UP_STEPS, PROPAGATION_SCALE,
};
pub use world::SimWorld;
