//! Core types for the channel simulation
//!
//! Identifiers and message kinds shared by signals, terminals and the world.

use std::fmt;

/// A unique identifier for simulation entities
/// This is a simple wrapper around a usize for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimId(pub usize);

/// A wrapper type for terminal IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TerminalId(pub SimId);

impl fmt::Display for TerminalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0 .0)
    }
}

/// Identifies one transmission attempt.
///
/// Minted by the emitting terminal from its own sequence counter, so it is
/// unique across the world without a shared generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BroadcastId {
    pub source: TerminalId,
    pub seq: u32,
}

impl fmt::Display for BroadcastId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#b{}", self.source, self.seq)
    }
}

/// Identifies a logical frame (RTS, CTS, DATA or ACK).
///
/// A frame keeps its id across retransmissions, so replies can acknowledge it
/// no matter which attempt got through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId {
    pub origin: TerminalId,
    pub seq: u32,
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#m{}", self.origin, self.seq)
    }
}

/// The four handshake frame kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Request to send
    Rts,
    /// Clear to send
    Cts,
    /// Payload
    Data,
    /// Acknowledgment of a DATA frame
    Ack,
}

impl MessageKind {
    /// Control frames and DATA share the priority queue; only RTS waits in its own queue
    pub fn uses_rts_queue(self) -> bool {
        matches!(self, MessageKind::Rts)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Rts => "RTS",
            MessageKind::Cts => "CTS",
            MessageKind::Data => "DATA",
            MessageKind::Ack => "ACK",
        };
        f.write_str(name)
    }
}

/// Converts `delta * growth_rate` into world units of radius
pub const PROPAGATION_SCALE: f64 = 0.01;

/// Hard cap on catch-up iterations of the Poisson timer in a single tick
pub const MAX_CATCH_UP_STEPS: usize = 64;

/// Backoff window stops doubling after this many consecutive collisions
pub const MAX_BACKOFF_EXPONENT: u32 = 10;
