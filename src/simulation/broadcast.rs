//! Signal propagation for the channel simulation
//!
//! A `Broadcast` is one transmission attempt: a circle growing out of its
//! source terminal until it reaches its ceiling radius. Overlaps with other
//! broadcasts or with a transmitting terminal spoil it.

use rand::Rng;
use std::collections::BTreeSet;

use super::config::validate_signal;
use super::error::ConfigurationError;
use super::geometry::{Circle, Vector2D};
use super::terminal::Terminal;
use super::types::{BroadcastId, MessageId, MessageKind, TerminalId, PROPAGATION_SCALE};

/// A handshake frame as carried by a broadcast
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub kind: MessageKind,
    pub source: TerminalId,
    pub destination: Option<TerminalId>,
    /// The frame this one answers (CTS answers an RTS, ACK answers a DATA)
    pub acknowledges: Option<MessageId>,
    /// Channel time the exchange is expected to take
    pub reservation: Option<f64>,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn is_addressed_to(&self, terminal: TerminalId) -> bool {
        self.destination == Some(terminal)
    }
}

/// Lifecycle of a broadcast. Ordered so that a state never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BroadcastState {
    Broadcasting,
    /// Overlapped another broadcast or hit a busy receiver
    Interfered,
    /// The source's own emission got clobbered while it was transmitting
    Jammed,
    Finished,
}

/// What happened to a broadcast, kept after it finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastOutcome {
    Clean,
    Interfered,
    Jammed,
}

/// Receives the one-time notification that a broadcast has finished
pub trait BroadcastFinishedSink {
    fn broadcast_finished(&mut self, broadcast: &Broadcast);
}

impl BroadcastFinishedSink for Vec<BroadcastId> {
    fn broadcast_finished(&mut self, broadcast: &Broadcast) {
        self.push(broadcast.id());
    }
}

/// One propagating transmission
#[derive(Debug, Clone)]
pub struct Broadcast {
    id: BroadcastId,
    message: Message,
    circle: Circle,
    growth_rate: f64,
    max_radius: f64,
    /// Growth budget spent so far; the circle only follows it while broadcasting
    progress: f64,
    state: BroadcastState,
    outcome: BroadcastOutcome,
    interfered_by: BTreeSet<BroadcastId>,
    interfered_at: BTreeSet<TerminalId>,
    delivered_to: BTreeSet<TerminalId>,
    finish_notified: bool,
    /// Time spent in `Finished`, used for retention
    finished_for: f64,
}

impl Broadcast {
    pub fn new(
        id: BroadcastId,
        message: Message,
        origin: Vector2D,
        growth_rate: f64,
        max_radius: f64,
    ) -> Result<Self, ConfigurationError> {
        validate_signal(growth_rate, max_radius)?;
        Ok(Self {
            id,
            message,
            circle: Circle::new(origin, 0.0),
            growth_rate,
            max_radius,
            progress: 0.0,
            state: BroadcastState::Broadcasting,
            outcome: BroadcastOutcome::Clean,
            interfered_by: BTreeSet::new(),
            interfered_at: BTreeSet::new(),
            delivered_to: BTreeSet::new(),
            finish_notified: false,
            finished_for: 0.0,
        })
    }

    pub fn id(&self) -> BroadcastId {
        self.id
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn kind(&self) -> MessageKind {
        self.message.kind
    }

    pub fn source(&self) -> TerminalId {
        self.message.source
    }

    pub fn destination(&self) -> Option<TerminalId> {
        self.message.destination
    }

    pub fn circle(&self) -> &Circle {
        &self.circle
    }

    pub fn state(&self) -> BroadcastState {
        self.state
    }

    pub fn outcome(&self) -> BroadcastOutcome {
        self.outcome
    }

    /// Still on the air (any state but `Finished`)
    pub fn is_active(&self) -> bool {
        self.state != BroadcastState::Finished
    }

    pub fn finished_for(&self) -> f64 {
        self.finished_for
    }

    pub fn was_delivered_to(&self, terminal: TerminalId) -> bool {
        self.delivered_to.contains(&terminal)
    }

    pub fn was_interfered_at(&self, terminal: TerminalId) -> bool {
        self.interfered_at.contains(&terminal)
    }

    /// Advance the growth budget by `delta` milliseconds
    pub fn tick(&mut self, delta: f64, sink: &mut dyn BroadcastFinishedSink) {
        if self.state == BroadcastState::Finished {
            self.finished_for += delta;
            return;
        }

        self.progress = (self.progress + delta * self.growth_rate * PROPAGATION_SCALE)
            .min(self.max_radius);
        if self.state == BroadcastState::Broadcasting {
            self.circle.radius = self.progress;
        }

        if self.progress >= self.max_radius {
            self.finish(sink);
        }
    }

    /// Move to `Finished` and notify `sink`. Only the first call has any effect.
    pub fn finish(&mut self, sink: &mut dyn BroadcastFinishedSink) {
        if self.finish_notified {
            return;
        }
        self.finish_notified = true;
        self.state = BroadcastState::Finished;
        sink.broadcast_finished(self);
    }

    pub fn collides_with(&self, other: &Broadcast) -> bool {
        self.circle.collides(&other.circle)
    }

    pub fn reaches(&self, terminal: &Terminal) -> bool {
        self.circle.contains(&terminal.position())
    }

    /// The broadcast covers a terminal that is busy transmitting something else
    pub fn conflicts_at(&self, terminal: &Terminal) -> bool {
        self.reaches(terminal) && terminal.is_transmitting_other_than(self.id)
    }

    /// Record an overlap with `peer`. Returns false if it was already recorded
    /// or this broadcast has finished.
    pub fn mark_interfered_by(&mut self, peer: BroadcastId) -> bool {
        if self.state == BroadcastState::Finished || !self.interfered_by.insert(peer) {
            return false;
        }
        self.spoil();
        true
    }

    /// Record a receiver-side collision at `terminal` and jam the terminal's
    /// own transmission. Returns the id of the terminal broadcast that must be
    /// jammed, if any.
    pub fn mark_interfered_at<R: Rng + ?Sized>(
        &mut self,
        terminal: &mut Terminal,
        rng: &mut R,
    ) -> Option<BroadcastId> {
        if self.state == BroadcastState::Finished || !self.interfered_at.insert(terminal.id()) {
            return None;
        }
        self.spoil();
        terminal.interfere(self.id, rng)
    }

    /// Hand the carried message to `terminal` once
    pub fn deliver_to(&mut self, terminal: &mut Terminal) -> bool {
        if !self.delivered_to.insert(terminal.id()) {
            return false;
        }
        terminal.receive(&self.message);
        true
    }

    /// The source's own emission was clobbered
    pub fn jam(&mut self) {
        if self.state == BroadcastState::Finished {
            return;
        }
        self.state = BroadcastState::Jammed;
        self.outcome = BroadcastOutcome::Jammed;
    }

    /// Safe for a receiver to accept
    pub fn is_clean(&self) -> bool {
        self.outcome == BroadcastOutcome::Clean
    }

    fn spoil(&mut self) {
        if self.state == BroadcastState::Broadcasting {
            self.state = BroadcastState::Interfered;
        }
        if self.outcome == BroadcastOutcome::Clean {
            self.outcome = BroadcastOutcome::Interfered;
        }
    }
}
