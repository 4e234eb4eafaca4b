//! Running counters for the channel simulation
//!
//! Terminals keep their own protocol counters; the world keeps air-level
//! counters and folds both together for summaries.

use super::types::MessageKind;

/// Protocol outcomes observed by a single terminal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TerminalCounters {
    /// Own transmissions that were jammed or timed out (each one backs off)
    pub collisions: usize,
    /// Frames heard from other terminals
    pub frames_received: usize,
    /// DATA frames acknowledged by their receiver
    pub data_delivered: usize,
    /// DATA deliveries given up after the retry budget
    pub data_abandoned: usize,
    /// RTS frames given up after repeated CTS timeouts
    pub rts_abandoned: usize,
}

impl TerminalCounters {
    pub fn merge(&mut self, other: &TerminalCounters) {
        self.collisions += other.collisions;
        self.frames_received += other.frames_received;
        self.data_delivered += other.data_delivered;
        self.data_abandoned += other.data_abandoned;
        self.rts_abandoned += other.rts_abandoned;
    }
}

/// Air-level counters kept by the world
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimStats {
    pub rts_emitted: usize,
    pub cts_emitted: usize,
    pub data_emitted: usize,
    pub ack_emitted: usize,
    /// Clean frames handed to a terminal
    pub deliveries: usize,
    /// Pairs of broadcasts found overlapping
    pub overlaps: usize,
    /// Broadcasts that hit a terminal while it was transmitting
    pub receiver_collisions: usize,
    pub broadcasts_finished: usize,
    pub broadcasts_retired: usize,
}

impl SimStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_emitted(&mut self, kind: MessageKind) {
        match kind {
            MessageKind::Rts => self.rts_emitted += 1,
            MessageKind::Cts => self.cts_emitted += 1,
            MessageKind::Data => self.data_emitted += 1,
            MessageKind::Ack => self.ack_emitted += 1,
        }
    }

    pub fn emitted(&self, kind: MessageKind) -> usize {
        match kind {
            MessageKind::Rts => self.rts_emitted,
            MessageKind::Cts => self.cts_emitted,
            MessageKind::Data => self.data_emitted,
            MessageKind::Ack => self.ack_emitted,
        }
    }

    pub fn total_emitted(&self) -> usize {
        self.rts_emitted + self.cts_emitted + self.data_emitted + self.ack_emitted
    }

    /// Share of finished data exchanges that were acknowledged, as a percentage
    pub fn delivery_rate(totals: &TerminalCounters) -> f64 {
        let attempts = totals.data_delivered + totals.data_abandoned;
        if attempts == 0 {
            0.0
        } else {
            totals.data_delivered as f64 / attempts as f64 * 100.0
        }
    }
}
