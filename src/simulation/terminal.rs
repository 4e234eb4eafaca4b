//! Terminal logic for the channel simulation
//!
//! A terminal contends for the shared medium with an RTS/CTS/DATA/ACK
//! handshake. It never sees the world directly: channel state comes in through
//! the probe traits and new transmissions leave through a `BroadcastEmittedSink`.

use log::{debug, info, warn};
use rand::seq::IndexedRandom;
use rand::Rng;
use rand_distr::{Distribution, Exp};
use std::collections::{BTreeMap, VecDeque};

use super::broadcast::{Broadcast, Message};
use super::config::{validate_range, SimConfig};
use super::error::ConfigurationError;
use super::geometry::Vector2D;
use super::stats::TerminalCounters;
use super::types::{
    BroadcastId, MessageId, MessageKind, TerminalId, MAX_BACKOFF_EXPONENT, MAX_CATCH_UP_STEPS,
};

/// Answers whether the medium around a terminal is in use
pub trait ChannelBusyProbe {
    fn channel_busy(&self, terminal: &Terminal) -> bool;
}

/// Lists the terminals a terminal may address
pub trait NeighborsInRangeProbe {
    fn neighbors_in_range(&self, terminal: &Terminal) -> Vec<TerminalId>;
}

/// Accepts a broadcast the moment a terminal starts transmitting it
pub trait BroadcastEmittedSink {
    fn broadcast_emitted(&mut self, broadcast: Broadcast);
}

impl BroadcastEmittedSink for Vec<Broadcast> {
    fn broadcast_emitted(&mut self, broadcast: Broadcast) {
        self.push(broadcast);
    }
}

/// Handshake phase, derived from the terminal's bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    Idle,
    /// Sent an RTS, waiting for the CTS
    RtsPending,
    /// Answered an RTS, or holds DATA that has not gone out yet
    DataPending,
    /// DATA sent, waiting for the ACK
    AwaitingAck,
    /// Overheard a CTS meant for someone else
    Quiet,
}

/// The broadcast currently on the air for this terminal
#[derive(Debug, Clone)]
struct InFlight {
    broadcast: BroadcastId,
    message: Message,
    jammed: bool,
}

/// An RTS waiting for its CTS
#[derive(Debug, Clone)]
struct OutstandingRts {
    message: Message,
    /// Set once a clean copy has finished propagating
    sent: bool,
    waited: f64,
    retries: u32,
}

/// A DATA frame waiting for its ACK
#[derive(Debug, Clone)]
struct PendingData {
    message: Message,
    sent: bool,
    waited: f64,
    retries: u32,
}

/// A station on the shared channel
#[derive(Debug, Clone)]
pub struct Terminal {
    id: TerminalId,
    position: Vector2D,
    range: Option<f64>,
    config: SimConfig,

    /// CTS, DATA and ACK frames; always served before the RTS queue
    control_queue: VecDeque<Message>,
    rts_queue: VecDeque<Message>,
    outstanding_rts: BTreeMap<MessageId, OutstandingRts>,
    pending_data: Option<PendingData>,
    current: Option<InFlight>,

    /// Consecutive collisions, drives the backoff window
    collision_count: u32,

    next_rts_time: f64,
    rts_elapsed: f64,
    /// Remaining RTS deferral requested by a received reservation
    rts_hold: f64,

    next_send_delay: f64,
    send_elapsed: f64,

    deferring: bool,
    quiet_elapsed: f64,

    next_message_seq: u32,
    next_broadcast_seq: u32,
    counters: TerminalCounters,
}

impl Terminal {
    pub fn new<R: Rng + ?Sized>(
        id: TerminalId,
        position: Vector2D,
        range: Option<f64>,
        config: SimConfig,
        rng: &mut R,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        validate_range(range)?;

        let mut terminal = Self {
            id,
            position,
            range,
            config,
            control_queue: VecDeque::new(),
            rts_queue: VecDeque::new(),
            outstanding_rts: BTreeMap::new(),
            pending_data: None,
            current: None,
            collision_count: 0,
            next_rts_time: f64::INFINITY,
            rts_elapsed: 0.0,
            rts_hold: 0.0,
            next_send_delay: 0.0,
            send_elapsed: 0.0,
            deferring: false,
            quiet_elapsed: 0.0,
            next_message_seq: 0,
            next_broadcast_seq: 0,
            counters: TerminalCounters::default(),
        };
        terminal.next_rts_time = terminal.sample_rts_interval(rng);
        Ok(terminal)
    }

    pub fn id(&self) -> TerminalId {
        self.id
    }

    pub fn position(&self) -> Vector2D {
        self.position
    }

    pub fn range(&self) -> Option<f64> {
        self.range
    }

    pub fn is_deferring(&self) -> bool {
        self.deferring
    }

    pub fn collision_count(&self) -> u32 {
        self.collision_count
    }

    /// Wait imposed before the next transmission, measured from the last send or collision
    pub fn backoff_delay(&self) -> f64 {
        self.next_send_delay
    }

    pub fn counters(&self) -> &TerminalCounters {
        &self.counters
    }

    pub fn current_broadcast(&self) -> Option<BroadcastId> {
        self.current.as_ref().map(|c| c.broadcast)
    }

    pub fn is_sending_data(&self) -> bool {
        self.pending_data.is_some()
    }

    pub fn outstanding_rts(&self) -> impl Iterator<Item = MessageId> + '_ {
        self.outstanding_rts.keys().copied()
    }

    /// Frames waiting to be sent, in the order they will go out
    pub fn queued(&self) -> impl Iterator<Item = &Message> + '_ {
        self.control_queue.iter().chain(self.rts_queue.iter())
    }

    /// Has a broadcast on the air that has not been jammed
    pub fn is_transmitting(&self) -> bool {
        self.current.as_ref().is_some_and(|c| !c.jammed)
    }

    pub fn is_transmitting_other_than(&self, broadcast: BroadcastId) -> bool {
        self.current
            .as_ref()
            .is_some_and(|c| !c.jammed && c.broadcast != broadcast)
    }

    pub fn state(&self) -> TerminalState {
        if self.deferring {
            return TerminalState::Quiet;
        }
        if let Some(pending) = &self.pending_data {
            return if pending.sent {
                TerminalState::AwaitingAck
            } else {
                TerminalState::DataPending
            };
        }
        let answering = self
            .queued()
            .chain(self.current.iter().map(|c| &c.message))
            .any(|m| m.kind == MessageKind::Cts);
        if answering {
            return TerminalState::DataPending;
        }
        if !self.outstanding_rts.is_empty() {
            return TerminalState::RtsPending;
        }
        TerminalState::Idle
    }

    /// Advance the terminal by `delta` milliseconds
    pub fn tick<P, S, R>(&mut self, delta: f64, probe: &P, sink: &mut S, rng: &mut R)
    where
        P: ChannelBusyProbe + NeighborsInRangeProbe + ?Sized,
        S: BroadcastEmittedSink + ?Sized,
        R: Rng + ?Sized,
    {
        self.advance_rts_timer(delta, probe, rng);

        self.send_elapsed += delta;
        let channel_busy = probe.channel_busy(self);
        self.try_transmit(channel_busy, sink);

        self.watch_cts(delta, channel_busy, rng);
        self.watch_data(delta, channel_busy);
        self.watch_quiet(delta);
    }

    /// Queue an RTS to `destination` and start tracking it
    pub fn request_to_send(&mut self, destination: TerminalId) -> MessageId {
        let message = self.new_message(
            MessageKind::Rts,
            Some(destination),
            None,
            Some(self.config.reservation),
            Vec::new(),
        );
        let id = message.id;
        debug!("{} queues RTS {} to {}", self.id, id, destination);
        self.outstanding_rts.insert(
            id,
            OutstandingRts {
                message: message.clone(),
                sent: false,
                waited: 0.0,
                retries: 0,
            },
        );
        self.rts_queue.push_back(message);
        id
    }

    /// A frame from another terminal arrived clean
    pub fn receive(&mut self, message: &Message) {
        if message.source == self.id {
            return;
        }
        self.counters.frames_received += 1;

        let for_me = message.is_addressed_to(self.id);
        match message.kind {
            MessageKind::Rts if for_me => self.on_rts(message),
            MessageKind::Cts if for_me => self.on_cts(message),
            MessageKind::Cts => self.enter_quiet(message),
            MessageKind::Data if for_me => self.on_data(message),
            MessageKind::Ack if for_me => self.on_ack(message),
            _ => {}
        }
    }

    /// Something clobbered this terminal's own transmission. Returns the
    /// broadcast that must now be jammed.
    pub fn interfere<R: Rng + ?Sized>(
        &mut self,
        peer: BroadcastId,
        rng: &mut R,
    ) -> Option<BroadcastId> {
        let current = self.current.as_mut()?;
        if current.broadcast == peer || current.jammed {
            return None;
        }
        current.jammed = true;
        let jammed = current.broadcast;
        let message = current.message.clone();

        debug!(
            "{} jammed by {} while sending {} {}",
            self.id, peer, message.kind, message.id
        );

        if let Some(outstanding) = self.outstanding_rts.get_mut(&message.id) {
            outstanding.sent = false;
            outstanding.waited = 0.0;
        }
        if message.kind.uses_rts_queue() {
            self.rts_queue.push_front(message);
        } else {
            self.control_queue.push_front(message);
        }

        self.back_off(rng);
        Some(jammed)
    }

    /// One of this terminal's broadcasts stopped propagating
    pub fn broadcast_finished(&mut self, broadcast: BroadcastId) {
        let in_flight = match self.current.take() {
            Some(c) if c.broadcast == broadcast => c,
            other => {
                self.current = other;
                return;
            }
        };
        if in_flight.jammed {
            return;
        }

        self.send_elapsed = 0.0;
        self.next_send_delay = self.config.inter_frame_space;

        let id = in_flight.message.id;
        match in_flight.message.kind {
            MessageKind::Rts => {
                if let Some(outstanding) = self.outstanding_rts.get_mut(&id) {
                    outstanding.sent = true;
                    outstanding.waited = 0.0;
                }
            }
            MessageKind::Data => {
                if let Some(pending) = self.pending_data.as_mut().filter(|p| p.message.id == id) {
                    pending.sent = true;
                    pending.waited = 0.0;
                }
            }
            MessageKind::Cts | MessageKind::Ack => {}
        }
    }

    fn advance_rts_timer<P, R>(&mut self, delta: f64, probe: &P, rng: &mut R)
    where
        P: NeighborsInRangeProbe + ?Sized,
        R: Rng + ?Sized,
    {
        let mut step = delta;
        if self.rts_hold > 0.0 {
            let held = self.rts_hold.min(step);
            self.rts_hold -= held;
            step -= held;
        }
        self.rts_elapsed += step;

        let mut steps = 0;
        while self.rts_elapsed >= self.next_rts_time {
            self.rts_elapsed -= self.next_rts_time;
            self.next_rts_time = self.sample_rts_interval(rng);
            self.originate_rts(probe, rng);

            steps += 1;
            if steps >= MAX_CATCH_UP_STEPS {
                self.rts_elapsed = 0.0;
                break;
            }
        }
    }

    fn originate_rts<P, R>(&mut self, probe: &P, rng: &mut R)
    where
        P: NeighborsInRangeProbe + ?Sized,
        R: Rng + ?Sized,
    {
        // One exchange at a time
        if !self.rts_queue.is_empty()
            || !self.outstanding_rts.is_empty()
            || self.pending_data.is_some()
        {
            return;
        }

        let neighbors = probe.neighbors_in_range(self);
        match neighbors.choose(rng) {
            Some(&destination) => {
                self.request_to_send(destination);
            }
            None => warn!("{} has nobody in range to send to", self.id),
        }
    }

    fn try_transmit<S>(&mut self, channel_busy: bool, sink: &mut S)
    where
        S: BroadcastEmittedSink + ?Sized,
    {
        if self.current.is_some()
            || channel_busy
            || self.deferring
            || self.send_elapsed < self.next_send_delay
        {
            return;
        }

        let message = match self.control_queue.pop_front() {
            Some(m) => m,
            None => match self.rts_queue.pop_front() {
                Some(m) => m,
                None => return,
            },
        };
        self.emit(message, sink);
    }

    fn emit<S>(&mut self, message: Message, sink: &mut S)
    where
        S: BroadcastEmittedSink + ?Sized,
    {
        assert!(
            self.current.is_none(),
            "{} tried to start a second broadcast",
            self.id
        );

        let id = BroadcastId {
            source: self.id,
            seq: self.next_broadcast_seq,
        };
        self.next_broadcast_seq += 1;

        let broadcast = match Broadcast::new(
            id,
            message.clone(),
            self.position,
            self.config.growth_rate,
            self.config.max_radius,
        ) {
            Ok(b) => b,
            Err(e) => {
                warn!("{} dropped {} {}: {}", self.id, message.kind, message.id, e);
                return;
            }
        };

        debug!("{} emits {} {} as {}", self.id, message.kind, message.id, id);
        self.current = Some(InFlight {
            broadcast: id,
            message,
            jammed: false,
        });
        sink.broadcast_emitted(broadcast);
    }

    fn back_off<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.collision_count += 1;
        self.counters.collisions += 1;

        let window = 2f64.powi(self.collision_count.min(MAX_BACKOFF_EXPONENT) as i32);
        let delay = rng.random::<f64>() * window * self.config.backoff_unit;
        self.send_elapsed = 0.0;
        self.next_send_delay = delay;

        debug!(
            "{} backs off {:.1}ms after {} collision(s)",
            self.id, delay, self.collision_count
        );
    }

    fn watch_cts<R: Rng + ?Sized>(&mut self, delta: f64, channel_busy: bool, rng: &mut R) {
        if self.current.is_some() || channel_busy {
            return;
        }

        let timeout = self.config.cts_timeout;
        let expired: Vec<MessageId> = self
            .outstanding_rts
            .iter_mut()
            .filter(|(_, o)| o.sent)
            .filter_map(|(id, o)| {
                o.waited += delta;
                (o.waited >= timeout).then_some(*id)
            })
            .collect();

        for id in expired {
            let Some(outstanding) = self.outstanding_rts.get_mut(&id) else {
                continue;
            };
            if outstanding.retries < self.config.max_rts_retries {
                outstanding.retries += 1;
                outstanding.sent = false;
                outstanding.waited = 0.0;
                let message = outstanding.message.clone();
                debug!("{} got no CTS for {}, retrying", self.id, id);
                self.rts_queue.retain(|m| m.id != id);
                self.rts_queue.push_front(message);
                self.back_off(rng);
            } else {
                self.outstanding_rts.remove(&id);
                self.rts_queue.retain(|m| m.id != id);
                self.counters.rts_abandoned += 1;
                info!("{} gave up on RTS {}", self.id, id);
            }
        }
    }

    fn watch_data(&mut self, delta: f64, channel_busy: bool) {
        if self.current.is_some() || channel_busy {
            return;
        }
        let Some(pending) = self.pending_data.as_mut() else {
            return;
        };
        if !pending.sent {
            return;
        }

        pending.waited += delta;
        if pending.waited < self.config.ack_timeout {
            return;
        }
        pending.waited = 0.0;

        let id = pending.message.id;
        self.control_queue.retain(|m| m.id != id);
        if pending.retries < self.config.max_data_retries {
            pending.retries += 1;
            pending.sent = false;
            debug!(
                "{} got no ACK for {}, resend {}/{}",
                self.id, id, pending.retries, self.config.max_data_retries
            );
            self.control_queue.push_back(pending.message.clone());
        } else {
            self.pending_data = None;
            self.counters.data_abandoned += 1;
            info!("{} abandoned DATA {}", self.id, id);
        }
    }

    fn watch_quiet(&mut self, delta: f64) {
        if !self.deferring {
            return;
        }
        self.quiet_elapsed += delta;
        if self.quiet_elapsed >= self.config.quiet_timeout {
            self.deferring = false;
            self.quiet_elapsed = 0.0;
            debug!("{} leaves quiet mode", self.id);
        }
    }

    fn on_rts(&mut self, message: &Message) {
        if self.pending_data.is_some() {
            return;
        }

        self.rts_elapsed = 0.0;
        self.rts_hold = message.reservation.unwrap_or(0.0);

        let already_answering = self
            .control_queue
            .iter()
            .any(|m| m.kind == MessageKind::Cts && m.acknowledges == Some(message.id));
        if already_answering {
            return;
        }

        let reply = self.new_message(
            MessageKind::Cts,
            Some(message.source),
            Some(message.id),
            message.reservation,
            Vec::new(),
        );
        debug!("{} answers RTS {} with CTS {}", self.id, message.id, reply.id);
        self.control_queue.push_front(reply);
    }

    fn on_cts(&mut self, message: &Message) {
        self.collision_count = 0;

        let Some(rts) = message.acknowledges else {
            return;
        };
        if self.outstanding_rts.remove(&rts).is_none() {
            return;
        }
        self.rts_queue.retain(|m| m.id != rts);
        if self.pending_data.is_some() {
            return;
        }

        let payload: Vec<u8> = (0..self.config.data_size)
            .map(|i| (i as u32).wrapping_add(self.next_message_seq) as u8)
            .collect();
        let data = self.new_message(MessageKind::Data, Some(message.source), None, None, payload);
        debug!("{} cleared by {}, queues DATA {}", self.id, message.source, data.id);

        self.control_queue.push_back(data.clone());
        self.pending_data = Some(PendingData {
            message: data,
            sent: false,
            waited: 0.0,
            retries: 0,
        });
    }

    fn enter_quiet(&mut self, message: &Message) {
        debug!(
            "{} overheard CTS {} for {:?}, going quiet",
            self.id, message.id, message.destination
        );
        self.deferring = true;
        self.quiet_elapsed = 0.0;
    }

    fn on_data(&mut self, message: &Message) {
        let already_acking = self
            .control_queue
            .iter()
            .any(|m| m.kind == MessageKind::Ack && m.acknowledges == Some(message.id));
        if already_acking {
            return;
        }

        let ack = self.new_message(
            MessageKind::Ack,
            Some(message.source),
            Some(message.id),
            None,
            Vec::new(),
        );
        debug!("{} acknowledges DATA {} with {}", self.id, message.id, ack.id);
        self.control_queue.push_front(ack);
    }

    fn on_ack(&mut self, message: &Message) {
        self.collision_count = 0;
        self.deferring = false;
        self.quiet_elapsed = 0.0;

        let acknowledged = match &self.pending_data {
            Some(pending) => message.acknowledges == Some(pending.message.id),
            None => false,
        };
        if acknowledged {
            if let Some(pending) = self.pending_data.take() {
                let id = pending.message.id;
                self.control_queue.retain(|m| m.id != id);
                self.counters.data_delivered += 1;
                info!("{} delivered DATA {} to {}", self.id, id, message.source);
            }
        }
    }

    fn new_message(
        &mut self,
        kind: MessageKind,
        destination: Option<TerminalId>,
        acknowledges: Option<MessageId>,
        reservation: Option<f64>,
        payload: Vec<u8>,
    ) -> Message {
        let id = MessageId {
            origin: self.id,
            seq: self.next_message_seq,
        };
        self.next_message_seq += 1;
        Message {
            id,
            kind,
            source: self.id,
            destination,
            acknowledges,
            reservation,
            payload,
        }
    }

    /// Exponential inter-arrival time for the next RTS
    fn sample_rts_interval<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.config.rts_rate <= 0.0 {
            return f64::INFINITY;
        }
        match Exp::new(self.config.rts_rate) {
            Ok(exp) => exp.sample(rng),
            Err(_) => f64::INFINITY,
        }
    }
}
