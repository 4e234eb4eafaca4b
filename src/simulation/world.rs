//! Main simulation world that ties everything together
//!
//! The world owns every terminal and every broadcast. Each tick it grows the
//! broadcasts, resolves overlaps and arrivals against a consistent snapshot,
//! then lets the terminals decide whether to transmit.

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeMap, BTreeSet};

use super::broadcast::{Broadcast, BroadcastState};
use super::config::{validate_range, SimConfig};
use super::error::ConfigurationError;
use super::geometry::Vector2D;
use super::stats::{SimStats, TerminalCounters};
use super::terminal::{ChannelBusyProbe, NeighborsInRangeProbe, Terminal};
use super::types::{BroadcastId, MessageId, SimId, TerminalId};

/// Read-only view of the medium handed to terminals while they tick
struct ChannelView<'a> {
    broadcasts: &'a BTreeMap<BroadcastId, Broadcast>,
    positions: &'a [(TerminalId, Vector2D)],
}

impl ChannelBusyProbe for ChannelView<'_> {
    fn channel_busy(&self, terminal: &Terminal) -> bool {
        self.broadcasts
            .values()
            .any(|b| b.is_active() && b.source() != terminal.id() && b.reaches(terminal))
    }
}

impl NeighborsInRangeProbe for ChannelView<'_> {
    fn neighbors_in_range(&self, terminal: &Terminal) -> Vec<TerminalId> {
        neighbors_within(terminal, self.positions)
    }
}

fn neighbors_within(terminal: &Terminal, positions: &[(TerminalId, Vector2D)]) -> Vec<TerminalId> {
    let origin = terminal.position();
    positions
        .iter()
        .filter(|(id, _)| *id != terminal.id())
        .filter(|(_, position)| {
            terminal
                .range()
                .is_none_or(|range| origin.distance(position) <= range)
        })
        .map(|(id, _)| *id)
        .collect()
}

/// The main simulation world
pub struct SimWorld {
    /// Parameters every terminal is created with
    pub config: SimConfig,

    /// All terminals
    terminals: BTreeMap<TerminalId, Terminal>,

    /// All broadcasts still on the air or inside their retention window
    broadcasts: BTreeMap<BroadcastId, Broadcast>,

    /// Next ID to assign
    next_id: usize,

    /// Simulation time in milliseconds
    pub time: f64,

    /// Source of every random draw in the simulation
    rng: StdRng,

    pub stats: SimStats,
}

impl Default for SimWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl SimWorld {
    fn new_internal(config: SimConfig, rng: StdRng) -> Self {
        Self {
            config,
            terminals: BTreeMap::new(),
            broadcasts: BTreeMap::new(),
            next_id: 0,
            time: 0.0,
            rng,
            stats: SimStats::new(),
        }
    }

    pub fn new() -> Self {
        Self::new_internal(SimConfig::default(), StdRng::from_os_rng())
    }

    /// Create a new SimWorld with a seeded RNG for reproducible simulations
    pub fn new_with_seed(seed: u64) -> Self {
        Self::new_internal(SimConfig::default(), StdRng::seed_from_u64(seed))
    }

    /// Create a world with custom parameters. Without a seed the RNG is seeded from the OS.
    pub fn with_config(config: SimConfig, seed: Option<u64>) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Ok(Self::new_internal(config, rng))
    }

    fn next_sim_id(&mut self) -> SimId {
        let id = SimId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Add a terminal at `position`. Without a range every other terminal counts as a neighbour.
    pub fn add_terminal(
        &mut self,
        position: Vector2D,
        range: Option<f64>,
    ) -> Result<TerminalId, ConfigurationError> {
        validate_range(range)?;
        let id = TerminalId(self.next_sim_id());
        let terminal = Terminal::new(id, position, range, self.config, &mut self.rng)?;
        self.terminals.insert(id, terminal);
        Ok(id)
    }

    /// Remove a terminal. Its broadcasts keep propagating until they finish.
    pub fn remove_terminal(&mut self, id: TerminalId) -> Option<Terminal> {
        self.terminals.remove(&id)
    }

    pub fn terminal(&self, id: TerminalId) -> Option<&Terminal> {
        self.terminals.get(&id)
    }

    pub fn terminals(&self) -> impl Iterator<Item = &Terminal> + '_ {
        self.terminals.values()
    }

    pub fn terminal_count(&self) -> usize {
        self.terminals.len()
    }

    pub fn broadcast(&self, id: BroadcastId) -> Option<&Broadcast> {
        self.broadcasts.get(&id)
    }

    pub fn broadcasts(&self) -> impl Iterator<Item = &Broadcast> + '_ {
        self.broadcasts.values()
    }

    pub fn broadcast_count(&self) -> usize {
        self.broadcasts.len()
    }

    /// Queue an RTS from `from` to `to` outside the Poisson schedule
    pub fn request_to_send(
        &mut self,
        from: TerminalId,
        to: TerminalId,
    ) -> Result<MessageId, ConfigurationError> {
        if !self.terminals.contains_key(&to) {
            return Err(ConfigurationError::UnknownTerminal(to));
        }
        let terminal = self
            .terminals
            .get_mut(&from)
            .ok_or(ConfigurationError::UnknownTerminal(from))?;
        Ok(terminal.request_to_send(to))
    }

    /// Terminals `id` may address
    pub fn neighbors_of(&self, id: TerminalId) -> Vec<TerminalId> {
        let Some(terminal) = self.terminals.get(&id) else {
            return Vec::new();
        };
        let positions = self.terminal_positions();
        neighbors_within(terminal, &positions)
    }

    /// Protocol counters summed over all terminals
    pub fn totals(&self) -> TerminalCounters {
        let mut totals = TerminalCounters::default();
        for terminal in self.terminals.values() {
            totals.merge(terminal.counters());
        }
        totals
    }

    /// Main simulation tick, `delta` in milliseconds
    pub fn tick(&mut self, delta: f64) {
        self.time += delta;

        // Grow broadcasts; those that finish free their source's slot
        let finished = self.update_broadcasts(delta);
        self.settle_finished(&finished);

        // Broadcasts that finished this tick were still on the air during it
        let fresh: BTreeSet<BroadcastId> = finished.into_iter().collect();
        let live: Vec<BroadcastId> = self
            .broadcasts
            .values()
            .filter(|b| b.is_active() || fresh.contains(&b.id()))
            .map(|b| b.id())
            .collect();

        self.resolve_overlaps(&live);
        self.resolve_arrivals(&live);

        // Terminals decide whether to transmit
        self.update_terminals(delta);

        self.retire_broadcasts();
    }

    fn update_broadcasts(&mut self, delta: f64) -> Vec<BroadcastId> {
        let mut finished: Vec<BroadcastId> = Vec::new();
        for broadcast in self.broadcasts.values_mut() {
            broadcast.tick(delta, &mut finished);
        }
        finished
    }

    fn settle_finished(&mut self, finished: &[BroadcastId]) {
        for &id in finished {
            self.stats.broadcasts_finished += 1;
            if let Some(broadcast) = self.broadcasts.get(&id) {
                debug!("{} {} finished ({:?})", broadcast.kind(), id, broadcast.outcome());
            }
            if let Some(terminal) = self.terminals.get_mut(&id.source) {
                terminal.broadcast_finished(id);
            }
        }
    }

    /// Every overlapping pair spoils both broadcasts. A source still
    /// transmitting the spoiled broadcast gets jammed.
    fn resolve_overlaps(&mut self, live: &[BroadcastId]) {
        let mut overlaps: Vec<(BroadcastId, BroadcastId)> = Vec::new();
        for (i, a) in live.iter().enumerate() {
            for b in &live[i + 1..] {
                if let (Some(first), Some(second)) = (self.broadcasts.get(a), self.broadcasts.get(b)) {
                    if first.collides_with(second) {
                        overlaps.push((*a, *b));
                    }
                }
            }
        }

        for (a, b) in overlaps {
            let a_spoiled = self
                .broadcasts
                .get_mut(&a)
                .is_some_and(|broadcast| broadcast.mark_interfered_by(b));
            let b_spoiled = self
                .broadcasts
                .get_mut(&b)
                .is_some_and(|broadcast| broadcast.mark_interfered_by(a));

            if a_spoiled || b_spoiled {
                self.stats.overlaps += 1;
                debug!("{} and {} overlap", a, b);
            }
            if a_spoiled {
                self.jam_source(a, b);
            }
            if b_spoiled {
                self.jam_source(b, a);
            }
        }
    }

    fn jam_source(&mut self, own: BroadcastId, peer: BroadcastId) {
        let Some(terminal) = self.terminals.get_mut(&own.source) else {
            return;
        };
        if terminal.current_broadcast() != Some(own) {
            return;
        }
        if let Some(jammed) = terminal.interfere(peer, &mut self.rng) {
            if let Some(broadcast) = self.broadcasts.get_mut(&jammed) {
                broadcast.jam();
            }
        }
    }

    /// Collide broadcasts with the busy terminals they now cover, then hand
    /// whatever is still clean to the remaining terminals. All jams land
    /// before any delivery, so a frame spoiled in this pass is never heard.
    fn resolve_arrivals(&mut self, live: &[BroadcastId]) {
        let terminal_ids: Vec<TerminalId> = self.terminals.keys().copied().collect();

        // Receiver-side collisions
        for id in live {
            for terminal_id in &terminal_ids {
                let (Some(broadcast), Some(terminal)) =
                    (self.broadcasts.get_mut(id), self.terminals.get_mut(terminal_id))
                else {
                    continue;
                };
                if !Self::is_new_arrival(broadcast, *terminal_id, terminal)
                    || !broadcast.conflicts_at(terminal)
                {
                    continue;
                }

                let Some(own) = broadcast.mark_interfered_at(terminal, &mut self.rng) else {
                    continue;
                };
                self.stats.receiver_collisions += 1;
                debug!("{} collides with {} at {}", id, own, terminal_id);
                if let Some(jammed) = self.broadcasts.get_mut(&own) {
                    jammed.jam();
                }
            }
        }

        // Deliveries
        for id in live {
            for terminal_id in &terminal_ids {
                let (Some(broadcast), Some(terminal)) =
                    (self.broadcasts.get_mut(id), self.terminals.get_mut(terminal_id))
                else {
                    continue;
                };
                if !Self::is_new_arrival(broadcast, *terminal_id, terminal) || !broadcast.is_clean()
                {
                    continue;
                }
                if broadcast.deliver_to(terminal) {
                    self.stats.deliveries += 1;
                    debug!("{} {} delivered to {}", broadcast.kind(), id, terminal_id);
                }
            }
        }
    }

    fn is_new_arrival(broadcast: &Broadcast, terminal_id: TerminalId, terminal: &Terminal) -> bool {
        broadcast.source() != terminal_id
            && broadcast.reaches(terminal)
            && !broadcast.was_delivered_to(terminal_id)
            && !broadcast.was_interfered_at(terminal_id)
    }

    fn update_terminals(&mut self, delta: f64) {
        let positions = self.terminal_positions();
        let mut emitted: Vec<Broadcast> = Vec::new();

        let view = ChannelView {
            broadcasts: &self.broadcasts,
            positions: &positions,
        };
        for terminal in self.terminals.values_mut() {
            terminal.tick(delta, &view, &mut emitted, &mut self.rng);
        }

        // New broadcasts join only after every terminal has looked at the channel
        for broadcast in emitted {
            self.stats.record_emitted(broadcast.kind());
            self.broadcasts.insert(broadcast.id(), broadcast);
        }
    }

    fn retire_broadcasts(&mut self) {
        let retention = self.config.retention;
        let before = self.broadcasts.len();
        self.broadcasts
            .retain(|_, b| b.state() != BroadcastState::Finished || b.finished_for() < retention);
        self.stats.broadcasts_retired += before - self.broadcasts.len();
    }

    fn terminal_positions(&self) -> Vec<(TerminalId, Vector2D)> {
        self.terminals
            .values()
            .map(|t| (t.id(), t.position()))
            .collect()
    }

    /// Create the default demo world
    pub fn create_demo_world() -> Self {
        Self::build_demo_world(SimWorld::new())
    }

    /// Create the default demo world with a seeded RNG for reproducible simulations
    pub fn create_demo_world_with_seed(seed: u64) -> Self {
        Self::build_demo_world(SimWorld::new_with_seed(seed))
    }

    /// Internal helper to lay out the demo terminals
    pub fn build_demo_world(mut world: SimWorld) -> Self {
        let range = Some(world.config.max_radius);

        // A hidden-terminal line: the two ends only hear the middle
        let line = [
            Vector2D::new(0.0, 0.0),
            Vector2D::new(100.0, 0.0),
            Vector2D::new(200.0, 0.0),
        ];

        // A tight cluster where everyone hears everyone
        let cluster = [
            Vector2D::new(60.0, 220.0),
            Vector2D::new(140.0, 220.0),
            Vector2D::new(100.0, 260.0),
            Vector2D::new(100.0, 190.0),
        ];

        for position in line.into_iter().chain(cluster) {
            if let Err(e) = world.add_terminal(position, range) {
                warn!("demo terminal at ({}, {}) skipped: {}", position.x, position.y, e);
            }
        }

        world
    }

    /// Log a summary of the world state
    pub fn log_summary(&self) {
        info!("=== Channel Simulation Summary ===");
        info!("Time: {:.0}ms", self.time);
        info!(
            "Terminals: {}, Broadcasts on record: {}",
            self.terminals.len(),
            self.broadcasts.len()
        );

        for terminal in self.terminals.values() {
            let counters = terminal.counters();
            info!(
                "  {} at ({:.0}, {:.0}): {:?}, backoff={}, delivered={}, abandoned={}, heard={}",
                terminal.id(),
                terminal.position().x,
                terminal.position().y,
                terminal.state(),
                terminal.collision_count(),
                counters.data_delivered,
                counters.data_abandoned,
                counters.frames_received
            );
        }

        let active = self.broadcasts.values().filter(|b| b.is_active()).count();
        info!(
            "On air: {} (RTS {}, CTS {}, DATA {}, ACK {} emitted so far)",
            active,
            self.stats.rts_emitted,
            self.stats.cts_emitted,
            self.stats.data_emitted,
            self.stats.ack_emitted
        );
    }
}
