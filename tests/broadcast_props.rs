//! Property-based tests for signal propagation and channel access.
//!
//! Uses proptest to drive broadcasts and whole worlds through random
//! operation sequences, then checks the invariants that must always hold.

use std::collections::BTreeMap;

use csma_sim::simulation::{
    Broadcast, BroadcastFinishedSink, BroadcastId, ChannelBusyProbe, Message, MessageId,
    MessageKind, NeighborsInRangeProbe, SimConfig, SimId, SimWorld, Terminal, TerminalId,
    Vector2D, MAX_BACKOFF_EXPONENT,
};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

// ===========================================================================
// Generators
// ===========================================================================

fn terminal_id(n: usize) -> TerminalId {
    TerminalId(SimId(n))
}

fn rts_broadcast(growth_rate: f64, max_radius: f64) -> Broadcast {
    let source = terminal_id(0);
    let message = Message {
        id: MessageId { origin: source, seq: 0 },
        kind: MessageKind::Rts,
        source,
        destination: Some(terminal_id(1)),
        acknowledges: None,
        reservation: None,
        payload: Vec::new(),
    };
    Broadcast::new(
        BroadcastId { source, seq: 0 },
        message,
        Vector2D::default(),
        growth_rate,
        max_radius,
    )
    .unwrap()
}

#[derive(Debug, Clone)]
enum SignalOp {
    Tick(f64),
    Interfere(u32),
    Jam,
    Finish,
}

fn arb_signal_ops(max_ops: usize) -> impl Strategy<Value = Vec<SignalOp>> {
    proptest::collection::vec(
        prop_oneof![
            4 => (0.0..500.0f64).prop_map(SignalOp::Tick),
            1 => (0..8u32).prop_map(SignalOp::Interfere),
            1 => Just(SignalOp::Jam),
            1 => Just(SignalOp::Finish),
        ],
        1..=max_ops,
    )
}

fn manual_config() -> SimConfig {
    SimConfig {
        rts_rate: 0.0,
        max_radius: 150.0,
        ..SimConfig::default()
    }
}

#[derive(Default)]
struct CountingSink(usize);

impl BroadcastFinishedSink for CountingSink {
    fn broadcast_finished(&mut self, _broadcast: &Broadcast) {
        self.0 += 1;
    }
}

struct IdleChannel;

impl ChannelBusyProbe for IdleChannel {
    fn channel_busy(&self, _terminal: &Terminal) -> bool {
        false
    }
}

impl NeighborsInRangeProbe for IdleChannel {
    fn neighbors_in_range(&self, _terminal: &Terminal) -> Vec<TerminalId> {
        Vec::new()
    }
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// State only moves forward, the radius never shrinks or passes the
    /// ceiling, and the finish notification fires at most once.
    #[test]
    fn signal_lifecycle_is_monotone(
        growth_rate in 0.1..50.0f64,
        max_radius in 1.0..300.0f64,
        ops in arb_signal_ops(40),
    ) {
        let mut broadcast = rts_broadcast(growth_rate, max_radius);
        let mut sink = CountingSink::default();
        let mut state = broadcast.state();
        let mut radius = broadcast.circle().radius;

        for op in ops {
            match op {
                SignalOp::Tick(delta) => broadcast.tick(delta, &mut sink),
                SignalOp::Interfere(peer) => {
                    broadcast.mark_interfered_by(BroadcastId { source: terminal_id(9), seq: peer });
                }
                SignalOp::Jam => broadcast.jam(),
                SignalOp::Finish => broadcast.finish(&mut sink),
            }

            prop_assert!(broadcast.state() >= state);
            prop_assert!(broadcast.circle().radius >= radius);
            prop_assert!(broadcast.circle().radius <= max_radius);
            prop_assert!(sink.0 <= 1);
            state = broadcast.state();
            radius = broadcast.circle().radius;
        }

        prop_assert_eq!(sink.0 == 1, !broadcast.is_active());
    }

    /// Backoff after n collisions stays inside [0, 2^min(n, 10) * unit)
    #[test]
    fn backoff_stays_in_window(
        seed in any::<u64>(),
        collisions in 1..16u32,
        backoff_unit in 1.0..500.0f64,
    ) {
        let config = SimConfig { backoff_unit, ..manual_config() };
        let mut rng = StdRng::seed_from_u64(seed);
        let mut terminal =
            Terminal::new(terminal_id(0), Vector2D::default(), None, config, &mut rng).unwrap();
        let mut emitted: Vec<Broadcast> = Vec::new();
        terminal.request_to_send(terminal_id(1));

        for n in 1..=collisions {
            // Wait out any previous backoff so the retry is on the air
            let wait = terminal.backoff_delay() + 1.0;
            terminal.tick(wait, &IdleChannel, &mut emitted, &mut rng);
            let own = terminal.current_broadcast().unwrap();

            let peer = BroadcastId { source: terminal_id(5), seq: n };
            prop_assert_eq!(terminal.interfere(peer, &mut rng), Some(own));
            prop_assert_eq!(terminal.collision_count(), n);

            let window = 2f64.powi(n.min(MAX_BACKOFF_EXPONENT) as i32) * backoff_unit;
            prop_assert!(terminal.backoff_delay() >= 0.0);
            prop_assert!(terminal.backoff_delay() < window);

            terminal.broadcast_finished(own);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Terminals further apart than two ceiling radii never interfere
    #[test]
    fn distant_terminals_never_overlap(
        seed in any::<u64>(),
        count in 2..6usize,
        gap in 0.0..200.0f64,
        rts_rate in 0.0005..0.005f64,
    ) {
        let config = SimConfig { rts_rate, ..manual_config() };
        let spacing = 2.0 * config.max_radius + 1.0 + gap;
        let mut world = SimWorld::with_config(config, Some(seed)).unwrap();
        for i in 0..count {
            // No range, so each terminal still finds someone to address
            world.add_terminal(Vector2D::new(i as f64 * spacing, 0.0), None).unwrap();
        }

        for _ in 0..1000 {
            world.tick(16.0);
        }

        prop_assert!(world.stats.rts_emitted > 0);
        prop_assert_eq!(world.stats.overlaps, 0);
        prop_assert_eq!(world.stats.receiver_collisions, 0);
        prop_assert_eq!(world.stats.deliveries, 0);
    }

    /// No terminal ever has two broadcasts on the air at once
    #[test]
    fn one_active_broadcast_per_source(
        seed in any::<u64>(),
        positions in proptest::collection::vec((0.0..250.0f64, 0.0..250.0f64), 2..7),
        rts_rate in 0.001..0.01f64,
    ) {
        let config = SimConfig { rts_rate, ..manual_config() };
        let mut world = SimWorld::with_config(config, Some(seed)).unwrap();
        for (x, y) in positions {
            world.add_terminal(Vector2D::new(x, y), Some(200.0)).unwrap();
        }

        for _ in 0..400 {
            world.tick(16.0);

            let mut active: BTreeMap<TerminalId, usize> = BTreeMap::new();
            for broadcast in world.broadcasts().filter(|b| b.is_active()) {
                *active.entry(broadcast.source()).or_default() += 1;
            }
            prop_assert!(active.values().all(|&n| n <= 1));

            for terminal in world.terminals() {
                if let Some(current) = terminal.current_broadcast() {
                    prop_assert!(world.broadcast(current).is_some_and(|b| b.is_active()));
                }
            }
        }
    }
}
