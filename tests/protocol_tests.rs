//! Handshake scenarios on a three-terminal line
//!
//! A(0,0), B(100,0) and C(200,0), each with a range of 150. A and C are hidden
//! from each other; B hears both. Signals grow 1.6 units per 16ms tick and
//! stop at 150, so reaching a neighbour takes 63 ticks and a full
//! transmission takes 95.

use csma_sim::simulation::{
    BroadcastState, MessageKind, SimConfig, SimWorld, TerminalId, TerminalState, Vector2D,
};

const DELTA: f64 = 16.0;

fn line_config() -> SimConfig {
    SimConfig {
        rts_rate: 0.0,
        growth_rate: 10.0,
        max_radius: 150.0,
        ..SimConfig::default()
    }
}

fn line_world(config: SimConfig) -> (SimWorld, TerminalId, TerminalId, TerminalId) {
    let mut world = SimWorld::with_config(config, Some(1)).unwrap();
    let a = world.add_terminal(Vector2D::new(0.0, 0.0), Some(150.0)).unwrap();
    let b = world.add_terminal(Vector2D::new(100.0, 0.0), Some(150.0)).unwrap();
    let c = world.add_terminal(Vector2D::new(200.0, 0.0), Some(150.0)).unwrap();
    (world, a, b, c)
}

fn run(world: &mut SimWorld, ticks: usize) {
    for _ in 0..ticks {
        world.tick(DELTA);
    }
}

/// Tick until `done` holds, failing after `limit` ticks
fn run_until(world: &mut SimWorld, limit: usize, done: impl Fn(&SimWorld) -> bool) {
    for _ in 0..limit {
        if done(world) {
            return;
        }
        world.tick(DELTA);
    }
    assert!(done(world), "condition not reached within {} ticks", limit);
}

#[test]
fn test_line_topology() {
    let (world, a, b, c) = line_world(line_config());
    assert_eq!(world.neighbors_of(a), vec![b]);
    assert_eq!(world.neighbors_of(b), vec![a, c]);
    assert_eq!(world.neighbors_of(c), vec![b]);
}

#[test]
fn test_full_handshake_delivers_data() {
    let (mut world, a, b, _c) = line_world(line_config());
    world.request_to_send(a, b).unwrap();

    run(&mut world, 500);

    let sender = world.terminal(a).unwrap();
    assert_eq!(sender.counters().data_delivered, 1);
    assert_eq!(sender.state(), TerminalState::Idle);
    assert_eq!(world.terminal(b).unwrap().state(), TerminalState::Idle);

    for kind in [MessageKind::Rts, MessageKind::Cts, MessageKind::Data, MessageKind::Ack] {
        assert_eq!(world.stats.emitted(kind), 1, "{} emitted more than once", kind);
    }
    assert_eq!(world.totals().collisions, 0);
    assert_eq!(world.stats.overlaps, 0);

    // RTS and DATA reach B; CTS and ACK reach both A and C
    assert_eq!(world.stats.deliveries, 6);
    assert_eq!(world.terminal(b).unwrap().counters().frames_received, 2);
}

#[test]
fn test_simultaneous_hidden_rts_collide_at_receiver() {
    let (mut world, a, b, c) = line_world(line_config());
    world.request_to_send(a, b).unwrap();
    world.request_to_send(c, b).unwrap();

    // The two RTS circles meet right on top of B
    run(&mut world, 80);

    assert_eq!(world.stats.overlaps, 1);
    for id in [a, c] {
        let terminal = world.terminal(id).unwrap();
        assert_eq!(terminal.collision_count(), 1);
        let own = terminal.current_broadcast().unwrap();
        assert_eq!(world.broadcast(own).unwrap().state(), BroadcastState::Jammed);
    }
    assert_eq!(world.terminal(b).unwrap().counters().frames_received, 0);
    assert_eq!(world.stats.cts_emitted, 0);
}

#[test]
fn test_hidden_terminal_clobbers_cts() {
    let config = SimConfig {
        cts_timeout: 2000.0,
        ..line_config()
    };
    let (mut world, a, b, c) = line_world(config);
    world.request_to_send(a, b).unwrap();

    // C cannot hear A, so it starts its own RTS the moment B answers
    run_until(&mut world, 200, |w| w.stats.cts_emitted == 1);
    let cts = world.terminal(b).unwrap().current_broadcast().unwrap();
    world.request_to_send(c, b).unwrap();

    run(&mut world, 40);

    assert_eq!(world.broadcast(cts).unwrap().state(), BroadcastState::Jammed);
    assert_eq!(world.terminal(b).unwrap().collision_count(), 1);
    assert_eq!(world.terminal(c).unwrap().collision_count(), 1);

    // The CTS never reaches A, whose RTS times out
    run(&mut world, 100);
    let sender = world.terminal(a).unwrap();
    assert!(sender.counters().collisions >= 1);
    assert_eq!(sender.counters().data_delivered, 0);
}

#[test]
fn test_overheard_cts_silences_bystander() {
    let config = line_config();
    let (mut world, a, b, c) = line_world(config);
    world.request_to_send(a, b).unwrap();

    run_until(&mut world, 300, |w| w.terminal(c).unwrap().is_deferring());
    assert_eq!(world.terminal(c).unwrap().state(), TerminalState::Quiet);
    let quiet_since = world.time;
    world.request_to_send(c, b).unwrap();

    run_until(&mut world, 1000, |w| w.stats.rts_emitted == 2);
    let silent_for = world.time - quiet_since;
    assert!(
        silent_for >= config.quiet_timeout - DELTA,
        "C transmitted after only {}ms",
        silent_for
    );
    assert!(!world.terminal(c).unwrap().is_deferring());

    // The bystander's silence let A finish undisturbed
    assert_eq!(world.terminal(a).unwrap().counters().data_delivered, 1);
    assert_eq!(world.totals().collisions, 0);
}

#[test]
fn test_data_retries_exhaust_when_receiver_vanishes() {
    let config = line_config();
    let (mut world, a, b, _c) = line_world(config);
    world.request_to_send(a, b).unwrap();

    run_until(&mut world, 300, |w| w.terminal(a).unwrap().is_sending_data());
    world.remove_terminal(b);

    run(&mut world, 2000);

    let sender = world.terminal(a).unwrap();
    assert_eq!(sender.counters().data_abandoned, 1);
    assert_eq!(sender.counters().data_delivered, 0);
    assert!(!sender.is_sending_data());
    assert_eq!(sender.state(), TerminalState::Idle);
    assert_eq!(
        world.stats.data_emitted,
        1 + config.max_data_retries as usize
    );
}

#[test]
fn test_clear_to_send_resets_backoff() {
    let (mut world, a, b, c) = line_world(line_config());
    world.request_to_send(a, b).unwrap();
    world.request_to_send(c, b).unwrap();

    run(&mut world, 80);
    assert_eq!(world.terminal(a).unwrap().collision_count(), 1);

    // With its rival gone, A's retry goes through
    world.remove_terminal(c);
    run(&mut world, 600);

    let sender = world.terminal(a).unwrap();
    assert_eq!(sender.collision_count(), 0);
    assert_eq!(sender.counters().collisions, 1);
    assert_eq!(sender.counters().data_delivered, 1);
}

#[test]
fn test_request_between_unknown_terminals_is_rejected() {
    let (mut world, a, _b, c) = line_world(line_config());
    world.remove_terminal(c);
    assert!(world.request_to_send(a, c).is_err());
    assert!(world.request_to_send(c, a).is_err());
}
