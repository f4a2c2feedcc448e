use std::cell::RefCell;
use std::collections::VecDeque;
use std::f64::consts::TAU;
use std::rc::Rc;

use kurasync::backend::{OfflineBackend, OfflineRenderer};
use kurasync::clock::{normalize_phase, phase_distance, ClockSyncEngine, PhaseOscillator};
use kurasync::error::TransportError;
use kurasync::{AudioGraphController, ClockConfig, EngineConfig, ProcessContext, UserGesture};

const K: f64 = 2.0;
const OMEGA: f64 = TAU * 2.0;
const DT: f64 = 0.01;

fn config(index: u32) -> ClockConfig {
    ClockConfig::default()
        .with_local_index(index)
        .with_coupling(K)
        .with_frequency_hz(2.0)
}

fn max_spread(phases: &[f64]) -> f64 {
    let mut spread: f64 = 0.0;
    for (i, &a) in phases.iter().enumerate() {
        for &b in &phases[i + 1..] {
            spread = spread.max(phase_distance(a, b));
        }
    }
    spread
}

/// Synchronous update of a full network using the raw oscillator rule
fn simulate(initial: &[f64], ticks: usize) -> Vec<f64> {
    let n = initial.len() as f64;
    let mut oscillators: Vec<PhaseOscillator> = initial
        .iter()
        .enumerate()
        .map(|(i, &p)| PhaseOscillator::new(i as u32, p, OMEGA))
        .collect();

    for _ in 0..ticks {
        let snapshot = oscillators.clone();
        for osc in oscillators.iter_mut() {
            let sum: f64 = snapshot
                .iter()
                .filter(|o| o.peer_index() != osc.peer_index())
                .map(|o| osc.pull_from(o))
                .sum();
            osc.advance(K / n * sum, DT);
        }
    }
    oscillators.iter().map(PhaseOscillator::phase).collect()
}

#[test]
fn identical_oscillators_converge() {
    let cases: &[&[f64]] = &[
        &[0.0, 0.9, 2.1, 3.0, 4.0],
        &[0.3, 6.1, 3.3],
        &[0.0, 2.0, 4.0, 5.5],
        &[1.0, 4.0],
    ];

    for initial in cases {
        let before = max_spread(initial);
        let after = max_spread(&simulate(initial, 3000));
        assert!(after < 1e-9, "{initial:?}: spread {before} -> {after}");
    }
}

#[test]
fn single_oscillator_free_runs() {
    let mut engine = ClockSyncEngine::new(&config(0), DT);
    let mut broadcasts = Vec::new();

    let mut expected = 0.0;
    for _ in 0..500 {
        expected = normalize_phase(expected + OMEGA * DT);
        let phase = engine.tick(&mut |index: u32, phase: f64| broadcasts.push((index, phase)));
        assert_eq!(phase, expected);
    }

    assert_eq!(engine.ticks(), 500);
    assert_eq!(broadcasts.len(), 500);
    assert!(broadcasts.iter().all(|&(index, _)| index == 0));
}

#[test]
fn unobserved_peers_do_not_pull() {
    let mut engine = ClockSyncEngine::new(&config(0), DT);
    assert!(engine.add_peer(1));
    assert!(!engine.add_peer(1));
    assert_eq!(engine.peer_count(), 2);
    assert_eq!(engine.phase_of(1), None);

    assert_eq!(engine.coupling_term(), 0.0);
    assert_eq!(engine.step(DT), normalize_phase(OMEGA * DT));
}

#[test]
fn new_peer_starts_at_first_observation() {
    let mut engine = ClockSyncEngine::new(&config(0), DT);
    engine.observe(3, 2.5);
    assert_eq!(engine.phase_of(3), Some(2.5));
    assert_eq!(engine.peer_count(), 2);

    // K / N · sin(2.5 − 0)
    let expected = K / 2.0 * 2.5f64.sin();
    assert!((engine.coupling_term() - expected).abs() < 1e-12);

    engine.observe(3, TAU + 1.0);
    assert!((engine.phase_of(3).unwrap() - 1.0).abs() < 1e-12);
}

#[test]
fn local_reports_tick_and_remote_reports_observe() {
    let mut engine = ClockSyncEngine::new(&config(0), DT);
    let mut out = Vec::new();

    engine.receive(1, 0.5, &mut |i: u32, p: f64| out.push((i, p)));
    assert_eq!(engine.ticks(), 0);
    assert!(out.is_empty());

    engine.receive(0, 123.0, &mut |i: u32, p: f64| out.push((i, p)));
    assert_eq!(engine.ticks(), 1);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0], (0, engine.local_phase()));

    // the local oscillator is never overwritten by an observation
    let before = engine.local_phase();
    engine.observe(0, 3.0);
    assert_eq!(engine.local_phase(), before);
}

#[test]
fn peers_are_removed_explicitly() {
    let mut engine = ClockSyncEngine::new(&config(0), DT);
    engine.observe(1, 1.0);
    engine.observe(2, 2.0);

    assert!(engine.remove_peer(1).is_some());
    assert!(engine.remove_peer(1).is_none());
    assert!(engine.remove_peer(0).is_none());
    assert_eq!(engine.peer_count(), 2);
    assert!(engine.contains(0));
}

#[test]
fn engines_exchanging_phases_fall_into_step() {
    let mut engines: Vec<ClockSyncEngine> = (0..3).map(|i| ClockSyncEngine::new(&config(i), DT)).collect();

    // spread the starting phases by free-running each engine a different amount
    for (i, engine) in engines.iter_mut().enumerate() {
        for _ in 0..(i * 7) {
            engine.step(DT);
        }
    }
    let initial: Vec<f64> = engines.iter().map(ClockSyncEngine::local_phase).collect();
    assert!(max_spread(&initial) > 1.0);

    for _ in 0..3000 {
        let mut outbox = Vec::new();
        for engine in engines.iter_mut() {
            engine.tick(&mut |i: u32, p: f64| outbox.push((i, p)));
        }
        for &(from, phase) in &outbox {
            for engine in engines.iter_mut() {
                // observe() skips the sender's own engine
                engine.observe(from, phase);
            }
        }
    }

    let finals: Vec<f64> = engines.iter().map(ClockSyncEngine::local_phase).collect();
    assert!(max_spread(&finals) < 1e-6, "{initial:?} -> {finals:?}");
}

#[test]
fn non_finite_phases_are_dropped() {
    let mut engine = ClockSyncEngine::new(&config(0), DT);
    engine.observe(1, 1.0);

    for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        engine.observe(1, bad);
        engine.observe(2, bad);
        engine.receive(3, bad, &mut |_: u32, _: f64| {});
        engine.receive(0, bad, &mut |_: u32, _: f64| {});
    }
    assert_eq!(engine.phase_of(1), Some(1.0));
    assert_eq!(engine.peer_count(), 2);
    assert_eq!(engine.ticks(), 0);

    for _ in 0..100 {
        let phase = engine.tick(&mut |_: u32, _: f64| {});
        assert!(phase.is_finite() && (0.0..TAU).contains(&phase), "{phase}");
    }
}

#[test]
fn controller_ignores_non_finite_phases() {
    let (backend, mut renderer) = OfflineBackend::new(44_100, 1);
    let mut engine = AudioGraphController::new(EngineConfig::default(), backend);
    engine.init(UserGesture::new(), 2).unwrap();

    engine.on_peer_phase(1, f64::NAN);
    engine.send_clock_phase(f64::INFINITY, 0).unwrap();
    for _ in 0..10 {
        renderer.render_blocks(1);
        engine.pump();
    }

    assert_eq!(engine.clock().phase_of(1), None);
    assert_eq!(engine.clock().ticks(), 10);
    assert!(engine.clock().local_phase().is_finite());
    assert!(renderer.render_blocks(1).iter().all(|s| s.is_finite()));
}

#[test]
fn report_interval_does_not_change_clock_speed() {
    let blocks = 400;
    for interval in [1u32, 4, 5] {
        let config = EngineConfig::default().with_phase_report_interval(interval);
        let (backend, mut renderer) = OfflineBackend::new(config.sample_rate, 1);
        let mut engine = AudioGraphController::new(config, backend);
        engine.init(UserGesture::new(), 1).unwrap();

        for _ in 0..blocks {
            renderer.render_blocks(1);
            engine.pump();
        }

        let ticks = (blocks / interval) as u64;
        let period = ProcessContext::new(engine.config().sample_rate).block_period();
        let omega = engine.config().clock.angular_frequency();
        let expected = normalize_phase(omega * period * (ticks * interval as u64) as f64);

        assert_eq!(engine.clock().ticks(), ticks);
        let phase = engine.clock().local_phase();
        assert!((phase - expected).abs() < 1e-9, "interval {interval}: {phase} != {expected}");
    }
}

#[test]
fn local_ticks_are_pushed_back_to_the_processor() {
    let (backend, mut renderer) = OfflineBackend::new(44_100, 1);
    let mut engine = AudioGraphController::new(EngineConfig::default(), backend);
    engine.init(UserGesture::new(), 1).unwrap();
    engine.submit_program("", "phase").unwrap();

    for _ in 0..20 {
        engine.pump();
        let expected = engine.clock().local_phase();
        // the first sample of a block carries the phase adopted at its start
        let audio = renderer.render_blocks(1);
        assert_eq!(audio[0], expected as f32);
    }
    assert_eq!(engine.clock().ticks(), 19);
}

type Wire = Rc<RefCell<VecDeque<(u32, f64)>>>;

fn networked(index: u32, wire: &Wire) -> (AudioGraphController<OfflineBackend>, OfflineRenderer) {
    let config = EngineConfig::default().with_clock(ClockConfig::default().with_local_index(index).with_coupling(4.0));
    let (backend, renderer) = OfflineBackend::new(config.sample_rate, 1);

    let outbound = wire.clone();
    let transport = move |peer: u32, phase: f64| -> Result<(), TransportError> {
        outbound.borrow_mut().push_back((peer, phase));
        Ok(())
    };

    let mut engine = AudioGraphController::new(config, backend).with_transport(transport);
    engine.init(UserGesture::new(), 2).unwrap();
    (engine, renderer)
}

fn spread_of(peers: &[(AudioGraphController<OfflineBackend>, OfflineRenderer)]) -> f64 {
    let phases: Vec<f64> = peers.iter().map(|(e, _)| e.clock().local_phase()).collect();
    max_spread(&phases)
}

#[test]
fn controllers_fall_into_step_over_a_transport() {
    let wire: Wire = Rc::default();
    let mut peers = vec![networked(0, &wire), networked(1, &wire)];

    // peer 1 starts 400 blocks ahead
    {
        let (engine, renderer) = &mut peers[1];
        for _ in 0..400 {
            renderer.render_blocks(1);
            engine.pump();
        }
    }
    wire.borrow_mut().clear();
    let initial = spread_of(&peers);
    assert!(initial > 1.0, "{initial}");

    let mut broadcasts = [0usize; 2];
    let mut halfway = 0.0;
    for block in 0..3000 {
        for (engine, renderer) in peers.iter_mut() {
            renderer.render_blocks(1);
            engine.pump();
        }

        let messages: Vec<(u32, f64)> = wire.borrow_mut().drain(..).collect();
        for (from, phase) in messages {
            broadcasts[from as usize] += 1;
            for (engine, _) in peers.iter_mut() {
                if engine.clock().local_index() != from {
                    engine.on_peer_phase(from, phase);
                }
            }
        }

        if block == 1000 {
            halfway = spread_of(&peers);
        }
    }

    assert_eq!(broadcasts, [3000, 3000]);
    for (engine, _) in &peers {
        assert_eq!(engine.clock().peer_count(), 2);
    }

    let last = spread_of(&peers);
    assert!(halfway < initial, "{initial} -> {halfway}");
    assert!(last < 1e-3, "{initial} -> {halfway} -> {last}");
}
