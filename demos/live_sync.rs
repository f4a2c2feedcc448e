//! Three engines in one process, each behind its own offline backend,
//! exchanging clock phases over an in-memory transport.
//!
//! Run with `cargo run --example live_sync`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use kurasync::backend::{OfflineBackend, OfflineRenderer};
use kurasync::clock::phase_distance;
use kurasync::error::TransportError;
use kurasync::{init_tracing, AudioGraphController, ClockConfig, EngineConfig, LogConfig, UserGesture};

const PEERS: u32 = 3;

type Wire = Rc<RefCell<VecDeque<(u32, f64)>>>;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(&LogConfig {
        level: "info".into(),
    });

    let wire: Wire = Rc::default();
    let mut peers: Vec<(AudioGraphController<OfflineBackend>, OfflineRenderer)> = Vec::new();

    for index in 0..PEERS {
        let config = EngineConfig::default()
            .with_clock(ClockConfig::from_bpm(120.0, 4.0).with_local_index(index).with_coupling(4.0));
        let (backend, renderer) = OfflineBackend::new(48_000, 2);

        let outbound = wire.clone();
        let transport = move |peer: u32, phase: f64| -> Result<(), TransportError> {
            outbound.borrow_mut().push_back((peer, phase));
            Ok(())
        };

        let mut engine = AudioGraphController::new(config, backend).with_transport(transport);
        engine.init(UserGesture::new(), PEERS as usize)?;
        // a tone gated on the first half of every shared cycle
        engine.submit_program(format!("f = {}", 110 * (index + 1)), "out = sin(tau * f * t) * 0.1 * (square(phase) + 1) / 2")?;
        peers.push((engine, renderer));
    }

    // start the peers at different times so their clocks disagree
    for (i, (engine, renderer)) in peers.iter_mut().enumerate() {
        for _ in 0..(i * 400) {
            renderer.render_blocks(1);
            engine.pump();
        }
    }
    wire.borrow_mut().clear();

    for second in 0..=10 {
        // one second of audio, one block at a time
        for _ in 0..(48_000 / 64) {
            for (engine, renderer) in peers.iter_mut() {
                renderer.render_blocks(1);
                engine.pump();
            }
            let messages: Vec<(u32, f64)> = wire.borrow_mut().drain(..).collect();
            for (from, phase) in messages {
                for (engine, _) in peers.iter_mut() {
                    if engine.clock().local_index() != from {
                        engine.on_peer_phase(from, phase);
                    }
                }
            }
        }

        let phases: Vec<f64> = peers.iter().map(|(e, _)| e.clock().local_phase()).collect();
        let spread = phases
            .iter()
            .flat_map(|&a| phases.iter().map(move |&b| phase_distance(a, b)))
            .fold(0.0, f64::max);
        println!("t = {second:>2}s  phases = {phases:.3?}  spread = {spread:.6}");
    }

    for (engine, _) in peers.iter_mut() {
        engine.stop_and_release()?;
    }
    Ok(())
}
