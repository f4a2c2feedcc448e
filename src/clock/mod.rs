//! Peer clock synchronisation.

mod engine;
mod oscillator;

pub use engine::{ClockSyncEngine, PhaseBroadcast};
pub use oscillator::{normalize_phase, phase_distance, PhaseOscillator};
