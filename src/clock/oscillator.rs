//! A single peer's clock phase.

use core::f64::consts::TAU;

/// Wrap a phase into `[0, 2π)`.
#[inline]
pub fn normalize_phase(phase: f64) -> f64 {
    let wrapped = phase.rem_euclid(TAU);
    // rem_euclid can round up to exactly TAU for tiny negative inputs
    if wrapped >= TAU {
        0.0
    } else {
        wrapped
    }
}

/// Shortest angular distance between two phases, in `[0, π]`.
#[inline]
pub fn phase_distance(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(TAU);
    d.min(TAU - d)
}

/// Kuramoto oscillator for one peer.
///
/// The phase is normalized into `[0, 2π)` on construction and after every
/// update.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhaseOscillator {
    phase: f64,
    natural_frequency: f64,
    peer_index: u32,
    observed: bool,
}

impl PhaseOscillator {
    /// An oscillator seeded from an observed phase
    pub fn new(peer_index: u32, phase: f64, natural_frequency: f64) -> Self {
        Self {
            phase: normalize_phase(phase),
            natural_frequency,
            peer_index,
            observed: true,
        }
    }

    /// A known peer that has not reported a phase yet. It contributes nothing
    /// to the coupling sum until [`observe`](Self::observe) is called.
    pub fn unobserved(peer_index: u32, natural_frequency: f64) -> Self {
        Self {
            phase: 0.0,
            natural_frequency,
            peer_index,
            observed: false,
        }
    }

    #[inline]
    pub fn phase(&self) -> f64 {
        self.phase
    }

    /// Angular frequency ω in radians per second
    #[inline]
    pub fn natural_frequency(&self) -> f64 {
        self.natural_frequency
    }

    #[inline]
    pub fn peer_index(&self) -> u32 {
        self.peer_index
    }

    #[inline]
    pub fn is_observed(&self) -> bool {
        self.observed
    }

    /// Replace the phase with a received observation (no interpolation).
    pub fn observe(&mut self, phase: f64) {
        self.phase = normalize_phase(phase);
        self.observed = true;
    }

    /// `sin(θ_other − θ_self)`, or 0 for an unobserved peer
    #[inline]
    pub fn pull_from(&self, other: &PhaseOscillator) -> f64 {
        if other.observed {
            (other.phase - self.phase).sin()
        } else {
            0.0
        }
    }

    /// θ ← normalize(θ + (ω + coupling) · dt). Returns the new phase.
    #[inline]
    pub fn advance(&mut self, coupling: f64, dt: f64) -> f64 {
        self.phase = normalize_phase(self.phase + (self.natural_frequency + coupling) * dt);
        self.phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_stays_in_range() {
        for &p in &[-1e-17, -TAU, -0.5, 0.0, TAU, 3.0 * TAU + 0.25, 1e6] {
            let n = normalize_phase(p);
            assert!((0.0..TAU).contains(&n), "{p} -> {n}");
        }
        assert!((normalize_phase(TAU + 0.25) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn distance_wraps_around() {
        assert!((phase_distance(0.1, TAU - 0.1) - 0.2).abs() < 1e-12);
        assert!(phase_distance(1.0, 1.0) < 1e-15);
    }

    #[test]
    fn unobserved_peers_do_not_pull() {
        let me = PhaseOscillator::new(0, 1.0, 1.0);
        let ghost = PhaseOscillator::unobserved(1, 1.0);
        assert_eq!(me.pull_from(&ghost), 0.0);
    }
}
