//! Kuramoto clock synchronisation across peers.
//!
//! Every peer runs its own engine. The local oscillator is advanced once per
//! rendering block by
//!
//! ```text
//! θ_i ← θ_i + [ω_i + (K / N) · Σ_j sin(θ_j − θ_i)] · Δt
//! ```
//!
//! using the latest received phase of every remote peer, and the result is
//! handed to a [`PhaseBroadcast`] so it can reach the rendering context and
//! the network. With identical ω and K > 0 all peers drift into phase.

use hashbrown::HashMap;
use tracing::{debug, trace, warn};

use crate::clock::oscillator::PhaseOscillator;
use crate::config::ClockConfig;

/// Receiver of local phase updates produced by [`ClockSyncEngine::tick`].
pub trait PhaseBroadcast {
    fn broadcast(&mut self, peer_index: u32, phase: f64);
}

impl<F: FnMut(u32, f64)> PhaseBroadcast for F {
    #[inline]
    fn broadcast(&mut self, peer_index: u32, phase: f64) {
        self(peer_index, phase)
    }
}

/// Collection of oscillators (self plus every known peer) and the coupling step.
#[derive(Clone, Debug)]
pub struct ClockSyncEngine {
    local_index: u32,
    /// Coupling strength K
    coupling: f64,
    /// ω in radians per second, used for the local oscillator and new peers
    natural_frequency: f64,
    /// Δt of one tick, in seconds
    block_period: f64,
    oscillators: HashMap<u32, PhaseOscillator>,
    ticks: u64,
}

impl ClockSyncEngine {
    /// Create an engine holding only the local oscillator at phase 0.
    pub fn new(config: &ClockConfig, block_period: f64) -> Self {
        Self::with_capacity(config, block_period, 1)
    }

    /// Like [`new`](Self::new), reserving room for `peer_count` oscillators.
    pub fn with_capacity(config: &ClockConfig, block_period: f64, peer_count: usize) -> Self {
        let natural_frequency = config.angular_frequency();
        let mut oscillators = HashMap::with_capacity(peer_count.max(1));
        oscillators.insert(
            config.local_index,
            PhaseOscillator::new(config.local_index, 0.0, natural_frequency),
        );

        Self {
            local_index: config.local_index,
            coupling: config.coupling,
            natural_frequency,
            block_period,
            oscillators,
            ticks: 0,
        }
    }

    #[inline]
    pub fn local_index(&self) -> u32 {
        self.local_index
    }

    pub fn local_phase(&self) -> f64 {
        self.local().phase()
    }

    /// N: known oscillators, self included
    #[inline]
    pub fn peer_count(&self) -> usize {
        self.oscillators.len()
    }

    pub fn coupling(&self) -> f64 {
        self.coupling
    }

    pub fn set_coupling(&mut self, coupling: f64) {
        self.coupling = coupling;
    }

    pub fn block_period(&self) -> f64 {
        self.block_period
    }

    pub fn set_block_period(&mut self, block_period: f64) {
        self.block_period = block_period;
    }

    /// Local ticks taken so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn contains(&self, peer_index: u32) -> bool {
        self.oscillators.contains_key(&peer_index)
    }

    pub fn oscillator(&self, peer_index: u32) -> Option<&PhaseOscillator> {
        self.oscillators.get(&peer_index)
    }

    /// Last known phase of a peer, `None` if unknown or never observed
    pub fn phase_of(&self, peer_index: u32) -> Option<f64> {
        self.oscillators
            .get(&peer_index)
            .filter(|o| o.is_observed())
            .map(|o| o.phase())
    }

    pub fn oscillators(&self) -> impl Iterator<Item = &PhaseOscillator> + '_ {
        self.oscillators.values()
    }

    /// Register a peer before it reports. Returns false if it was already known.
    pub fn add_peer(&mut self, peer_index: u32) -> bool {
        if self.oscillators.contains_key(&peer_index) {
            return false;
        }
        self.oscillators.insert(
            peer_index,
            PhaseOscillator::unobserved(peer_index, self.natural_frequency),
        );
        debug!(peer_index, n = self.oscillators.len(), "peer added");
        true
    }

    /// Forget a peer. The local oscillator cannot be removed.
    pub fn remove_peer(&mut self, peer_index: u32) -> Option<PhaseOscillator> {
        if peer_index == self.local_index {
            warn!(peer_index, "refusing to remove the local oscillator");
            return None;
        }
        let removed = self.oscillators.remove(&peer_index);
        if removed.is_some() {
            debug!(peer_index, n = self.oscillators.len(), "peer removed");
        }
        removed
    }

    /// Record a remote peer's phase. A peer seen for the first time starts at
    /// exactly the received phase. Observations of the local index are ignored;
    /// the local phase only moves through [`step`](Self::step).
    pub fn observe(&mut self, peer_index: u32, phase: f64) {
        if peer_index == self.local_index {
            trace!(phase, "ignoring observation of the local index");
            return;
        }
        if !phase.is_finite() {
            warn!(peer_index, phase, "non-finite phase observation dropped");
            return;
        }

        let natural_frequency = self.natural_frequency;
        self.oscillators
            .entry(peer_index)
            .and_modify(|o| o.observe(phase))
            .or_insert_with(|| {
                debug!(peer_index, phase, "new peer observed");
                PhaseOscillator::new(peer_index, phase, natural_frequency)
            });
    }

    /// `(K / N) · Σ_j sin(θ_j − θ_local)` over observed remote peers
    pub fn coupling_term(&self) -> f64 {
        let n = self.oscillators.len();
        if n <= 1 {
            return 0.0;
        }

        let local = self.local();
        let sum: f64 = self
            .oscillators
            .values()
            .filter(|o| o.peer_index() != self.local_index)
            .map(|o| local.pull_from(o))
            .sum();

        self.coupling / n as f64 * sum
    }

    /// Advance the local oscillator by `dt` seconds. Returns the new local phase.
    pub fn step(&mut self, dt: f64) -> f64 {
        let coupling = self.coupling_term();
        let local_index = self.local_index;
        let phase = match self.oscillators.get_mut(&local_index) {
            Some(local) => local.advance(coupling, dt),
            None => 0.0,
        };
        self.ticks += 1;
        phase
    }

    /// Advance one block period and broadcast the new local phase.
    pub fn tick(&mut self, out: &mut impl PhaseBroadcast) -> f64 {
        let phase = self.step(self.block_period);
        out.broadcast(self.local_index, phase);
        phase
    }

    /// Entry point for every phase observation.
    ///
    /// A report for the local index is the rendering context's per-block
    /// heartbeat and triggers one [`tick`](Self::tick). Anything else is a
    /// remote observation. Non-finite values are dropped either way.
    pub fn receive(&mut self, peer_index: u32, phase: f64, out: &mut impl PhaseBroadcast) {
        if !phase.is_finite() {
            warn!(peer_index, phase, "non-finite phase report dropped");
            return;
        }
        if peer_index == self.local_index {
            let before = self.local_phase();
            let next = self.tick(out);
            trace!(reported = phase, before, next, "local tick");
        } else {
            self.observe(peer_index, phase);
        }
    }

    fn local(&self) -> &PhaseOscillator {
        // the local oscillator is inserted on construction and never removed
        &self.oscillators[&self.local_index]
    }
}
