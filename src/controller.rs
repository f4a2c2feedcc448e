//! Top-level state machine of the engine.
//!
//! ```text
//!                  init                complete_init
//! Uninitialized ─────────▶ Initializing ───────────▶ Running ◀──┐
//!       ▲                     │ (platform error)       │ stop    │ play
//!       └─────────────────────┘                        ▼         │
//!                                                   Suspended ───┘
//! Running | Suspended ── stop_and_release ──▶ Released ── init ──▶ Initializing
//! ```
//!
//! The controller lives in the control context. Everything it knows about
//! the rendering context arrives over the bridge and is dispatched by
//! [`AudioGraphController::pump`].

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use hashbrown::HashMap;
use tracing::{debug, error, info, warn};

use crate::backend::{AudioBackend, ContextOptions};
use crate::bridge::{ControlEndpoint, RenderBridge};
use crate::clock::ClockSyncEngine;
use crate::config::{EngineConfig, DEFAULT_PROCESSOR, PARAMETER_STEP};
use crate::error::{BridgeError, Error, LifecycleError, PlatformError, Result, TransportError};
use crate::eval::EvalCommand;
use crate::events::ControlEvent;
use crate::graph::RenderGraph;
use crate::message::{Message, StatusKind};
use crate::node::ProcessContext;
use crate::nodes::RenderProcessor;
use crate::runtime::{ExprRuntime, ParamTable, SynthRuntime};
use crate::samples::{SampleError, SampleLoader};

/// Lifecycle of the rendering context
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Running,
    Suspended,
    Released,
}

impl LifecycleState {
    /// Running or suspended: the graph and the bridge exist
    #[inline]
    pub fn is_live(self) -> bool {
        matches!(self, LifecycleState::Running | LifecycleState::Suspended)
    }
}

/// Proof that `init` was triggered by an originating external action.
///
/// Platforms only let an audio context start in response to one, so callers
/// build this in their input handlers and nowhere else.
#[derive(Debug)]
pub struct UserGesture {
    _private: (),
}

impl UserGesture {
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl Default for UserGesture {
    fn default() -> Self {
        Self::new()
    }
}

/// Token for one pending `init`. Completions carrying an old epoch are stale.
#[derive(Debug, PartialEq, Eq)]
pub struct InitTicket {
    epoch: u64,
}

impl InitTicket {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Network transport for phase dissemination.
pub trait PeerTransport {
    fn broadcast(&mut self, peer_index: u32, phase: f64) -> core::result::Result<(), TransportError>;
}

impl<F> PeerTransport for F
where
    F: FnMut(u32, f64) -> core::result::Result<(), TransportError>,
{
    fn broadcast(&mut self, peer_index: u32, phase: f64) -> core::result::Result<(), TransportError> {
        self(peer_index, phase)
    }
}

/// Receiver of status notifications from the rendering context.
pub trait StatusObserver {
    fn on_status(&mut self, kind: StatusKind, detail: &str);
}

impl<F: FnMut(StatusKind, &str)> StatusObserver for F {
    fn on_status(&mut self, kind: StatusKind, detail: &str) {
        self(kind, detail)
    }
}

/// Default observer: forwards every notification to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl StatusObserver for TracingObserver {
    fn on_status(&mut self, kind: StatusKind, detail: &str) {
        match kind {
            StatusKind::ProcessorError => error!(detail, "processor error"),
            StatusKind::PortError => warn!(detail, "port error"),
            StatusKind::StateChange => info!(detail, "processor state change"),
        }
    }
}

type ProcessorFactory = Box<dyn Fn() -> Box<dyn SynthRuntime>>;

/// Owner of the rendering lifecycle, the bridge and the clock engine.
pub struct AudioGraphController<B: AudioBackend> {
    config: EngineConfig,
    backend: B,
    state: LifecycleState,
    epoch: u64,
    /// Set once the platform context for the current epoch was opened
    opened: bool,

    processors: HashMap<String, ProcessorFactory>,
    bridge: Option<ControlEndpoint>,
    clock: ClockSyncEngine,

    transport: Option<Box<dyn PeerTransport>>,
    observer: Box<dyn StatusObserver>,
    loader: Option<Box<dyn SampleLoader>>,
}

impl<B: AudioBackend> AudioGraphController<B> {
    pub fn new(config: EngineConfig, backend: B) -> Self {
        let clock = ClockSyncEngine::new(&config.clock, tick_period(&config, config.sample_rate));

        let mut processors: HashMap<String, ProcessorFactory> = HashMap::new();
        processors.insert(
            DEFAULT_PROCESSOR.into(),
            Box::new(|| Box::new(ExprRuntime::new()) as Box<dyn SynthRuntime>),
        );

        Self {
            config,
            backend,
            state: LifecycleState::Uninitialized,
            epoch: 0,
            opened: false,
            processors,
            bridge: None,
            clock,
            transport: None,
            observer: Box::new(TracingObserver),
            loader: None,
        }
    }

    pub fn with_transport(mut self, transport: impl PeerTransport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    pub fn with_observer(mut self, observer: impl StatusObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn with_sample_loader(mut self, loader: impl SampleLoader + 'static) -> Self {
        self.loader = Some(Box::new(loader));
        self
    }

    /// Make a synthesis runtime loadable by name on `init`
    pub fn register_processor<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn SynthRuntime> + 'static,
    {
        self.processors.insert(name.into(), Box::new(factory));
    }

    #[inline]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn clock(&self) -> &ClockSyncEngine {
        &self.clock
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    // ---------------------------------------------------------------------
    // lifecycle

    /// Create the rendering context and start it.
    ///
    /// Runs [`begin_init`](Self::begin_init),
    /// [`open_render_context`](Self::open_render_context) and
    /// [`complete_init`](Self::complete_init) back to back.
    pub fn init(&mut self, gesture: UserGesture, peer_count: usize) -> Result<()> {
        let ticket = self.begin_init(gesture, peer_count)?;
        self.open_render_context(&ticket)?;
        self.complete_init(ticket)
    }

    /// `Uninitialized | Released → Initializing`
    pub fn begin_init(&mut self, _gesture: UserGesture, peer_count: usize) -> Result<InitTicket> {
        match self.state {
            LifecycleState::Uninitialized | LifecycleState::Released => {}
            state => return Err(Error::invalid_state("init", state)),
        }

        self.epoch += 1;
        self.opened = false;
        let period = tick_period(&self.config, self.config.sample_rate);
        self.clock = ClockSyncEngine::with_capacity(&self.config.clock, period, peer_count);
        self.transition(LifecycleState::Initializing);

        Ok(InitTicket { epoch: self.epoch })
    }

    /// Platform setup for a pending `init`: open the context, load the
    /// processor module, build the bridge and wire the graph.
    pub fn open_render_context(&mut self, ticket: &InitTicket) -> Result<()> {
        self.check_ticket(ticket)?;
        if self.state != LifecycleState::Initializing || self.opened {
            return Err(Error::invalid_state("open_render_context", self.state));
        }

        match self.build_render_context() {
            Ok(bridge) => {
                self.bridge = Some(bridge);
                self.opened = true;
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "render context setup failed");
                self.backend.release();
                self.transition(LifecycleState::Uninitialized);
                Err(e.into())
            }
        }
    }

    /// `Initializing → Running` once the platform setup for `ticket` is done
    pub fn complete_init(&mut self, ticket: InitTicket) -> Result<()> {
        self.check_ticket(&ticket)?;
        if self.state != LifecycleState::Initializing || !self.opened {
            return Err(Error::invalid_state("complete_init", self.state));
        }

        if let Err(e) = self.backend.resume() {
            error!(error = %e, "could not start the rendering clock");
            self.discard_render_context();
            self.transition(LifecycleState::Uninitialized);
            return Err(e.into());
        }

        self.transition(LifecycleState::Running);
        self.load_bundled_samples();
        Ok(())
    }

    /// Toggle: resume a suspended clock, or suspend a running one and fail.
    pub fn play(&mut self) -> Result<()> {
        match self.state {
            LifecycleState::Suspended => {
                self.backend.resume()?;
                self.transition(LifecycleState::Running);
                Ok(())
            }
            LifecycleState::Running => {
                self.stop()?;
                Err(LifecycleError::AlreadyRunning.into())
            }
            state => Err(Error::invalid_state("play", state)),
        }
    }

    /// `Running → Suspended`; graph, bridge and program stay intact
    pub fn stop(&mut self) -> Result<()> {
        match self.state {
            LifecycleState::Running => {
                self.backend.suspend()?;
                self.transition(LifecycleState::Suspended);
                Ok(())
            }
            state => Err(Error::invalid_state("stop", state)),
        }
    }

    /// `Running | Suspended → Released`.
    ///
    /// During `Initializing` the pending setup is invalidated instead; its
    /// completion will tear down whatever it built.
    pub fn stop_and_release(&mut self) -> Result<()> {
        match self.state {
            LifecycleState::Running | LifecycleState::Suspended => {
                self.discard_render_context();
                self.transition(LifecycleState::Released);
                Ok(())
            }
            LifecycleState::Initializing => {
                self.epoch += 1;
                debug!(epoch = self.epoch, "release requested during init, deferred");
                Ok(())
            }
            state => Err(Error::invalid_state("stop_and_release", state)),
        }
    }

    // ---------------------------------------------------------------------
    // control

    /// Hot-swap the running program. A suspended clock is resumed first.
    pub fn submit_program(&mut self, setup: impl Into<String>, loop_source: impl Into<String>) -> Result<()> {
        self.submit(EvalCommand::new(setup, loop_source))
    }

    pub fn submit(&mut self, command: EvalCommand) -> Result<()> {
        self.require_live("submit_program")?;
        if self.state == LifecycleState::Suspended {
            self.backend.resume()?;
            self.transition(LifecycleState::Running);
        }
        self.send(command.into_message())
    }

    /// Add `delta` to a named parameter inside the rendering context
    pub fn adjust_parameter(&mut self, name: &str, delta: f64) -> Result<()> {
        self.require_live("adjust_parameter")?;
        if !self.config.parameters.iter().any(|p| p.name == name) {
            return Err(Error::UnknownParameter(name.into()));
        }
        self.send(Message::AdjustParameter {
            name: name.into(),
            delta,
        })
    }

    pub fn more(&mut self, name: &str) -> Result<()> {
        self.adjust_parameter(name, PARAMETER_STEP)
    }

    pub fn less(&mut self, name: &str) -> Result<()> {
        self.adjust_parameter(name, -PARAMETER_STEP)
    }

    /// Push a phase straight into the rendering context
    pub fn send_clock_phase(&mut self, phase: f64, peer_index: u32) -> Result<()> {
        self.require_live("send_clock_phase")?;
        self.send(Message::phase(phase, peer_index))
    }

    /// Load one sample through the configured loader and ship it to the
    /// rendering context.
    pub fn load_sample(&mut self, name: &str, location: &str) -> Result<()> {
        self.require_live("load_sample")?;
        let loader = self
            .loader
            .as_mut()
            .ok_or_else(|| SampleError::NotFound(name.into()))?;
        let asset = loader.load(name, location)?;
        debug!(name, frames = asset.len(), "sample loaded");
        self.send(Message::Sample(asset))
    }

    /// Dispatch a decoded pub/sub event
    pub fn handle_event(&mut self, event: ControlEvent) -> Result<()> {
        debug!(topic = event.topic(), "control event");
        match event {
            ControlEvent::EvalDsp(command) => self.submit(command),
            ControlEvent::StopAudio => self.stop(),
            ControlEvent::LoadSample { name, url } => self.load_sample(&name, &url),
        }
    }

    // ---------------------------------------------------------------------
    // messages

    /// Handle everything the rendering context sent since the last call.
    /// Returns the number of messages dispatched.
    pub fn pump(&mut self) -> usize {
        let Some(bridge) = self.bridge.as_mut() else {
            return 0;
        };
        bridge.flush();
        let inbound: Vec<Message> = bridge.drain().collect();

        let count = inbound.len();
        for msg in inbound {
            self.on_render_message(msg);
        }
        count
    }

    /// Dispatch one message from the rendering context
    pub fn on_render_message(&mut self, msg: Message) {
        match msg {
            Message::PhaseUpdate { phase, peer_index } => self.clock_receive(peer_index, phase),
            Message::Status { kind, detail } => self.observer.on_status(kind, &detail),
            other => warn!(tag = other.tag(), "unexpected message from the rendering context, dropped"),
        }
    }

    /// A phase observation delivered by the network transport
    pub fn on_peer_phase(&mut self, peer_index: u32, phase: f64) {
        if peer_index == self.clock.local_index() {
            warn!(peer_index, "remote peer reported our own index, ignored");
            return;
        }
        if !phase.is_finite() {
            warn!(peer_index, phase, "non-finite peer phase dropped");
            return;
        }
        self.clock_receive(peer_index, phase);
    }

    pub fn add_peer(&mut self, peer_index: u32) -> bool {
        self.clock.add_peer(peer_index)
    }

    pub fn remove_peer(&mut self, peer_index: u32) -> bool {
        self.clock.remove_peer(peer_index).is_some()
    }

    // ---------------------------------------------------------------------

    fn clock_receive(&mut self, peer_index: u32, phase: f64) {
        let Self {
            clock,
            bridge,
            transport,
            ..
        } = self;

        let mut out = |index: u32, phase: f64| {
            if let Some(bridge) = bridge.as_mut() {
                if bridge.send(Message::phase(phase, index)).is_err() {
                    debug!("render bridge closed, local phase not delivered");
                }
            }
            if let Some(transport) = transport.as_mut() {
                if let Err(e) = transport.broadcast(index, phase) {
                    warn!(error = %e, "peer update lost");
                }
            }
        };
        clock.receive(peer_index, phase, &mut out);
    }

    fn build_render_context(&mut self) -> core::result::Result<ControlEndpoint, PlatformError> {
        let runtime = {
            let name = &self.config.processor_name;
            let factory = self
                .processors
                .get(name)
                .ok_or_else(|| PlatformError::ModuleLoad(name.clone()))?;
            factory()
        };

        let options = ContextOptions {
            sample_rate: self.config.sample_rate,
            channels: self.config.node.output_channel_count,
        };
        let info = self.backend.open(&options)?;

        let mut graph = RenderGraph::new(info.sample_rate);
        self.clock.set_block_period(tick_period(&self.config, info.sample_rate));

        let (control, render) = RenderBridge::new(self.config.bridge_capacity);
        let (inbox, outbox) = render.split();

        let mut node_options = self.config.node;
        node_options.output_channel_count = info.channels;
        let processor = RenderProcessor::new(
            node_options,
            runtime,
            ParamTable::new(self.config.parameters.clone()),
            &self.config.clock,
            outbox,
        )
        .with_report_interval(self.config.phase_report_interval);

        let id = graph.add_with_inbox(processor, inbox);
        self.backend.attach(graph, id)?;

        info!(
            processor = %self.config.processor_name,
            sample_rate = info.sample_rate,
            channels = info.channels,
            "render context opened"
        );
        Ok(control)
    }

    fn load_bundled_samples(&mut self) {
        let Some(loader) = self.loader.as_mut() else {
            return;
        };

        for name in loader.available() {
            match loader.load(&name, "") {
                Ok(asset) => {
                    if let Some(bridge) = self.bridge.as_mut() {
                        if bridge.send(Message::Sample(asset)).is_err() {
                            warn!(%name, "render bridge closed while shipping samples");
                            return;
                        }
                    }
                }
                Err(e) => warn!(%name, error = %e, "sample failed to load"),
            }
        }
    }

    fn check_ticket(&mut self, ticket: &InitTicket) -> Result<()> {
        if ticket.epoch == self.epoch {
            return Ok(());
        }

        warn!(ticket = ticket.epoch, current = self.epoch, "stale setup completion, discarding");
        if self.state == LifecycleState::Initializing {
            self.discard_render_context();
            self.transition(LifecycleState::Uninitialized);
        }
        Err(LifecycleError::StaleSetup {
            ticket: ticket.epoch,
            current: self.epoch,
        }
        .into())
    }

    fn discard_render_context(&mut self) {
        self.backend.release();
        self.bridge = None;
        self.opened = false;
    }

    fn require_live(&self, operation: &'static str) -> Result<()> {
        if self.state.is_live() {
            Ok(())
        } else {
            Err(Error::invalid_state(operation, self.state))
        }
    }

    fn send(&mut self, msg: Message) -> Result<()> {
        let bridge = self.bridge.as_mut().ok_or(BridgeError::Closed)?;
        bridge.send(msg)?;
        Ok(())
    }

    fn transition(&mut self, next: LifecycleState) {
        if self.state != next {
            info!(from = ?self.state, to = ?next, "lifecycle");
            self.state = next;
        }
    }
}

/// Clock time covered by one local phase report: the processor reports once
/// every `phase_report_interval` blocks.
fn tick_period(config: &EngineConfig, sample_rate: u32) -> f64 {
    ProcessContext::new(sample_rate).block_period() * config.phase_report_interval.max(1) as f64
}
