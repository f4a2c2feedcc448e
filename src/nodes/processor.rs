//! The rendering-context program host.

use alloc::boxed::Box;
use alloc::format;

use dasp_graph::{Buffer, Input};
use tracing::trace;

use crate::bridge::BridgeSender;
use crate::clock::normalize_phase;
use crate::config::{ClockConfig, RenderNodeOptions};
use crate::eval::{EvalCommand, ProgramSlot};
use crate::message::{Message, StatusKind};
use crate::node::{AudioNode, ProcessContext};
use crate::runtime::{FrameContext, ParamTable, SynthRuntime};
use crate::samples::{SampleAsset, SampleBank};

/// Hosts the live synthesis program inside the rendering graph.
///
/// Reads control messages from the bridge inbox at the start of every block
/// and reports back through `outbox`. Between clock updates the local phase
/// free-runs at the natural frequency so programs see a smooth ramp.
pub struct RenderProcessor {
    options: RenderNodeOptions,
    runtime: Box<dyn SynthRuntime>,
    slot: ProgramSlot,
    params: ParamTable,
    samples: SampleBank,
    outbox: BridgeSender<Message>,

    local_index: u32,
    phase: f64,
    /// ω in radians per second
    angular_frequency: f64,
    report_interval: u32,

    frames_rendered: u64,
    blocks_rendered: u64,
    announced: bool,
}

impl RenderProcessor {
    pub fn new(
        options: RenderNodeOptions,
        runtime: Box<dyn SynthRuntime>,
        params: ParamTable,
        clock: &ClockConfig,
        outbox: BridgeSender<Message>,
    ) -> Self {
        Self {
            options,
            runtime,
            slot: ProgramSlot::new(),
            params,
            samples: SampleBank::default(),
            outbox,
            local_index: clock.local_index,
            phase: 0.0,
            angular_frequency: clock.angular_frequency(),
            report_interval: 1,
            frames_rendered: 0,
            blocks_rendered: 0,
            announced: false,
        }
    }

    /// Report the local phase every `blocks` blocks (at least 1)
    pub fn with_report_interval(mut self, blocks: u32) -> Self {
        self.report_interval = blocks.max(1);
        self
    }

    /// Source of the running program, if any
    pub fn active_source(&self) -> Option<&EvalCommand> {
        self.slot.source()
    }

    pub fn program_generation(&self) -> u64 {
        self.slot.generation()
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    pub fn params(&self) -> &ParamTable {
        &self.params
    }

    pub fn samples(&self) -> &SampleBank {
        &self.samples
    }

    fn handle(&mut self, ctx: &ProcessContext, msg: Message) {
        match msg {
            Message::PhaseUpdate { phase, peer_index } => {
                if !phase.is_finite() {
                    self.report(Message::status(
                        StatusKind::PortError,
                        format!("non-finite phase {phase} for peer {peer_index}"),
                    ));
                } else if peer_index == self.local_index {
                    self.phase = normalize_phase(phase);
                } else {
                    trace!(peer_index, "remote phase reached the processor, ignored");
                }
            }
            Message::Eval(command) => self.install(ctx, command),
            Message::AdjustParameter { name, delta } => match self.params.adjust(&name, delta) {
                Some(value) => trace!(%name, value, "parameter adjusted"),
                None => self.report(Message::status(
                    StatusKind::PortError,
                    format!("unknown parameter `{name}`"),
                )),
            },
            Message::Sample(asset) => self.store_sample(asset),
            Message::Status { .. } => {
                self.report(Message::status(StatusKind::PortError, "status message sent to the processor"))
            }
        }
    }

    fn install(&mut self, ctx: &ProcessContext, command: EvalCommand) {
        let frame = FrameContext {
            sample_rate: ctx.sample_rate,
            time: self.frames_rendered as f64 / ctx.sample_rate as f64,
            phase: self.phase,
            input: 0.0,
            params: self.params.values(),
            samples: &self.samples,
        };

        match self.slot.install(self.runtime.as_ref(), command, &self.params, &frame) {
            Ok(generation) => self.report(Message::status(
                StatusKind::StateChange,
                format!("program {generation} active"),
            )),
            Err(e) => self.report(Message::status(StatusKind::ProcessorError, format!("{e}"))),
        }
    }

    fn store_sample(&mut self, asset: SampleAsset) {
        trace!(name = %asset.name, frames = asset.len(), "sample stored");
        self.samples.insert(asset);
    }

    fn report(&mut self, msg: Message) {
        if self.outbox.send(msg).is_err() {
            trace!("control side is gone, dropping report");
        }
    }
}

impl AudioNode for RenderProcessor {
    type Message = Message;

    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = Message>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        if !self.announced {
            self.announced = true;
            self.report(Message::status(StatusKind::StateChange, "processor ready"));
        }

        for msg in messages {
            self.handle(ctx, msg);
        }

        let input = inputs.first().and_then(|i| i.buffers().first());
        let phase_step = self.angular_frequency / ctx.sample_rate as f64;
        let sample_rate = ctx.sample_rate as f64;

        for i in 0..Buffer::LEN {
            let value = match self.slot.active_mut() {
                Some(program) => {
                    let frame = FrameContext {
                        sample_rate: ctx.sample_rate,
                        time: (self.frames_rendered + i as u64) as f64 / sample_rate,
                        phase: self.phase,
                        input: input.map_or(0.0, |b| b[i] as f64),
                        params: self.params.values(),
                        samples: &self.samples,
                    };
                    program.next_sample(&frame) as f32
                }
                None => 0.0,
            };
            let value = if value.is_finite() { value } else { 0.0 };

            for buffer in outputs.iter_mut() {
                buffer[i] = value;
            }
            self.phase = normalize_phase(self.phase + phase_step);
        }

        self.frames_rendered += Buffer::LEN as u64;
        self.blocks_rendered += 1;

        if self.blocks_rendered % self.report_interval as u64 == 0 {
            self.report(Message::phase(self.phase, self.local_index));
        }
    }

    fn num_inputs(&self) -> usize {
        self.options.inputs
    }

    fn num_outputs(&self) -> usize {
        self.options.output_channel_count
    }
}
