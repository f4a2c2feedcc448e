//! Deterministic, pull-based backend with no audio device.

use alloc::vec;
use alloc::vec::Vec;

use dasp_graph::Buffer;
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::debug;

use super::{AudioBackend, ClockState, ContextOptions, RenderCommand, RenderHost, StreamInfo};
use crate::bridge::BridgeSender;
use crate::error::PlatformError;
use crate::graph::RenderGraph;
use crate::node::NodeId;

/// Control-side half of the offline platform.
pub struct OfflineBackend {
    sample_rate: u32,
    channels: usize,
    supported: bool,
    handoff: Producer<RenderHost>,
    commands: Option<BridgeSender<RenderCommand>>,
    state: ClockState,
}

/// Render-side half: whoever owns it decides when audio is produced.
pub struct OfflineRenderer {
    handoff: Consumer<RenderHost>,
    host: Option<RenderHost>,
    channels: usize,
    sample_rate: u32,
}

impl OfflineBackend {
    pub fn new(sample_rate: u32, channels: usize) -> (Self, OfflineRenderer) {
        let channels = channels.max(1);
        let (handoff, rx) = RingBuffer::new(2);
        (
            Self {
                sample_rate,
                channels,
                supported: true,
                handoff,
                commands: None,
                state: ClockState::Closed,
            },
            OfflineRenderer {
                handoff: rx,
                host: None,
                channels,
                sample_rate,
            },
        )
    }

    /// A platform without real-time audio: every `open` fails.
    pub fn unsupported() -> (Self, OfflineRenderer) {
        let (mut backend, renderer) = Self::new(44_100, 2);
        backend.supported = false;
        (backend, renderer)
    }

    fn command(&mut self, command: RenderCommand) -> Result<(), PlatformError> {
        let tx = self
            .commands
            .as_mut()
            .ok_or_else(|| PlatformError::Stream("no render graph attached".into()))?;
        tx.send(command)
            .map_err(|_| PlatformError::Stream("offline renderer was dropped".into()))
    }
}

impl AudioBackend for OfflineBackend {
    fn open(&mut self, options: &ContextOptions) -> Result<StreamInfo, PlatformError> {
        if !self.supported {
            return Err(PlatformError::Unsupported("offline platform has no audio context".into()));
        }
        debug!(requested = options.sample_rate, actual = self.sample_rate, "offline context opened");
        self.state = ClockState::Suspended;
        Ok(StreamInfo {
            sample_rate: self.sample_rate,
            channels: self.channels,
        })
    }

    fn attach(&mut self, graph: RenderGraph, processor: NodeId) -> Result<(), PlatformError> {
        let (host, commands) = RenderHost::new(graph, processor, self.channels);
        self.handoff
            .push(host)
            .map_err(|_| PlatformError::Stream("renderer has not picked up the previous graph".into()))?;
        self.commands = Some(commands);
        self.state = ClockState::Suspended;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), PlatformError> {
        self.command(RenderCommand::Resume)?;
        self.state = ClockState::Running;
        Ok(())
    }

    fn suspend(&mut self) -> Result<(), PlatformError> {
        self.command(RenderCommand::Suspend)?;
        self.state = ClockState::Suspended;
        Ok(())
    }

    fn release(&mut self) {
        if let Some(mut tx) = self.commands.take() {
            let _ = tx.send(RenderCommand::Release);
        }
        self.state = ClockState::Closed;
    }

    fn clock_state(&self) -> ClockState {
        self.state
    }
}

impl OfflineRenderer {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// True once a graph was attached and has not been released
    pub fn has_graph(&mut self) -> bool {
        self.pick_up();
        self.host.as_ref().map_or(false, |h| !h.is_released())
    }

    /// Fill an interleaved buffer, as a platform callback would
    pub fn fill(&mut self, out: &mut [f32]) {
        self.pick_up();
        match self.host.as_mut() {
            Some(host) => host.fill(out),
            None => out.iter_mut().for_each(|s| *s = 0.0),
        }
    }

    /// Render `frames` frames, interleaved
    pub fn render(&mut self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * self.channels];
        self.fill(&mut out);
        out
    }

    /// Render whole graph blocks
    pub fn render_blocks(&mut self, blocks: usize) -> Vec<f32> {
        self.render(blocks * Buffer::LEN)
    }

    fn pick_up(&mut self) {
        while let Ok(host) = self.handoff.pop() {
            self.host = Some(host);
        }
    }
}
