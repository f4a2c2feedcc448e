//! Platform audio backends.
//!
//! A backend creates the rendering context, owns its clock (running or
//! suspended) and pulls audio from a [`RenderHost`]. The controller only
//! talks to it through [`AudioBackend`].

#[cfg(feature = "cpal_sink")]
mod cpal;
mod offline;

#[cfg(feature = "cpal_sink")]
pub use self::cpal::CpalBackend;
pub use self::offline::{OfflineBackend, OfflineRenderer};

use dasp_graph::Buffer;
use rtrb::{Consumer, RingBuffer};
use tracing::trace;

use crate::bridge::{self, BridgeReceiver, BridgeSender};
use crate::error::PlatformError;
use crate::graph::RenderGraph;
use crate::node::NodeId;
use crate::nodes::Destination;

/// What the controller asks of the platform when opening a context
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContextOptions {
    pub sample_rate: u32,
    pub channels: usize,
}

/// What the platform actually opened
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamInfo {
    pub sample_rate: u32,
    pub channels: usize,
}

/// State of the rendering clock as seen by the backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockState {
    /// No context opened yet, or released
    Closed,
    Suspended,
    Running,
}

/// Commands from the control context to the render thread
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderCommand {
    Resume,
    Suspend,
    /// Disconnect the processor and drop the graph
    Release,
}

/// A platform capable of hosting the rendering context.
pub trait AudioBackend {
    /// Create the rendering context. Fails if real-time audio is unavailable.
    fn open(&mut self, options: &ContextOptions) -> Result<StreamInfo, PlatformError>;

    /// Hand the graph to the render thread. `processor` is connected to the
    /// destination. The clock starts suspended.
    fn attach(&mut self, graph: RenderGraph, processor: NodeId) -> Result<(), PlatformError>;

    fn resume(&mut self) -> Result<(), PlatformError>;

    fn suspend(&mut self) -> Result<(), PlatformError>;

    /// Disconnect and drop the rendering context. Never fails.
    fn release(&mut self);

    fn clock_state(&self) -> ClockState;
}

/// Render-thread owner of the graph.
pub struct RenderHost {
    graph: Option<RenderGraph>,
    processor: NodeId,
    destination: NodeId,
    ring: Consumer<f32>,
    commands: BridgeReceiver<RenderCommand>,
    channels: usize,
    running: bool,
}

impl RenderHost {
    /// Wire `processor` into a new destination and return the host with
    /// the sender for its command queue.
    pub fn new(
        mut graph: RenderGraph,
        processor: NodeId,
        channels: usize,
    ) -> (Self, BridgeSender<RenderCommand>) {
        let channels = channels.max(1);
        // a few blocks of slack; the host only renders into an empty ring
        let (producer, ring) = RingBuffer::new(Buffer::LEN * channels * 4);
        let destination = graph.add(Destination::new(producer, channels)).id();
        graph.connect(processor, destination);
        graph.set_terminal(destination);

        let (tx, commands) = bridge::channel(16);
        let host = Self {
            graph: Some(graph),
            processor,
            destination,
            ring,
            commands,
            channels,
            running: false,
        };
        (host, tx)
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_released(&self) -> bool {
        self.graph.is_none()
    }

    /// Apply pending commands. Called at the top of every platform callback.
    pub fn poll_commands(&mut self) {
        while let Some(command) = self.commands.receive() {
            trace!(?command, "render command");
            match command {
                RenderCommand::Resume => self.running = self.graph.is_some(),
                RenderCommand::Suspend => self.running = false,
                RenderCommand::Release => self.release(),
            }
        }
    }

    /// Fill an interleaved platform buffer. Silence while suspended or released.
    pub fn fill(&mut self, out: &mut [f32]) {
        self.poll_commands();

        let mut written = 0;
        if self.running {
            if let Some(graph) = self.graph.as_mut() {
                while written < out.len() {
                    while written < out.len() {
                        match self.ring.pop() {
                            Ok(sample) => {
                                out[written] = sample;
                                written += 1;
                            }
                            Err(_) => break,
                        }
                    }
                    if written == out.len() {
                        break;
                    }

                    graph.process();
                    if self.ring.is_empty() {
                        // nothing reached the destination
                        break;
                    }
                }
            }
        }

        out[written..].iter_mut().for_each(|s| *s = 0.0);
    }

    fn release(&mut self) {
        if let Some(mut graph) = self.graph.take() {
            graph.disconnect(self.processor, self.destination);
            trace!(blocks = graph.blocks_processed(), "render graph released");
        }
        self.running = false;
    }
}
