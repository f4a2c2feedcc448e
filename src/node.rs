//! Node trait for the rendering graph.

use dasp_graph::{Buffer, Input};

/// Information available while rendering one block.
#[derive(Clone, Copy, Debug)]
pub struct ProcessContext {
    /// Sample rate of the graph in Hz
    pub sample_rate: u32,
    /// Frames per block (dasp_graph's fixed 64)
    pub buffer_size: usize,
}

impl ProcessContext {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            buffer_size: Buffer::LEN,
        }
    }

    /// Duration of one block in seconds (Δt of a clock tick)
    #[inline]
    pub fn block_period(&self) -> f64 {
        self.buffer_size as f64 / self.sample_rate as f64
    }
}

/// Identifier of a node within a [`RenderGraph`](crate::graph::RenderGraph)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId(pub(crate) u32);

/// A node in the rendering graph.
///
/// Nodes never share state with the control context. Everything they learn
/// arrives as messages, drained at the start of each block before any audio
/// is produced:
///
/// ```
/// use kurasync::{AudioNode, ProcessContext};
/// use dasp_graph::{Buffer, Input};
///
/// enum LevelMessage {
///     Set(f32),
/// }
///
/// struct Dc {
///     level: f32,
/// }
///
/// impl AudioNode for Dc {
///     type Message = LevelMessage;
///
///     fn process(
///         &mut self,
///         _ctx: &ProcessContext,
///         messages: impl Iterator<Item = LevelMessage>,
///         _inputs: &[Input],
///         outputs: &mut [Buffer],
///     ) {
///         for msg in messages {
///             match msg {
///                 LevelMessage::Set(level) => self.level = level,
///             }
///         }
///         for buffer in outputs.iter_mut() {
///             buffer.iter_mut().for_each(|s| *s = self.level);
///         }
///     }
/// }
/// ```
pub trait AudioNode: Send + 'static {
    /// Inbound message type (`()` if the node takes none)
    type Message: Send + 'static;

    /// Render one block: drain `messages`, read `inputs`, fill `outputs`.
    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = Self::Message>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    );

    /// Number of audio inputs (0 for sources)
    fn num_inputs(&self) -> usize { 0 }

    /// Number of output channels (0 for sinks)
    fn num_outputs(&self) -> usize { 1 }
}
