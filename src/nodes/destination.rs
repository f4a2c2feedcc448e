//! Final audio destination: interleaves the graph output into a ring the
//! platform callback drains.

use dasp_graph::{Buffer, Input};
use rtrb::Producer;

use crate::node::{AudioNode, ProcessContext};

/// Terminal sink of the rendering graph.
///
/// Writes one interleaved block per `process` call. With nothing connected
/// the block is silence, so the platform always gets the frames it asked for.
pub struct Destination {
    ring: Producer<f32>,
    channels: usize,
    /// Blocks skipped because the ring had no room
    overruns: u64,
}

impl Destination {
    pub fn new(ring: Producer<f32>, channels: usize) -> Self {
        Self {
            ring,
            channels: channels.max(1),
            overruns: 0,
        }
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }
}

impl AudioNode for Destination {
    type Message = ();

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        inputs: &[Input],
        _outputs: &mut [Buffer],
    ) {
        let needed = Buffer::LEN * self.channels;
        if self.ring.slots() < needed {
            self.overruns += 1;
            return;
        }

        let buffers = inputs.first().map(|input| input.buffers()).unwrap_or(&[]);
        for i in 0..Buffer::LEN {
            for ch in 0..self.channels {
                // mono sources are duplicated across channels
                let sample = match buffers.len() {
                    0 => 0.0,
                    n => buffers[ch.min(n - 1)][i],
                };
                let _ = self.ring.push(sample);
            }
        }
    }

    #[inline]
    fn num_inputs(&self) -> usize { 1 }

    #[inline]
    fn num_outputs(&self) -> usize { 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtrb::RingBuffer;

    #[test]
    fn disconnected_destination_writes_silence() {
        let (tx, mut rx) = RingBuffer::new(Buffer::LEN * 2);
        let mut dest = Destination::new(tx, 2);
        dest.process(&ProcessContext::new(48_000), core::iter::empty(), &[], &mut []);

        assert_eq!(rx.slots(), Buffer::LEN * 2);
        while let Ok(s) = rx.pop() {
            assert_eq!(s, 0.0);
        }
    }

    #[test]
    fn full_ring_counts_an_overrun() {
        let (tx, _rx) = RingBuffer::new(8);
        let mut dest = Destination::new(tx, 1);
        dest.process(&ProcessContext::new(48_000), core::iter::empty(), &[], &mut []);
        assert_eq!(dest.overruns(), 1);
    }
}
