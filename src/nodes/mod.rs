//! Nodes of the rendering graph.

mod destination;
mod processor;

pub use destination::Destination;
pub use processor::RenderProcessor;
