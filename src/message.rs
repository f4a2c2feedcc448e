//! Messages that cross the render bridge.
//!
//! A message is moved into the bridge by its sender and out of it by the
//! receiver. Nothing else crosses between the control and rendering
//! contexts.

use alloc::string::String;

use crate::eval::EvalCommand;
use crate::samples::SampleAsset;

/// Category of a rendering status notification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusKind {
    /// The processor rejected an injected program, or failed internally
    ProcessorError,
    /// A message arrived that the receiving port could not apply
    PortError,
    /// The processor changed state (ready, program swapped, ...)
    StateChange,
}

/// Everything that travels over the render bridge, in either direction.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// A clock phase observation for one peer (index 0 is usually the local peer)
    PhaseUpdate { phase: f64, peer_index: u32 },
    /// New synthesis source to hot-swap into the rendering context
    Eval(EvalCommand),
    /// Rendering context → control context status report
    Status { kind: StatusKind, detail: String },
    /// Add `delta` to a named control parameter owned by the rendering context
    AdjustParameter { name: String, delta: f64 },
    /// A decoded sample asset handed to the rendering context
    Sample(SampleAsset),
}

impl Message {
    pub fn phase(phase: f64, peer_index: u32) -> Self {
        Message::PhaseUpdate { phase, peer_index }
    }

    pub fn status(kind: StatusKind, detail: impl Into<String>) -> Self {
        Message::Status {
            kind,
            detail: detail.into(),
        }
    }

    /// Short tag used in log lines
    pub fn tag(&self) -> &'static str {
        match self {
            Message::PhaseUpdate { .. } => "phase",
            Message::Eval(_) => "eval",
            Message::Status { .. } => "status",
            Message::AdjustParameter { .. } => "adjust",
            Message::Sample(_) => "sample",
        }
    }
}
