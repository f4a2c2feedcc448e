//! Error taxonomy for the engine.
//!
//! Every public controller operation reports expected failures through
//! [`Error`] instead of panicking. Only [`PlatformError`] can leave the
//! controller unusable until the next `init`.

use core::fmt;

use thiserror::Error;

use crate::controller::LifecycleState;
use crate::samples::SampleError;

/// Result type for controller operations
pub type Result<T> = std::result::Result<T, Error>;

/// An operation was invalid for the current lifecycle state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("`{operation}` is not valid while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },

    /// `play` was called while the clock was already running; it suspended instead.
    #[error("rendering clock was running, `play` suspended it")]
    AlreadyRunning,

    /// A setup completion arrived for a superseded `init`.
    #[error("setup for epoch {ticket} completed after release (current epoch {current})")]
    StaleSetup { ticket: u64, current: u64 },
}

/// The other side of the render bridge no longer exists.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeError {
    #[error("render bridge is closed")]
    Closed,
}

/// Which fragment of an eval command failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Setup,
    Loop,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Setup => f.write_str("setup"),
            Stage::Loop => f.write_str("loop"),
        }
    }
}

/// An injected program fragment failed to build inside the rendering context.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{stage} stage, pos {position}: {message}")]
pub struct CompileError {
    pub stage: Stage,
    /// Byte offset into the failing fragment
    pub position: usize,
    pub message: String,
}

impl CompileError {
    pub fn new(stage: Stage, position: usize, message: impl Into<String>) -> Self {
        Self {
            stage,
            position,
            message: message.into(),
        }
    }
}

/// The audio subsystem is missing or failed to come up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("real-time audio is not supported: {0}")]
    Unsupported(String),

    #[error("no audio output device available")]
    NoDevice,

    #[error("failed to load processor module `{0}`")]
    ModuleLoad(String),

    #[error("audio stream error: {0}")]
    Stream(String),
}

/// A peer update could not be delivered by the network transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("peer transport error: {0}")]
pub struct TransportError(pub String);

/// Top-level error for controller operations
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("no control parameter named `{0}`")]
    UnknownParameter(String),

    #[error(transparent)]
    Sample(#[from] SampleError),
}

impl Error {
    /// Shorthand for [`LifecycleError::InvalidState`]
    pub(crate) fn invalid_state(operation: &'static str, state: LifecycleState) -> Self {
        Error::Lifecycle(LifecycleError::InvalidState { operation, state })
    }
}
