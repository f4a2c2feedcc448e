//! Live code injection.
//!
//! An [`EvalCommand`] carries two source fragments: `setup`, run once to
//! establish persistent synthesis state, and `loop`, run for every sample of
//! every block. [`ProgramSlot`] is the rendering-context half of the
//! protocol: a candidate program replaces the active one only after both
//! fragments compiled and the setup stage ran cleanly.

use alloc::boxed::Box;
use alloc::string::String;

use serde::{Deserialize, Serialize};

use crate::error::CompileError;
use crate::message::Message;
use crate::runtime::{FrameContext, ParamTable, Program, SynthRuntime};

/// Request to hot-swap the running synthesis program.
///
/// Deserializes from the `eval-dsp` payload shape `{"setup": ..., "loop": ...}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalCommand {
    #[serde(default)]
    pub setup: String,
    #[serde(rename = "loop")]
    pub loop_source: String,
}

impl EvalCommand {
    pub fn new(setup: impl Into<String>, loop_source: impl Into<String>) -> Self {
        Self {
            setup: setup.into(),
            loop_source: loop_source.into(),
        }
    }

    pub fn into_message(self) -> Message {
        Message::Eval(self)
    }
}

/// Holder for the active program inside the rendering context.
#[derive(Default)]
pub struct ProgramSlot {
    active: Option<Box<dyn Program>>,
    source: Option<EvalCommand>,
    generation: u64,
}

impl ProgramSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `command`, run its setup stage, and swap it in.
    ///
    /// On any error the previously active program is left untouched.
    /// Returns the new program generation on success.
    pub fn install(
        &mut self,
        runtime: &dyn SynthRuntime,
        command: EvalCommand,
        params: &ParamTable,
        ctx: &FrameContext<'_>,
    ) -> Result<u64, CompileError> {
        let mut candidate = runtime.compile(&command, params)?;
        candidate.setup(ctx)?;

        self.active = Some(candidate);
        self.source = Some(command);
        self.generation += 1;
        Ok(self.generation)
    }

    #[inline]
    pub fn active_mut(&mut self) -> Option<&mut (dyn Program + 'static)> {
        self.active.as_deref_mut()
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.active.is_some()
    }

    /// Source of the active program
    pub fn source(&self) -> Option<&EvalCommand> {
        self.source.as_ref()
    }

    /// Number of successful swaps so far
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
