//! Seam to the synthesis runtime.
//!
//! The engine never interprets DSP itself. A [`SynthRuntime`] turns an
//! [`EvalCommand`] into a [`Program`], and the rendering context calls the
//! program once per sample. [`expr::ExprRuntime`] is the built-in runtime.

pub mod expr;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::error::CompileError;
use crate::eval::EvalCommand;
use crate::samples::SampleBank;

pub use expr::ExprRuntime;

/// Per-sample view of the rendering context handed to a [`Program`].
#[derive(Clone, Copy)]
pub struct FrameContext<'a> {
    pub sample_rate: u32,
    /// Seconds since the processor started rendering
    pub time: f64,
    /// Local clock phase in `[0, 2π)`
    pub phase: f64,
    /// First input channel, 0.0 when nothing is connected
    pub input: f64,
    /// Current parameter values, indexed like the [`ParamTable`] the program was compiled against
    pub params: &'a [f64],
    pub samples: &'a SampleBank,
}

/// A compiled synthesis program.
pub trait Program: Send {
    /// Run the setup stage. Called exactly once, before the program goes live.
    fn setup(&mut self, ctx: &FrameContext<'_>) -> Result<(), CompileError>;

    /// Run the loop stage and return the next output sample.
    fn next_sample(&mut self, ctx: &FrameContext<'_>) -> f64;
}

/// Compiler for injected source.
pub trait SynthRuntime: Send {
    /// Build both fragments of `command`. Must not have side effects on failure.
    fn compile(
        &self,
        command: &EvalCommand,
        params: &ParamTable,
    ) -> Result<Box<dyn Program>, CompileError>;
}

/// A named numeric control exposed by the rendering context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamDescriptor {
    pub name: String,
    #[serde(default)]
    pub default: f64,
    /// Lower bound of the domain; omit for unbounded
    #[serde(default = "unbounded_below", skip_serializing_if = "is_infinite")]
    pub min: f64,
    #[serde(default = "unbounded_above", skip_serializing_if = "is_infinite")]
    pub max: f64,
}

fn unbounded_below() -> f64 {
    f64::NEG_INFINITY
}

fn unbounded_above() -> f64 {
    f64::INFINITY
}

fn is_infinite(v: &f64) -> bool {
    v.is_infinite()
}

impl ParamDescriptor {
    /// Unbounded parameter with a default value
    pub fn new(name: impl Into<String>, default: f64) -> Self {
        Self {
            name: name.into(),
            default,
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
        }
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Clamp into `[min, max]`. Unlike `f64::clamp` this never panics on a
    /// malformed domain.
    #[inline]
    pub fn bound(&self, value: f64) -> f64 {
        value.max(self.min).min(self.max)
    }
}

/// Parameter values owned by the rendering context.
#[derive(Clone, Debug, Default)]
pub struct ParamTable {
    descriptors: Vec<ParamDescriptor>,
    values: Vec<f64>,
}

impl ParamTable {
    pub fn new(descriptors: Vec<ParamDescriptor>) -> Self {
        let values = descriptors
            .iter()
            .map(|d| d.bound(d.default))
            .collect();
        Self {
            descriptors,
            values,
        }
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.descriptors.iter().position(|d| d.name == name)
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.index_of(name).map(|i| self.values[i])
    }

    /// Add `delta` to a parameter, bounded by its own domain. Returns the new value.
    pub fn adjust(&mut self, name: &str, delta: f64) -> Option<f64> {
        let i = self.index_of(name)?;
        let d = &self.descriptors[i];
        let value = d.bound(self.values[i] + delta);
        self.values[i] = value;
        Some(value)
    }

    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn descriptors(&self) -> &[ParamDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjust_clamps_to_parameter_domain() {
        let mut table = ParamTable::new(vec![
            ParamDescriptor::new("gain", 1.0).with_range(0.0, 2.0),
            ParamDescriptor::new("detune", 0.0),
        ]);

        assert_eq!(table.adjust("gain", 0.5), Some(1.5));
        assert_eq!(table.adjust("gain", 0.5), Some(2.0));
        assert_eq!(table.adjust("gain", -5.0), Some(0.0));
        assert_eq!(table.adjust("detune", -1000.0), Some(-1000.0));
        assert_eq!(table.adjust("missing", 1.0), None);
    }

    #[test]
    fn defaults_are_clamped_on_construction() {
        let table = ParamTable::new(vec![ParamDescriptor::new("gain", 5.0).with_range(0.0, 1.0)]);
        assert_eq!(table.get("gain"), Some(1.0));
    }
}
