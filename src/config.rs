//! Engine configuration.
//!
//! Everything has a sensible default, so a config can be built with the
//! `with_*` builders or deserialized from a partial JSON document:
//!
//! ```
//! use kurasync::EngineConfig;
//!
//! let config = EngineConfig::from_json(r#"{ "sample_rate": 48000, "clock": { "coupling": 2.0 } }"#).unwrap();
//! assert_eq!(config.sample_rate, 48000);
//! assert_eq!(config.clock.coupling, 2.0);
//! assert_eq!(config.clock.local_index, 0);
//! ```

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::f64::consts::TAU;

use serde::{Deserialize, Serialize};

use crate::bridge::DEFAULT_CAPACITY;
use crate::runtime::ParamDescriptor;

/// Processor registered by default, backed by [`ExprRuntime`](crate::runtime::ExprRuntime)
pub const DEFAULT_PROCESSOR: &str = "expr";

/// Step used by `more` / `less`
pub const PARAMETER_STEP: f64 = 0.5;

/// Top-level configuration for an [`AudioGraphController`](crate::AudioGraphController)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Requested sample rate. Backends that follow a device may override it.
    pub sample_rate: u32,
    /// Name of the processor module to load on `init`
    pub processor_name: String,
    pub node: RenderNodeOptions,
    pub clock: ClockConfig,
    /// Ring size of each bridge direction
    pub bridge_capacity: usize,
    /// Send a local phase report every this many rendered blocks
    pub phase_report_interval: u32,
    /// Control parameters exposed by the rendering context
    pub parameters: Vec<ParamDescriptor>,
    pub log: LogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            processor_name: String::from(DEFAULT_PROCESSOR),
            node: RenderNodeOptions::default(),
            clock: ClockConfig::default(),
            bridge_capacity: DEFAULT_CAPACITY,
            phase_report_interval: 1,
            parameters: vec![ParamDescriptor::new("gain", 1.0).with_range(0.0, 10.0)],
            log: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_processor(mut self, name: impl Into<String>) -> Self {
        self.processor_name = name.into();
        self
    }

    pub fn with_clock(mut self, clock: ClockConfig) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_bridge_capacity(mut self, capacity: usize) -> Self {
        self.bridge_capacity = capacity;
        self
    }

    pub fn with_phase_report_interval(mut self, blocks: u32) -> Self {
        self.phase_report_interval = blocks.max(1);
        self
    }

    /// Add (or replace, by name) a control parameter
    pub fn with_parameter(mut self, param: ParamDescriptor) -> Self {
        self.parameters.retain(|p| p.name != param.name);
        self.parameters.push(param);
        self
    }
}

/// Shape of the rendering node: the plain-struct replacement for a node subclass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderNodeOptions {
    pub inputs: usize,
    pub outputs: usize,
    pub output_channel_count: usize,
}

impl Default for RenderNodeOptions {
    fn default() -> Self {
        Self {
            inputs: 1,
            outputs: 1,
            output_channel_count: 2,
        }
    }
}

/// Kuramoto clock settings
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Index this peer uses on the network
    pub local_index: u32,
    /// Coupling strength K
    pub coupling: f64,
    /// Natural frequency in cycles per second
    pub frequency_hz: f64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        // one 4-beat bar per cycle at 120 BPM
        Self::from_bpm(120.0, 4.0)
    }
}

impl ClockConfig {
    /// One phase cycle spans `beats_per_cycle` beats at `bpm`
    pub fn from_bpm(bpm: f64, beats_per_cycle: f64) -> Self {
        Self {
            local_index: 0,
            coupling: 1.0,
            frequency_hz: bpm / 60.0 / beats_per_cycle,
        }
    }

    pub fn with_local_index(mut self, index: u32) -> Self {
        self.local_index = index;
        self
    }

    pub fn with_coupling(mut self, coupling: f64) -> Self {
        self.coupling = coupling;
        self
    }

    pub fn with_frequency_hz(mut self, hz: f64) -> Self {
        self.frequency_hz = hz;
        self
    }

    /// ω in radians per second
    #[inline]
    pub fn angular_frequency(&self) -> f64 {
        TAU * self.frequency_hz
    }
}

/// Logging settings for [`init_tracing`](crate::init_tracing)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `trace`, `debug`, `info`, `warn` or `error`
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
        }
    }
}
