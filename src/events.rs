//! Adapter from pub/sub topics to controller operations.
//!
//! The bus itself lives outside this crate; it hands us a topic name and a
//! JSON payload, and [`ControlEvent::from_topic`] turns the pair into a typed
//! event for [`AudioGraphController::handle_event`](crate::AudioGraphController::handle_event).

use alloc::string::String;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::eval::EvalCommand;

pub const EVAL_DSP: &str = "eval-dsp";
pub const STOP_AUDIO: &str = "stop-audio";
pub const LOAD_SAMPLE: &str = "load-sample";

/// An event the controller subscribes to
#[derive(Clone, Debug, PartialEq)]
pub enum ControlEvent {
    /// `eval-dsp` with `{setup, loop}`
    EvalDsp(EvalCommand),
    /// `stop-audio`, payload ignored
    StopAudio,
    /// `load-sample` with `{name, url}`
    LoadSample { name: String, url: String },
}

#[derive(Error, Debug)]
pub enum EventError {
    #[error("not subscribed to topic `{0}`")]
    UnknownTopic(String),

    #[error("malformed `{topic}` payload: {source}")]
    Payload {
        topic: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct LoadSamplePayload {
    name: String,
    #[serde(default)]
    url: String,
}

impl ControlEvent {
    /// Decode a bus message
    pub fn from_topic(topic: &str, payload: &Value) -> Result<Self, EventError> {
        match topic {
            EVAL_DSP => EvalCommand::deserialize(payload)
                .map(ControlEvent::EvalDsp)
                .map_err(|source| EventError::Payload { topic: EVAL_DSP, source }),
            STOP_AUDIO => Ok(ControlEvent::StopAudio),
            LOAD_SAMPLE => LoadSamplePayload::deserialize(payload)
                .map(|p| ControlEvent::LoadSample { name: p.name, url: p.url })
                .map_err(|source| EventError::Payload { topic: LOAD_SAMPLE, source }),
            other => Err(EventError::UnknownTopic(other.into())),
        }
    }

    pub fn topic(&self) -> &'static str {
        match self {
            ControlEvent::EvalDsp(_) => EVAL_DSP,
            ControlEvent::StopAudio => STOP_AUDIO,
            ControlEvent::LoadSample { .. } => LOAD_SAMPLE,
        }
    }
}
