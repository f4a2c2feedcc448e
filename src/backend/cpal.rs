//! Real-time output through the default CPAL device.

use alloc::format;
use alloc::vec::Vec;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SupportedStreamConfig};
use tracing::{error, info};

use super::{AudioBackend, ClockState, ContextOptions, RenderCommand, RenderHost, StreamInfo};
use crate::bridge::BridgeSender;
use crate::error::PlatformError;
use crate::graph::RenderGraph;
use crate::node::NodeId;

/// Backend driving the rendering graph from a CPAL output stream callback.
///
/// The device decides the sample rate; the requested one is only a hint.
pub struct CpalBackend {
    device: Option<(cpal::Device, SupportedStreamConfig)>,
    stream: Option<cpal::Stream>,
    commands: Option<BridgeSender<RenderCommand>>,
    state: ClockState,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            device: None,
            stream: None,
            commands: None,
            state: ClockState::Closed,
        }
    }

    fn command(&mut self, command: RenderCommand) {
        if let Some(tx) = self.commands.as_mut() {
            let _ = tx.send(command);
        }
    }

    fn stream(&self) -> Result<&cpal::Stream, PlatformError> {
        self.stream
            .as_ref()
            .ok_or_else(|| PlatformError::Stream("no output stream".into()))
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn open(&mut self, options: &ContextOptions) -> Result<StreamInfo, PlatformError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(PlatformError::NoDevice)?;
        let config = device
            .default_output_config()
            .map_err(|e| PlatformError::Unsupported(format!("{e}")))?;

        let info = StreamInfo {
            sample_rate: config.sample_rate().0,
            channels: config.channels() as usize,
        };
        info!(
            device = %device.name().unwrap_or_else(|_| "unknown".into()),
            requested = options.sample_rate,
            sample_rate = info.sample_rate,
            channels = info.channels,
            "output device opened"
        );

        self.device = Some((device, config));
        self.state = ClockState::Suspended;
        Ok(info)
    }

    fn attach(&mut self, graph: RenderGraph, processor: NodeId) -> Result<(), PlatformError> {
        let (device, config) = self.device.as_ref().ok_or(PlatformError::NoDevice)?;
        let (host, commands) = RenderHost::new(graph, processor, config.channels() as usize);

        let stream = build_stream(device, config.sample_format(), &config.config(), host)?;
        // keep the device clock stopped until resume
        stream.pause().map_err(|e| PlatformError::Stream(format!("{e}")))?;

        self.stream = Some(stream);
        self.commands = Some(commands);
        self.state = ClockState::Suspended;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), PlatformError> {
        self.command(RenderCommand::Resume);
        self.stream()?.play().map_err(|e| PlatformError::Stream(format!("{e}")))?;
        self.state = ClockState::Running;
        Ok(())
    }

    fn suspend(&mut self) -> Result<(), PlatformError> {
        self.command(RenderCommand::Suspend);
        self.stream()?.pause().map_err(|e| PlatformError::Stream(format!("{e}")))?;
        self.state = ClockState::Suspended;
        Ok(())
    }

    fn release(&mut self) {
        self.command(RenderCommand::Release);
        self.commands = None;
        // dropping the stream stops the callback and drops the host with it
        self.stream = None;
        self.state = ClockState::Closed;
    }

    fn clock_state(&self) -> ClockState {
        self.state
    }
}

fn build_stream(
    device: &cpal::Device,
    sample_format: SampleFormat,
    stream_config: &cpal::StreamConfig,
    mut host: RenderHost,
) -> Result<cpal::Stream, PlatformError> {
    let on_error = |err: cpal::StreamError| error!(%err, "output stream error");
    let mut scratch: Vec<f32> = Vec::new();

    let stream = match sample_format {
        SampleFormat::F32 => device.build_output_stream(
            stream_config,
            move |data: &mut [f32], _| host.fill(data),
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_output_stream(
            stream_config,
            move |data: &mut [i16], _| {
                scratch.resize(data.len(), 0.0);
                host.fill(&mut scratch);
                for (out, s) in data.iter_mut().zip(&scratch) {
                    *out = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                }
            },
            on_error,
            None,
        ),
        SampleFormat::U16 => device.build_output_stream(
            stream_config,
            move |data: &mut [u16], _| {
                scratch.resize(data.len(), 0.0);
                host.fill(&mut scratch);
                for (out, s) in data.iter_mut().zip(&scratch) {
                    *out = ((s.clamp(-1.0, 1.0) + 1.0) * 0.5 * u16::MAX as f32) as u16;
                }
            },
            on_error,
            None,
        ),
        other => {
            return Err(PlatformError::Unsupported(format!("sample format {other:?}")));
        }
    };

    stream.map_err(|e| PlatformError::Stream(format!("{e}")))
}
