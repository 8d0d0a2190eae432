//! Device session: endpoint, negotiated stream, buffer event, render arena and asset.
//!
//! A session is built in one pass by [`DeviceSession::initialise`]. Each resource is a
//! scoped value, so a failure part-way through releases exactly what was acquired so far,
//! newest first. A live session releases the same way because its fields are declared in
//! reverse acquisition order.

use std::time::Duration;

use crate::asset::{self, WaveData};
use crate::backend::{AudioBackend, BufferEvent, RenderEndpoint, RenderStream};
use crate::buffer::RenderBuffer;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::format::{Representation, WaveFormat, classify};
use crate::render::{self, Rendered};
use crate::synth::Tone;

/// Negotiated stream numbers, fixed for the session's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionInfo {
    pub format: WaveFormat,
    pub representation: Representation,
    pub channel_count: u16,
    pub sample_rate: u32,
    pub bytes_per_frame: usize,
    /// Hardware buffer capacity.
    pub max_buffer_frames: u32,
    /// Frames needed to cover the stream latency; the per-cycle write target.
    pub min_render_frames: u32,
    pub clock_frequency: u64,
    pub latency: Duration,
}

/// `round(sample_rate × latency)`.
pub fn min_render_frames(sample_rate: u32, latency: Duration) -> u32 {
    (f64::from(sample_rate) * latency.as_secs_f64()).round() as u32
}

// Field order is the release order.
pub struct DeviceSession {
    _asset: WaveData,
    render_buffer: RenderBuffer,
    event: BufferEvent,
    stream: Box<dyn RenderStream>,
    endpoint: Box<dyn RenderEndpoint>,
    info: SessionInfo,
}

impl DeviceSession {
    pub fn initialise(backend: &dyn AudioBackend, config: &EngineConfig) -> EngineResult<Self> {
        let mut endpoint = backend.open_endpoint()?;

        let format = endpoint.closest_format(&config.preferred_format)?;
        let representation = classify(&format)?;
        if format != config.preferred_format {
            tracing::debug!(
                requested = %config.preferred_format,
                closest = %format,
                "device proposed a different format"
            );
        }

        let mut stream = endpoint.initialize_stream(&format, config.buffer_duration)?;
        let event = stream.create_buffer_event()?;

        let latency = stream.stream_latency();
        let bytes_per_frame = format.channels as usize * representation.bytes_per_sample();
        let info = SessionInfo {
            format,
            representation,
            channel_count: format.channels,
            sample_rate: format.sample_rate,
            bytes_per_frame,
            max_buffer_frames: stream.buffer_frames(),
            min_render_frames: min_render_frames(format.sample_rate, latency),
            clock_frequency: stream.clock_frequency(),
            latency,
        };

        let render_buffer = RenderBuffer::new(info.max_buffer_frames, bytes_per_frame);

        let asset_path = config.asset_path();
        let asset = asset::load_wav(&asset_path)?;
        for issue in asset.compatibility_issues(&info) {
            tracing::warn!(path = %asset_path.display(), "sound asset mismatch: {issue}");
        }

        tracing::info!(
            backend = backend.name(),
            device = %endpoint.description(),
            format = %representation,
            channels = info.channel_count,
            rate_hz = info.sample_rate,
            buffer_frames = info.max_buffer_frames,
            min_render_frames = info.min_render_frames,
            latency_ms = latency.as_secs_f64() * 1000.0,
            clock_hz = info.clock_frequency,
            asset_secs = asset.duration_secs(),
            "audio device initialised"
        );

        Ok(Self {
            _asset: asset,
            render_buffer,
            event,
            stream,
            endpoint,
            info,
        })
    }

    pub fn info(&self) -> SessionInfo {
        self.info
    }

    pub fn description(&self) -> String {
        self.endpoint.description()
    }

    pub fn event(&self) -> &BufferEvent {
        &self.event
    }

    pub fn start(&mut self) -> EngineResult<()> {
        self.stream.start()
    }

    pub fn stop(&mut self) -> EngineResult<()> {
        self.stream.stop()
    }

    pub fn is_device_lost(&self) -> bool {
        self.stream.is_device_lost()
    }

    /// Run one render cycle against this session's stream and arena.
    pub fn render(&mut self, tone: &Tone, phase: f64) -> EngineResult<Rendered> {
        render::render_cycle(
            self.stream.as_mut(),
            &mut self.render_buffer,
            &self.info,
            tone,
            phase,
        )
    }
}
