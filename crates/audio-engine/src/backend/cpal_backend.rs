//! CPAL render backend.
//!
//! CPAL drives output through a pull callback, so the push-style render stream the
//! engine expects is emulated:
//! - the hardware buffer is a [`HardwareRing`] sized to the requested buffer duration
//! - the output callback drains the ring, pads underruns with silence, then sets the
//!   buffer event so the worker refills
//! - stream latency is one callback period; when the host picks its own period, the
//!   size of the callbacks actually seen is reported through `period_frames`
//!
//! Device selection and format choice follow the same ranking rules used elsewhere for
//! picking output configs: channel match, then sample-rate distance, then sample format.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::ring::{HardwareRing, RingSample};
use super::{AudioBackend, BufferEvent, BufferSignal, RenderEndpoint, RenderStream};
use crate::error::{EngineError, EngineResult};
use crate::format::{FormatTag, Representation, WaveFormat, classify};

/// Callback period assumed when the device does not advertise buffer sizes.
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(10);

/// Only one CPAL endpoint may be open per process.
static ENDPOINT_CLAIMED: AtomicBool = AtomicBool::new(false);

struct EndpointClaim;

impl EndpointClaim {
    fn acquire() -> EngineResult<Self> {
        if ENDPOINT_CLAIMED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EngineError::AlreadyInitialised);
        }
        Ok(EndpointClaim)
    }
}

impl Drop for EndpointClaim {
    fn drop(&mut self) {
        ENDPOINT_CLAIMED.store(false, Ordering::Release);
    }
}

/// Opens the host default output device, or the first device whose name contains
/// `device_name` (case-insensitive).
#[derive(Clone, Debug, Default)]
pub struct CpalBackend {
    device_name: Option<String>,
}

impl CpalBackend {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn open_endpoint(&self) -> EngineResult<Box<dyn RenderEndpoint>> {
        let claim = EndpointClaim::acquire()?;
        let host = cpal::default_host();
        let device = pick_device(&host, self.device_name.as_deref())?;
        let description = device
            .description()
            .map(|d| d.to_string())
            .unwrap_or_else(|_| "unknown device".to_string());
        tracing::debug!(device = %description, host = ?host.id(), "render endpoint opened");
        Ok(Box::new(CpalEndpoint {
            device,
            description,
            _claim: claim,
        }))
    }
}

/// Describe every output device on the default host.
pub fn list_devices() -> EngineResult<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| EngineError::DeviceEnumeration(e.to_string()))?;
    Ok(devices
        .map(|d| {
            d.description()
                .map(|n| n.to_string())
                .unwrap_or_else(|e| format!("<unnamed: {e}>"))
        })
        .collect())
}

/// Pick the first output device matching `needle` (case-insensitive), or the default device.
fn pick_device(host: &cpal::Host, needle: Option<&str>) -> EngineResult<cpal::Device> {
    if let Some(needle) = needle {
        let mut devices = host
            .output_devices()
            .map_err(|e| EngineError::DeviceEnumeration(e.to_string()))?;
        return devices
            .find(|d| {
                d.description()
                    .ok()
                    .map(|n| matches_device_name(&n.name(), needle))
                    .unwrap_or(false)
            })
            .ok_or_else(|| {
                EngineError::DeviceEnumeration(format!("no output device matched: {needle}"))
            });
    }

    host.default_output_device()
        .ok_or_else(|| EngineError::DeviceEnumeration("no default output device".to_string()))
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

struct CpalEndpoint {
    device: cpal::Device,
    description: String,
    _claim: EndpointClaim,
}

impl RenderEndpoint for CpalEndpoint {
    fn description(&self) -> String {
        self.description.clone()
    }

    fn closest_format(&self, desired: &WaveFormat) -> EngineResult<WaveFormat> {
        let config = pick_output_config(&self.device, desired.sample_rate, desired.channels)?;
        Ok(wave_format_from_cpal(
            config.sample_format(),
            config.channels(),
            config.sample_rate(),
        ))
    }

    fn initialize_stream(
        &mut self,
        format: &WaveFormat,
        buffer_duration: Duration,
    ) -> EngineResult<Box<dyn RenderStream>> {
        let representation = classify(format)?;
        let config = pick_output_config(&self.device, format.sample_rate, format.channels)
            .map_err(|e| EngineError::StreamInit(e.to_string()))?;
        let offered = wave_format_from_cpal(
            config.sample_format(),
            config.channels(),
            config.sample_rate(),
        );
        if offered != *format {
            return Err(EngineError::StreamInit(format!(
                "device now offers {offered}, expected {format}"
            )));
        }

        let sample_rate = format.sample_rate;
        let mut stream_config: cpal::StreamConfig = config.clone().into();
        let period = pick_period_frames(config.buffer_size(), sample_rate);
        if let Some(frames) = period {
            stream_config.buffer_size = cpal::BufferSize::Fixed(frames);
        }
        let latency = period
            .map(|frames| Duration::from_secs_f64(f64::from(frames) / f64::from(sample_rate)))
            .unwrap_or(DEFAULT_PERIOD);

        let capacity = frames_for_duration(buffer_duration, sample_rate);
        let ring = Arc::new(HardwareRing::new(capacity, format.block_align()));
        let signal = Arc::new(OnceLock::new());
        let lost = Arc::new(AtomicBool::new(false));

        let stream = match representation {
            Representation::Integer => build_stream::<i16>(
                &self.device,
                &stream_config,
                ring.clone(),
                signal.clone(),
                lost.clone(),
            )?,
            Representation::Float => build_stream::<f32>(
                &self.device,
                &stream_config,
                ring.clone(),
                signal.clone(),
                lost.clone(),
            )?,
        };
        // Some hosts start streams as soon as they are built.
        if let Err(e) = stream.pause() {
            tracing::debug!("initial pause not supported: {e}");
        }

        tracing::info!(
            rate_hz = sample_rate,
            channels = format.channels,
            period = ?stream_config.buffer_size,
            capacity_frames = capacity,
            "cpal stream initialised"
        );

        Ok(Box::new(CpalStream {
            stream,
            ring,
            signal,
            lost,
            latency,
            clock_frequency: u64::from(sample_rate),
        }))
    }
}

/// Choose the supported config closest to `target_rate` / `target_channels`.
///
/// Ranking: exact channel count first, then smallest sample-rate distance, then sample
/// format (`F32` before `I16` before anything else).
fn pick_output_config(
    device: &cpal::Device,
    target_rate: u32,
    target_channels: u16,
) -> EngineResult<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = device
        .supported_output_configs()
        .map_err(|e| EngineError::FormatNegotiation(e.to_string()))?
        .collect();

    let mut best: Option<(Candidate, cpal::SupportedStreamConfig)> = None;
    for range in ranges {
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let candidate = Candidate {
            channels_match: range.channels() == target_channels,
            rate_distance: rate.abs_diff(target_rate),
            format_rank: sample_format_rank(range.sample_format()),
        };
        let replace = match &best {
            None => true,
            Some((current, _)) => candidate.is_better_than(current),
        };
        if replace {
            best = Some((candidate, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, config)| config)
        .ok_or_else(|| EngineError::FormatNegotiation("no supported output configs".to_string()))
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    channels_match: bool,
    rate_distance: u32,
    format_rank: u8,
}

impl Candidate {
    fn is_better_than(&self, other: &Candidate) -> bool {
        if self.channels_match != other.channels_match {
            self.channels_match
        } else if self.rate_distance != other.rate_distance {
            self.rate_distance < other.rate_distance
        } else {
            self.format_rank < other.format_rank
        }
    }
}

fn pick_rate_for_range(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I16 => 1,
        _ => 10,
    }
}

/// Map a CPAL sample format onto a wave format tag.
fn wave_format_from_cpal(
    sample_format: cpal::SampleFormat,
    channels: u16,
    sample_rate: u32,
) -> WaveFormat {
    let tag = if sample_format.is_float() {
        FormatTag::IeeeFloat
    } else if sample_format.is_int() {
        FormatTag::Pcm
    } else {
        FormatTag::Unknown(0)
    };
    WaveFormat {
        tag,
        channels,
        sample_rate,
        bits_per_sample: (sample_format.sample_size() * 8) as u16,
    }
}

/// Callback period closest to [`DEFAULT_PERIOD`] that the device accepts.
///
/// Returns `None` when the device only supports its default buffer size.
fn pick_period_frames(buffer_size: &cpal::SupportedBufferSize, sample_rate: u32) -> Option<u32> {
    match buffer_size {
        cpal::SupportedBufferSize::Range { min, max } => {
            let target = frames_for_duration(DEFAULT_PERIOD, sample_rate);
            Some(target.clamp(*min, (*max).max(*min)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

fn frames_for_duration(duration: Duration, sample_rate: u32) -> u32 {
    ((f64::from(sample_rate) * duration.as_secs_f64()).round() as u32).max(1)
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    ring: Arc<HardwareRing>,
    signal: Arc<OnceLock<BufferSignal>>,
    lost: Arc<AtomicBool>,
) -> EngineResult<cpal::Stream>
where
    T: RingSample + cpal::SizedSample + Send + 'static,
{
    let lost_cb = lost.clone();
    let err_fn = move |err: cpal::StreamError| {
        if matches!(err, cpal::StreamError::DeviceNotAvailable) {
            lost_cb.store(true, Ordering::Relaxed);
            tracing::error!("output device no longer available");
        } else {
            tracing::warn!("stream error: {err}");
        }
    };

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                ring.read_into(data);
                if let Some(signal) = signal.get() {
                    signal.signal();
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| EngineError::StreamInit(e.to_string()))
}

struct CpalStream {
    stream: cpal::Stream,
    ring: Arc<HardwareRing>,
    signal: Arc<OnceLock<BufferSignal>>,
    lost: Arc<AtomicBool>,
    latency: Duration,
    clock_frequency: u64,
}

impl CpalStream {
    fn ensure_present(&self) -> EngineResult<()> {
        if self.lost.load(Ordering::Relaxed) {
            Err(EngineError::DeviceLost)
        } else {
            Ok(())
        }
    }
}

impl RenderStream for CpalStream {
    fn create_buffer_event(&mut self) -> EngineResult<BufferEvent> {
        let (signal, event) = BufferEvent::new();
        self.signal
            .set(signal)
            .map_err(|_| EngineError::EventCreation("buffer event already registered".to_string()))?;
        Ok(event)
    }

    fn buffer_frames(&self) -> u32 {
        self.ring.capacity_frames()
    }

    fn stream_latency(&self) -> Duration {
        self.latency
    }

    fn clock_frequency(&self) -> u64 {
        self.clock_frequency
    }

    fn period_frames(&self) -> Option<u32> {
        Some(self.ring.callback_frames()).filter(|&frames| frames > 0)
    }

    fn current_padding(&self) -> EngineResult<u32> {
        self.ensure_present()?;
        self.ring.padding_frames()
    }

    fn write_frames(&mut self, frames: u32, data: &[u8]) -> EngineResult<()> {
        self.ensure_present()?;
        self.ring.write(frames, data)
    }

    fn start(&mut self) -> EngineResult<()> {
        self.ensure_present()?;
        self.stream
            .play()
            .map_err(|e| EngineError::Render(format!("start: {e}")))
    }

    fn stop(&mut self) -> EngineResult<()> {
        self.stream
            .pause()
            .map_err(|e| EngineError::Render(format!("stop: {e}")))
    }

    fn is_device_lost(&self) -> bool {
        self.lost.load(Ordering::Relaxed)
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        let (underrun_samples, underrun_events) = self.ring.underruns();
        tracing::debug!(underrun_samples, underrun_events, "cpal stream released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", "  "));
    }

    #[test]
    fn pick_rate_for_range_clamps_to_range() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, 48_000), 48_000);
        assert_eq!(pick_rate_for_range(44_100, 96_000, 22_050), 44_100);
        assert_eq!(pick_rate_for_range(44_100, 96_000, 192_000), 96_000);
    }

    #[test]
    fn candidate_prefers_channel_match_then_rate_then_format() {
        let base = Candidate {
            channels_match: true,
            rate_distance: 0,
            format_rank: 1,
        };
        let wrong_channels = Candidate {
            channels_match: false,
            rate_distance: 0,
            format_rank: 0,
        };
        assert!(base.is_better_than(&wrong_channels));

        let farther = Candidate {
            rate_distance: 3_900,
            format_rank: 0,
            ..base
        };
        assert!(base.is_better_than(&farther));

        let float = Candidate {
            format_rank: 0,
            ..base
        };
        assert!(float.is_better_than(&base));
    }

    #[test]
    fn wave_format_from_cpal_maps_tags() {
        let f = wave_format_from_cpal(cpal::SampleFormat::F32, 2, 48_000);
        assert_eq!(f.tag, FormatTag::IeeeFloat);
        assert_eq!(f.bits_per_sample, 32);
        assert_eq!(classify(&f).unwrap(), Representation::Float);

        let i = wave_format_from_cpal(cpal::SampleFormat::I16, 2, 44_100);
        assert_eq!(i.tag, FormatTag::Pcm);
        assert_eq!(classify(&i).unwrap(), Representation::Integer);

        let u = wave_format_from_cpal(cpal::SampleFormat::U16, 2, 44_100);
        assert!(classify(&u).is_err());

        let wide = wave_format_from_cpal(cpal::SampleFormat::I32, 2, 44_100);
        assert!(classify(&wide).is_err());
    }

    #[test]
    fn period_targets_ten_milliseconds() {
        let range = cpal::SupportedBufferSize::Range { min: 64, max: 4096 };
        assert_eq!(pick_period_frames(&range, 48_000), Some(480));

        let tight = cpal::SupportedBufferSize::Range { min: 1024, max: 4096 };
        assert_eq!(pick_period_frames(&tight, 48_000), Some(1024));

        assert_eq!(pick_period_frames(&cpal::SupportedBufferSize::Unknown, 48_000), None);
    }

    #[test]
    fn frames_for_duration_rounds() {
        assert_eq!(frames_for_duration(Duration::from_secs(1), 48_000), 48_000);
        assert_eq!(frames_for_duration(Duration::from_millis(10), 44_100), 441);
        assert_eq!(frames_for_duration(Duration::ZERO, 48_000), 1);
    }
}
