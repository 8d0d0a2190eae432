//! Simulated render device.
//!
//! Behaves like a shared-mode endpoint without touching hardware:
//! - a clock thread drains one period of padding per tick while the stream is started and
//!   sets the buffer event
//! - every acquired resource is recorded in a [`SimMonitor`] together with its release, so
//!   tests can check teardown order
//! - failures can be injected at each initialisation step, on individual writes, or as a
//!   device loss while running

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender};

use super::{AudioBackend, BufferEvent, BufferSignal, RenderEndpoint, RenderStream};
use crate::error::{EngineError, EngineResult};
use crate::format::WaveFormat;

/// Upper bound on bytes kept by [`SimMonitor::captured`].
const MAX_CAPTURE_BYTES: usize = 1 << 20;

/// Initialisation step at which the simulated device fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailurePoint {
    Enumerate,
    Negotiate,
    StreamInit,
    EventCreation,
}

/// Device resources tracked by the monitor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimResource {
    Endpoint,
    Stream,
    BufferEvent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceEvent {
    Acquired(SimResource),
    Released(SimResource),
}

/// Behaviour of a [`SimBackend`].
#[derive(Clone, Debug)]
pub struct SimConfig {
    pub name: String,
    /// Format returned from every format query.
    pub closest_format: WaveFormat,
    /// Hardware buffer size; `None` derives it from the requested buffer duration.
    pub buffer_frames: Option<u32>,
    pub latency: Duration,
    /// Interval between clock ticks while started.
    pub period: Duration,
    pub clock_frequency: u64,
    pub fail_at: Option<FailurePoint>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            name: "simulated output".to_string(),
            closest_format: WaveFormat::preferred(),
            buffer_frames: None,
            latency: Duration::from_millis(10),
            period: Duration::from_millis(10),
            clock_frequency: 10_000_000,
            fail_at: None,
        }
    }
}

impl SimConfig {
    pub fn with_format(mut self, format: WaveFormat) -> Self {
        self.closest_format = format;
        self
    }

    pub fn with_timing(mut self, latency: Duration, period: Duration) -> Self {
        self.latency = latency;
        self.period = period;
        self
    }

    pub fn failing_at(mut self, point: FailurePoint) -> Self {
        self.fail_at = Some(point);
        self
    }
}

#[derive(Default)]
struct MonitorInner {
    events: Mutex<Vec<ResourceEvent>>,
    starts: AtomicU64,
    stops: AtomicU64,
    frames_written: AtomicU64,
    frames_played: AtomicU64,
    captured: Mutex<Vec<u8>>,
    pending_write_failures: AtomicU32,
    pending_start_failure: AtomicBool,
    lost: AtomicBool,
    signal: Mutex<Option<BufferSignal>>,
}

/// Observation and fault-injection handle shared with a [`SimBackend`].
#[derive(Clone, Default)]
pub struct SimMonitor {
    inner: Arc<MonitorInner>,
}

impl SimMonitor {
    /// Every acquire/release so far, in order.
    pub fn events(&self) -> Vec<ResourceEvent> {
        self.inner
            .events
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    /// Resources acquired and not yet released.
    pub fn live_resources(&self) -> Vec<SimResource> {
        let mut live = Vec::new();
        for event in self.events() {
            match event {
                ResourceEvent::Acquired(r) => live.push(r),
                ResourceEvent::Released(r) => {
                    if let Some(pos) = live.iter().rposition(|x| *x == r) {
                        live.remove(pos);
                    }
                }
            }
        }
        live
    }

    /// Resources in the order they were released.
    pub fn releases(&self) -> Vec<SimResource> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ResourceEvent::Released(r) => Some(r),
                ResourceEvent::Acquired(_) => None,
            })
            .collect()
    }

    pub fn starts(&self) -> u64 {
        self.inner.starts.load(Ordering::Relaxed)
    }

    pub fn stops(&self) -> u64 {
        self.inner.stops.load(Ordering::Relaxed)
    }

    pub fn frames_written(&self) -> u64 {
        self.inner.frames_written.load(Ordering::Relaxed)
    }

    pub fn frames_played(&self) -> u64 {
        self.inner.frames_played.load(Ordering::Relaxed)
    }

    /// Bytes committed to the hardware buffer, in order (capped at 1 MiB).
    pub fn captured(&self) -> Vec<u8> {
        self.inner
            .captured
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    /// Make the next `count` buffer checkouts fail.
    pub fn fail_next_writes(&self, count: u32) {
        self.inner
            .pending_write_failures
            .store(count, Ordering::Relaxed);
    }

    /// Make the next stream start fail with a transient error.
    pub fn fail_next_start(&self) {
        self.inner.pending_start_failure.store(true, Ordering::Relaxed);
    }

    /// Pull the device: further calls fail with `DeviceLost` and the buffer event closes.
    pub fn lose_device(&self) {
        self.inner.lost.store(true, Ordering::Relaxed);
        if let Ok(mut g) = self.inner.signal.lock() {
            g.take();
        }
    }

    fn is_lost(&self) -> bool {
        self.inner.lost.load(Ordering::Relaxed)
    }

    fn record(&self, event: ResourceEvent) {
        if let Ok(mut g) = self.inner.events.lock() {
            g.push(event);
        }
    }

    fn set_signal(&self, signal: BufferSignal) {
        if let Ok(mut g) = self.inner.signal.lock() {
            *g = Some(signal);
        }
    }

    fn signal(&self) {
        if let Ok(g) = self.inner.signal.lock() {
            if let Some(signal) = g.as_ref() {
                signal.signal();
            }
        }
    }

    fn take_write_failure(&self) -> bool {
        self.inner
            .pending_write_failures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
    }

    fn take_start_failure(&self) -> bool {
        self.inner.pending_start_failure.swap(false, Ordering::Relaxed)
    }

    fn capture(&self, bytes: &[u8]) {
        if let Ok(mut g) = self.inner.captured.lock() {
            let room = MAX_CAPTURE_BYTES.saturating_sub(g.len());
            g.extend_from_slice(&bytes[..bytes.len().min(room)]);
        }
    }
}

/// Records the release of a resource when dropped.
struct Tracked {
    resource: SimResource,
    monitor: SimMonitor,
}

impl Tracked {
    fn acquire(resource: SimResource, monitor: &SimMonitor) -> Self {
        monitor.record(ResourceEvent::Acquired(resource));
        Self {
            resource,
            monitor: monitor.clone(),
        }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.monitor.record(ResourceEvent::Released(self.resource));
    }
}

/// In-process backend; each instance models one physical endpoint.
pub struct SimBackend {
    config: SimConfig,
    monitor: SimMonitor,
    claimed: Arc<AtomicBool>,
}

impl SimBackend {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            monitor: SimMonitor::default(),
            claimed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn monitor(&self) -> SimMonitor {
        self.monitor.clone()
    }
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl AudioBackend for SimBackend {
    fn name(&self) -> &str {
        "sim"
    }

    fn open_endpoint(&self) -> EngineResult<Box<dyn RenderEndpoint>> {
        if self.config.fail_at == Some(FailurePoint::Enumerate) {
            return Err(EngineError::DeviceEnumeration(
                "simulated: no render endpoint".to_string(),
            ));
        }
        if self
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EngineError::AlreadyInitialised);
        }
        Ok(Box::new(SimEndpoint {
            config: self.config.clone(),
            tracked: Tracked::acquire(SimResource::Endpoint, &self.monitor),
            claimed: self.claimed.clone(),
        }))
    }
}

struct SimEndpoint {
    config: SimConfig,
    tracked: Tracked,
    claimed: Arc<AtomicBool>,
}

impl Drop for SimEndpoint {
    fn drop(&mut self) {
        self.claimed.store(false, Ordering::Release);
    }
}

impl RenderEndpoint for SimEndpoint {
    fn description(&self) -> String {
        self.config.name.clone()
    }

    fn closest_format(&self, _desired: &WaveFormat) -> EngineResult<WaveFormat> {
        if self.config.fail_at == Some(FailurePoint::Negotiate) {
            return Err(EngineError::FormatNegotiation(
                "simulated: format query rejected".to_string(),
            ));
        }
        Ok(self.config.closest_format)
    }

    fn initialize_stream(
        &mut self,
        format: &WaveFormat,
        buffer_duration: Duration,
    ) -> EngineResult<Box<dyn RenderStream>> {
        if self.config.fail_at == Some(FailurePoint::StreamInit) {
            return Err(EngineError::StreamInit(
                "simulated: stream initialisation failed".to_string(),
            ));
        }
        let monitor = self.tracked.monitor.clone();
        let capacity = self.config.buffer_frames.unwrap_or_else(|| {
            ((f64::from(format.sample_rate) * buffer_duration.as_secs_f64()).round() as u32).max(1)
        });
        let period_frames = ((f64::from(format.sample_rate) * self.config.period.as_secs_f64())
            .round() as u32)
            .max(1);
        let tracked = Tracked::acquire(SimResource::Stream, &monitor);
        Ok(Box::new(SimStream {
            clock: None,
            event_registered: false,
            shared: Arc::new(SimShared {
                block_align: format.block_align(),
                capacity,
                period_frames,
                period: self.config.period,
                padding: Mutex::new(0),
                monitor,
            }),
            latency: self.config.latency,
            clock_frequency: self.config.clock_frequency,
            fail_event: self.config.fail_at == Some(FailurePoint::EventCreation),
            _tracked: tracked,
        }))
    }
}

struct SimShared {
    block_align: usize,
    capacity: u32,
    period_frames: u32,
    period: Duration,
    padding: Mutex<u32>,
    monitor: SimMonitor,
}

impl SimShared {
    fn tick(&self) {
        let consumed = match self.padding.lock() {
            Ok(mut padding) => {
                let consumed = (*padding).min(self.period_frames);
                *padding -= consumed;
                consumed
            }
            Err(_) => 0,
        };
        self.monitor
            .inner
            .frames_played
            .fetch_add(u64::from(consumed), Ordering::Relaxed);
        self.monitor.signal();
    }
}

/// Playback-head thread; dropping it stops and joins the thread.
struct SimClock {
    stop_tx: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl SimClock {
    fn spawn(shared: Arc<SimShared>) -> EngineResult<Self> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let join = std::thread::Builder::new()
            .name("sim-clock".to_string())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(shared.period) {
                        Err(RecvTimeoutError::Timeout) => shared.tick(),
                        _ => break,
                    }
                }
            })
            .map_err(|e| EngineError::Render(format!("sim clock: {e}")))?;
        Ok(Self {
            stop_tx: Some(stop_tx),
            join: Some(join),
        })
    }
}

impl Drop for SimClock {
    fn drop(&mut self) {
        self.stop_tx.take();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

struct SimStream {
    clock: Option<SimClock>,
    event_registered: bool,
    shared: Arc<SimShared>,
    latency: Duration,
    clock_frequency: u64,
    fail_event: bool,
    _tracked: Tracked,
}

impl SimStream {
    fn ensure_present(&self) -> EngineResult<()> {
        if self.shared.monitor.is_lost() {
            Err(EngineError::DeviceLost)
        } else {
            Ok(())
        }
    }
}

impl RenderStream for SimStream {
    fn create_buffer_event(&mut self) -> EngineResult<BufferEvent> {
        if self.fail_event {
            return Err(EngineError::EventCreation(
                "simulated: event registration failed".to_string(),
            ));
        }
        if self.event_registered {
            return Err(EngineError::EventCreation(
                "buffer event already registered".to_string(),
            ));
        }
        let (signal, event) = BufferEvent::new();
        self.shared.monitor.set_signal(signal);
        self.event_registered = true;
        // The release is recorded when the caller drops the event, not the stream.
        Ok(event.with_guard(Tracked::acquire(
            SimResource::BufferEvent,
            &self.shared.monitor,
        )))
    }

    fn buffer_frames(&self) -> u32 {
        self.shared.capacity
    }

    fn stream_latency(&self) -> Duration {
        self.latency
    }

    fn clock_frequency(&self) -> u64 {
        self.clock_frequency
    }

    fn current_padding(&self) -> EngineResult<u32> {
        self.ensure_present()?;
        self.shared
            .padding
            .lock()
            .map(|p| *p)
            .map_err(|_| EngineError::Render("padding poisoned".to_string()))
    }

    fn write_frames(&mut self, frames: u32, data: &[u8]) -> EngineResult<()> {
        self.ensure_present()?;
        let monitor = &self.shared.monitor;
        if monitor.take_write_failure() {
            return Err(EngineError::Render(
                "simulated: buffer checkout failed".to_string(),
            ));
        }
        let len = frames as usize * self.shared.block_align;
        let Some(bytes) = data.get(..len) else {
            return Err(EngineError::Render(format!(
                "short write: {} bytes for {frames} frames",
                data.len()
            )));
        };
        let mut padding = self
            .shared
            .padding
            .lock()
            .map_err(|_| EngineError::Render("padding poisoned".to_string()))?;
        let free = self.shared.capacity.saturating_sub(*padding);
        if frames > free {
            return Err(EngineError::Render(format!(
                "buffer too small: requested {frames} frames, {free} free"
            )));
        }
        *padding += frames;
        drop(padding);

        monitor
            .inner
            .frames_written
            .fetch_add(u64::from(frames), Ordering::Relaxed);
        monitor.capture(bytes);
        Ok(())
    }

    fn start(&mut self) -> EngineResult<()> {
        self.ensure_present()?;
        if self.shared.monitor.take_start_failure() {
            return Err(EngineError::Render(
                "simulated: stream start rejected".to_string(),
            ));
        }
        if self.clock.is_none() {
            self.clock = Some(SimClock::spawn(self.shared.clone())?);
        }
        self.shared.monitor.inner.starts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn stop(&mut self) -> EngineResult<()> {
        self.clock.take();
        self.shared.monitor.inner.stops.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn is_device_lost(&self) -> bool {
        self.shared.monitor.is_lost()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::EventWait;

    #[test]
    fn resources_release_in_reverse_order() {
        let backend = SimBackend::default();
        let monitor = backend.monitor();
        {
            let mut endpoint = backend.open_endpoint().unwrap();
            let format = endpoint.closest_format(&WaveFormat::preferred()).unwrap();
            let mut stream = endpoint
                .initialize_stream(&format, Duration::from_secs(1))
                .unwrap();
            let _event = stream.create_buffer_event().unwrap();
            assert_eq!(monitor.live_resources().len(), 3);
        }
        assert!(monitor.live_resources().is_empty());
        assert_eq!(
            monitor.releases(),
            vec![
                SimResource::BufferEvent,
                SimResource::Stream,
                SimResource::Endpoint
            ]
        );
    }

    #[test]
    fn event_release_follows_the_event_handle() {
        let backend = SimBackend::default();
        let monitor = backend.monitor();
        let mut endpoint = backend.open_endpoint().unwrap();
        let mut stream = endpoint
            .initialize_stream(&WaveFormat::preferred(), Duration::from_secs(1))
            .unwrap();
        let event = stream.create_buffer_event().unwrap();
        drop(stream);
        assert_eq!(
            monitor.live_resources(),
            vec![SimResource::Endpoint, SimResource::BufferEvent]
        );
        drop(event);
        drop(endpoint);
        assert_eq!(
            monitor.releases(),
            vec![
                SimResource::Stream,
                SimResource::BufferEvent,
                SimResource::Endpoint
            ]
        );
    }

    #[test]
    fn injected_start_failure_is_consumed() {
        let backend = SimBackend::default();
        let monitor = backend.monitor();
        let mut endpoint = backend.open_endpoint().unwrap();
        let mut stream = endpoint
            .initialize_stream(&WaveFormat::preferred(), Duration::from_secs(1))
            .unwrap();
        monitor.fail_next_start();
        assert!(matches!(stream.start(), Err(EngineError::Render(_))));
        assert_eq!(monitor.starts(), 0);
        stream.start().unwrap();
        stream.stop().unwrap();
        assert_eq!((monitor.starts(), monitor.stops()), (1, 1));
    }

    #[test]
    fn endpoint_can_only_be_claimed_once() {
        let backend = SimBackend::default();
        let first = backend.open_endpoint().unwrap();
        assert!(matches!(
            backend.open_endpoint(),
            Err(EngineError::AlreadyInitialised)
        ));
        drop(first);
        assert!(backend.open_endpoint().is_ok());
    }

    #[test]
    fn clock_drains_padding_and_signals() {
        let backend = SimBackend::new(
            SimConfig::default().with_timing(Duration::from_millis(1), Duration::from_millis(1)),
        );
        let monitor = backend.monitor();
        let mut endpoint = backend.open_endpoint().unwrap();
        let format = WaveFormat::preferred();
        let mut stream = endpoint
            .initialize_stream(&format, Duration::from_millis(100))
            .unwrap();
        let event = stream.create_buffer_event().unwrap();
        assert_eq!(stream.buffer_frames(), 4_800);

        stream.write_frames(96, &vec![0u8; 96 * 8]).unwrap();
        assert_eq!(stream.current_padding().unwrap(), 96);

        stream.start().unwrap();
        assert_eq!(event.wait_timeout(Duration::from_secs(1)), EventWait::Signalled);
        stream.stop().unwrap();
        assert!(stream.current_padding().unwrap() < 96);
        assert!(monitor.frames_played() > 0);
        assert_eq!((monitor.starts(), monitor.stops()), (1, 1));
    }

    #[test]
    fn overfull_write_is_rejected() {
        let backend = SimBackend::new(SimConfig {
            buffer_frames: Some(16),
            ..SimConfig::default()
        });
        let mut endpoint = backend.open_endpoint().unwrap();
        let mut stream = endpoint
            .initialize_stream(&WaveFormat::preferred(), Duration::from_secs(1))
            .unwrap();
        assert!(stream.write_frames(17, &vec![0u8; 17 * 8]).is_err());
        stream.write_frames(16, &vec![0u8; 16 * 8]).unwrap();
        assert!(stream.write_frames(1, &[0u8; 8]).is_err());
    }

    #[test]
    fn injected_write_failures_are_consumed() {
        let backend = SimBackend::default();
        let monitor = backend.monitor();
        let mut endpoint = backend.open_endpoint().unwrap();
        let mut stream = endpoint
            .initialize_stream(&WaveFormat::preferred(), Duration::from_secs(1))
            .unwrap();
        monitor.fail_next_writes(1);
        assert!(matches!(
            stream.write_frames(1, &[0u8; 8]),
            Err(EngineError::Render(_))
        ));
        stream.write_frames(1, &[0u8; 8]).unwrap();
        assert_eq!(monitor.frames_written(), 1);
    }

    #[test]
    fn lost_device_closes_event() {
        let backend = SimBackend::default();
        let monitor = backend.monitor();
        let mut endpoint = backend.open_endpoint().unwrap();
        let mut stream = endpoint
            .initialize_stream(&WaveFormat::preferred(), Duration::from_secs(1))
            .unwrap();
        let event = stream.create_buffer_event().unwrap();
        monitor.lose_device();
        assert_eq!(event.wait_timeout(Duration::from_millis(50)), EventWait::Closed);
        assert!(stream.is_device_lost());
        assert_eq!(stream.current_padding(), Err(EngineError::DeviceLost));
    }
}
