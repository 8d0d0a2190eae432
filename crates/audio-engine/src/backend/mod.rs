//! Render device abstraction.
//!
//! The engine talks to hardware through three layers, mirroring how a shared-mode
//! audio API hands out resources:
//! - [`AudioBackend`]: opens a render endpoint (moved onto the worker thread)
//! - [`RenderEndpoint`]: answers format queries and initialises a stream
//! - [`RenderStream`]: the running hardware buffer (padding, checkout/commit, start/stop)
//!
//! Backends:
//! - [`cpal_backend`]: real output devices via CPAL
//! - [`sim`]: deterministic in-process device used by tests and `--simulate`

use std::fmt;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::error::EngineResult;
use crate::format::WaveFormat;

pub mod cpal_backend;
pub mod ring;
pub mod sim;

/// Factory for render endpoints.
///
/// Only the worker thread calls into a backend; device objects it returns never leave
/// that thread.
pub trait AudioBackend: Send + Sync {
    /// Short backend label for logs.
    fn name(&self) -> &str;

    /// Open the configured (or default) render endpoint.
    fn open_endpoint(&self) -> EngineResult<Box<dyn RenderEndpoint>>;
}

/// An opened render endpoint.
pub trait RenderEndpoint {
    /// Human-readable device description.
    fn description(&self) -> String;

    /// Return the device's closest supported match for `desired`.
    fn closest_format(&self, desired: &WaveFormat) -> EngineResult<WaveFormat>;

    /// Initialise a shared-mode stream with a hardware buffer of `buffer_duration`.
    fn initialize_stream(
        &mut self,
        format: &WaveFormat,
        buffer_duration: Duration,
    ) -> EngineResult<Box<dyn RenderStream>>;
}

/// An initialised (not necessarily started) render stream.
pub trait RenderStream {
    /// Create and register the event signalled whenever buffer space frees up.
    fn create_buffer_event(&mut self) -> EngineResult<BufferEvent>;

    /// Hardware buffer capacity in frames.
    fn buffer_frames(&self) -> u32;

    /// How far ahead of the playback head the writer must stay.
    fn stream_latency(&self) -> Duration;

    /// Device clock ticks per second.
    fn clock_frequency(&self) -> u64;

    /// Frames the device consumed per period, once known. The render target is raised to
    /// this when the device drains more per wakeup than the stream latency covers.
    fn period_frames(&self) -> Option<u32> {
        None
    }

    /// Frames queued in the hardware buffer awaiting playback.
    fn current_padding(&self) -> EngineResult<u32>;

    /// Check out `frames` frames of hardware buffer, copy `data` in, and commit.
    fn write_frames(&mut self, frames: u32, data: &[u8]) -> EngineResult<()>;

    fn start(&mut self) -> EngineResult<()>;

    fn stop(&mut self) -> EngineResult<()>;

    /// Whether the endpoint has disappeared underneath the stream.
    fn is_device_lost(&self) -> bool {
        false
    }
}

/// Outcome of waiting on a [`BufferEvent`].
#[cfg(test)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EventWait {
    Signalled,
    TimedOut,
    /// The signalling side is gone (device lost).
    Closed,
}

/// Auto-reset buffer-ready event.
///
/// Repeated signals before a wait collapse into one.
pub struct BufferEvent {
    rx: Receiver<()>,
    // Released together with the handle.
    guard: Option<Box<dyn Send>>,
}

impl fmt::Debug for BufferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferEvent")
            .field("rx", &self.rx)
            .field("guarded", &self.guard.is_some())
            .finish()
    }
}

/// Signalling half of a [`BufferEvent`], held by the device side.
#[derive(Clone, Debug)]
pub struct BufferSignal {
    tx: Sender<()>,
}

impl BufferEvent {
    pub fn new() -> (BufferSignal, BufferEvent) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        (BufferSignal { tx }, BufferEvent { rx, guard: None })
    }

    /// Tie `guard` to this handle so it is dropped when the event is.
    pub fn with_guard(mut self, guard: impl Send + 'static) -> Self {
        self.guard = Some(Box::new(guard));
        self
    }

    /// Receiver for use in `select!` alongside other channels.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }

    #[cfg(test)]
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> EventWait {
        use crossbeam_channel::RecvTimeoutError;

        match self.rx.recv_timeout(timeout) {
            Ok(()) => EventWait::Signalled,
            Err(RecvTimeoutError::Timeout) => EventWait::TimedOut,
            Err(RecvTimeoutError::Disconnected) => EventWait::Closed,
        }
    }
}

impl BufferSignal {
    /// Set the event. Returns `false` once the waiting side has been dropped.
    pub fn signal(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Disconnected(())) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signals_coalesce() {
        let (signal, event) = BufferEvent::new();
        assert!(signal.signal());
        assert!(signal.signal());
        assert_eq!(event.wait_timeout(Duration::from_millis(10)), EventWait::Signalled);
        assert_eq!(event.wait_timeout(Duration::from_millis(10)), EventWait::TimedOut);
    }

    #[test]
    fn dropped_signal_closes_event() {
        let (signal, event) = BufferEvent::new();
        drop(signal);
        assert_eq!(event.wait_timeout(Duration::from_millis(10)), EventWait::Closed);
    }

    #[test]
    fn guard_lives_as_long_as_event() {
        struct Flag(std::sync::Arc<std::sync::atomic::AtomicBool>);
        impl Drop for Flag {
            fn drop(&mut self) {
                self.0.store(true, std::sync::atomic::Ordering::Relaxed);
            }
        }

        let dropped = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let (_signal, event) = BufferEvent::new();
        let event = event.with_guard(Flag(dropped.clone()));
        let rx = event.receiver().clone();
        assert!(!dropped.load(std::sync::atomic::Ordering::Relaxed));
        drop(event);
        assert!(dropped.load(std::sync::atomic::Ordering::Relaxed));
        drop(rx);
    }

    #[test]
    fn dropped_event_is_reported_to_signaller() {
        let (signal, event) = BufferEvent::new();
        drop(event);
        assert!(!signal.signal());
    }
}
