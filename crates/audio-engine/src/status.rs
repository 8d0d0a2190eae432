use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::EngineError;
use crate::session::SessionInfo;

/// Lifecycle of the sound worker as seen from outside.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EngineState {
    #[default]
    Uninitialised,
    Initialising,
    /// Session open, stream stopped.
    Idle,
    /// Stream started, render loop active.
    Running,
    Terminating,
    Terminated,
}

/// Render-loop counters, bumped by the worker without taking the status lock.
#[derive(Clone, Debug, Default)]
pub struct RenderCounters {
    /// Cycles that completed (including ones with nothing to write).
    pub render_cycles: Arc<AtomicU64>,
    pub frames_rendered: Arc<AtomicU64>,
    /// Cycles dropped after a transient padding or write failure.
    pub skipped_cycles: Arc<AtomicU64>,
    /// Waits on the buffer-ready event that ran into the timeout.
    pub ready_timeouts: Arc<AtomicU64>,
}

impl RenderCounters {
    pub(crate) fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// Shared status written by the worker thread and read by the controller.
#[derive(Debug, Default)]
pub struct EngineStatus {
    pub state: EngineState,
    /// Description of the open output device.
    pub device: Option<String>,
    pub session: Option<SessionInfo>,
    /// Most recent initialisation or fatal error.
    pub last_error: Option<EngineError>,
    pub counters: RenderCounters,
}

pub type SharedStatus = Arc<Mutex<EngineStatus>>;

/// Point-in-time copy of [`EngineStatus`].
#[derive(Clone, Debug, PartialEq)]
pub struct StatusSnapshot {
    pub state: EngineState,
    pub device: Option<String>,
    pub session: Option<SessionInfo>,
    pub last_error: Option<String>,
    pub render_cycles: u64,
    pub frames_rendered: u64,
    pub skipped_cycles: u64,
    pub ready_timeouts: u64,
    /// Rendered audio length, when a session is open.
    pub rendered_ms: Option<u64>,
}

impl EngineStatus {
    pub fn shared() -> SharedStatus {
        Arc::new(Mutex::new(Self::default()))
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let frames_rendered = self.counters.frames_rendered.load(Ordering::Relaxed);
        let rendered_ms = match self.session {
            Some(info) if info.sample_rate > 0 => {
                Some(frames_rendered.saturating_mul(1000) / u64::from(info.sample_rate))
            }
            _ => None,
        };
        StatusSnapshot {
            state: self.state,
            device: self.device.clone(),
            session: self.session,
            last_error: self.last_error.as_ref().map(ToString::to_string),
            render_cycles: self.counters.render_cycles.load(Ordering::Relaxed),
            frames_rendered,
            skipped_cycles: self.counters.skipped_cycles.load(Ordering::Relaxed),
            ready_timeouts: self.counters.ready_timeouts.load(Ordering::Relaxed),
            rendered_ms,
        }
    }
}

/// Apply `f` to the shared status, recovering the data if a holder panicked.
pub(crate) fn update(status: &SharedStatus, f: impl FnOnce(&mut EngineStatus)) {
    let mut guard = status.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut guard);
}

pub(crate) fn set_state(status: &SharedStatus, state: EngineState) {
    update(status, |s| s.state = state);
}

pub(crate) fn snapshot(status: &SharedStatus) -> StatusSnapshot {
    let guard = status.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.snapshot()
}
