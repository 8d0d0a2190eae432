//! Bounded byte ring standing in for a device's hardware buffer.
//!
//! Callback-driven hosts (CPAL) pull samples from the device thread, while the engine pushes
//! whole frames from the worker thread and needs to know how many frames are still queued
//! (the *padding*). [`HardwareRing`] bridges the two:
//! - the worker copies rendered frames in with [`HardwareRing::write`]
//! - the output callback drains them with [`HardwareRing::read_into`], padding with silence
//!
//! The lock is held only for the duration of a copy on either side.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::error::{EngineError, EngineResult};

/// Sample types the ring can decode from its little-endian byte storage.
pub trait RingSample: Copy {
    const BYTES: usize;
    fn from_le(bytes: &[u8]) -> Self;
    fn silence() -> Self;
}

impl RingSample for i16 {
    const BYTES: usize = 2;
    fn from_le(bytes: &[u8]) -> Self {
        i16::from_le_bytes([bytes[0], bytes[1]])
    }
    fn silence() -> Self {
        0
    }
}

impl RingSample for f32 {
    const BYTES: usize = 4;
    fn from_le(bytes: &[u8]) -> Self {
        f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
    fn silence() -> Self {
        0.0
    }
}

/// Fixed-capacity frame queue shared between the render worker and an output callback.
pub struct HardwareRing {
    capacity_frames: u32,
    bytes_per_frame: usize,
    inner: Mutex<VecDeque<u8>>,
    underrun_samples: AtomicU64,
    underrun_events: AtomicU64,
    callback_frames: AtomicU32,
}

impl HardwareRing {
    pub fn new(capacity_frames: u32, bytes_per_frame: usize) -> Self {
        Self {
            capacity_frames,
            bytes_per_frame,
            inner: Mutex::new(VecDeque::with_capacity(
                capacity_frames as usize * bytes_per_frame,
            )),
            underrun_samples: AtomicU64::new(0),
            underrun_events: AtomicU64::new(0),
            callback_frames: AtomicU32::new(0),
        }
    }

    pub fn capacity_frames(&self) -> u32 {
        self.capacity_frames
    }

    /// Frames queued and not yet played.
    pub fn padding_frames(&self) -> EngineResult<u32> {
        let g = self
            .inner
            .lock()
            .map_err(|_| EngineError::Render("hardware ring poisoned".to_string()))?;
        Ok((g.len() / self.bytes_per_frame.max(1)) as u32)
    }

    /// Append `frames` whole frames from `data`.
    ///
    /// Fails without writing anything if the frames do not fit in the free space or `data`
    /// is shorter than `frames` frames.
    pub fn write(&self, frames: u32, data: &[u8]) -> EngineResult<()> {
        let len = frames as usize * self.bytes_per_frame;
        let Some(bytes) = data.get(..len) else {
            return Err(EngineError::Render(format!(
                "short write: {} bytes for {frames} frames",
                data.len()
            )));
        };
        let mut g = self
            .inner
            .lock()
            .map_err(|_| EngineError::Render("hardware ring poisoned".to_string()))?;
        let queued = (g.len() / self.bytes_per_frame.max(1)) as u32;
        let free = self.capacity_frames.saturating_sub(queued);
        if frames > free {
            return Err(EngineError::Render(format!(
                "buffer too small: requested {frames} frames, {free} free"
            )));
        }
        g.extend(bytes);
        Ok(())
    }

    /// Fill `out` with queued samples, padding any shortfall with silence.
    ///
    /// Returns the number of samples taken from the ring.
    pub fn read_into<T: RingSample>(&self, out: &mut [T]) -> usize {
        let channels = (self.bytes_per_frame / T::BYTES).max(1);
        self.callback_frames
            .fetch_max((out.len() / channels) as u32, Ordering::Relaxed);

        let Ok(mut g) = self.inner.try_lock() else {
            out.fill(T::silence());
            self.note_underrun(out.len());
            return 0;
        };

        let available = g.len() / T::BYTES;
        let take = available.min(out.len());
        let mut sample = [0u8; 8];
        for slot in out.iter_mut().take(take) {
            for b in sample.iter_mut().take(T::BYTES) {
                *b = g.pop_front().unwrap_or(0);
            }
            *slot = T::from_le(&sample[..T::BYTES]);
        }
        drop(g);

        if take < out.len() {
            out[take..].fill(T::silence());
            self.note_underrun(out.len() - take);
        }
        take
    }

    /// Largest callback seen so far, in frames (0 before the first callback).
    ///
    /// Hosts that pick their own period can drain more per callback than the latency
    /// suggests; writers top up to at least this much.
    pub fn callback_frames(&self) -> u32 {
        self.callback_frames.load(Ordering::Relaxed)
    }

    /// Total samples emitted as silence, and the number of short callbacks.
    pub fn underruns(&self) -> (u64, u64) {
        (
            self.underrun_samples.load(Ordering::Relaxed),
            self.underrun_events.load(Ordering::Relaxed),
        )
    }

    fn note_underrun(&self, samples: usize) {
        self.underrun_events.fetch_add(1, Ordering::Relaxed);
        self.underrun_samples
            .fetch_add(samples as u64, Ordering::Relaxed);
    }
}
