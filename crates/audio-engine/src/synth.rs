//! Sine tone synthesis into a raw sample buffer.
//!
//! The synthesizer keeps no state of its own: the caller threads the running phase through
//! consecutive calls so independent render cycles join into one continuous waveform.

use std::f64::consts::TAU;

use crate::format::Representation;

/// Pitch of concert A (440 Hz).
pub const CONCERT_A_PITCH: u8 = 69;
pub const CONCERT_A_HZ: f64 = 440.0;

/// Default output gain, well below clipping.
pub const DEFAULT_AMPLITUDE: f64 = 0.3;

/// Equal-tempered frequency of a musical pitch (pitch 69 = A4 = 440 Hz).
pub fn pitch_to_frequency(pitch: u8) -> f64 {
    CONCERT_A_HZ * 2f64.powf((f64::from(pitch) - f64::from(CONCERT_A_PITCH)) / 12.0)
}

/// Frequency and gain of the rendered tone.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tone {
    pub frequency: f64,
    pub amplitude: f64,
}

impl Tone {
    /// Build a tone from a pitch. Amplitude is clamped to `[0, 1]`.
    pub fn from_pitch(pitch: u8, amplitude: f64) -> Self {
        let amplitude = if amplitude.is_finite() {
            amplitude.clamp(0.0, 1.0)
        } else {
            DEFAULT_AMPLITUDE
        };
        Self {
            frequency: pitch_to_frequency(pitch),
            amplitude,
        }
    }

    fn value_at(&self, phase: f64) -> f64 {
        self.amplitude * (TAU * self.frequency * phase).sin()
    }
}

impl Default for Tone {
    fn default() -> Self {
        Self::from_pitch(CONCERT_A_PITCH, DEFAULT_AMPLITUDE)
    }
}

/// Bytes and phase produced by one [`synthesize`] call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Synthesized {
    /// Frames actually written.
    pub frames: usize,
    /// Bytes actually written (`frames * channels * bytes_per_sample`).
    pub bytes: usize,
    /// Phase to pass into the next call.
    pub phase: f64,
}

/// Write `frames` frames of `tone` into `out`, starting at `phase` seconds.
///
/// Every channel of a frame receives the same value. The phase advances by
/// `1 / sample_rate` per frame. If `out` cannot hold all frames, only the frames that
/// fit are written.
pub fn synthesize(
    out: &mut [u8],
    representation: Representation,
    tone: &Tone,
    phase: f64,
    sample_rate: u32,
    frames: usize,
    channels: usize,
) -> Synthesized {
    let bytes_per_sample = representation.bytes_per_sample();
    let frame_bytes = channels * bytes_per_sample;
    if frame_bytes == 0 || sample_rate == 0 {
        return Synthesized {
            frames: 0,
            bytes: 0,
            phase,
        };
    }

    let frames = frames.min(out.len() / frame_bytes);
    let time_step = 1.0 / f64::from(sample_rate);
    let mut phase = phase;

    for frame in out[..frames * frame_bytes].chunks_exact_mut(frame_bytes) {
        let value = tone.value_at(phase);
        match representation {
            Representation::Integer => {
                let sample = (32767.0 * value).round() as i16;
                fill_frame(frame, &sample.to_le_bytes());
            }
            Representation::Float => {
                let sample = value as f32;
                fill_frame(frame, &sample.to_le_bytes());
            }
        }
        phase += time_step;
    }

    Synthesized {
        frames,
        bytes: frames * frame_bytes,
        phase,
    }
}

fn fill_frame(frame: &mut [u8], sample: &[u8]) {
    for channel in frame.chunks_exact_mut(sample.len()) {
        channel.copy_from_slice(sample);
    }
}
