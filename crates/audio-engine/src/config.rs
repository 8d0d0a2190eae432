use std::path::PathBuf;
use std::time::Duration;

use crate::format::WaveFormat;
use crate::synth::{CONCERT_A_PITCH, DEFAULT_AMPLITUDE, Tone};

/// Engine tuning shared by the session and the worker loop.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Format requested from the device before asking for its closest match.
    pub preferred_format: WaveFormat,
    /// Requested hardware buffer length.
    pub buffer_duration: Duration,
    /// Upper bound on a single wait for the buffer-ready event while playing.
    pub ready_timeout: Duration,
    /// Musical pitch of the rendered tone (69 = A4).
    pub pitch: u8,
    pub amplitude: f64,
    pub asset_dir: PathBuf,
    pub asset_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preferred_format: WaveFormat::preferred(),
            buffer_duration: Duration::from_secs(1),
            ready_timeout: Duration::from_secs(1),
            pitch: CONCERT_A_PITCH,
            amplitude: DEFAULT_AMPLITUDE,
            asset_dir: PathBuf::from("resources/sounds"),
            asset_name: "Bloop.wav".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn asset_path(&self) -> PathBuf {
        self.asset_dir.join(&self.asset_name)
    }

    pub fn tone(&self) -> Tone {
        Tone::from_pitch(self.pitch, self.amplitude)
    }
}
