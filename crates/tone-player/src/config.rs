use std::time::Duration;

use anyhow::{Result, bail};
use audio_engine::EngineConfig;

use crate::cli::{Args, Command};

#[derive(Clone, Debug)]
pub struct PlayConfig {
    pub engine: EngineConfig,
    /// Output device name (substring match) handed to the cpal backend.
    pub device: Option<String>,
    pub simulate: bool,
    /// Playback length; `None` plays until interrupted.
    pub duration: Option<Duration>,
}

impl PlayConfig {
    pub fn from_args(args: &Args) -> Result<Self> {
        if args.pitch > 127 {
            bail!("--pitch must be in 0..=127, got {}", args.pitch);
        }
        if !(0.0..=1.0).contains(&args.amplitude) {
            bail!("--amplitude must be in [0, 1], got {}", args.amplitude);
        }
        if args.buffer_ms == 0 {
            bail!("--buffer-ms must be positive");
        }
        if args.ready_timeout_ms == 0 {
            bail!("--ready-timeout-ms must be positive");
        }

        let duration = match &args.cmd {
            Some(Command::Play {
                seconds: Some(secs),
            }) => {
                if !secs.is_finite() || *secs <= 0.0 {
                    bail!("--seconds must be a positive number, got {secs}");
                }
                Some(Duration::from_secs_f64(*secs))
            }
            Some(Command::Play { seconds: None }) | None => None,
        };

        Ok(Self {
            engine: EngineConfig {
                buffer_duration: Duration::from_millis(args.buffer_ms),
                ready_timeout: Duration::from_millis(args.ready_timeout_ms),
                pitch: args.pitch,
                amplitude: args.amplitude,
                asset_dir: args.asset_dir.clone(),
                asset_name: args.asset.clone(),
                ..EngineConfig::default()
            },
            device: args.device.clone(),
            simulate: args.simulate,
            duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("tone-player").chain(argv.iter().copied()))
            .expect("valid args")
    }

    #[test]
    fn defaults_match_engine_defaults() {
        let config = PlayConfig::from_args(&parse(&[])).unwrap();
        let defaults = EngineConfig::default();
        assert_eq!(config.engine.buffer_duration, defaults.buffer_duration);
        assert_eq!(config.engine.ready_timeout, defaults.ready_timeout);
        assert_eq!(config.engine.pitch, defaults.pitch);
        assert_eq!(config.engine.asset_path(), defaults.asset_path());
        assert!(config.duration.is_none());
        assert!(config.device.is_none());
        assert!(!config.simulate);
    }

    #[test]
    fn device_name_is_kept_for_the_backend() {
        let config = PlayConfig::from_args(&parse(&["--device", "USB DAC"])).unwrap();
        assert_eq!(config.device.as_deref(), Some("USB DAC"));
    }

    #[test]
    fn play_seconds_sets_duration() {
        let config =
            PlayConfig::from_args(&parse(&["--simulate", "play", "--seconds", "1.5"])).unwrap();
        assert_eq!(config.duration, Some(Duration::from_millis(1500)));
        assert!(config.simulate);
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(PlayConfig::from_args(&parse(&["--amplitude", "1.5"])).is_err());
        assert!(PlayConfig::from_args(&parse(&["--pitch", "200"])).is_err());
        assert!(PlayConfig::from_args(&parse(&["--buffer-ms", "0"])).is_err());
        assert!(PlayConfig::from_args(&parse(&["play", "--seconds", "0"])).is_err());
    }
}
