use std::path::PathBuf;

use clap::{Parser, Subcommand};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "tone-player", version = VERSION)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Render into the built-in simulated device instead of real hardware
    #[arg(long)]
    pub simulate: bool,

    /// Musical pitch of the tone (69 = A4 = 440 Hz)
    #[arg(long, default_value_t = 69)]
    pub pitch: u8,

    /// Output gain in [0, 1]
    #[arg(long, default_value_t = 0.3)]
    pub amplitude: f64,

    /// Directory holding the sound asset
    #[arg(long, default_value = "resources/sounds")]
    pub asset_dir: PathBuf,

    /// Sound asset file name inside --asset-dir
    #[arg(long, default_value = "Bloop.wav")]
    pub asset: String,

    /// Hardware buffer length in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub buffer_ms: u64,

    /// Give up waiting for a buffer-ready event after this many milliseconds (non-fatal)
    #[arg(long, default_value_t = 1000)]
    pub ready_timeout_ms: u64,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Play the tone until Ctrl-C (default)
    Play {
        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<f64>,
    },
}
