//! Tone player: plays a sine tone through the low-latency audio engine.
//!
//! `--simulate` renders into an in-process device, which is handy on machines without
//! audio output.

mod cli;
mod config;
mod runtime;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,tone_player=info,audio_engine=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let config = config::PlayConfig::from_args(&args)?;
    runtime::run_play(config)
}
