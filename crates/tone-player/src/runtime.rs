//! Tone player runtime: device listing and the play loop.
//!
//! The play loop drives the engine the way an application's update loop would:
//! initialise, play, wait for Ctrl-C or the requested duration, stop, terminate.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use audio_engine::backend::AudioBackend;
use audio_engine::backend::cpal_backend::{self, CpalBackend};
use audio_engine::backend::sim::SimBackend;
use audio_engine::{EngineState, SoundSystem};
use crossbeam_channel::select;

use crate::config::PlayConfig;

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let devices = cpal_backend::list_devices().context("enumerate output devices")?;
    for (i, name) in devices.iter().enumerate() {
        println!("#{i}: {name}");
    }
    Ok(())
}

pub fn run_play(config: PlayConfig) -> Result<()> {
    let backend: Arc<dyn AudioBackend> = if config.simulate {
        Arc::new(SimBackend::default())
    } else {
        Arc::new(CpalBackend::new(normalize_device_name(config.device)))
    };

    let mut system = SoundSystem::new(backend, config.engine);
    if !system.initialise() {
        let reason = system
            .last_error()
            .unwrap_or_else(|| "unknown error".to_string());
        bail!("audio initialisation failed: {reason}");
    }

    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("install Ctrl-C handler")?;

    system.play();
    match config.duration {
        Some(duration) => select! {
            recv(stop_rx) -> _ => tracing::info!("interrupted"),
            default(duration) => {}
        },
        None => {
            tracing::info!("playing; press Ctrl-C to stop");
            let _ = stop_rx.recv();
        }
    }
    system.stop();
    system.terminate();

    let status = system.status();
    tracing::info!(
        state = ?status.state,
        render_cycles = status.render_cycles,
        frames_rendered = status.frames_rendered,
        rendered_ms = status.rendered_ms.unwrap_or(0),
        skipped_cycles = status.skipped_cycles,
        ready_timeouts = status.ready_timeouts,
        "playback finished"
    );

    match status.last_error {
        Some(err) if status.state == EngineState::Terminated => {
            bail!("sound worker stopped: {err}")
        }
        _ => Ok(()),
    }
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
