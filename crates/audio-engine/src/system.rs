//! Controlling-thread API for the sound worker.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::backend::AudioBackend;
use crate::command::{self, Command, CommandSender};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::status::{self, EngineStatus, SharedStatus, StatusSnapshot};
use crate::worker;

struct WorkerHandle {
    commands: CommandSender,
    join: JoinHandle<()>,
}

/// Owns the sound worker thread and talks to it over the command queue.
///
/// Only [`SoundSystem::initialise`] and [`SoundSystem::terminate`] block; `play` and
/// `stop` are fire-and-forget.
pub struct SoundSystem {
    backend: Arc<dyn AudioBackend>,
    config: EngineConfig,
    status: SharedStatus,
    worker: Option<WorkerHandle>,
}

impl SoundSystem {
    pub fn new(backend: Arc<dyn AudioBackend>, config: EngineConfig) -> Self {
        Self {
            backend,
            config,
            status: EngineStatus::shared(),
            worker: None,
        }
    }

    /// Start the worker and wait for it to open the device.
    ///
    /// Returns `false` when startup should be aborted; [`SoundSystem::last_error`] then
    /// holds the reason.
    pub fn initialise(&mut self) -> bool {
        if self.is_running() {
            tracing::warn!("sound system already initialised");
            status::update(&self.status, |s| {
                s.last_error = Some(EngineError::AlreadyInitialised)
            });
            return false;
        }
        // A worker that ended on its own (device loss) still needs joining.
        self.reap();

        self.status = EngineStatus::shared();
        let (commands, cmd_rx) = command::command_channel();
        let (init_tx, init_rx) = command::init_channel();

        let join = match worker::spawn(
            self.backend.clone(),
            self.config.clone(),
            self.status.clone(),
            cmd_rx,
            init_tx,
        ) {
            Ok(join) => join,
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn sound worker");
                status::update(&self.status, |s| {
                    s.last_error = Some(EngineError::WorkerUnavailable(e.to_string()))
                });
                return false;
            }
        };

        match init_rx.recv() {
            Ok(Ok(info)) => {
                tracing::info!(
                    backend = self.backend.name(),
                    rate_hz = info.sample_rate,
                    channels = info.channel_count,
                    format = %info.representation,
                    "sound system initialised"
                );
                self.worker = Some(WorkerHandle { commands, join });
                true
            }
            Ok(Err(e)) => {
                join_worker(join);
                tracing::error!(error = %e, "sound system initialisation failed");
                false
            }
            Err(_) => {
                join_worker(join);
                tracing::error!("sound worker exited without answering");
                status::update(&self.status, |s| {
                    s.last_error = Some(EngineError::WorkerUnavailable(
                        "worker exited during initialisation".to_string(),
                    ))
                });
                false
            }
        }
    }

    /// Ask the worker to quit and wait until it has released the device.
    pub fn terminate(&mut self) {
        if self.worker.is_none() {
            tracing::debug!("terminate: sound system not running");
            return;
        }
        self.reap();
        tracing::info!("sound system terminated");
    }

    pub fn play(&self) {
        self.send(Command::BeginPlayback);
    }

    pub fn stop(&self) {
        self.send(Command::EndPlayback);
    }

    /// Whether a worker thread is alive.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|handle| !handle.join.is_finished())
    }

    pub fn status(&self) -> StatusSnapshot {
        status::snapshot(&self.status)
    }

    pub fn last_error(&self) -> Option<String> {
        self.status().last_error
    }

    fn send(&self, cmd: Command) {
        let Some(handle) = &self.worker else {
            tracing::debug!(?cmd, "sound system not initialised; command ignored");
            return;
        };
        if !handle.commands.send(cmd) {
            tracing::warn!(?cmd, "sound worker is not running; command dropped");
        }
    }

    fn reap(&mut self) {
        if let Some(handle) = self.worker.take() {
            let _ = handle.commands.send(Command::Quit);
            join_worker(handle.join);
        }
    }
}

impl Drop for SoundSystem {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn join_worker(join: JoinHandle<()>) {
    if join.join().is_err() {
        tracing::error!("sound worker panicked");
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::asset::test_support::write_pcm16;
    use crate::backend::sim::{FailurePoint, SimBackend, SimConfig, SimMonitor};
    use crate::format::Representation;
    use crate::status::EngineState;
    use crate::synth::{Tone, synthesize};

    struct Fixture {
        _dir: tempfile::TempDir,
        monitor: SimMonitor,
        system: SoundSystem,
    }

    fn fixture(sim: SimConfig, ready_timeout: Duration) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        write_pcm16(&dir.path().join("Bloop.wav"), 48_000, 2, 480);
        let config = EngineConfig {
            asset_dir: dir.path().to_path_buf(),
            ready_timeout,
            ..EngineConfig::default()
        };
        let backend = SimBackend::new(sim);
        let monitor = backend.monitor();
        Fixture {
            _dir: dir,
            monitor,
            system: SoundSystem::new(Arc::new(backend), config),
        }
    }

    fn fast_sim() -> SimConfig {
        SimConfig::default().with_timing(Duration::from_millis(2), Duration::from_millis(2))
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn lifecycle_releases_everything() {
        let mut fx = fixture(fast_sim(), Duration::from_secs(1));
        assert!(fx.system.initialise());
        assert_eq!(fx.system.status().state, EngineState::Idle);
        assert!(fx.system.is_running());

        fx.system.play();
        assert!(wait_until(|| fx.monitor.frames_written() > 2_000));
        assert_eq!(fx.system.status().state, EngineState::Running);

        fx.system.stop();
        assert!(wait_until(|| fx.system.status().state == EngineState::Idle));

        fx.system.play();
        assert!(wait_until(|| fx.monitor.starts() == 2));
        fx.system.terminate();

        let status = fx.system.status();
        assert_eq!(status.state, EngineState::Terminated);
        assert!(status.last_error.is_none());
        assert!(!fx.system.is_running());
        assert!(fx.monitor.live_resources().is_empty());
        assert_eq!(fx.monitor.stops(), 2);
    }

    #[test]
    fn phase_continues_across_stop_and_play() {
        let mut fx = fixture(fast_sim(), Duration::from_secs(1));
        assert!(fx.system.initialise());

        fx.system.play();
        assert!(wait_until(|| fx.monitor.frames_written() >= 1_440));
        fx.system.stop();
        assert!(wait_until(|| fx.system.status().state == EngineState::Idle));
        let first_leg = fx.monitor.frames_written();

        fx.system.play();
        assert!(wait_until(|| fx.monitor.frames_written() >= first_leg + 1_440));
        fx.system.terminate();

        let captured = fx.monitor.captured();
        let frames = captured.len() / 8;
        assert_eq!(frames as u64, fx.monitor.frames_written());

        let mut expected = vec![0u8; captured.len()];
        synthesize(
            &mut expected,
            Representation::Float,
            &Tone::default(),
            0.0,
            48_000,
            frames,
            2,
        );
        assert_eq!(captured, expected);
    }

    #[test]
    fn negotiation_failure_aborts_startup() {
        let mut fx = fixture(
            SimConfig::default().failing_at(FailurePoint::Negotiate),
            Duration::from_secs(1),
        );
        assert!(!fx.system.initialise());
        assert!(!fx.system.is_running());
        assert!(
            fx.system
                .last_error()
                .is_some_and(|e| e.contains("format negotiation failed"))
        );
        assert_eq!(fx.system.status().state, EngineState::Terminated);
        assert!(fx.monitor.live_resources().is_empty());

        fx.system.play();
        fx.system.terminate();
        assert_eq!(fx.monitor.starts(), 0);
    }

    #[test]
    fn second_initialise_is_rejected() {
        let mut fx = fixture(fast_sim(), Duration::from_secs(1));
        assert!(fx.system.initialise());
        assert!(!fx.system.initialise());
        assert_eq!(
            fx.system.last_error().as_deref(),
            Some("sound system already initialised")
        );
        fx.system.terminate();

        assert!(fx.system.initialise());
        assert!(fx.system.last_error().is_none());
        fx.system.terminate();
        assert!(fx.monitor.live_resources().is_empty());
    }

    #[test]
    fn commands_before_initialise_are_ignored() {
        let mut fx = fixture(fast_sim(), Duration::from_secs(1));
        fx.system.play();
        fx.system.stop();
        fx.system.terminate();
        assert_eq!(fx.system.status().state, EngineState::Uninitialised);
        assert!(fx.monitor.events().is_empty());
    }

    #[test]
    fn device_loss_terminates_worker() {
        let mut fx = fixture(fast_sim(), Duration::from_secs(1));
        assert!(fx.system.initialise());
        fx.system.play();
        assert!(wait_until(|| fx.monitor.frames_written() > 0));

        fx.monitor.lose_device();
        assert!(wait_until(|| fx.system.status().state == EngineState::Terminated));
        assert_eq!(fx.system.last_error().as_deref(), Some("audio device lost"));
        assert!(wait_until(|| !fx.system.is_running()));
        assert!(fx.monitor.live_resources().is_empty());

        fx.system.stop();
        fx.system.terminate();
    }

    #[test]
    fn transient_write_failures_are_skipped() {
        let mut fx = fixture(fast_sim(), Duration::from_secs(1));
        assert!(fx.system.initialise());
        fx.monitor.fail_next_writes(3);
        fx.system.play();

        assert!(wait_until(|| {
            let s = fx.system.status();
            s.skipped_cycles == 3 && s.frames_rendered > 0
        }));
        let status = fx.system.status();
        assert_eq!(status.state, EngineState::Running);
        assert!(status.last_error.is_none());
        fx.system.terminate();
    }

    #[test]
    fn ready_timeouts_are_counted_not_fatal() {
        let sim = SimConfig::default()
            .with_timing(Duration::from_millis(10), Duration::from_secs(30));
        let mut fx = fixture(sim, Duration::from_millis(10));
        assert!(fx.system.initialise());
        fx.system.play();

        assert!(wait_until(|| fx.system.status().ready_timeouts >= 3));
        assert_eq!(fx.system.status().state, EngineState::Running);

        let started = Instant::now();
        fx.system.terminate();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(fx.system.status().state, EngineState::Terminated);
    }

    fn idle_clock_sim() -> SimConfig {
        SimConfig::default().with_timing(Duration::from_millis(10), Duration::from_secs(30))
    }

    #[test]
    fn back_to_back_commands_end_idle() {
        let mut fx = fixture(idle_clock_sim(), Duration::from_secs(1));
        assert!(fx.system.initialise());
        fx.system.play();
        fx.system.stop();
        fx.system.play();
        fx.system.stop();

        assert!(wait_until(|| {
            fx.monitor.stops() == 2 && fx.system.status().state == EngineState::Idle
        }));
        let status = fx.system.status();
        assert_eq!(fx.monitor.starts(), 2);
        assert_eq!(status.ready_timeouts, 0);
        assert_eq!(status.render_cycles, 2);
        assert_eq!(fx.monitor.frames_written(), 960);
        fx.system.terminate();
    }

    #[test]
    fn rejected_start_renders_nothing() {
        let mut fx = fixture(idle_clock_sim(), Duration::from_secs(1));
        assert!(fx.system.initialise());
        fx.monitor.fail_next_start();
        fx.system.play();
        fx.system.play();

        assert!(wait_until(|| fx.system.status().render_cycles == 1));
        let status = fx.system.status();
        assert_eq!(status.state, EngineState::Running);
        assert!(status.last_error.is_none());
        assert_eq!(fx.monitor.starts(), 1);
        assert_eq!(fx.monitor.frames_written(), 480);

        // The priming cycle after the successful start begins at phase zero.
        let mut expected = vec![0u8; 480 * 8];
        synthesize(
            &mut expected,
            Representation::Float,
            &Tone::default(),
            0.0,
            48_000,
            480,
            2,
        );
        assert_eq!(fx.monitor.captured(), expected);
        fx.system.terminate();
    }

    #[test]
    fn drop_releases_device() {
        let mut fx = fixture(fast_sim(), Duration::from_secs(1));
        assert!(fx.system.initialise());
        fx.system.play();
        let monitor = fx.monitor.clone();
        drop(fx);
        assert!(monitor.live_resources().is_empty());
    }
}
