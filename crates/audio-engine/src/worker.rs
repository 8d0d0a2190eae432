//! Sound worker thread.
//!
//! Owns the device session for its whole life. After answering the init request it loops:
//! - drain every queued command
//! - while paused, block on the next command
//! - while playing, wait for either a command or the buffer-ready event (bounded by the
//!   ready timeout) and run a render cycle when the event fires
//!
//! `Quit`, a dropped controller, or a lost device end the loop; the session is then released
//! on this thread.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError, select};

use crate::backend::AudioBackend;
use crate::command::{Command, InitResponse};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::session::DeviceSession;
use crate::status::{self, EngineState, RenderCounters, SharedStatus};
use crate::synth::Tone;

pub(crate) const WORKER_THREAD_NAME: &str = "sound-worker";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Playback {
    Paused,
    Playing,
}

enum Flow {
    Continue,
    Quit,
    Fatal(EngineError),
}

/// Spawn the worker; it answers on `init_tx` once the session is up (or failed).
pub(crate) fn spawn(
    backend: Arc<dyn AudioBackend>,
    config: EngineConfig,
    status: SharedStatus,
    cmd_rx: Receiver<Command>,
    init_tx: Sender<InitResponse>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_string())
        .spawn(move || run(backend, config, status, cmd_rx, init_tx))
}

fn run(
    backend: Arc<dyn AudioBackend>,
    config: EngineConfig,
    status: SharedStatus,
    cmd_rx: Receiver<Command>,
    init_tx: Sender<InitResponse>,
) {
    status::set_state(&status, EngineState::Initialising);

    let session = match DeviceSession::initialise(backend.as_ref(), &config) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(backend = backend.name(), error = %e, "audio initialisation failed");
            status::update(&status, |s| {
                s.last_error = Some(e.clone());
                s.state = EngineState::Terminated;
            });
            let _ = init_tx.send(Err(e));
            return;
        }
    };

    let info = session.info();
    let counters = RenderCounters::default();
    status::update(&status, |s| {
        s.device = Some(session.description());
        s.session = Some(info);
        s.state = EngineState::Idle;
        s.counters = counters.clone();
    });
    if init_tx.send(Ok(info)).is_err() {
        tracing::warn!("controller went away during initialisation");
    }

    let mut worker = Worker {
        session,
        tone: config.tone(),
        phase: 0.0,
        playback: Playback::Paused,
        ready_timeout: config.ready_timeout,
        status,
        counters,
    };
    let cause = worker.run_loop(&cmd_rx);
    worker.shutdown(cause);
}

struct Worker {
    session: DeviceSession,
    tone: Tone,
    /// Running phase in seconds; survives stop/play.
    phase: f64,
    playback: Playback,
    ready_timeout: Duration,
    status: SharedStatus,
    counters: RenderCounters,
}

impl Worker {
    /// Returns the fatal error that ended the loop, if any.
    fn run_loop(&mut self, cmd_rx: &Receiver<Command>) -> Option<EngineError> {
        let ready = self.session.event().receiver().clone();
        let timeout = self.ready_timeout;

        loop {
            loop {
                match cmd_rx.try_recv() {
                    Ok(cmd) => match self.handle(cmd) {
                        Flow::Continue => {}
                        Flow::Quit => return None,
                        Flow::Fatal(e) => return Some(e),
                    },
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        tracing::debug!("command channel closed; shutting down");
                        return None;
                    }
                }
            }

            let flow = match self.playback {
                Playback::Paused => match cmd_rx.recv() {
                    Ok(cmd) => self.handle(cmd),
                    Err(_) => {
                        tracing::debug!("command channel closed; shutting down");
                        Flow::Quit
                    }
                },
                Playback::Playing => select! {
                    recv(cmd_rx) -> msg => match msg {
                        Ok(cmd) => self.handle(cmd),
                        Err(_) => {
                            tracing::debug!("command channel closed; shutting down");
                            Flow::Quit
                        }
                    },
                    recv(ready) -> msg => match msg {
                        Ok(()) => self.render_once(),
                        Err(_) => Flow::Fatal(EngineError::DeviceLost),
                    },
                    default(timeout) => self.on_ready_timeout(),
                },
            };

            match flow {
                Flow::Continue => {}
                Flow::Quit => return None,
                Flow::Fatal(e) => return Some(e),
            }
        }
    }

    fn handle(&mut self, cmd: Command) -> Flow {
        match (cmd, self.playback) {
            (Command::Quit, _) => Flow::Quit,
            (Command::BeginPlayback, Playback::Playing) => {
                tracing::debug!("already playing; BeginPlayback ignored");
                Flow::Continue
            }
            (Command::EndPlayback, Playback::Paused) => {
                tracing::debug!("not playing; EndPlayback ignored");
                Flow::Continue
            }
            (Command::BeginPlayback, Playback::Paused) => self.begin_playback(),
            (Command::EndPlayback, Playback::Playing) => {
                if let Err(e) = self.session.stop() {
                    tracing::warn!(error = %e, "failed to stop audio stream");
                }
                self.playback = Playback::Paused;
                status::set_state(&self.status, EngineState::Idle);
                tracing::info!(phase = self.phase, "playback stopped");
                Flow::Continue
            }
        }
    }

    fn begin_playback(&mut self) -> Flow {
        match self.session.start() {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Flow::Fatal(e),
            Err(e) => {
                tracing::warn!(error = %e, "failed to start audio stream; staying idle");
                return Flow::Continue;
            }
        }
        self.playback = Playback::Playing;
        status::set_state(&self.status, EngineState::Running);
        tracing::info!(
            frequency_hz = self.tone.frequency,
            amplitude = self.tone.amplitude,
            "playback started"
        );
        // Prime the hardware buffer so the first period is not silence.
        self.render_once()
    }

    fn render_once(&mut self) -> Flow {
        match self.session.render(&self.tone, self.phase) {
            Ok(rendered) => {
                self.phase = rendered.phase;
                RenderCounters::bump(&self.counters.render_cycles, 1);
                RenderCounters::bump(&self.counters.frames_rendered, u64::from(rendered.frames));
                Flow::Continue
            }
            Err(e) if e.is_fatal() => Flow::Fatal(e),
            Err(e) => {
                RenderCounters::bump(&self.counters.skipped_cycles, 1);
                tracing::warn!(error = %e, "render cycle skipped");
                Flow::Continue
            }
        }
    }

    fn on_ready_timeout(&mut self) -> Flow {
        RenderCounters::bump(&self.counters.ready_timeouts, 1);
        tracing::warn!(
            timeout_ms = self.ready_timeout.as_millis() as u64,
            "timed out waiting for buffer-ready event"
        );
        if self.session.is_device_lost() {
            Flow::Fatal(EngineError::DeviceLost)
        } else {
            Flow::Continue
        }
    }

    fn shutdown(mut self, cause: Option<EngineError>) {
        status::set_state(&self.status, EngineState::Terminating);
        if let Some(e) = &cause {
            tracing::error!(error = %e, "sound worker stopping");
        }
        if self.playback == Playback::Playing {
            if let Err(e) = self.session.stop() {
                tracing::debug!(error = %e, "stream stop during shutdown failed");
            }
        }

        let Worker {
            session, status, ..
        } = self;
        drop(session);

        status::update(&status, |s| {
            if cause.is_some() {
                s.last_error = cause;
            }
            s.state = EngineState::Terminated;
        });
        tracing::info!("sound worker terminated");
    }
}
