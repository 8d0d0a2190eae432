//! Controller → worker command queue and the one-shot init handshake.

use crossbeam_channel::{Receiver, Sender};

use crate::error::EngineResult;
use crate::session::SessionInfo;

/// Commands accepted by the sound worker, consumed once in FIFO order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Quit,
    BeginPlayback,
    EndPlayback,
}

/// Sending half held by the controlling thread.
#[derive(Clone, Debug)]
pub struct CommandSender {
    tx: Sender<Command>,
}

impl CommandSender {
    /// Queue `cmd` without blocking. Returns `false` once the worker has exited.
    pub fn send(&self, cmd: Command) -> bool {
        self.tx.send(cmd).is_ok()
    }
}

/// Unbounded command queue.
pub fn command_channel() -> (CommandSender, Receiver<Command>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (CommandSender { tx }, rx)
}

/// Worker's answer to the init request.
pub type InitResponse = EngineResult<SessionInfo>;

/// Single-use rendezvous for [`InitResponse`].
pub fn init_channel() -> (Sender<InitResponse>, Receiver<InitResponse>) {
    crossbeam_channel::bounded(1)
}
