//! Engine error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while bringing up or running the sound worker.
///
/// The first six variants can only occur during initialisation. `Render` and
/// `DeviceLost` are produced by the render cycle once the device is running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// No render endpoint could be opened.
    #[error("failed to open render endpoint: {0}")]
    DeviceEnumeration(String),

    /// The device refused to answer the format query.
    #[error("format negotiation failed: {0}")]
    FormatNegotiation(String),

    /// The device's closest format is neither 16-bit integer nor 32-bit float.
    #[error("device format not supported: {0}")]
    FormatUnsupported(String),

    /// The shared-mode stream could not be initialised.
    #[error("failed to initialise audio stream: {0}")]
    StreamInit(String),

    /// The buffer-ready event could not be created or registered.
    #[error("failed to create buffer event: {0}")]
    EventCreation(String),

    /// The sound asset could not be read or decoded.
    #[error("failed to load sound asset {path:?}: {reason}")]
    AssetLoad { path: PathBuf, reason: String },

    /// A single render cycle failed; the cycle is skipped.
    #[error("render cycle failed: {0}")]
    Render(String),

    /// The endpoint went away underneath a running stream.
    #[error("audio device lost")]
    DeviceLost,

    /// `initialise` was called while a worker is alive, or the endpoint is already claimed.
    #[error("sound system already initialised")]
    AlreadyInitialised,

    /// The worker thread could not be spawned or exited without answering.
    #[error("sound worker unavailable: {0}")]
    WorkerUnavailable(String),
}

impl EngineError {
    /// Whether the error ends the worker loop instead of skipping one cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::DeviceLost)
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
