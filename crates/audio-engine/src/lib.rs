//! Low-latency tone rendering engine.
//!
//! A [`SoundSystem`] owns one worker thread that holds an exclusive session on an output
//! device and keeps its hardware buffer topped up with a synthesized tone, driven by the
//! device's buffer-ready notifications.

pub mod asset;
pub mod backend;
pub mod buffer;
pub mod command;
pub mod config;
pub mod error;
pub mod format;
pub mod render;
pub mod session;
pub mod status;
pub mod synth;
pub mod system;
mod worker;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use status::{EngineState, StatusSnapshot};
pub use system::SoundSystem;
