//! Device-neutral stream format description and classification.
//!
//! Devices answer a format query with a tagged wave format. The engine only knows how to
//! synthesize two numeric representations, so every negotiated format is classified into
//! [`Representation::Integer`] (signed 16-bit) or [`Representation::Float`] (32-bit IEEE),
//! or rejected.

use std::fmt;

use crate::error::{EngineError, EngineResult};

/// Front-left | front-right.
pub const SPEAKER_STEREO: u32 = 0x3;

/// Format identifier carried inside an extensible format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubFormat {
    Pcm,
    IeeeFloat,
    /// First field of an unrecognised sub-format GUID.
    Unknown(u32),
}

/// Top-level format tag of a wave format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatTag {
    Pcm,
    IeeeFloat,
    Extensible {
        sub_format: SubFormat,
        valid_bits: u16,
        channel_mask: u32,
    },
    Unknown(u16),
}

/// Stream format as requested from, or reported by, a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaveFormat {
    pub tag: FormatTag,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

impl WaveFormat {
    /// 48 kHz, stereo, 32-bit float in an extensible wrapper.
    pub fn preferred() -> Self {
        Self {
            tag: FormatTag::Extensible {
                sub_format: SubFormat::IeeeFloat,
                valid_bits: 32,
                channel_mask: SPEAKER_STEREO,
            },
            channels: 2,
            sample_rate: 48_000,
            bits_per_sample: 32,
        }
    }

    /// Bytes occupied by one frame (one sample per channel).
    pub fn block_align(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }
}

impl fmt::Display for WaveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {}ch {}Hz {}bit",
            self.tag, self.channels, self.sample_rate, self.bits_per_sample
        )
    }
}

/// Numeric encoding the device expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Representation {
    /// Signed 16-bit little-endian.
    Integer,
    /// 32-bit IEEE float little-endian.
    Float,
}

impl Representation {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Representation::Integer => 2,
            Representation::Float => 4,
        }
    }
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Representation::Integer => f.write_str("i16"),
            Representation::Float => f.write_str("f32"),
        }
    }
}

/// Classify a negotiated format, looking through extensible wrappers to the sub-format.
pub fn classify(format: &WaveFormat) -> EngineResult<Representation> {
    if format.channels == 0 {
        return Err(EngineError::FormatUnsupported(format!(
            "{format}: zero channels"
        )));
    }
    if format.sample_rate == 0 {
        return Err(EngineError::FormatUnsupported(format!(
            "{format}: zero sample rate"
        )));
    }

    let kind = match format.tag {
        FormatTag::Pcm
        | FormatTag::Extensible {
            sub_format: SubFormat::Pcm,
            ..
        } => Representation::Integer,
        FormatTag::IeeeFloat
        | FormatTag::Extensible {
            sub_format: SubFormat::IeeeFloat,
            ..
        } => Representation::Float,
        _ => {
            return Err(EngineError::FormatUnsupported(format!(
                "{format}: no integer or float sub-format"
            )));
        }
    };

    let expected_bits = kind.bytes_per_sample() * 8;
    if format.bits_per_sample as usize != expected_bits {
        return Err(EngineError::FormatUnsupported(format!(
            "{format}: {kind} needs {expected_bits}-bit samples"
        )));
    }
    Ok(kind)
}
