//! Sound asset loading.
//!
//! The engine pre-loads one WAV file at session start. Symphonia probes and decodes it into
//! interleaved `f32` samples; only uncompressed PCM (integer or float) is accepted.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecType, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::{
    formats::FormatOptions, io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
};

use crate::error::{EngineError, EngineResult};
use crate::format::Representation;
use crate::session::SessionInfo;

/// A decoded sound asset.
#[derive(Clone, Debug)]
pub struct WaveData {
    /// Encoding of the source file.
    pub representation: Representation,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub frames: usize,
    /// Interleaved samples normalised to `[-1, 1]`.
    pub samples: Vec<f32>,
}

impl WaveData {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames as f64 / f64::from(self.sample_rate)
        }
    }

    /// Describe every way this asset differs from the negotiated stream format.
    pub fn compatibility_issues(&self, info: &SessionInfo) -> Vec<String> {
        let mut issues = Vec::new();
        if self.sample_rate != info.sample_rate {
            issues.push(format!(
                "sample rate {} Hz, device {} Hz",
                self.sample_rate, info.sample_rate
            ));
        }
        if self.channels != info.channel_count {
            issues.push(format!(
                "{} channels, device {}",
                self.channels, info.channel_count
            ));
        }
        if self.representation != info.representation {
            issues.push(format!(
                "{} samples, device {}",
                self.representation, info.representation
            ));
        }
        issues
    }
}

/// Load and fully decode a WAV file.
pub fn load_wav(path: &Path) -> EngineResult<WaveData> {
    let fail = |reason: String| EngineError::AssetLoad {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|e| fail(format!("open: {e}")))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    hint.with_extension("wav");

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| fail(format!("unrecognised container: {e}")))?;
    let mut reader = probed.format;

    let track = reader
        .default_track()
        .ok_or_else(|| fail("no default audio track".to_string()))?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    let representation = representation_for_codec(params.codec)
        .ok_or_else(|| fail("not an uncompressed PCM stream".to_string()))?;
    let channels = params
        .channels
        .ok_or_else(|| fail("unknown channel layout".to_string()))?
        .count();
    let sample_rate = params
        .sample_rate
        .ok_or_else(|| fail("unknown sample rate".to_string()))?;
    let bits_per_sample = params
        .bits_per_sample
        .or(params.bits_per_coded_sample)
        .and_then(|v| u16::try_from(v).ok())
        .unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| fail(format!("decoder: {e}")))?;

    let mut samples = Vec::new();
    loop {
        let packet = match reader.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(fail(format!("read: {e}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!(path = %path.display(), "skipping corrupt packet: {e}");
                continue;
            }
            Err(e) => return Err(fail(format!("decode: {e}"))),
        };
        let mut buf = SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
        buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buf.samples());
    }

    if samples.is_empty() {
        return Err(fail("no audio frames".to_string()));
    }

    let frames = samples.len() / channels.max(1);
    tracing::debug!(
        path = %path.display(),
        frames,
        channels,
        sample_rate,
        bits_per_sample,
        "sound asset loaded"
    );

    Ok(WaveData {
        representation,
        channels: channels as u16,
        sample_rate,
        bits_per_sample,
        frames,
        samples,
    })
}

fn representation_for_codec(codec: CodecType) -> Option<Representation> {
    use symphonia::core::codecs::*;
    match codec {
        CODEC_TYPE_PCM_S8 | CODEC_TYPE_PCM_U8 | CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE
        | CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE | CODEC_TYPE_PCM_S32LE
        | CODEC_TYPE_PCM_S32BE => Some(Representation::Integer),
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE | CODEC_TYPE_PCM_F64LE
        | CODEC_TYPE_PCM_F64BE => Some(Representation::Float),
        _ => None,
    }
}
