//! Audio payloads and the waveform codec between them.
//!
//! The synthesis service either returns raw WAV, which gets transcoded to
//! MP3 here before caching, or already-compressed audio, which is cached
//! as-is. Both directions are deterministic: the same input bytes always
//! produce the same output bytes.

use std::io::Cursor;

use bytes::Bytes;
use mp3lame_encoder::{Birtate, Builder, DualPcm, FlushNoGap, MonoPcm, Quality};

use crate::error::NarrationError;

/// Mime type of everything the pipeline caches after a transcode.
pub const MIME_MPEG: &str = "audio/mpeg";

/// Sample count LAME consumes per MP3 frame; encoding feeds the waveform in
/// frames of this size to bound working memory.
const MP3_FRAME_SAMPLES: usize = 1152;

/// Encoded audio ready for caching and playback.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPayload {
    pub data: Bytes,
    pub mime_type: String,
}

/// Uncompressed intermediate form between decode and encode. Samples are
/// interleaved when there are two channels.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub channels: u16,
    pub sample_rate: u32,
    pub samples: Vec<i16>,
}

impl Waveform {
    pub fn duration_ms(&self) -> u64 {
        if self.channels == 0 || self.sample_rate == 0 {
            return 0;
        }
        let frames = (self.samples.len() / self.channels as usize) as u64;
        frames * 1000 / u64::from(self.sample_rate)
    }
}

/// Does this response body need the WAV → MP3 transcode, or can it be cached
/// as-is? Trusts the reported mime type, with a RIFF magic fallback for
/// services that omit or mislabel the header.
pub fn is_wav(mime_type: &str, data: &[u8]) -> bool {
    let mime = mime_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    matches!(mime.as_str(), "audio/wav" | "audio/x-wav" | "audio/wave")
        || data.starts_with(b"RIFF")
}

/// Decode a WAV body into its waveform. Accepts 16-bit integer and 32-bit
/// float sample formats, mono or stereo.
pub fn decode_wav(data: &[u8]) -> Result<Waveform, NarrationError> {
    let mut reader =
        hound::WavReader::new(Cursor::new(data)).map_err(|e| NarrationError::Decode(e.to_string()))?;
    let spec = reader.spec();

    if spec.channels == 0 || spec.channels > 2 {
        return Err(NarrationError::Decode(format!(
            "unsupported channel count: {}",
            spec.channels
        )));
    }

    let samples: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .collect::<Result<_, _>>()
            .map_err(|e| NarrationError::Decode(e.to_string()))?,
        (hound::SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .map(|s| s.map(pcm16_from_f32))
            .collect::<Result<_, _>>()
            .map_err(|e| NarrationError::Decode(e.to_string()))?,
        (format, bits) => {
            return Err(NarrationError::Decode(format!(
                "unsupported WAV sample format: {bits}-bit {format:?}"
            )))
        }
    };

    Ok(Waveform {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        samples,
    })
}

/// Clamp a float sample to [-1, 1] and scale it to 16-bit PCM.
pub fn pcm16_from_f32(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Encode a waveform as 128 kbps MP3, fed to LAME one frame at a time.
pub fn encode_mp3(waveform: &Waveform) -> Result<Vec<u8>, NarrationError> {
    let mut builder = Builder::new()
        .ok_or_else(|| NarrationError::Encode("could not allocate LAME encoder".into()))?;
    builder
        .set_num_channels(waveform.channels as u8)
        .map_err(|e| NarrationError::Encode(format!("channel setup: {e:?}")))?;
    builder
        .set_sample_rate(waveform.sample_rate)
        .map_err(|e| NarrationError::Encode(format!("sample rate setup: {e:?}")))?;
    builder
        .set_brate(Birtate::Kbps128)
        .map_err(|e| NarrationError::Encode(format!("bitrate setup: {e:?}")))?;
    builder
        .set_quality(Quality::Good)
        .map_err(|e| NarrationError::Encode(format!("quality setup: {e:?}")))?;
    let mut encoder = builder
        .build()
        .map_err(|e| NarrationError::Encode(format!("encoder init: {e:?}")))?;

    let mut out: Vec<u8> = Vec::new();
    match waveform.channels {
        1 => {
            for frame in waveform.samples.chunks(MP3_FRAME_SAMPLES) {
                encoder
                    .encode_to_vec(MonoPcm(frame), &mut out)
                    .map_err(|e| NarrationError::Encode(format!("{e:?}")))?;
            }
        }
        2 => {
            let half = waveform.samples.len() / 2;
            let mut left = Vec::with_capacity(half);
            let mut right = Vec::with_capacity(half);
            for pair in waveform.samples.chunks_exact(2) {
                left.push(pair[0]);
                right.push(pair[1]);
            }
            for (l, r) in left
                .chunks(MP3_FRAME_SAMPLES)
                .zip(right.chunks(MP3_FRAME_SAMPLES))
            {
                encoder
                    .encode_to_vec(DualPcm { left: l, right: r }, &mut out)
                    .map_err(|e| NarrationError::Encode(format!("{e:?}")))?;
            }
        }
        n => {
            return Err(NarrationError::Encode(format!(
                "unsupported channel count: {n}"
            )))
        }
    }
    encoder
        .flush_to_vec::<FlushNoGap>(&mut out)
        .map_err(|e| NarrationError::Encode(format!("flush: {e:?}")))?;

    Ok(out)
}
