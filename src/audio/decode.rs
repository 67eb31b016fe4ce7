//! Payload decoding: compressed audio bytes → [`DecodedAudio`].
//!
//! [`AudioDecoder`] is synchronous and CPU-bound; the fetch pipeline calls it
//! through `tokio::task::spawn_blocking` so the async runtime never stalls.
//! [`SymphoniaDecoder`] is the production implementation.

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

use super::buffer::DecodedAudio;

// ---------------------------------------------------------------------------
// DecodeError
// ---------------------------------------------------------------------------

/// Errors that can arise while decoding an audio payload.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// The payload was empty.
    #[error("audio payload is empty")]
    Empty,

    /// No supported container format was recognised.
    #[error("unrecognised audio format: {0}")]
    Probe(String),

    /// The container holds no decodable audio track.
    #[error("no audio track found")]
    NoTrack,

    /// The codec could not be initialised or failed mid-stream.
    #[error("codec error: {0}")]
    Codec(String),

    /// Decoding finished without producing a single sample.
    #[error("payload decoded to zero samples")]
    NoSamples,
}

// ---------------------------------------------------------------------------
// AudioDecoder trait
// ---------------------------------------------------------------------------

/// Object-safe, thread-safe interface for payload decoders.
pub trait AudioDecoder: Send + Sync {
    /// Decode a complete payload into interleaved `f32` PCM.
    fn decode(&self, payload: &[u8]) -> Result<DecodedAudio, DecodeError>;
}

// ---------------------------------------------------------------------------
// SymphoniaDecoder
// ---------------------------------------------------------------------------

/// Decodes MP3 / WAV / OGG Vorbis payloads with `symphonia`.
#[derive(Debug, Clone, Default)]
pub struct SymphoniaDecoder {
    /// Container hint (file extension) tried first while probing.
    extension_hint: Option<String>,
}

impl SymphoniaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe with `extension` first (e.g. `"mp3"` for `audio/mpeg`).
    pub fn with_hint(extension: impl Into<String>) -> Self {
        Self {
            extension_hint: Some(extension.into()),
        }
    }
}

impl AudioDecoder for SymphoniaDecoder {
    fn decode(&self, payload: &[u8]) -> Result<DecodedAudio, DecodeError> {
        if payload.is_empty() {
            return Err(DecodeError::Empty);
        }

        let mss = MediaSourceStream::new(Box::new(Cursor::new(payload.to_vec())), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = &self.extension_hint {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| DecodeError::Probe(e.to_string()))?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoTrack)?;
        let track_id = track.id;
        let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
        let mut channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(0);

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Codec(e.to_string()))?;

        let mut samples: Vec<f32> = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => {
                    decoder.reset();
                    continue;
                }
                Err(e) => return Err(DecodeError::Codec(e.to_string())),
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    sample_rate = spec.rate;
                    channels = spec.channels.count() as u16;

                    let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    // Corrupt frame: skip it, keep the rest of the clip.
                    log::debug!("decode: skipping corrupt packet: {e}");
                }
                Err(e) => return Err(DecodeError::Codec(e.to_string())),
            }
        }

        if samples.is_empty() || sample_rate == 0 || channels == 0 {
            return Err(DecodeError::NoSamples);
        }

        Ok(DecodedAudio::new(samples, sample_rate, channels))
    }
}

// ---------------------------------------------------------------------------
// MockDecoder (test only)
// ---------------------------------------------------------------------------

/// Test decoder: a payload of `n` bytes becomes `n` mono frames at 1 kHz, so
/// a 500-byte payload is a 0.5 s clip.  Payloads starting with `b"bad"` fail.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockDecoder;

#[cfg(test)]
impl AudioDecoder for MockDecoder {
    fn decode(&self, payload: &[u8]) -> Result<DecodedAudio, DecodeError> {
        if payload.is_empty() {
            return Err(DecodeError::Empty);
        }
        if payload.starts_with(b"bad") {
            return Err(DecodeError::Probe("mock refuses".into()));
        }
        Ok(DecodedAudio::new(vec![0.0; payload.len()], 1_000, 1))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
