//! Audio side of the player: payload retrieval, decoding, format conversion
//! and speaker output.
//!
//! # Pipeline
//!
//! ```text
//! audio_ref url → AudioFetcher (reqwest) → bytes
//!              → AudioDecoder (symphonia, blocking pool) → DecodedAudio
//!              → OutputFormat::convert (same blocking task, device rate/channels)
//!              → FetchPipeline reorder buffer → AudioItem (submission order)
//!              → AudioOutput (cpal)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use flowist_player::audio::{AudioDecoder, SymphoniaDecoder};
//!
//! let bytes = std::fs::read("segment.mp3").unwrap();
//! let clip = SymphoniaDecoder::with_hint("mp3").decode(&bytes).unwrap();
//! println!("{} frames @ {}Hz", clip.frames(), clip.sample_rate);
//! ```

pub mod buffer;
pub mod decode;
pub mod fetch;
pub mod output;
pub mod pipeline;
pub mod resample;

pub use buffer::DecodedAudio;
pub use decode::{AudioDecoder, DecodeError, SymphoniaDecoder};
pub use fetch::{AudioFetcher, FetchError, HttpAudioFetcher};
pub use output::{AudioBackend, AudioOutput, CpalBackend, OutputError, OutputFormat, UnitId};
pub use pipeline::{FetchOutcome, FetchPipeline};
pub use resample::{convert_for_output, remix_channels, resample};

#[cfg(test)]
pub use decode::MockDecoder;
#[cfg(test)]
pub use fetch::MockFetcher;
#[cfg(test)]
pub use output::MockBackend;
