//! Fully decoded, in-memory PCM clip.
//!
//! ```rust
//! use flowist_player::audio::DecodedAudio;
//!
//! let clip = DecodedAudio::new(vec![0.0; 48_000], 24_000, 2);
//! assert_eq!(clip.frames(), 24_000);
//! assert!((clip.duration_secs() - 1.0).abs() < 1e-6);
//! ```

/// Interleaved `f32` samples in `[-1.0, 1.0]` plus their format.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    /// Frames per second.
    pub sample_rate: u32,
    /// Number of interleaved channels (1 = mono, 2 = stereo, …).
    pub channels: u16,
}

impl DecodedAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Playback length in seconds.
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f32 / self.sample_rate as f32
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }
}
