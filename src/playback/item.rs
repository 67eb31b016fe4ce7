use std::sync::Arc;

use crate::audio::DecodedAudio;

/// A decoded narration segment waiting for, or in, the active playback slot.
#[derive(Debug, Clone)]
pub struct AudioItem {
    /// Producer sequence number of the segment.
    pub seq: u64,
    pub buffer: Arc<DecodedAudio>,
    /// Text shown while the segment is audible.  May be empty.
    pub caption: String,
    /// Seconds of audio.
    pub duration: f32,
}

impl AudioItem {
    /// Build an item, preferring the decoded length over the announced one.
    ///
    /// ```
    /// use flowist_player::audio::DecodedAudio;
    /// use flowist_player::playback::AudioItem;
    ///
    /// let clip = DecodedAudio::new(vec![0.0; 24_000], 24_000, 1);
    /// let item = AudioItem::new(3, clip, "Breathe in".into(), Some(4.2));
    /// assert_eq!(item.duration, 1.0);
    /// ```
    pub fn new(seq: u64, buffer: DecodedAudio, caption: String, announced: Option<f32>) -> Self {
        let decoded = buffer.duration_secs();
        let duration = if decoded > 0.0 {
            decoded
        } else {
            announced.unwrap_or(0.0)
        };
        Self {
            seq,
            buffer: Arc::new(buffer),
            caption,
            duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_announced_duration() {
        let item = AudioItem::new(1, DecodedAudio::new(Vec::new(), 24_000, 1), String::new(), Some(2.5));
        assert_eq!(item.duration, 2.5);

        let item = AudioItem::new(1, DecodedAudio::new(Vec::new(), 24_000, 1), String::new(), None);
        assert_eq!(item.duration, 0.0);
    }
}
