//! Stream event model and the JSON wire records it is parsed from.
//!
//! Every paragraph of the event stream carries one JSON object tagged by
//! `"type"`.  [`WireRecord`] mirrors that shape; [`StreamEvent`] is the
//! validated form the rest of the crate works with.

use base64::Engine as _;
use serde::Deserialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// EventKind
// ---------------------------------------------------------------------------

/// Discriminant of a [`StreamEvent`], used in dedup keys and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SessionStart,
    Text,
    AudioRef,
    InlineAudio,
    Pause,
    Done,
    Error,
}

impl EventKind {
    /// Wire name of the kind (the JSON `"type"` value).
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SessionStart => "session_start",
            EventKind::Text => "text",
            EventKind::AudioRef => "audio_ref",
            EventKind::InlineAudio => "audio",
            EventKind::Pause => "pause",
            EventKind::Done => "done",
            EventKind::Error => "error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// StreamEvent
// ---------------------------------------------------------------------------

/// One decoded event of a narration stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The producer opened a server-side session.
    SessionStart { session_id: String },

    /// Caption text for the audio reference with the same `seq`.
    Text { seq: u64, content: String },

    /// Locator of a synthesized speech segment.
    ///
    /// `text` and `duration` are hints some producers attach; the caption
    /// from a matching [`StreamEvent::Text`] takes precedence.
    AudioRef {
        seq: u64,
        url: String,
        text: Option<String>,
        duration: Option<f32>,
    },

    /// Speech segment delivered inline instead of by reference.
    InlineAudio {
        seq: u64,
        data: Vec<u8>,
        text: Option<String>,
    },

    /// Silent gap in the logical narration.
    Pause { duration_seconds: f32 },

    /// Terminal marker. No more events follow.
    Done,

    /// The producer reported a failure.  Logged, never fatal.
    Error { message: String },
}

impl StreamEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            StreamEvent::SessionStart { .. } => EventKind::SessionStart,
            StreamEvent::Text { .. } => EventKind::Text,
            StreamEvent::AudioRef { .. } => EventKind::AudioRef,
            StreamEvent::InlineAudio { .. } => EventKind::InlineAudio,
            StreamEvent::Pause { .. } => EventKind::Pause,
            StreamEvent::Done => EventKind::Done,
            StreamEvent::Error { .. } => EventKind::Error,
        }
    }

    /// Producer-assigned sequence number, for the kinds that carry one.
    pub fn seq(&self) -> Option<u64> {
        match self {
            StreamEvent::Text { seq, .. }
            | StreamEvent::AudioRef { seq, .. }
            | StreamEvent::InlineAudio { seq, .. } => Some(*seq),
            _ => None,
        }
    }

    /// Stable identity `"{seq}:{kind}"`, or `None` for positional and
    /// terminal events which must never be suppressed.
    ///
    /// ```
    /// use flowist_player::stream::StreamEvent;
    ///
    /// let text = StreamEvent::Text { seq: 3, content: "Breathe".into() };
    /// assert_eq!(text.identity_key().as_deref(), Some("3:text"));
    ///
    /// let pause = StreamEvent::Pause { duration_seconds: 2.0 };
    /// assert!(pause.identity_key().is_none());
    /// ```
    pub fn identity_key(&self) -> Option<String> {
        self.seq().map(|seq| format!("{seq}:{}", self.kind()))
    }
}

// ---------------------------------------------------------------------------
// RecordError
// ---------------------------------------------------------------------------

/// Why a complete record could not become a [`StreamEvent`].
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("invalid JSON record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

// ---------------------------------------------------------------------------
// WireRecord
// ---------------------------------------------------------------------------

/// JSON shape of one record.  Unknown fields (e.g. `seq` on `done`) are
/// ignored; unknown `type` values fail to parse.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireRecord {
    SessionStart {
        session_id: String,
    },
    Text {
        seq: u64,
        content: String,
    },
    AudioRef {
        seq: u64,
        url: String,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        duration: Option<f32>,
    },
    Audio {
        seq: u64,
        content: String,
        #[serde(default)]
        text: Option<String>,
    },
    Pause {
        duration: f32,
    },
    Done {},
    Error {
        #[serde(default)]
        message: String,
    },
}

/// Sentinel payload equivalent to a `done` record.
const DONE_SENTINEL: &str = "[DONE]";
/// Prefix of plain-text error payloads.
const ERROR_PREFIX: &str = "[ERROR]";

/// Parse the payload of one `data:` record into a [`StreamEvent`].
///
/// ```
/// use flowist_player::stream::{parse_payload, StreamEvent};
///
/// let ev = parse_payload(r#"{"seq":1,"type":"text","content":"Breathe in"}"#).unwrap();
/// assert_eq!(ev, StreamEvent::Text { seq: 1, content: "Breathe in".into() });
/// assert_eq!(parse_payload("[DONE]").unwrap(), StreamEvent::Done);
/// ```
pub fn parse_payload(payload: &str) -> Result<StreamEvent, RecordError> {
    let payload = payload.trim();

    if payload == DONE_SENTINEL {
        return Ok(StreamEvent::Done);
    }
    if let Some(message) = payload.strip_prefix(ERROR_PREFIX) {
        return Ok(StreamEvent::Error {
            message: message.trim().to_string(),
        });
    }

    let record: WireRecord = serde_json::from_str(payload)?;
    let event = match record {
        WireRecord::SessionStart { session_id } => StreamEvent::SessionStart { session_id },
        WireRecord::Text { seq, content } => StreamEvent::Text { seq, content },
        WireRecord::AudioRef {
            seq,
            url,
            text,
            duration,
        } => StreamEvent::AudioRef {
            seq,
            url,
            text,
            duration: duration.filter(|d| d.is_finite() && *d > 0.0),
        },
        WireRecord::Audio { seq, content, text } => StreamEvent::InlineAudio {
            seq,
            data: base64::engine::general_purpose::STANDARD.decode(content.trim())?,
            text,
        },
        WireRecord::Pause { duration } => StreamEvent::Pause {
            duration_seconds: if duration.is_finite() {
                duration.max(0.0)
            } else {
                0.0
            },
        },
        WireRecord::Done {} => StreamEvent::Done,
        WireRecord::Error { message } => StreamEvent::Error { message },
    };
    Ok(event)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_audio_ref_with_hints() {
        let ev = parse_payload(
            r#"{"seq":2,"type":"audio_ref","url":"/api/v1/meditation/audio/s/2","text":"Breathe out","duration":3.5}"#,
        )
        .unwrap();
        assert_eq!(
            ev,
            StreamEvent::AudioRef {
                seq: 2,
                url: "/api/v1/meditation/audio/s/2".into(),
                text: Some("Breathe out".into()),
                duration: Some(3.5),
            }
        );
    }

    #[test]
    fn audio_ref_without_hints() {
        let ev = parse_payload(r#"{"seq":1,"type":"audio_ref","url":"a.mp3"}"#).unwrap();
        assert_eq!(
            ev,
            StreamEvent::AudioRef {
                seq: 1,
                url: "a.mp3".into(),
                text: None,
                duration: None,
            }
        );
    }

    #[test]
    fn pause_accepts_integer_duration_and_ignores_seq() {
        let ev = parse_payload(r#"{"seq":4,"type":"pause","duration":5}"#).unwrap();
        assert_eq!(ev, StreamEvent::Pause { duration_seconds: 5.0 });
    }

    #[test]
    fn negative_pause_is_clamped() {
        let ev = parse_payload(r#"{"type":"pause","duration":-2.0}"#).unwrap();
        assert_eq!(ev, StreamEvent::Pause { duration_seconds: 0.0 });
    }

    #[test]
    fn done_record_with_seq() {
        let ev = parse_payload(r#"{"seq":9,"type":"done"}"#).unwrap();
        assert_eq!(ev, StreamEvent::Done);
    }

    #[test]
    fn session_start_record() {
        let ev = parse_payload(r#"{"type":"session_start","session_id":"abc"}"#).unwrap();
        assert_eq!(
            ev,
            StreamEvent::SessionStart {
                session_id: "abc".into()
            }
        );
    }

    #[test]
    fn error_marker_and_error_record() {
        assert_eq!(
            parse_payload("[ERROR] upstream exploded").unwrap(),
            StreamEvent::Error {
                message: "upstream exploded".into()
            }
        );
        assert_eq!(
            parse_payload(r#"{"type":"error","message":"tts down"}"#).unwrap(),
            StreamEvent::Error {
                message: "tts down".into()
            }
        );
    }

    #[test]
    fn inline_audio_is_base64_decoded() {
        let ev = parse_payload(r#"{"seq":1,"type":"audio","content":"AAEC","text":"hi"}"#).unwrap();
        assert_eq!(
            ev,
            StreamEvent::InlineAudio {
                seq: 1,
                data: vec![0, 1, 2],
                text: Some("hi".into()),
            }
        );
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let err = parse_payload(r#"{"seq":1,"type":"audio","content":"@@@"}"#).unwrap_err();
        assert!(matches!(err, RecordError::Base64(_)));
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(parse_payload(r#"{"type":"karaoke","seq":1}"#).is_err());
    }

    #[test]
    fn truncated_json_is_rejected() {
        assert!(parse_payload(r#"{"seq":1,"type":"te"#).is_err());
    }

    #[test]
    fn identity_keys_distinguish_kind() {
        let text = StreamEvent::Text {
            seq: 1,
            content: String::new(),
        };
        let audio = StreamEvent::AudioRef {
            seq: 1,
            url: "a".into(),
            text: None,
            duration: None,
        };
        assert_eq!(text.identity_key().as_deref(), Some("1:text"));
        assert_eq!(audio.identity_key().as_deref(), Some("1:audio_ref"));
        assert!(StreamEvent::Done.identity_key().is_none());
    }
}
