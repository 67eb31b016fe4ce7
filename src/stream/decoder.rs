//! Incremental decoder for the `data:`-prefixed, blank-line-delimited event
//! stream.
//!
//! Chunks arrive with arbitrary boundaries. A record, a `data:` prefix or
//! even a multi-byte UTF-8 character may be split across two deliveries.
//! [`EventDecoder`] keeps the unterminated tail as carry-over and only parses
//! fragments that are known to be complete.
//!
//! ```
//! use flowist_player::stream::{EventDecoder, StreamEvent};
//!
//! let mut decoder = EventDecoder::new();
//! assert!(decoder.push(b"data: {\"seq\":1,\"type\":\"te").is_empty());
//! let events = decoder.push(b"xt\",\"content\":\"Breathe in\"}\n\ndata: [DONE]\n\n");
//! assert_eq!(events, vec![
//!     StreamEvent::Text { seq: 1, content: "Breathe in".into() },
//!     StreamEvent::Done,
//! ]);
//! ```

use super::event::{parse_payload, StreamEvent};

/// Record prefix marker.
const DATA_PREFIX: &str = "data:";
/// Record delimiter (after `\r` removal).
const DELIMITER: &[u8] = b"\n\n";

// ---------------------------------------------------------------------------
// EventDecoder
// ---------------------------------------------------------------------------

/// Splits a byte stream into [`StreamEvent`]s.
#[derive(Debug, Default)]
pub struct EventDecoder {
    /// Bytes received after the last complete record.
    carry: Vec<u8>,
    /// Prefix of `carry` already searched for a delimiter.
    scanned: usize,
    /// Number of fragments dropped as malformed, for diagnostics.
    malformed: usize,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every event completed by it, in arrival
    /// order.  The trailing partial fragment stays buffered.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.carry.extend(chunk.iter().copied().filter(|&b| b != b'\r'));

        let mut events = Vec::new();
        let mut start = 0;
        // A delimiter may straddle the old tail and the new chunk.
        let mut from = self.scanned.saturating_sub(DELIMITER.len() - 1);
        while let Some(offset) = find(&self.carry[from..], DELIMITER) {
            let end = from + offset;
            if let Some(event) = self.decode_fragment(start, end) {
                events.push(event);
            }
            start = end + DELIMITER.len();
            from = start;
        }
        self.carry.drain(..start);
        self.scanned = self.carry.len();
        events
    }

    /// Signal end of stream.  An unterminated fragment is never emitted.
    pub fn finish(&mut self) {
        if !self.carry.iter().all(u8::is_ascii_whitespace) {
            log::debug!(
                "decoder: discarding {} bytes of unterminated record at end of stream",
                self.carry.len()
            );
        }
        self.carry.clear();
        self.scanned = 0;
    }

    /// Bytes currently held as carry-over.
    pub fn pending_bytes(&self) -> usize {
        self.carry.len()
    }

    /// Fragments dropped because they did not parse.
    pub fn malformed_count(&self) -> usize {
        self.malformed
    }

    fn decode_fragment(&mut self, start: usize, end: usize) -> Option<StreamEvent> {
        let fragment = match std::str::from_utf8(&self.carry[start..end]) {
            Ok(text) => text,
            Err(e) => {
                log::warn!("decoder: dropping non UTF-8 record: {e}");
                self.malformed += 1;
                return None;
            }
        };

        // Lines other than `data:` (comments, `event:`, `id:`) are ignored;
        // several `data:` lines form one payload.
        let payload = fragment
            .lines()
            .filter_map(|line| line.strip_prefix(DATA_PREFIX))
            .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
            .collect::<Vec<_>>();
        if payload.is_empty() {
            return None;
        }
        let payload = payload.join("\n");

        match parse_payload(&payload) {
            Ok(event) => Some(event),
            Err(e) => {
                log::warn!("decoder: dropping malformed record ({e}): {payload:.120}");
                self.malformed += 1;
                None
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
