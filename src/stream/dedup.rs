//! Redelivery filter for sequenced events.
//!
//! Producers retry, and a retried `audio_ref` must not be fetched or played a
//! second time.  [`Deduplicator`] remembers `"{seq}:{kind}"` keys for the
//! lifetime of one session.  Positional (`pause`) and terminal (`done`)
//! events are always accepted.

use std::collections::{HashSet, VecDeque};

use super::event::StreamEvent;

/// Set of processed identity keys with a fixed upper bound.
///
/// Once `capacity` keys are tracked the oldest key is forgotten to make room;
/// redelivery that far behind the live position is not expected within one
/// narration.
#[derive(Debug)]
pub struct Deduplicator {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl Deduplicator {
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Deduplicator capacity must be > 0");
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Returns `false` when `event` was already accepted in this session.
    ///
    /// ```
    /// use flowist_player::stream::{Deduplicator, StreamEvent};
    ///
    /// let mut dedup = Deduplicator::new(16);
    /// let ev = StreamEvent::Text { seq: 1, content: "Breathe in".into() };
    /// assert!(dedup.accept(&ev));
    /// assert!(!dedup.accept(&ev));
    /// assert!(dedup.accept(&StreamEvent::Done));
    /// assert!(dedup.accept(&StreamEvent::Done));
    /// ```
    pub fn accept(&mut self, event: &StreamEvent) -> bool {
        let Some(key) = event.identity_key() else {
            return true;
        };
        if self.seen.contains(&key) {
            log::debug!("dedup: ignoring redelivered event {key}");
            return false;
        }

        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
        true
    }

    /// Forget every key.  Called on session teardown.
    pub fn clear(&mut self) {
        self.seen.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
