//! Ordered, gapless playback queue.
//!
//! The queue is a two-state machine driving one [`AudioOutput`]:
//!
//! ```text
//! Idle ──push──▶ Playing            (item starts, Started fired)
//! Playing ──push──▶ Playing         (item waits)
//! Playing ──unit finished──▶ Playing (next item starts, Started fired)
//!                       └──▶ Idle    (nothing waiting, Drained fired)
//! any ──stop──▶ Idle                 (no signal)
//! ```
//!
//! Observers register with [`PlaybackQueue::subscribe`] and receive every
//! [`PlaybackSignal`] synchronously, in order.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::audio::{AudioOutput, OutputError, UnitId};

use super::item::AudioItem;

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Notifications fired by the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackSignal {
    /// An item became audible.
    Started {
        seq: u64,
        caption: String,
        duration: f32,
    },
    /// The last item finished and nothing is waiting.
    Drained,
}

/// Callback receiving every [`PlaybackSignal`].
pub type Listener = Box<dyn FnMut(&PlaybackSignal) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Playing,
}

struct ActiveUnit {
    id: UnitId,
    item: AudioItem,
}

// ---------------------------------------------------------------------------
// PlaybackQueue
// ---------------------------------------------------------------------------

pub struct PlaybackQueue {
    /// `None` once closed.
    output: Option<Box<dyn AudioOutput>>,
    active: Option<ActiveUnit>,
    waiting: VecDeque<AudioItem>,
    next_unit: UnitId,
    listeners: Vec<Listener>,
}

impl PlaybackQueue {
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        Self {
            output: Some(output),
            active: None,
            waiting: VecDeque::new(),
            next_unit: 0,
            listeners: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, listener: Listener) {
        self.listeners.push(listener);
    }

    pub fn state(&self) -> QueueState {
        if self.active.is_some() {
            QueueState::Playing
        } else {
            QueueState::Idle
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state() == QueueState::Idle
    }

    /// Items waiting behind the active one.
    pub fn waiting(&self) -> usize {
        self.waiting.len()
    }

    /// Sequence number of the audible item.
    pub fn active_seq(&self) -> Option<u64> {
        self.active.as_ref().map(|unit| unit.item.seq)
    }

    pub fn push(&mut self, item: AudioItem) {
        if self.active.is_some() {
            log::debug!("playback: seq {} queued behind {} item(s)", item.seq, self.waiting.len());
            self.waiting.push_back(item);
        } else {
            self.play(Some(item));
        }
    }

    /// Completion report from the output.  Reports for anything but the
    /// active unit are ignored.
    pub fn on_finished(&mut self, id: UnitId) {
        match &self.active {
            Some(unit) if unit.id == id => {
                log::debug!("playback: seq {} finished", unit.item.seq);
                self.active = None;
                let next = self.waiting.pop_front();
                self.play(next);
            }
            _ => log::debug!("playback: ignoring stale completion for unit {id}"),
        }
    }

    /// Silence the active item and discard everything waiting.  Fires no
    /// signal.
    pub fn stop(&mut self) {
        if let Some(output) = self.output.as_mut() {
            output.stop();
        }
        self.active = None;
        self.waiting.clear();
    }

    /// Stop and release the output.  Idempotent.
    pub fn close(&mut self) {
        self.stop();
        if let Some(mut output) = self.output.take() {
            output.close();
            log::debug!("playback: output released");
        }
    }

    /// Start `next`, falling through refused items, or go idle.
    fn play(&mut self, mut next: Option<AudioItem>) {
        while let Some(item) = next.take() {
            let id = self.next_unit;
            self.next_unit += 1;

            let started = match self.output.as_mut() {
                Some(output) => output.start_unit(id, Arc::clone(&item.buffer)),
                None => Err(OutputError::Closed),
            };

            match started {
                Ok(()) => {
                    let signal = PlaybackSignal::Started {
                        seq: item.seq,
                        caption: item.caption.clone(),
                        duration: item.duration,
                    };
                    self.active = Some(ActiveUnit { id, item });
                    self.emit(&signal);
                    return;
                }
                Err(e) => {
                    log::warn!("playback: output refused seq {}: {e}", item.seq);
                    next = self.waiting.pop_front();
                }
            }
        }

        self.active = None;
        self.emit(&PlaybackSignal::Drained);
    }

    fn emit(&mut self, signal: &PlaybackSignal) {
        for listener in self.listeners.iter_mut() {
            listener(signal);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
