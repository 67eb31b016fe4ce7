//! Keeps the visible caption in step with the audible item.

use crate::session::state::{update, SharedState};
use crate::session::TeardownLatch;

use super::queue::{Listener, PlaybackSignal};

/// Writes the caption into [`SharedState`] from queue signals: set on
/// `Started`, cleared on `Drained`.  Silent once its session's latch is set.
#[derive(Clone)]
pub struct SubtitleSynchronizer {
    state: SharedState,
    latch: TeardownLatch,
}

impl SubtitleSynchronizer {
    pub fn new(state: SharedState, latch: TeardownLatch) -> Self {
        Self { state, latch }
    }

    pub fn on_signal(&self, signal: &PlaybackSignal) {
        match signal {
            PlaybackSignal::Started { seq, caption, .. } => {
                log::debug!("subtitle: seq {seq} -> {caption:?}");
                self.show(caption);
            }
            PlaybackSignal::Drained => self.show(""),
        }
    }

    /// The latch is read under the state lock so a teardown racing this
    /// write always wins.
    fn show(&self, caption: &str) {
        update(&self.state, |s| {
            if !self.latch.is_set() {
                s.current_caption = caption.to_string();
            }
        });
    }

    /// Wrap into a queue listener.
    pub fn into_listener(self) -> Listener {
        Box::new(move |signal: &PlaybackSignal| self.on_signal(signal))
    }
}
