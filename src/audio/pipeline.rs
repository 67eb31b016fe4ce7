//! Fetch & decode pipeline.
//!
//! Every audio reference (or inline payload) receives a *ticket* in the order
//! it was submitted.  Each ticket runs as its own tokio task:
//!
//! ```text
//! submit_url ──▶ task: AudioFetcher::fetch ──▶ spawn_blocking(decode+convert) ─┐
//! submit_inline ─▶ task: ─────────────────────▶ spawn_blocking(decode+convert) ─┤
//!                                                                      ▼
//!                         FetchOutcome { ticket, item } ──▶ outcome channel
//!                                                                      │
//! session actor: FetchPipeline::accept(outcome) ◀──────────────────────┘
//!                  └─▶ items released strictly in ticket order
//! ```
//!
//! Decoded clips are converted to the output's [`OutputFormat`] on the
//! blocking pool as well.
//!
//! A failed ticket reports `item: None`; it releases nothing but no longer
//! holds back the tickets behind it.  Tasks check the [`TeardownLatch`]
//! before reporting, so nothing surfaces after teardown.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::decode::AudioDecoder;
use super::fetch::AudioFetcher;
use super::output::OutputFormat;
use crate::playback::AudioItem;
use crate::session::TeardownLatch;

/// Result of one ticket, reported back to the session actor.
#[derive(Debug)]
pub struct FetchOutcome {
    pub ticket: u64,
    /// `None` when fetch or decode failed.
    pub item: Option<AudioItem>,
}

/// Submission side and reorder buffer of the pipeline.  Owned by the session
/// actor; only the spawned tasks run concurrently.
pub struct FetchPipeline {
    fetcher: Arc<dyn AudioFetcher>,
    decoder: Arc<dyn AudioDecoder>,
    format: OutputFormat,
    outcomes: mpsc::UnboundedSender<FetchOutcome>,
    latch: TeardownLatch,
    next_ticket: u64,
    /// Next ticket allowed to leave the pipeline.
    cursor: u64,
    parked: BTreeMap<u64, Option<AudioItem>>,
}

impl FetchPipeline {
    pub fn new(
        fetcher: Arc<dyn AudioFetcher>,
        decoder: Arc<dyn AudioDecoder>,
        format: OutputFormat,
        outcomes: mpsc::UnboundedSender<FetchOutcome>,
        latch: TeardownLatch,
    ) -> Self {
        Self {
            fetcher,
            decoder,
            format,
            outcomes,
            latch,
            next_ticket: 0,
            cursor: 0,
            parked: BTreeMap::new(),
        }
    }

    /// Fetch `url`, decode it and report an item captioned `caption`.
    /// Must be called from within a tokio runtime.
    pub fn submit_url(&mut self, seq: u64, url: String, caption: String, announced: Option<f32>) {
        let ticket = self.take_ticket();
        let fetcher = Arc::clone(&self.fetcher);
        let decoder = Arc::clone(&self.decoder);
        let format = self.format;
        let outcomes = self.outcomes.clone();
        let latch = self.latch.clone();

        tokio::spawn(async move {
            let item = match fetcher.fetch(&url).await {
                Ok(bytes) => decode_item(decoder, format, seq, bytes, caption, announced).await,
                Err(e) => {
                    log::warn!("fetch: seq {seq}: dropping {url}: {e}");
                    None
                }
            };
            report(&latch, &outcomes, FetchOutcome { ticket, item });
        });
    }

    /// Decode an already delivered payload.  Shares the ticket order with
    /// [`submit_url`](Self::submit_url).
    pub fn submit_inline(&mut self, seq: u64, bytes: Vec<u8>, caption: String) {
        let ticket = self.take_ticket();
        let decoder = Arc::clone(&self.decoder);
        let format = self.format;
        let outcomes = self.outcomes.clone();
        let latch = self.latch.clone();

        tokio::spawn(async move {
            let item = decode_item(decoder, format, seq, bytes, caption, None).await;
            report(&latch, &outcomes, FetchOutcome { ticket, item });
        });
    }

    /// Register a finished ticket and return the items that are now next in
    /// submission order.
    pub fn accept(&mut self, outcome: FetchOutcome) -> Vec<AudioItem> {
        if outcome.ticket < self.cursor || outcome.ticket >= self.next_ticket {
            log::debug!("fetch: ignoring outcome for retired ticket {}", outcome.ticket);
            return Vec::new();
        }
        self.parked.insert(outcome.ticket, outcome.item);

        let mut ready = Vec::new();
        while let Some(entry) = self.parked.remove(&self.cursor) {
            self.cursor += 1;
            if let Some(item) = entry {
                ready.push(item);
            }
        }
        ready
    }

    /// Tickets submitted but not yet released or dropped.
    pub fn in_flight(&self) -> u64 {
        self.next_ticket - self.cursor
    }

    /// Forget every outstanding ticket.  Outcomes still on their way are
    /// ignored by [`accept`](Self::accept).
    pub fn clear(&mut self) {
        self.parked.clear();
        self.cursor = self.next_ticket;
    }

    fn take_ticket(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }
}

async fn decode_item(
    decoder: Arc<dyn AudioDecoder>,
    format: OutputFormat,
    seq: u64,
    bytes: Vec<u8>,
    caption: String,
    announced: Option<f32>,
) -> Option<AudioItem> {
    let decoded =
        tokio::task::spawn_blocking(move || decoder.decode(&bytes).map(|clip| format.convert(&clip)));
    match decoded.await {
        Ok(Ok(clip)) => Some(AudioItem::new(seq, clip, caption, announced)),
        Ok(Err(e)) => {
            log::warn!("fetch: seq {seq}: dropping undecodable payload: {e}");
            None
        }
        Err(e) => {
            log::error!("fetch: seq {seq}: decode task failed: {e}");
            None
        }
    }
}

fn report(latch: &TeardownLatch, outcomes: &mpsc::UnboundedSender<FetchOutcome>, outcome: FetchOutcome) {
    if latch.is_set() {
        log::debug!("fetch: session torn down, discarding ticket {}", outcome.ticket);
        return;
    }
    let _ = outcomes.send(outcome);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
