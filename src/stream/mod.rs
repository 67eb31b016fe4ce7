//! Event stream module: wire records, incremental decoding, redelivery
//! filtering and the narration backend seam.
//!
//! # Data flow
//!
//! ```text
//! NarrationService::open(SessionRequest)
//!        │  Box<dyn ChunkSource>
//!        ▼
//! pump_events()  ← reader task
//!        │  EventDecoder::push(chunk) → Vec<StreamEvent>
//!        ▼
//! mpsc::Sender<StreamEvent> ──▶ session actor ──▶ Deduplicator::accept
//! ```

pub mod decoder;
pub mod dedup;
pub mod event;
pub mod reader;
pub mod request;
pub mod source;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use decoder::EventDecoder;
pub use dedup::Deduplicator;
pub use event::{parse_payload, EventKind, RecordError, StreamEvent};
pub use reader::pump_events;
pub use request::{CurrentContext, SessionRequest};
pub use source::{ApiNarrationService, ChunkSource, NarrationService, StreamError};

#[cfg(test)]
pub use source::MockNarrationService;
