//! Playback of decoded narration segments and caption synchronisation.
//!
//! ```text
//! FetchPipeline ──AudioItem──▶ PlaybackQueue ──start_unit──▶ AudioOutput
//!                                   │  ▲                         │
//!                                   │  └────── unit finished ────┘
//!                                   ▼
//!                      PlaybackSignal listeners
//!                       └─▶ SubtitleSynchronizer → SharedState.current_caption
//! ```

pub mod item;
pub mod queue;
pub mod subtitle;

pub use item::AudioItem;
pub use queue::{Listener, PlaybackQueue, PlaybackSignal, QueueState};
pub use subtitle::SubtitleSynchronizer;
