//! Session phase and the state shared with the UI.
//!
//! [`SessionState`] is the single source of truth the window renders each
//! frame.  The session actor and the playback listeners write it; nothing
//! else does.
//!
//! [`SharedState`] is a type alias for `Arc<Mutex<SessionState>>`, cheap to
//! clone and safe to share across threads.

use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// SessionPhase
// ---------------------------------------------------------------------------

/// Lifecycle of one playback session.
///
/// ```text
/// Idle ──start──▶ Connecting ──stream open──▶ Streaming
///                     │                          │ done
///                     │                          ▼
///                     │                       Draining ──queue drained──▶ Finished
///                     └──open failed──▶ Error
/// any ──stop──▶ Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    Connecting,
    Streaming,
    /// `done` received; queued audio is still playing.
    Draining,
    Finished,
    Stopped,
    Error,
}

impl SessionPhase {
    /// Returns `true` while a session is between `start` and `done`.
    ///
    /// ```
    /// use flowist_player::session::SessionPhase;
    ///
    /// assert!(SessionPhase::Connecting.is_busy());
    /// assert!(SessionPhase::Streaming.is_busy());
    /// assert!(!SessionPhase::Draining.is_busy());
    /// assert!(!SessionPhase::Idle.is_busy());
    /// ```
    pub fn is_busy(&self) -> bool {
        matches!(self, SessionPhase::Connecting | SessionPhase::Streaming)
    }

    /// A short label for the status line.
    pub fn label(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "Ready",
            SessionPhase::Connecting => "Connecting",
            SessionPhase::Streaming => "Streaming",
            SessionPhase::Draining => "Finishing",
            SessionPhase::Finished => "Finished",
            SessionPhase::Stopped => "Stopped",
            SessionPhase::Error => "Error",
        }
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub phase: SessionPhase,

    /// Start guard: held from `start` until `done`, stop or teardown.
    pub in_flight: bool,

    /// An item is audible.
    pub is_playing: bool,

    /// The current session has been torn down.  Reset by the next start.
    pub is_destroyed: bool,

    /// Caption of the audible item, empty otherwise.
    pub current_caption: String,

    /// Id announced by the server in `session_start`.
    pub session_id: Option<String>,

    /// Most recent failure worth showing to the user.
    pub last_error: Option<String>,
}

/// Thread-safe handle to [`SessionState`].
///
/// Lock for short critical sections only; never hold the guard across an
/// `.await`.
pub type SharedState = Arc<Mutex<SessionState>>;

pub fn new_shared_state() -> SharedState {
    Arc::new(Mutex::new(SessionState::default()))
}

/// Apply `f` to the shared state, tolerating a poisoned lock.
pub(crate) fn update<R>(state: &SharedState, f: impl FnOnce(&mut SessionState) -> R) -> R {
    let mut guard = match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    f(&mut guard)
}

/// Copy of the current state.
pub(crate) fn snapshot(state: &SharedState) -> SessionState {
    update(state, |s| s.clone())
}
