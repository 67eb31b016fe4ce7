//! Session lifecycle: the controller the UI drives, the actor it spawns and
//! the state both share.

pub mod controller;
pub mod latch;
pub mod state;

pub use controller::{SessionController, SessionError};
pub use latch::TeardownLatch;
pub use state::{new_shared_state, SessionPhase, SessionState, SharedState};
