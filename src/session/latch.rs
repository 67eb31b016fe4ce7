//! One-way teardown flag shared by the session actor and its helper tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Set once when a session is torn down and never cleared.  Async work
/// spawned for the session checks it before reporting back.
#[derive(Debug, Clone, Default)]
pub struct TeardownLatch(Arc<AtomicBool>);

impl TeardownLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the latch.  Returns `true` only for the call that set it.
    pub fn trip(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_once_for_every_clone() {
        let latch = TeardownLatch::new();
        let shared = latch.clone();
        assert!(!shared.is_set());

        assert!(latch.trip());
        assert!(!shared.trip());
        assert!(shared.is_set());
    }
}
