//! Process-wide run flag.
//!
//! The flag starts raised and is lowered exactly once, by whoever observes the quit trigger.
//! Every task holds a clone and checks it at its loop boundary.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

#[derive(Clone, Debug)]
pub struct Shutdown {
    running: Arc<AtomicBool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Request shutdown.
    ///
    /// Returns `true` only for the call that actually lowered the flag, so repeated triggers are
    /// harmless.
    pub fn trigger(&self) -> bool {
        self.running.swap(false, Ordering::AcqRel)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}
