//! The context threaded explicitly through stage boundaries.
//!
//! No module-level singletons: the cancellation flag travels with the
//! [Context] handed to every stage invocation.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// A cooperative cancellation flag. Stages poll it between blocks, never
/// within one; the in-flight transaction is rolled back on observation.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    /// A fresh, unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clears the flag so a cancelled pass can be re-run.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Per-run context shared by all stages.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// The cooperative cancellation flag.
    pub cancellation: Cancellation,
}

impl Context {
    /// A context with a fresh cancellation flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
