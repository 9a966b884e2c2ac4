//! Error type for store operations.

use thiserror::Error;

/// A structural store failure. `NotFound` is not an error: absent keys are
/// reported as `None` values.
#[derive(Error, Debug)]
pub enum KvError {
    /// Underlying file I/O failed.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A table payload failed to decode.
    #[error("corrupted table entry in {table}: {reason}")]
    Corruption {
        /// Table the entry was read from.
        table: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}
