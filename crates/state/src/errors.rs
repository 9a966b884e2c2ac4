//! State access errors.

use thiserror::Error;

/// Failures reading through to the underlying store.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StateError {
    /// The backing store failed.
    #[error("state read failed: {0}")]
    Database(String),
    /// A stored account or value failed to decode.
    #[error("corrupt state encoding: {0}")]
    Rlp(alloy_rlp::Error),
}

impl From<alloy_rlp::Error> for StateError {
    fn from(err: alloy_rlp::Error) -> Self {
        Self::Rlp(err)
    }
}

/// Result alias for state operations.
pub type StateResult<T> = Result<T, StateError>;
