//! Trie error types.

use alloy_primitives::B256;
use thiserror::Error;

/// Failures while walking or hashing the trie.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TrieError {
    /// A blinded subtree had to be expanded but its preimage was not
    /// available.
    #[error("missing preimage for trie node {0}")]
    MissingNode(B256),
    /// A node preimage failed to decode.
    #[error("invalid trie node RLP: {0}")]
    Rlp(alloy_rlp::Error),
    /// A leaf or extension carried a malformed hex-prefix path.
    #[error("invalid hex-prefix encoding")]
    InvalidHexPrefix,
    /// The preimage provider failed.
    #[error("trie provider error: {0}")]
    Provider(String),
}

impl From<alloy_rlp::Error> for TrieError {
    fn from(err: alloy_rlp::Error) -> Self {
        Self::Rlp(err)
    }
}

/// Result alias for trie operations.
pub type TrieResult<T> = Result<T, TrieError>;
