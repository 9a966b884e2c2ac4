//! Stage and pipeline errors.

use alloy_primitives::B256;
use stele_executor::{InvalidTransaction, TransitionError};
use stele_kv::{segment::SegmentError, KvError};
use stele_state::StateError;
use stele_trie::TrieError;
use thiserror::Error;

/// Block-level validation failures. These abort the block and the forward
/// pass; the stage's checkpoint stays at the last fully verified block.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// The recomputed state root does not match the header.
    #[error("state root mismatch: header {expected}, computed {got}")]
    StateRootMismatch {
        /// Root claimed by the header.
        expected: B256,
        /// Root derived from execution.
        got: B256,
    },
    /// The recomputed receipts root does not match the header.
    #[error("receipts root mismatch: header {expected}, computed {got}")]
    ReceiptsRootMismatch {
        /// Root claimed by the header.
        expected: B256,
        /// Root derived from the receipts.
        got: B256,
    },
    /// The recomputed transactions root does not match the header.
    #[error("transactions root mismatch: header {expected}, computed {got}")]
    TransactionsRootMismatch {
        /// Root claimed by the header.
        expected: B256,
        /// Root derived from the body.
        got: B256,
    },
    /// The recomputed logs bloom does not match the header.
    #[error("logs bloom mismatch")]
    LogsBloomMismatch,
    /// The per-transaction gas sum does not match the header.
    #[error("gas used mismatch: header {expected}, computed {got}")]
    GasUsedMismatch {
        /// Gas used claimed by the header.
        expected: u64,
        /// Sum of per-transaction gas.
        got: u64,
    },
    /// The per-transaction blob gas sum does not match the header.
    #[error("blob gas used mismatch: header {expected:?}, computed {got}")]
    BlobGasUsedMismatch {
        /// Blob gas claimed by the header.
        expected: Option<u64>,
        /// Sum of per-transaction blob gas.
        got: u64,
    },
    /// A header does not link to its parent.
    #[error("broken parent link at block {number}")]
    BrokenParentLink {
        /// The block whose parent hash does not match.
        number: u64,
    },
    /// The ommer list does not hash to the header's ommers hash.
    #[error("ommers hash mismatch")]
    OmmersHashMismatch,
    /// The withdrawal list does not match the header's withdrawals root.
    #[error("withdrawals root mismatch")]
    WithdrawalsRootMismatch,
    /// A transaction in the block failed validation.
    #[error("invalid transaction at index {index}: {error}")]
    InvalidTransaction {
        /// Index of the offending transaction.
        index: usize,
        /// Why it was rejected.
        error: InvalidTransaction,
    },
    /// The block gas pool was exhausted mid-block.
    #[error("block gas limit reached")]
    GasLimitReached,
    /// The blob gas pool was exhausted mid-block.
    #[error("block blob gas limit reached")]
    BlobGasLimitReached,
    /// A transaction signature did not recover to a sender.
    #[error("unrecoverable sender for transaction {index}")]
    SenderRecovery {
        /// Index of the offending transaction.
        index: usize,
    },
}

/// A stage failure. Everything except [StageError::Validation] is
/// structural and propagates to the scheduler unchanged.
#[derive(Error, Debug)]
pub enum StageError {
    /// A block failed validation.
    #[error("validation failed at block {block}: {error}")]
    Validation {
        /// The offending block.
        block: u64,
        /// What failed.
        error: ValidationError,
    },
    /// The store failed.
    #[error(transparent)]
    Kv(#[from] KvError),
    /// A segment file was corrupt or unreadable.
    #[error(transparent)]
    Segment(#[from] SegmentError),
    /// The commitment builder failed.
    #[error(transparent)]
    Trie(#[from] TrieError),
    /// Reading committed state failed.
    #[error(transparent)]
    State(#[from] StateError),
    /// The EVM collaborator failed structurally.
    #[error("execution failed at block {block}: {error}")]
    Execution {
        /// The block being executed.
        block: u64,
        /// The underlying transition failure.
        error: TransitionError,
    },
    /// An expected row was missing from the store.
    #[error("database integrity: missing {what} for block {block}")]
    MissingData {
        /// The block the lookup was for.
        block: u64,
        /// What was expected.
        what: &'static str,
    },
    /// A stored payload failed to decode.
    #[error("database integrity: corrupt {what} for block {block}")]
    CorruptData {
        /// The block the payload belongs to.
        block: u64,
        /// What failed to decode.
        what: &'static str,
    },
    /// The header or body source failed.
    #[error("source error: {0}")]
    Source(#[from] crate::SourceError),
    /// The stage was cancelled between blocks.
    #[error("cancelled")]
    Cancelled,
}
