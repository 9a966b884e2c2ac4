//! The transaction and block failure taxonomy.

use alloy_primitives::U256;
use stele_state::StateError;
use thiserror::Error;

/// Per-transaction validation failures. These are reported for the
/// offending transaction and do not abort the block.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidTransaction {
    /// The transaction nonce is behind the sender's.
    #[error("nonce too low: tx {tx}, state {state}")]
    NonceTooLow {
        /// Nonce carried by the transaction.
        tx: u64,
        /// The sender's current nonce.
        state: u64,
    },
    /// The transaction nonce is ahead of the sender's.
    #[error("nonce too high: tx {tx}, state {state}")]
    NonceTooHigh {
        /// Nonce carried by the transaction.
        tx: u64,
        /// The sender's current nonce.
        state: u64,
    },
    /// The sender's nonce cannot be incremented any further.
    #[error("sender nonce at maximum")]
    NonceOverflow,
    /// The sender cannot cover gas purchase plus value.
    #[error("insufficient funds: need {required}, have {available}")]
    InsufficientFunds {
        /// Wei required up front.
        required: U256,
        /// The sender's balance.
        available: U256,
    },
    /// The gas limit does not cover the intrinsic cost.
    #[error("intrinsic gas too low: need {required}, limit {limit}")]
    IntrinsicGasTooLow {
        /// Intrinsic gas of the transaction.
        required: u64,
        /// Gas limit carried by the transaction.
        limit: u64,
    },
    /// `max_priority_fee_per_gas` exceeds `max_fee_per_gas`.
    #[error("priority fee above fee cap")]
    TipAboveFeeCap,
    /// `max_fee_per_gas` is below the block base fee.
    #[error("fee cap below block base fee")]
    FeeCapTooLow,
    /// The blob fee cap is below the block blob base fee.
    #[error("blob fee cap below block blob base fee")]
    MaxFeePerBlobGasTooLow,
    /// The sender has code and no delegation designation (EIP-3607).
    #[error("sender is not an externally owned account")]
    SenderNoEOA,
    /// The transaction type is not enabled at the current fork.
    #[error("transaction type {0} not supported at this fork")]
    TxTypeNotSupported(u8),
    /// A blob transaction carries more blobs than allowed.
    #[error("too many blobs: {have}")]
    TooManyBlobs {
        /// Number of blob hashes carried.
        have: usize,
    },
    /// The per-transaction gas cap is exceeded (EIP-7825).
    #[error("gas limit {limit} above the per-transaction cap")]
    GasLimitTooHigh {
        /// Gas limit carried by the transaction.
        limit: u64,
    },
}

/// Failures of the state transition. The pool variants are block-invalid:
/// they abort the block rather than just the transaction.
#[derive(Error, Debug)]
pub enum TransitionError {
    /// The transaction failed validation.
    #[error(transparent)]
    Invalid(#[from] InvalidTransaction),
    /// The block gas pool cannot cover the transaction's gas limit.
    #[error("block gas limit reached")]
    GasLimitReached,
    /// The block blob gas pool cannot cover the transaction's blobs.
    #[error("block blob gas limit reached")]
    BlobGasLimitReached,
    /// Reading through to committed state failed.
    #[error(transparent)]
    State(#[from] StateError),
    /// The EVM collaborator failed structurally.
    #[error(transparent)]
    Evm(#[from] EvmError),
}

/// A structural failure inside the EVM collaborator.
#[derive(Error, Debug)]
#[error("evm failure: {0}")]
pub struct EvmError(pub String);

impl From<StateError> for EvmError {
    fn from(err: StateError) -> Self {
        Self(err.to_string())
    }
}

/// Result alias for transition operations.
pub type TransitionResult<T> = Result<T, TransitionError>;
