//! The block-level change set extracted after execution.

use alloy_primitives::{Address, Bytes, B256};
use stele_primitives::Account;

/// One account's transition across the block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountChange {
    /// The account address.
    pub address: Address,
    /// Committed state before the block; `None` when previously absent.
    pub prev: Option<Account>,
    /// State after the block; `None` when deleted.
    pub current: Option<Account>,
}

/// One storage slot's transition across the block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    /// The contract address.
    pub address: Address,
    /// Incarnation the write happened under.
    pub incarnation: u64,
    /// The slot key.
    pub slot: B256,
    /// Committed value before the block.
    pub prev: B256,
    /// Value after the block.
    pub current: B256,
}

/// Everything a block changed, in the shape the execution stage persists:
/// plain-state writes, hashed-state writes, changesets and new code blobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockChanges {
    /// Account transitions, sorted by address.
    pub accounts: Vec<AccountChange>,
    /// Storage transitions, sorted by (address, incarnation, slot).
    pub storage: Vec<StorageChange>,
    /// Newly deployed code, keyed by code hash.
    pub code: Vec<(B256, Bytes)>,
}

impl BlockChanges {
    /// Whether the block changed nothing.
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.storage.is_empty() && self.code.is_empty()
    }
}
