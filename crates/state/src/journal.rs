//! The undo journal.
//!
//! Every mutation appends one inverse record; a revert replays the tail in
//! reverse. This composes arbitrarily nested snapshots without any
//! node-to-node links in the caches.

use alloy_primitives::{Address, Bytes, B256, U256};
use stele_primitives::Account;

/// One undoable mutation of the intra-block state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    /// An account was first marked touched.
    AccountTouched {
        /// The touched account.
        address: Address,
    },
    /// A balance changed.
    BalanceChange {
        /// The mutated account.
        address: Address,
        /// Balance before the change.
        prev: U256,
    },
    /// A nonce changed.
    NonceChange {
        /// The mutated account.
        address: Address,
        /// Nonce before the change.
        prev: u64,
    },
    /// A storage slot's current value changed.
    StorageChange {
        /// The mutated contract.
        address: Address,
        /// The slot key.
        slot: B256,
        /// Value before the change.
        prev: B256,
    },
    /// An account's code was replaced.
    CodeChange {
        /// The mutated account.
        address: Address,
        /// Code hash before the change.
        prev_code_hash: B256,
        /// In-block code bytes before the change, when the code had already
        /// been replaced once this block.
        prev_code: Option<Bytes>,
    },
    /// An address became warm.
    AccessListAddress {
        /// The warmed address.
        address: Address,
    },
    /// A storage slot became warm.
    AccessListSlot {
        /// The warmed contract.
        address: Address,
        /// The warmed slot.
        slot: B256,
    },
    /// The refund counter changed.
    RefundChange {
        /// Counter value before the change.
        prev: u64,
    },
    /// An account was marked for selfdestruct.
    SelfDestruct {
        /// The destructed account.
        address: Address,
        /// Whether the mark was already set.
        prev_flag: bool,
    },
    /// An account sprang into existence (or was recreated).
    AccountCreated {
        /// The created account.
        address: Address,
        /// The full account state replaced by the creation, `None` when the
        /// address was previously absent.
        prev: Option<Account>,
        /// Whether the created flag was already set.
        prev_created: bool,
    },
    /// A transient storage slot changed.
    TransientStorageChange {
        /// The mutated contract.
        address: Address,
        /// The transient key.
        key: B256,
        /// Value before the change.
        prev: B256,
    },
}
