//! The closed set of tables the client stores.
//!
//! Modelling tables as an enum rather than runtime strings lets key-width and
//! sort constraints live at the type level, and makes a forgotten table a
//! compile error instead of a missing bucket.

/// Every table in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Table {
    /// `blockNum:8 ‖ hash:32` → header RLP.
    Headers,
    /// `blockNum:8` → body envelope RLP (ommers + withdrawals; transactions
    /// live in [Table::Transactions]).
    Bodies,
    /// `blockNum:8` → concatenated 20-byte sender addresses, tx-index order.
    Senders,
    /// `blockNum:8` → canonical block hash.
    CanonicalHashes,
    /// `hash:32` → block number.
    HeaderNumbers,
    /// `blockNum:8 ‖ txIndex:4` → transaction envelope.
    Transactions,
    /// `txHash:32` → block number.
    TxLookup,
    /// `blockNum:8` → receipt list RLP.
    BlockReceipts,
    /// `address:20` → account, and `address:20 ‖ incarnation:8 ‖ slot:32` →
    /// storage value.
    PlainState,
    /// `keccak(address):32` → account.
    HashedAccounts,
    /// `keccak(address):32 ‖ incarnation:8 ‖ keccak(slot):32` → storage value.
    HashedStorage,
    /// `codeHash:32` → bytecode.
    Code,
    /// `blockNum:8 ‖ address:20` → previous account encoding (empty = absent).
    AccountsHistory,
    /// `blockNum:8 ‖ address:20 ‖ incarnation:8 ‖ slot:32` → previous value.
    StorageHistory,
    /// `nodeHash:32` → trie node RLP (commitment full-trie mode).
    TrieNodes,
    /// `stageName` → 8-byte big-endian block number.
    SyncStageProgress,
}

impl Table {
    /// Number of tables.
    pub const COUNT: usize = 16;

    /// All tables, in declaration order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Headers,
        Self::Bodies,
        Self::Senders,
        Self::CanonicalHashes,
        Self::HeaderNumbers,
        Self::Transactions,
        Self::TxLookup,
        Self::BlockReceipts,
        Self::PlainState,
        Self::HashedAccounts,
        Self::HashedStorage,
        Self::Code,
        Self::AccountsHistory,
        Self::StorageHistory,
        Self::TrieNodes,
        Self::SyncStageProgress,
    ];

    /// The table name as used in diagnostics.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Headers => "Headers",
            Self::Bodies => "Bodies",
            Self::Senders => "Senders",
            Self::CanonicalHashes => "CanonicalHashes",
            Self::HeaderNumbers => "HeaderNumbers",
            Self::Transactions => "Transactions",
            Self::TxLookup => "TxLookup",
            Self::BlockReceipts => "BlockReceipts",
            Self::PlainState => "PlainState",
            Self::HashedAccounts => "HashedAccounts",
            Self::HashedStorage => "HashedStorage",
            Self::Code => "Code",
            Self::AccountsHistory => "AccountsHistory",
            Self::StorageHistory => "StorageHistory",
            Self::TrieNodes => "TrieNodes",
            Self::SyncStageProgress => "SyncStageProgress",
        }
    }

    /// Whether keys in this table are prefixed by an 8-byte big-endian block
    /// number, making a block-range unwind a cursor range delete.
    pub const fn block_indexed(&self) -> bool {
        matches!(
            self,
            Self::Headers
                | Self::Bodies
                | Self::Senders
                | Self::CanonicalHashes
                | Self::Transactions
                | Self::BlockReceipts
                | Self::AccountsHistory
                | Self::StorageHistory
        )
    }

    pub(crate) const fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_tables_have_distinct_indices() {
        let mut seen = [false; Table::COUNT];
        for table in Table::ALL {
            assert!(!seen[table.index()], "duplicate index for {table}");
            seen[table.index()] = true;
        }
    }
}
