//! The commitment builder: turns hashed account and storage updates into the
//! 32-byte state root the execution stage verifies headers against.

use crate::{
    node::TrieNode,
    provider::LayeredProvider,
    TrieAccount, TrieError, TrieProvider, TrieResult,
};
use alloy_primitives::{map::HashMap, B256, U256};
use alloy_rlp::Encodable;
use alloy_trie::Nibbles;
use std::collections::BTreeMap;

/// How much commitment state the builder keeps and persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitmentMode {
    /// Persist every interior node through the returned updates; unchanged
    /// subtrees can be re-expanded from storage across restarts.
    FullTrie,
    /// Keep interior nodes only in the session; the root is reproducible on
    /// demand but nothing interior is persisted.
    CommitmentOnly,
    /// Skip commitment entirely. Tests only.
    Disabled,
}

/// The outcome of a root computation: the root plus, in
/// [CommitmentMode::FullTrie], the interior node preimages to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootWithUpdates {
    /// The state root.
    pub root: B256,
    /// `(commitment, encoding)` pairs of every freshly hashed node. Empty
    /// outside full-trie mode.
    pub nodes: Vec<(B256, Vec<u8>)>,
}

/// Accumulates account and storage updates and resolves the minimal set of
/// dirtied subtrees into a new root. Paths are pre-hashed: account keys are
/// `keccak256(address)`, storage keys `keccak256(slot)`.
#[derive(Debug)]
pub struct Commitment {
    mode: CommitmentMode,
    account_trie: TrieNode,
    storage_tries: HashMap<B256, TrieNode>,
    session: HashMap<B256, Vec<u8>>,
    pending_accounts: HashMap<B256, Option<TrieAccount>>,
    pending_storage: HashMap<B256, BTreeMap<B256, U256>>,
    wiped_storage: Vec<B256>,
}

impl Commitment {
    /// A builder over an empty state.
    pub fn new(mode: CommitmentMode) -> Self {
        Self::with_root(mode, alloy_trie::EMPTY_ROOT_HASH)
    }

    /// A builder over an existing state root. Dirtied paths are expanded on
    /// demand through the provider handed to [Self::compute_root].
    pub fn with_root(mode: CommitmentMode, root: B256) -> Self {
        Self {
            mode,
            account_trie: TrieNode::new_blinded(root),
            storage_tries: HashMap::default(),
            session: HashMap::default(),
            pending_accounts: HashMap::default(),
            pending_storage: HashMap::default(),
            wiped_storage: Vec::new(),
        }
    }

    /// The configured mode.
    pub const fn mode(&self) -> CommitmentMode {
        self.mode
    }

    /// Stages an account write (`None` deletes). The account's
    /// `storage_root` is overridden when storage updates for the same
    /// address are staged.
    pub fn update_account(&mut self, hashed_address: B256, account: Option<TrieAccount>) {
        if self.mode == CommitmentMode::Disabled {
            return;
        }
        self.pending_accounts.insert(hashed_address, account);
    }

    /// Stages a storage write; a zero value deletes the slot.
    pub fn update_storage(&mut self, hashed_address: B256, hashed_slot: B256, value: U256) {
        if self.mode == CommitmentMode::Disabled {
            return;
        }
        self.pending_storage.entry(hashed_address).or_default().insert(hashed_slot, value);
    }

    /// Discards the account's entire storage sub-trie before applying any
    /// staged slots. Required when a contract is recreated at the same
    /// address: the incarnation bump makes all prior storage unreachable.
    pub fn wipe_storage(&mut self, hashed_address: B256) {
        if self.mode == CommitmentMode::Disabled {
            return;
        }
        self.wiped_storage.push(hashed_address);
    }

    /// Drops all in-memory trie state. The next computation starts from the
    /// root passed in, expanding through whatever provider is supplied.
    pub fn reset_to(&mut self, root: B256) {
        self.account_trie = TrieNode::new_blinded(root);
        self.storage_tries.clear();
        self.session.clear();
        self.pending_accounts.clear();
        self.pending_storage.clear();
        self.wiped_storage.clear();
    }

    /// Resolves all staged updates into a state root. Returns `None` in
    /// [CommitmentMode::Disabled].
    pub fn compute_root<P: TrieProvider>(
        &mut self,
        provider: &P,
    ) -> TrieResult<Option<RootWithUpdates>> {
        if self.mode == CommitmentMode::Disabled {
            self.pending_accounts.clear();
            self.pending_storage.clear();
            return Ok(None);
        }

        let session = std::mem::take(&mut self.session);
        let provider = LayeredProvider { session: &session, fallback: provider };
        let mut collected: Vec<(B256, Vec<u8>)> = Vec::new();

        let result = self.apply_pending(&provider, &mut collected);

        // Restore the session before surfacing any error so the builder
        // stays usable.
        self.session = session;
        let root = result?;

        match self.mode {
            CommitmentMode::FullTrie => Ok(Some(RootWithUpdates { root, nodes: collected })),
            CommitmentMode::CommitmentOnly => {
                self.session.extend(collected);
                Ok(Some(RootWithUpdates { root, nodes: Vec::new() }))
            }
            CommitmentMode::Disabled => unreachable!("handled above"),
        }
    }

    fn apply_pending<P: TrieProvider>(
        &mut self,
        provider: &P,
        collected: &mut Vec<(B256, Vec<u8>)>,
    ) -> TrieResult<B256> {
        let mut sink = |commitment: B256, encoding: &[u8]| {
            collected.push((commitment, encoding.to_vec()));
        };

        // Wiped accounts restart from an empty storage sub-trie.
        let wiped = std::mem::take(&mut self.wiped_storage);
        for hashed_address in &wiped {
            self.storage_tries.insert(*hashed_address, TrieNode::Empty);
        }

        // Apply storage updates per account, committing each dirtied
        // sub-trie to its new root.
        let mut storage_roots: HashMap<B256, B256> = HashMap::default();
        for (hashed_address, slots) in std::mem::take(&mut self.pending_storage) {
            if matches!(self.pending_accounts.get(&hashed_address), Some(None)) {
                // The account is being deleted; its storage goes with it.
                self.storage_tries.remove(&hashed_address);
                continue;
            }
            let base_root = self.storage_base_root(&hashed_address, provider)?;
            let trie = self
                .storage_tries
                .entry(hashed_address)
                .or_insert_with(|| TrieNode::new_blinded(base_root));
            for (hashed_slot, value) in slots {
                let path = Nibbles::unpack(hashed_slot);
                if value.is_zero() {
                    trie.delete(&path, provider)?;
                } else {
                    let mut encoded = Vec::with_capacity(33);
                    value.encode(&mut encoded);
                    trie.insert(&path, encoded, provider)?;
                }
            }
            storage_roots.insert(hashed_address, trie.commit(&mut sink));
        }
        for hashed_address in wiped {
            storage_roots.entry(hashed_address).or_insert(alloy_trie::EMPTY_ROOT_HASH);
        }

        // Fold account updates (and storage-root changes) into the account
        // trie.
        let mut touched: Vec<B256> = self.pending_accounts.keys().copied().collect();
        touched.extend(storage_roots.keys().copied());
        touched.sort_unstable();
        touched.dedup();

        for hashed_address in touched {
            let path = Nibbles::unpack(hashed_address);
            match self.pending_accounts.remove(&hashed_address) {
                Some(None) => {
                    self.account_trie.delete(&path, provider)?;
                    self.storage_tries.remove(&hashed_address);
                }
                Some(Some(mut account)) => {
                    // A freshly committed storage root wins; otherwise keep
                    // whatever root the trie already holds for the account.
                    // The caller's copy is only trusted for new accounts.
                    match storage_roots.get(&hashed_address) {
                        Some(root) => account.storage_root = *root,
                        None => {
                            if let Some(encoded) = self.account_trie.open(&path, provider)? {
                                account.storage_root =
                                    TrieAccount::decode(encoded).map_err(TrieError::Rlp)?.storage_root;
                            }
                        }
                    }
                    self.account_trie.insert(&path, account.encode(), provider)?;
                }
                None => {
                    // Storage-only change: rewrite the stored account with
                    // its new storage root.
                    let Some(encoded) = self.account_trie.open(&path, provider)? else {
                        // Storage write against an account absent from the
                        // trie; nothing to commit for it.
                        self.storage_tries.remove(&hashed_address);
                        continue;
                    };
                    let mut account = TrieAccount::decode(encoded).map_err(TrieError::Rlp)?;
                    account.storage_root =
                        *storage_roots.get(&hashed_address).expect("address came from this map");
                    self.account_trie.insert(&path, account.encode(), provider)?;
                }
            }
        }

        Ok(self.account_trie.commit(&mut sink))
    }

    /// The storage root updates for `hashed_address` start from: the
    /// committed account's root, a staged new account's root, or the empty
    /// root for fresh accounts.
    fn storage_base_root<P: TrieProvider>(
        &mut self,
        hashed_address: &B256,
        provider: &P,
    ) -> TrieResult<B256> {
        if self.storage_tries.contains_key(hashed_address) {
            // Already loaded; base root is irrelevant.
            return Ok(alloy_trie::EMPTY_ROOT_HASH);
        }
        let path = Nibbles::unpack(hashed_address);
        if let Some(encoded) = self.account_trie.open(&path, provider)? {
            return Ok(TrieAccount::decode(encoded).map_err(TrieError::Rlp)?.storage_root);
        }
        if let Some(Some(account)) = self.pending_accounts.get(hashed_address) {
            return Ok(account.storage_root);
        }
        Ok(alloy_trie::EMPTY_ROOT_HASH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MapProvider, NoopTrieProvider};
    use alloy_primitives::keccak256;
    use alloy_trie::EMPTY_ROOT_HASH;

    fn account(nonce: u64, balance: u64) -> TrieAccount {
        TrieAccount {
            nonce,
            balance: U256::from(balance),
            storage_root: EMPTY_ROOT_HASH,
            code_hash: keccak256([]),
        }
    }

    fn hashed(byte: u8) -> B256 {
        keccak256([byte])
    }

    #[test]
    fn test_disabled_mode_returns_none() {
        let mut commitment = Commitment::new(CommitmentMode::Disabled);
        commitment.update_account(hashed(1), Some(account(1, 10)));
        assert_eq!(commitment.compute_root(&NoopTrieProvider).unwrap(), None);
    }

    #[test]
    fn test_empty_state_root() {
        let mut commitment = Commitment::new(CommitmentMode::CommitmentOnly);
        let result = commitment.compute_root(&NoopTrieProvider).unwrap().unwrap();
        assert_eq!(result.root, EMPTY_ROOT_HASH);
    }

    #[test]
    fn test_root_is_insertion_order_independent() {
        let accounts: Vec<(B256, TrieAccount)> =
            (0u8..16).map(|i| (hashed(i), account(i as u64, 1000 + i as u64))).collect();

        let mut forward = Commitment::new(CommitmentMode::CommitmentOnly);
        for (address, acct) in &accounts {
            forward.update_account(*address, Some(*acct));
        }
        let forward_root = forward.compute_root(&NoopTrieProvider).unwrap().unwrap().root;

        let mut reverse = Commitment::new(CommitmentMode::CommitmentOnly);
        for (address, acct) in accounts.iter().rev() {
            reverse.update_account(*address, Some(*acct));
        }
        let reverse_root = reverse.compute_root(&NoopTrieProvider).unwrap().unwrap().root;
        assert_eq!(forward_root, reverse_root);
    }

    #[test]
    fn test_incremental_matches_batch() {
        // Commit a base set, then add one account incrementally; the result
        // must match building the final state in one shot.
        let mut incremental = Commitment::new(CommitmentMode::CommitmentOnly);
        for i in 0u8..8 {
            incremental.update_account(hashed(i), Some(account(i as u64, 5)));
        }
        incremental.compute_root(&NoopTrieProvider).unwrap();
        incremental.update_account(hashed(42), Some(account(9, 9)));
        let incremental_root =
            incremental.compute_root(&NoopTrieProvider).unwrap().unwrap().root;

        let mut batch = Commitment::new(CommitmentMode::CommitmentOnly);
        for i in 0u8..8 {
            batch.update_account(hashed(i), Some(account(i as u64, 5)));
        }
        batch.update_account(hashed(42), Some(account(9, 9)));
        assert_eq!(batch.compute_root(&NoopTrieProvider).unwrap().unwrap().root, incremental_root);
    }

    #[test]
    fn test_storage_changes_the_account_root() {
        let mut commitment = Commitment::new(CommitmentMode::CommitmentOnly);
        commitment.update_account(hashed(1), Some(account(0, 1)));
        let bare = commitment.compute_root(&NoopTrieProvider).unwrap().unwrap().root;

        commitment.update_storage(hashed(1), keccak256([0u8; 32]), U256::from(7u64));
        let with_storage = commitment.compute_root(&NoopTrieProvider).unwrap().unwrap().root;
        assert_ne!(bare, with_storage);

        // Clearing the slot restores the original root.
        commitment.update_storage(hashed(1), keccak256([0u8; 32]), U256::ZERO);
        let cleared = commitment.compute_root(&NoopTrieProvider).unwrap().unwrap().root;
        assert_eq!(cleared, bare);
    }

    #[test]
    fn test_delete_account_restores_root() {
        let mut commitment = Commitment::new(CommitmentMode::CommitmentOnly);
        commitment.update_account(hashed(1), Some(account(0, 1)));
        let one = commitment.compute_root(&NoopTrieProvider).unwrap().unwrap().root;

        commitment.update_account(hashed(2), Some(account(0, 2)));
        commitment.compute_root(&NoopTrieProvider).unwrap();
        commitment.update_account(hashed(2), None);
        let back = commitment.compute_root(&NoopTrieProvider).unwrap().unwrap().root;
        assert_eq!(back, one);
    }

    #[test]
    fn test_wiped_storage_resets_the_sub_trie() {
        // A contract with storage, recreated: the wipe drops every old
        // slot, so the root matches a fresh account without storage.
        let mut commitment = Commitment::new(CommitmentMode::CommitmentOnly);
        commitment.update_account(hashed(1), Some(account(1, 1)));
        commitment.update_storage(hashed(1), keccak256([1u8; 32]), U256::from(5u64));
        commitment.update_storage(hashed(1), keccak256([2u8; 32]), U256::from(6u64));
        commitment.compute_root(&NoopTrieProvider).unwrap();

        commitment.wipe_storage(hashed(1));
        commitment.update_account(hashed(1), Some(account(0, 1)));
        let recreated = commitment.compute_root(&NoopTrieProvider).unwrap().unwrap().root;

        let mut fresh = Commitment::new(CommitmentMode::CommitmentOnly);
        fresh.update_account(hashed(1), Some(account(0, 1)));
        assert_eq!(fresh.compute_root(&NoopTrieProvider).unwrap().unwrap().root, recreated);
    }

    #[test]
    fn test_full_trie_mode_round_trips_through_persisted_nodes() {
        // Compute with full-trie mode, persist the nodes, then restart from
        // the bare root and apply an incremental change through the
        // persisted preimages.
        let mut provider = MapProvider::new();
        let mut commitment = Commitment::new(CommitmentMode::FullTrie);
        for i in 0u8..16 {
            commitment.update_account(hashed(i), Some(account(i as u64, 100)));
        }
        let result = commitment.compute_root(&provider).unwrap().unwrap();
        assert!(!result.nodes.is_empty());
        for (hash, encoding) in result.nodes {
            provider.insert(hash, encoding);
        }

        let mut restarted = Commitment::with_root(CommitmentMode::FullTrie, result.root);
        restarted.update_account(hashed(3), Some(account(7, 700)));
        let updated = restarted.compute_root(&provider).unwrap().unwrap();

        let mut batch = Commitment::new(CommitmentMode::CommitmentOnly);
        for i in 0u8..16 {
            let acct = if i == 3 { account(7, 700) } else { account(i as u64, 100) };
            batch.update_account(hashed(i), Some(acct));
        }
        assert_eq!(batch.compute_root(&NoopTrieProvider).unwrap().unwrap().root, updated.root);
    }
}
