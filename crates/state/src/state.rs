//! The journaled intra-block state.

use crate::{
    changes::{AccountChange, BlockChanges, StorageChange},
    AccessListState, JournalEntry, StateReader, StateResult,
};
use alloy_primitives::{keccak256, map::HashMap, Address, Bytes, B256, U256};
use lru::LruCache;
use std::num::NonZeroUsize;
use stele_primitives::{
    Account, AccessList, DELEGATION_PREFIX, FIRST_INCARNATION, KECCAK_EMPTY,
};
use tracing::trace;

/// Capacity of the shared read-through code cache.
const CODE_CACHE_SIZE: usize = 1024;

/// An opaque snapshot handle, valid until the next transaction boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot(usize);

#[derive(Debug)]
struct CachedAccount {
    /// Current in-block state; `None` when absent.
    account: Option<Account>,
    /// Committed state read from the store on first touch; never mutated.
    origin: Option<Account>,
    touched: bool,
    /// Created within the current transaction (EIP-6780).
    created: bool,
    selfdestructed: bool,
}

#[derive(Debug, Clone, Copy)]
struct SlotState {
    /// Value read from the store on first touch; never mutated after set.
    origin: B256,
    /// Value at block start, the reference for refund accounting.
    block_origin: B256,
    /// Current in-block value.
    current: B256,
}

/// The layered cache of accounts, storage and code over the committed
/// state, journaled so that nested snapshots revert exactly.
#[derive(Debug)]
pub struct IntraBlockState<R> {
    reader: R,
    accounts: HashMap<Address, CachedAccount>,
    /// Storage caches keyed by incarnation so a recreated contract starts
    /// from an empty view while a reverted recreation resumes the old one.
    storage: HashMap<(Address, u64), HashMap<B256, SlotState>>,
    code_cache: LruCache<B256, Bytes>,
    dirty_code: HashMap<Address, Bytes>,
    journal: Vec<JournalEntry>,
    snapshots: Vec<usize>,
    access_list: AccessListState,
    refund: u64,
    transient: HashMap<(Address, B256), B256>,
}

impl<R: StateReader> IntraBlockState<R> {
    /// Creates a state bound to the given committed-state reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            accounts: HashMap::default(),
            storage: HashMap::default(),
            code_cache: LruCache::new(NonZeroUsize::new(CODE_CACHE_SIZE).expect("nonzero")),
            dirty_code: HashMap::default(),
            journal: Vec::new(),
            snapshots: Vec::new(),
            access_list: AccessListState::default(),
            refund: 0,
            transient: HashMap::default(),
        }
    }

    fn load(&mut self, address: Address) -> StateResult<()> {
        if !self.accounts.contains_key(&address) {
            let committed = self.reader.account(&address)?;
            self.accounts.insert(
                address,
                CachedAccount {
                    account: committed,
                    origin: committed,
                    touched: false,
                    created: false,
                    selfdestructed: false,
                },
            );
        }
        Ok(())
    }

    fn cached(&self, address: &Address) -> &CachedAccount {
        self.accounts.get(address).expect("account loaded before access")
    }

    fn cached_mut(&mut self, address: &Address) -> &mut CachedAccount {
        self.accounts.get_mut(address).expect("account loaded before access")
    }

    // ----- existence -----

    /// Whether the account exists.
    pub fn exists(&mut self, address: Address) -> StateResult<bool> {
        self.load(address)?;
        Ok(self.cached(&address).account.is_some())
    }

    /// Whether the account is absent or empty per EIP-161.
    pub fn is_empty(&mut self, address: Address) -> StateResult<bool> {
        self.load(address)?;
        Ok(self.cached(&address).account.map_or(true, |account| account.is_empty()))
    }

    /// Whether the account was created within the current transaction.
    pub fn created_this_tx(&mut self, address: Address) -> StateResult<bool> {
        self.load(address)?;
        Ok(self.cached(&address).created)
    }

    /// Whether the account is marked for selfdestruct.
    pub fn is_selfdestructed(&mut self, address: Address) -> StateResult<bool> {
        self.load(address)?;
        Ok(self.cached(&address).selfdestructed)
    }

    /// Marks the account touched (EIP-161); touched-and-empty accounts are
    /// deleted at the transaction boundary.
    pub fn touch(&mut self, address: Address) -> StateResult<()> {
        self.load(address)?;
        let cached = self.accounts.get_mut(&address).expect("loaded above");
        if !cached.touched {
            cached.touched = true;
            self.journal.push(JournalEntry::AccountTouched { address });
        }
        Ok(())
    }

    // ----- balances -----

    /// The account balance, zero when absent.
    pub fn get_balance(&mut self, address: Address) -> StateResult<U256> {
        self.load(address)?;
        Ok(self.cached(&address).account.map_or(U256::ZERO, |account| account.balance))
    }

    /// Credits `amount`, creating the account when value actually arrives.
    pub fn add_balance(&mut self, address: Address, amount: U256) -> StateResult<()> {
        self.touch(address)?;
        if self.cached(&address).account.is_none() {
            if amount.is_zero() {
                // A zero-value transfer to an absent account only touches it.
                return Ok(());
            }
            self.create_account(address)?;
        }
        let prev = self.cached(&address).account.expect("exists").balance;
        self.journal.push(JournalEntry::BalanceChange { address, prev });
        self.cached_mut(&address).account.as_mut().expect("exists").balance =
            prev.wrapping_add(amount);
        Ok(())
    }

    /// Debits `amount`. Callers check sufficiency beforehand.
    pub fn sub_balance(&mut self, address: Address, amount: U256) -> StateResult<()> {
        self.touch(address)?;
        let prev = self.get_balance(address)?;
        if self.cached(&address).account.is_none() {
            // Debiting an absent account by zero is a no-op beyond the touch.
            return Ok(());
        }
        self.journal.push(JournalEntry::BalanceChange { address, prev });
        self.cached_mut(&address).account.as_mut().expect("exists").balance =
            prev.wrapping_sub(amount);
        Ok(())
    }

    /// Overwrites the balance.
    pub fn set_balance(&mut self, address: Address, balance: U256) -> StateResult<()> {
        self.touch(address)?;
        if self.cached(&address).account.is_none() {
            self.create_account(address)?;
        }
        let prev = self.cached(&address).account.expect("exists").balance;
        self.journal.push(JournalEntry::BalanceChange { address, prev });
        self.cached_mut(&address).account.as_mut().expect("exists").balance = balance;
        Ok(())
    }

    // ----- nonces -----

    /// The account nonce, zero when absent.
    pub fn get_nonce(&mut self, address: Address) -> StateResult<u64> {
        self.load(address)?;
        Ok(self.cached(&address).account.map_or(0, |account| account.nonce))
    }

    /// Overwrites the nonce, creating the account if needed.
    pub fn set_nonce(&mut self, address: Address, nonce: u64) -> StateResult<()> {
        self.load(address)?;
        if self.cached(&address).account.is_none() {
            self.create_account(address)?;
        }
        let prev = self.cached(&address).account.expect("exists").nonce;
        self.journal.push(JournalEntry::NonceChange { address, prev });
        self.cached_mut(&address).account.as_mut().expect("exists").nonce = nonce;
        Ok(())
    }

    // ----- code -----

    /// The account's code hash; the empty-keccak for absent accounts.
    pub fn get_code_hash(&mut self, address: Address) -> StateResult<B256> {
        self.load(address)?;
        Ok(self.cached(&address).account.map_or(KECCAK_EMPTY, |account| account.code_hash))
    }

    /// The account's bytecode.
    pub fn get_code(&mut self, address: Address) -> StateResult<Bytes> {
        if let Some(code) = self.dirty_code.get(&address) {
            return Ok(code.clone());
        }
        let code_hash = self.get_code_hash(address)?;
        if code_hash == KECCAK_EMPTY || code_hash == B256::ZERO {
            return Ok(Bytes::new());
        }
        if let Some(code) = self.code_cache.get(&code_hash) {
            return Ok(code.clone());
        }
        let code = self.reader.code(&code_hash)?;
        self.code_cache.put(code_hash, code.clone());
        Ok(code)
    }

    /// Replaces the account's code.
    pub fn set_code(&mut self, address: Address, code: Bytes) -> StateResult<()> {
        self.load(address)?;
        if self.cached(&address).account.is_none() {
            self.create_account(address)?;
        }
        let prev_code_hash = self.cached(&address).account.expect("exists").code_hash;
        self.journal.push(JournalEntry::CodeChange {
            address,
            prev_code_hash,
            prev_code: self.dirty_code.get(&address).cloned(),
        });
        self.cached_mut(&address).account.as_mut().expect("exists").code_hash = keccak256(&code);
        self.dirty_code.insert(address, code);
        Ok(())
    }

    /// Whether the account carries an EIP-7702 delegation designation
    /// (`0xef0100 ‖ address` code prefix).
    pub fn has_delegated_designation(&mut self, address: Address) -> StateResult<bool> {
        Ok(self.get_code(address)?.starts_with(&DELEGATION_PREFIX))
    }

    // ----- storage -----

    /// The account's current incarnation.
    pub fn get_incarnation(&mut self, address: Address) -> StateResult<u64> {
        self.load(address)?;
        Ok(self.cached(&address).account.map_or(0, |account| account.incarnation))
    }

    fn load_slot(&mut self, address: Address, slot: B256) -> StateResult<u64> {
        let incarnation = self.get_incarnation(address)?;
        let created = self.cached(&address).created;
        if !self
            .storage
            .get(&(address, incarnation))
            .is_some_and(|slots| slots.contains_key(&slot))
        {
            // A freshly created incarnation starts from an empty view; the
            // store holds nothing under it anyway.
            let origin = if created {
                B256::ZERO
            } else {
                self.reader.storage(&address, incarnation, &slot)?
            };
            self.storage.entry((address, incarnation)).or_default().insert(
                slot,
                SlotState { origin, block_origin: origin, current: origin },
            );
        }
        Ok(incarnation)
    }

    /// The slot's current value.
    pub fn get_storage(&mut self, address: Address, slot: B256) -> StateResult<B256> {
        let incarnation = self.load_slot(address, slot)?;
        Ok(self.storage[&(address, incarnation)][&slot].current)
    }

    /// The slot's committed value as read from the store on first touch.
    pub fn committed_storage(&mut self, address: Address, slot: B256) -> StateResult<B256> {
        let incarnation = self.load_slot(address, slot)?;
        Ok(self.storage[&(address, incarnation)][&slot].origin)
    }

    /// The slot's value at block start, the reference for EIP-2200/3529
    /// refund accounting.
    pub fn block_origin_storage(&mut self, address: Address, slot: B256) -> StateResult<B256> {
        let incarnation = self.load_slot(address, slot)?;
        Ok(self.storage[&(address, incarnation)][&slot].block_origin)
    }

    /// Writes the slot's current value.
    pub fn set_storage(&mut self, address: Address, slot: B256, value: B256) -> StateResult<()> {
        let incarnation = self.load_slot(address, slot)?;
        let state = self
            .storage
            .get_mut(&(address, incarnation))
            .and_then(|slots| slots.get_mut(&slot))
            .expect("slot loaded above");
        if state.current == value {
            return Ok(());
        }
        let prev = state.current;
        state.current = value;
        self.journal.push(JournalEntry::StorageChange { address, slot, prev });
        Ok(())
    }

    // ----- transient storage (EIP-1153) -----

    /// Reads transient storage; zero when never written.
    pub fn get_transient(&mut self, address: Address, key: B256) -> B256 {
        self.transient.get(&(address, key)).copied().unwrap_or(B256::ZERO)
    }

    /// Writes transient storage. Journaled, so intra-transaction reverts
    /// restore prior values; the whole map clears at transaction end.
    pub fn set_transient(&mut self, address: Address, key: B256, value: B256) {
        let prev = self.get_transient(address, key);
        if prev == value {
            return;
        }
        self.journal.push(JournalEntry::TransientStorageChange { address, key, prev });
        self.transient.insert((address, key), value);
    }

    // ----- access list (EIP-2929) -----

    /// Records an address access, returning the gas it costs.
    pub fn access_address(&mut self, address: Address) -> u64 {
        let cold = self.access_list.add_address(address);
        if cold {
            self.journal.push(JournalEntry::AccessListAddress { address });
        }
        AccessListState::address_access_gas(cold)
    }

    /// Records a storage slot access, returning the gas it costs.
    pub fn access_slot(&mut self, address: Address, slot: B256) -> u64 {
        let cold = self.access_list.add_slot(address, slot);
        if cold {
            self.journal.push(JournalEntry::AccessListSlot { address, slot });
        }
        AccessListState::slot_access_gas(cold)
    }

    /// Whether the address is warm.
    pub fn is_warm_address(&self, address: &Address) -> bool {
        self.access_list.contains_address(address)
    }

    // ----- refund -----

    /// The accumulated gas refund.
    pub const fn refund(&self) -> u64 {
        self.refund
    }

    /// Adds to the refund counter.
    pub fn add_refund(&mut self, amount: u64) {
        self.journal.push(JournalEntry::RefundChange { prev: self.refund });
        self.refund += amount;
    }

    /// Subtracts from the refund counter. Underflow is a programming fault.
    pub fn sub_refund(&mut self, amount: u64) {
        assert!(self.refund >= amount, "refund counter underflow");
        self.journal.push(JournalEntry::RefundChange { prev: self.refund });
        self.refund -= amount;
    }

    // ----- lifecycle -----

    /// Brings an empty account into existence.
    pub fn create_account(&mut self, address: Address) -> StateResult<()> {
        self.load(address)?;
        let cached = self.accounts.get_mut(&address).expect("loaded above");
        self.journal.push(JournalEntry::AccountCreated {
            address,
            prev: cached.account,
            prev_created: cached.created,
        });
        cached.account = Some(Account::default());
        Ok(())
    }

    /// Creates a contract account at `address`, preserving any balance and
    /// bumping the incarnation past every prior one so stale storage is
    /// unreachable. Selfdestruct-then-recreate within one block lands on a
    /// fresh incarnation as well.
    pub fn create_contract(&mut self, address: Address) -> StateResult<()> {
        self.load(address)?;
        let cached = self.accounts.get_mut(&address).expect("loaded above");
        let prev_incarnation = cached
            .account
            .map(|account| account.incarnation)
            .or_else(|| cached.origin.map(|account| account.incarnation))
            .unwrap_or(0);
        let balance = cached.account.map_or(U256::ZERO, |account| account.balance);
        self.journal.push(JournalEntry::AccountCreated {
            address,
            prev: cached.account,
            prev_created: cached.created,
        });
        cached.account = Some(Account {
            balance,
            incarnation: (prev_incarnation + 1).max(FIRST_INCARNATION),
            ..Account::default()
        });
        cached.created = true;
        Ok(())
    }

    /// Marks `address` for selfdestruct, moving its balance to the
    /// beneficiary. Returns whether the mark was newly set.
    pub fn self_destruct(&mut self, address: Address, beneficiary: Address) -> StateResult<bool> {
        self.load(address)?;
        let balance = self.get_balance(address)?;
        self.sub_balance(address, balance)?;
        self.add_balance(beneficiary, balance)?;

        let cached = self.accounts.get_mut(&address).expect("loaded above");
        let prev_flag = cached.selfdestructed;
        cached.selfdestructed = true;
        self.journal.push(JournalEntry::SelfDestruct { address, prev_flag });
        Ok(!prev_flag)
    }

    // ----- snapshots -----

    /// Takes a snapshot of the journal position.
    pub fn snapshot(&mut self) -> Snapshot {
        self.snapshots.push(self.journal.len());
        Snapshot(self.snapshots.len() - 1)
    }

    /// Reverts every mutation since `snapshot`, in reverse insertion order.
    /// Reverting to a snapshot that was never taken (or was already
    /// reverted) is a programming fault.
    pub fn revert_to(&mut self, snapshot: Snapshot) {
        let journal_target = *self
            .snapshots
            .get(snapshot.0)
            .unwrap_or_else(|| panic!("revert to unknown snapshot {}", snapshot.0));
        trace!(
            target: "state",
            entries = self.journal.len() - journal_target,
            "Reverting journal tail"
        );
        while self.journal.len() > journal_target {
            let entry = self.journal.pop().expect("length checked");
            self.undo(entry);
        }
        self.snapshots.truncate(snapshot.0);
    }

    fn undo(&mut self, entry: JournalEntry) {
        match entry {
            JournalEntry::AccountTouched { address } => {
                self.cached_mut(&address).touched = false;
            }
            JournalEntry::BalanceChange { address, prev } => {
                self.cached_mut(&address).account.as_mut().expect("journaled").balance = prev;
            }
            JournalEntry::NonceChange { address, prev } => {
                self.cached_mut(&address).account.as_mut().expect("journaled").nonce = prev;
            }
            JournalEntry::StorageChange { address, slot, prev } => {
                let incarnation =
                    self.cached(&address).account.map_or(0, |account| account.incarnation);
                let state = self
                    .storage
                    .get_mut(&(address, incarnation))
                    .and_then(|slots| slots.get_mut(&slot))
                    .expect("journaled slot is cached");
                state.current = prev;
            }
            JournalEntry::CodeChange { address, prev_code_hash, prev_code } => {
                self.cached_mut(&address).account.as_mut().expect("journaled").code_hash =
                    prev_code_hash;
                match prev_code {
                    Some(code) => {
                        self.dirty_code.insert(address, code);
                    }
                    None => {
                        self.dirty_code.remove(&address);
                    }
                }
            }
            JournalEntry::AccessListAddress { address } => {
                self.access_list.remove_address(&address);
            }
            JournalEntry::AccessListSlot { address, slot } => {
                self.access_list.remove_slot(&address, &slot);
            }
            JournalEntry::RefundChange { prev } => {
                self.refund = prev;
            }
            JournalEntry::SelfDestruct { address, prev_flag } => {
                self.cached_mut(&address).selfdestructed = prev_flag;
            }
            JournalEntry::AccountCreated { address, prev, prev_created } => {
                let cached = self.cached_mut(&address);
                cached.account = prev;
                cached.created = prev_created;
            }
            JournalEntry::TransientStorageChange { address, key, prev } => {
                self.transient.insert((address, key), prev);
            }
        }
    }

    // ----- transaction boundaries -----

    /// Pre-warms the access list at transaction start: origin, target,
    /// precompiles and any EIP-2930 entries.
    pub fn begin_tx(
        &mut self,
        origin: Address,
        target: Option<Address>,
        access_list: Option<&AccessList>,
        precompiles: impl IntoIterator<Item = Address>,
    ) {
        self.access_address(origin);
        if let Some(target) = target {
            self.access_address(target);
        }
        for precompile in precompiles {
            self.access_address(precompile);
        }
        if let Some(list) = access_list {
            for item in list.iter() {
                self.access_address(item.address);
                for key in &item.storage_keys {
                    self.access_slot(item.address, *key);
                }
            }
        }
    }

    /// Closes the transaction: applies selfdestructs and EIP-161 removal of
    /// touched-and-empty accounts, then resets all per-transaction state:
    /// journal, snapshots, access list, refund and transient storage.
    pub fn finalize_tx(&mut self) {
        for cached in self.accounts.values_mut() {
            if cached.selfdestructed {
                cached.account = None;
                cached.selfdestructed = false;
            } else if cached.touched
                && cached.account.is_some_and(|account| account.is_empty())
            {
                // EIP-161: a touched empty account is removed.
                cached.account = None;
            }
            cached.touched = false;
            cached.created = false;
        }
        self.dirty_code.retain(|address, _| {
            self.accounts.get(address).map_or(true, |cached| cached.account.is_some())
        });
        self.journal.clear();
        self.snapshots.clear();
        self.access_list.clear();
        self.refund = 0;
        self.transient.clear();
    }

    /// Extracts everything the block changed relative to the committed
    /// state. Call after the last [Self::finalize_tx] of the block.
    pub fn take_block_changes(&mut self) -> BlockChanges {
        let mut changes = BlockChanges::default();

        let mut addresses: Vec<Address> = self.accounts.keys().copied().collect();
        addresses.sort_unstable();
        for address in addresses {
            let cached = &self.accounts[&address];
            if cached.account != cached.origin {
                changes.accounts.push(AccountChange {
                    address,
                    prev: cached.origin,
                    current: cached.account,
                });
            }
            if let Some(account) = cached.account {
                if let Some(code) = self.dirty_code.get(&address) {
                    changes.code.push((account.code_hash, code.clone()));
                }
            }
        }

        let mut storage_keys: Vec<(Address, u64)> = self.storage.keys().copied().collect();
        storage_keys.sort_unstable();
        for (address, incarnation) in storage_keys {
            // Slots of deleted accounts become unreachable through the
            // incarnation bump; no changeset entries are needed for them.
            if self.accounts.get(&address).is_some_and(|cached| cached.account.is_none()) {
                continue;
            }
            let slots = &self.storage[&(address, incarnation)];
            let mut slot_keys: Vec<B256> = slots.keys().copied().collect();
            slot_keys.sort_unstable();
            for slot in slot_keys {
                let state = slots[&slot];
                if state.current != state.block_origin {
                    changes.storage.push(StorageChange {
                        address,
                        incarnation,
                        slot,
                        prev: state.block_origin,
                        current: state.current,
                    });
                }
            }
        }

        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStateReader;
    use stele_primitives::{COLD_ACCOUNT_ACCESS_GAS, WARM_ACCOUNT_ACCESS_GAS};

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn state_with_balance(address: Address, balance: u64) -> IntraBlockState<MemoryStateReader> {
        let mut reader = MemoryStateReader::new();
        reader
            .insert_account(address, Account { balance: U256::from(balance), ..Default::default() });
        IntraBlockState::new(reader)
    }

    #[test]
    fn test_value_transfer_and_revert() {
        // Seed A with 1000; snapshot; transfer 400 A -> B; revert.
        let a = addr(0xaa);
        let b = addr(0xbb);
        let mut state = state_with_balance(a, 1000);

        let snapshot = state.snapshot();
        state.sub_balance(a, U256::from(400u64)).unwrap();
        state.add_balance(b, U256::from(400u64)).unwrap();
        assert_eq!(state.get_balance(a).unwrap(), U256::from(600u64));
        assert_eq!(state.get_balance(b).unwrap(), U256::from(400u64));
        assert!(state.exists(a).unwrap());
        assert!(state.exists(b).unwrap());

        state.revert_to(snapshot);
        assert_eq!(state.get_balance(a).unwrap(), U256::from(1000u64));
        assert!(!state.exists(b).unwrap());
    }

    #[test]
    fn test_access_list_warm_cold_and_revert() {
        let x = addr(1);
        let y = addr(2);
        let mut state = IntraBlockState::new(MemoryStateReader::new());

        assert_eq!(state.access_address(x), COLD_ACCOUNT_ACCESS_GAS);
        assert_eq!(state.access_address(x), WARM_ACCOUNT_ACCESS_GAS);

        let snapshot = state.snapshot();
        assert_eq!(state.access_address(y), COLD_ACCOUNT_ACCESS_GAS);
        state.revert_to(snapshot);
        assert_eq!(state.access_address(y), COLD_ACCOUNT_ACCESS_GAS);
    }

    #[test]
    fn test_slot_access_is_distinct_from_address_access() {
        let x = addr(1);
        let slot = B256::repeat_byte(9);
        let mut state = IntraBlockState::new(MemoryStateReader::new());

        state.access_address(x);
        // Address warmth does not imply slot warmth.
        assert_eq!(state.access_slot(x, slot), stele_primitives::COLD_SLOAD_GAS);
        assert_eq!(state.access_slot(x, slot), stele_primitives::WARM_SLOAD_GAS);
    }

    #[test]
    fn test_nested_snapshots_revert_in_order() {
        let a = addr(1);
        let mut state = state_with_balance(a, 100);

        let outer = state.snapshot();
        state.set_balance(a, U256::from(200u64)).unwrap();
        let inner = state.snapshot();
        state.set_balance(a, U256::from(300u64)).unwrap();

        state.revert_to(inner);
        assert_eq!(state.get_balance(a).unwrap(), U256::from(200u64));
        state.revert_to(outer);
        assert_eq!(state.get_balance(a).unwrap(), U256::from(100u64));
    }

    #[test]
    fn test_storage_revert_restores_value() {
        let a = addr(1);
        let slot = B256::repeat_byte(1);
        let mut reader = MemoryStateReader::new();
        reader.insert_account(a, Account::default());
        reader.insert_storage(a, 0, slot, B256::repeat_byte(7));
        let mut state = IntraBlockState::new(reader);

        assert_eq!(state.get_storage(a, slot).unwrap(), B256::repeat_byte(7));
        let snapshot = state.snapshot();
        state.set_storage(a, slot, B256::repeat_byte(8)).unwrap();
        assert_eq!(state.get_storage(a, slot).unwrap(), B256::repeat_byte(8));
        state.revert_to(snapshot);
        assert_eq!(state.get_storage(a, slot).unwrap(), B256::repeat_byte(7));
        assert_eq!(state.committed_storage(a, slot).unwrap(), B256::repeat_byte(7));
    }

    #[test]
    fn test_transient_storage_reverts_within_tx_and_clears_after() {
        let a = addr(1);
        let key = B256::repeat_byte(2);
        let mut state = IntraBlockState::new(MemoryStateReader::new());

        state.set_transient(a, key, B256::repeat_byte(1));
        let snapshot = state.snapshot();
        state.set_transient(a, key, B256::repeat_byte(2));
        state.revert_to(snapshot);
        assert_eq!(state.get_transient(a, key), B256::repeat_byte(1));

        state.finalize_tx();
        assert_eq!(state.get_transient(a, key), B256::ZERO);
    }

    #[test]
    fn test_refund_reverts_and_resets() {
        let mut state = IntraBlockState::new(MemoryStateReader::new());
        state.add_refund(4800);
        let snapshot = state.snapshot();
        state.add_refund(4800);
        assert_eq!(state.refund(), 9600);
        state.revert_to(snapshot);
        assert_eq!(state.refund(), 4800);
        state.sub_refund(800);
        assert_eq!(state.refund(), 4000);
        state.finalize_tx();
        assert_eq!(state.refund(), 0);
    }

    #[test]
    fn test_touched_empty_account_is_removed_at_tx_end() {
        let a = addr(1);
        let mut reader = MemoryStateReader::new();
        reader.insert_account(a, Account::default());
        let mut state = IntraBlockState::new(reader);

        state.add_balance(a, U256::ZERO).unwrap();
        state.finalize_tx();
        assert!(!state.exists(a).unwrap());

        // It shows up as a deletion in the block changes.
        let changes = state.take_block_changes();
        assert_eq!(changes.accounts.len(), 1);
        assert_eq!(changes.accounts[0].current, None);
    }

    #[test]
    fn test_selfdestruct_moves_balance_and_deletes() {
        let a = addr(1);
        let b = addr(2);
        let mut state = state_with_balance(a, 500);

        assert!(state.self_destruct(a, b).unwrap());
        assert!(!state.self_destruct(a, b).unwrap());
        assert_eq!(state.get_balance(b).unwrap(), U256::from(500u64));

        state.finalize_tx();
        assert!(!state.exists(a).unwrap());
    }

    #[test]
    fn test_selfdestruct_reverts_cleanly() {
        let a = addr(1);
        let b = addr(2);
        let mut state = state_with_balance(a, 500);

        let snapshot = state.snapshot();
        state.self_destruct(a, b).unwrap();
        state.revert_to(snapshot);
        assert!(!state.is_selfdestructed(a).unwrap());
        assert_eq!(state.get_balance(a).unwrap(), U256::from(500u64));
        state.finalize_tx();
        assert!(state.exists(a).unwrap());
    }

    #[test]
    fn test_create_contract_bumps_incarnation() {
        let a = addr(1);
        let mut reader = MemoryStateReader::new();
        reader.insert_account(
            a,
            Account { incarnation: 2, code_hash: B256::repeat_byte(1), ..Default::default() },
        );
        reader.insert_storage(a, 2, B256::repeat_byte(5), B256::repeat_byte(9));
        let mut state = IntraBlockState::new(reader);

        state.create_contract(a).unwrap();
        assert_eq!(state.get_incarnation(a).unwrap(), 3);
        // Prior-incarnation storage is invisible.
        assert_eq!(state.get_storage(a, B256::repeat_byte(5)).unwrap(), B256::ZERO);
    }

    #[test]
    fn test_delegation_designation_detection() {
        let a = addr(1);
        let mut state = IntraBlockState::new(MemoryStateReader::new());
        let mut code = DELEGATION_PREFIX.to_vec();
        code.extend_from_slice(addr(9).as_slice());
        state.set_code(a, code.into()).unwrap();
        assert!(state.has_delegated_designation(a).unwrap());

        let b = addr(2);
        state.set_code(b, Bytes::from(vec![0x60, 0x00])).unwrap();
        assert!(!state.has_delegated_designation(b).unwrap());
    }

    #[test]
    fn test_block_changes_capture_storage_transition() {
        let a = addr(1);
        let slot = B256::repeat_byte(1);
        let mut reader = MemoryStateReader::new();
        reader.insert_account(a, Account { nonce: 1, ..Default::default() });
        reader.insert_storage(a, 0, slot, B256::repeat_byte(3));
        let mut state = IntraBlockState::new(reader);

        state.set_storage(a, slot, B256::repeat_byte(4)).unwrap();
        state.finalize_tx();
        let changes = state.take_block_changes();
        assert_eq!(changes.storage.len(), 1);
        assert_eq!(changes.storage[0].prev, B256::repeat_byte(3));
        assert_eq!(changes.storage[0].current, B256::repeat_byte(4));
    }

    #[test]
    fn test_empty_snapshot_revert_is_noop() {
        let a = addr(1);
        let mut state = state_with_balance(a, 7);
        let balance_before = state.get_balance(a).unwrap();
        let snapshot = state.snapshot();
        state.revert_to(snapshot);
        assert_eq!(state.get_balance(a).unwrap(), balance_before);
    }

    proptest::proptest! {
        /// With nested snapshots s1 ⊂ s2, reverting to s2 restores
        /// balances, storage, access list, refund and transient values to
        /// exactly their state when s2 was taken, for any write sequence.
        #[test]
        fn prop_nested_revert_restores_exactly(
            writes in proptest::collection::vec((0u8..5, 0u8..4, 1u64..1000), 1..40),
            split in 0usize..40,
        ) {
            let mut state = IntraBlockState::new(MemoryStateReader::new());
            for byte in 0u8..4 {
                state.add_balance(addr(byte), U256::from(1_000_000u64)).unwrap();
            }

            let probe = |state: &mut IntraBlockState<MemoryStateReader>| {
                let mut view = Vec::new();
                for byte in 0u8..4 {
                    view.push(state.get_balance(addr(byte)).unwrap());
                    view.push(state.get_storage(addr(byte), B256::ZERO).unwrap().into());
                    view.push(U256::from(state.get_transient(addr(byte), B256::ZERO).to_vec()[31]));
                    view.push(U256::from(state.is_warm_address(&addr(byte)) as u64));
                }
                view.push(U256::from(state.refund()));
                view
            };

            let split = split.min(writes.len());
            let apply = |state: &mut IntraBlockState<MemoryStateReader>,
                         batch: &[(u8, u8, u64)]| {
                for (kind, target, amount) in batch {
                    let address = addr(*target);
                    match kind % 5 {
                        0 => state.add_balance(address, U256::from(*amount)).unwrap(),
                        1 => state
                            .set_storage(address, B256::ZERO, B256::with_last_byte(*amount as u8))
                            .unwrap(),
                        2 => state.set_transient(address, B256::ZERO, B256::with_last_byte(*amount as u8)),
                        3 => {
                            state.access_address(address);
                        }
                        _ => state.add_refund(*amount),
                    }
                }
            };

            let s1 = state.snapshot();
            apply(&mut state, &writes[..split]);
            let view_at_s2 = probe(&mut state);
            let s2 = state.snapshot();
            apply(&mut state, &writes[split..]);

            state.revert_to(s2);
            proptest::prop_assert_eq!(probe(&mut state), view_at_s2);
            state.revert_to(s1);
        }
    }
}
