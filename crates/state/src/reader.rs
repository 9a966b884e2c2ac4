//! Read-through access to committed state.

use crate::StateResult;
use alloy_primitives::{map::HashMap, Address, Bytes, B256};
use stele_primitives::Account;

/// Supplies committed accounts, storage and code. Implemented over the KV
/// store by the execution stage and by in-memory fixtures in tests.
pub trait StateReader {
    /// The committed account, or `None` when absent.
    fn account(&self, address: &Address) -> StateResult<Option<Account>>;

    /// The committed value of a storage slot under the given incarnation;
    /// zero when absent.
    fn storage(&self, address: &Address, incarnation: u64, slot: &B256) -> StateResult<B256>;

    /// Bytecode by code hash. Empty when unknown.
    fn code(&self, code_hash: &B256) -> StateResult<Bytes>;
}

/// A fixture reader over in-memory maps.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateReader {
    accounts: HashMap<Address, Account>,
    storage: HashMap<(Address, u64, B256), B256>,
    code: HashMap<B256, Bytes>,
}

impl MemoryStateReader {
    /// An empty reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an account.
    pub fn insert_account(&mut self, address: Address, account: Account) {
        self.accounts.insert(address, account);
    }

    /// Seeds a storage slot.
    pub fn insert_storage(&mut self, address: Address, incarnation: u64, slot: B256, value: B256) {
        self.storage.insert((address, incarnation, slot), value);
    }

    /// Seeds a code blob.
    pub fn insert_code(&mut self, code_hash: B256, code: Bytes) {
        self.code.insert(code_hash, code);
    }
}

impl StateReader for MemoryStateReader {
    fn account(&self, address: &Address) -> StateResult<Option<Account>> {
        Ok(self.accounts.get(address).copied())
    }

    fn storage(&self, address: &Address, incarnation: u64, slot: &B256) -> StateResult<B256> {
        Ok(self.storage.get(&(*address, incarnation, *slot)).copied().unwrap_or(B256::ZERO))
    }

    fn code(&self, code_hash: &B256) -> StateResult<Bytes> {
        Ok(self.code.get(code_hash).cloned().unwrap_or_default())
    }
}
