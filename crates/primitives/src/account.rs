//! The account record stored in the plain and hashed state tables.

use crate::{EMPTY_ROOT_HASH, KECCAK_EMPTY};
use alloy_primitives::{B256, U256};
use alloy_rlp::{RlpDecodable, RlpEncodable};

/// An Ethereum account as the execution core sees it.
///
/// `incarnation` increments when a contract is recreated at the same address,
/// invalidating the storage written under the prior incarnation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Account {
    /// Number of transactions sent from this account.
    pub nonce: u64,
    /// Wei balance.
    pub balance: U256,
    /// Keccak-256 hash of the account's bytecode.
    pub code_hash: B256,
    /// Root of the account's storage trie.
    pub storage_root: B256,
    /// Incarnation counter for contract recreation.
    pub incarnation: u64,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            nonce: 0,
            balance: U256::ZERO,
            code_hash: KECCAK_EMPTY,
            storage_root: EMPTY_ROOT_HASH,
            incarnation: 0,
        }
    }
}

impl Account {
    /// Returns true when the account is empty per EIP-161: zero nonce, zero
    /// balance and no code. Empty accounts are indistinguishable from absent
    /// ones in both state and commitment.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && self.has_no_code()
    }

    /// Returns true when the account carries no bytecode.
    pub fn has_no_code(&self) -> bool {
        self.code_hash == KECCAK_EMPTY || self.code_hash == B256::ZERO
    }

    /// Serializes the account for the plain-state table.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(alloy_rlp::Encodable::length(self));
        alloy_rlp::Encodable::encode(self, &mut buf);
        buf
    }

    /// Deserializes an account from its plain-state table encoding.
    pub fn decode(mut buf: &[u8]) -> alloy_rlp::Result<Self> {
        <Self as alloy_rlp::Decodable>::decode(&mut buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_account_is_empty() {
        assert!(Account::default().is_empty());
    }

    #[test]
    fn test_account_with_balance_not_empty() {
        let account = Account { balance: U256::from(1), ..Default::default() };
        assert!(!account.is_empty());
    }

    #[test]
    fn test_account_roundtrip() {
        let account = Account {
            nonce: 7,
            balance: U256::from(1_000_000u64),
            code_hash: KECCAK_EMPTY,
            storage_root: EMPTY_ROOT_HASH,
            incarnation: 2,
        };
        assert_eq!(Account::decode(&account.encode()).unwrap(), account);
    }
}
