//! The account leaf as committed into the state trie.

use alloy_primitives::{B256, U256};
use alloy_rlp::{RlpDecodable, RlpEncodable};
use alloy_trie::EMPTY_ROOT_HASH;

/// The RLP leaf value of the account trie:
/// `[nonce, balance, storage_root, code_hash]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct TrieAccount {
    /// Account nonce.
    pub nonce: u64,
    /// Wei balance.
    pub balance: U256,
    /// Root of the account's storage sub-trie.
    pub storage_root: B256,
    /// keccak256 of the account's bytecode.
    pub code_hash: B256,
}

impl TrieAccount {
    /// The leaf's RLP encoding.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(alloy_rlp::Encodable::length(self));
        alloy_rlp::Encodable::encode(self, &mut out);
        out
    }

    /// Decodes a leaf value.
    pub fn decode(mut buf: &[u8]) -> alloy_rlp::Result<Self> {
        <Self as alloy_rlp::Decodable>::decode(&mut buf)
    }

    /// Whether the account has no storage committed.
    pub fn has_empty_storage(&self) -> bool {
        self.storage_root == EMPTY_ROOT_HASH
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let account = TrieAccount {
            nonce: 3,
            balance: U256::from(10u64).pow(U256::from(18u64)),
            storage_root: EMPTY_ROOT_HASH,
            code_hash: B256::repeat_byte(0xcc),
        };
        assert_eq!(TrieAccount::decode(&account.encode()).unwrap(), account);
    }
}
