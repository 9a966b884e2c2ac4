//! EIP-2930 access lists.

use alloy_primitives::{Address, B256};
use alloy_rlp::{RlpDecodable, RlpEncodable};

/// A single access list entry: one address and the storage keys to pre-warm
/// under it.
#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct AccessListItem {
    /// Address to pre-warm.
    pub address: Address,
    /// Storage keys to pre-warm under `address`.
    pub storage_keys: Vec<B256>,
}

/// An EIP-2930 access list.
#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct AccessList(pub Vec<AccessListItem>);

impl AccessList {
    /// Returns an iterator over the entries.
    pub fn iter(&self) -> impl Iterator<Item = &AccessListItem> {
        self.0.iter()
    }

    /// Number of addresses in the list.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when the list carries no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of storage keys across all entries.
    pub fn storage_key_count(&self) -> usize {
        self.0.iter().map(|item| item.storage_keys.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_rlp::{Decodable, Encodable};

    #[test]
    fn test_access_list_roundtrip() {
        let list = AccessList(vec![
            AccessListItem { address: Address::repeat_byte(1), storage_keys: vec![B256::ZERO] },
            AccessListItem { address: Address::repeat_byte(2), storage_keys: vec![] },
        ]);
        let mut buf = Vec::new();
        list.encode(&mut buf);
        assert_eq!(AccessList::decode(&mut buf.as_slice()).unwrap(), list);
        assert_eq!(list.storage_key_count(), 1);
    }
}
