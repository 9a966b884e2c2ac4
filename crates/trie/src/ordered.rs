//! Index tries for transactions, receipts and withdrawals roots.

use crate::{NoopTrieProvider, TrieNode};
use alloy_primitives::B256;
use alloy_rlp::Encodable;
use alloy_trie::Nibbles;

/// Computes the root of the trie keyed by RLP-encoded item index, with each
/// item serialized by `encode`. This is the shape of the transactions,
/// receipts and withdrawals header roots.
pub fn ordered_trie_root<T>(items: &[T], mut encode: impl FnMut(&T, &mut Vec<u8>)) -> B256 {
    let mut trie = TrieNode::Empty;
    let mut index_buffer = Vec::new();
    let mut value_buffer = Vec::new();
    for i in 0..items.len() {
        let index = adjust_index_for_rlp(i, items.len());
        index_buffer.clear();
        index.encode(&mut index_buffer);
        value_buffer.clear();
        encode(&items[index], &mut value_buffer);
        trie.insert(&Nibbles::unpack(&index_buffer), value_buffer.clone(), &NoopTrieProvider)
            .expect("in-memory trie never misses preimages");
    }
    trie.commit(&mut |_, _| {})
}

/// Reorders small indices so the variable-width RLP index keys cannot be
/// inserted in an order that leaves index 0 shadowing a longer key.
const fn adjust_index_for_rlp(i: usize, len: usize) -> usize {
    if i > 0x7f {
        i
    } else if i == 0x7f || i + 1 == len {
        0
    } else {
        i + 1
    }
}
