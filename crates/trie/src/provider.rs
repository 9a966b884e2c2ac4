//! Preimage lookup for blinded trie nodes.

use crate::TrieResult;
use alloy_primitives::{map::HashMap, B256};

/// Supplies node preimages when a blinded subtree must be expanded.
pub trait TrieProvider {
    /// Returns the RLP encoding of the node with the given commitment, or
    /// `None` when it is unknown.
    fn trie_node(&self, commitment: B256) -> TrieResult<Option<Vec<u8>>>;
}

/// A provider with no preimages. Walking into any blinded subtree fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTrieProvider;

impl TrieProvider for NoopTrieProvider {
    fn trie_node(&self, _commitment: B256) -> TrieResult<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// An in-memory preimage map.
#[derive(Debug, Clone, Default)]
pub struct MapProvider {
    nodes: HashMap<B256, Vec<u8>>,
}

impl MapProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a preimage.
    pub fn insert(&mut self, commitment: B256, encoding: Vec<u8>) {
        self.nodes.insert(commitment, encoding);
    }

    /// Number of stored preimages.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the provider holds no preimages.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl TrieProvider for MapProvider {
    fn trie_node(&self, commitment: B256) -> TrieResult<Option<Vec<u8>>> {
        Ok(self.nodes.get(&commitment).cloned())
    }
}

/// Chains a session cache in front of a fallback provider.
#[derive(Debug)]
pub(crate) struct LayeredProvider<'a, P> {
    pub(crate) session: &'a HashMap<B256, Vec<u8>>,
    pub(crate) fallback: &'a P,
}

impl<P: TrieProvider> TrieProvider for LayeredProvider<'_, P> {
    fn trie_node(&self, commitment: B256) -> TrieResult<Option<Vec<u8>>> {
        if let Some(encoding) = self.session.get(&commitment) {
            return Ok(Some(encoding.clone()));
        }
        self.fallback.trie_node(commitment)
    }
}
