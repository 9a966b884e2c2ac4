//! Merkle-Patricia commitment for the stele execution-layer client.
//!
//! The [TrieNode] type models the radix-16 Patricia trie with lazy expansion
//! of unloaded subtrees through a [TrieProvider]; [Commitment] drives it to
//! produce the 32-byte state root the execution stage checks headers
//! against.

mod account;
pub use account::TrieAccount;

mod commitment;
pub use commitment::{Commitment, CommitmentMode, RootWithUpdates};

mod errors;
pub use errors::{TrieError, TrieResult};

mod node;
pub use node::TrieNode;

mod ordered;
pub use ordered::ordered_trie_root;

mod provider;
pub use provider::{MapProvider, NoopTrieProvider, TrieProvider};

pub use alloy_trie::{Nibbles, EMPTY_ROOT_HASH};
