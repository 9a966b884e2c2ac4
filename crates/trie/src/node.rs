//! The Merkle-Patricia trie node.
//!
//! Unloaded subtrees are [TrieNode::Blinded] stand-ins carrying only their
//! 32-byte commitment; walking into one expands it through a
//! [TrieProvider]. Committing a trie hashes bottom-up, records every node of
//! 32 or more RLP bytes through a sink, and collapses hashed subtrees back
//! to blinded form, so untouched subtrees are never re-hashed on the next
//! commit.

use crate::{TrieError, TrieProvider, TrieResult};
use alloy_primitives::{keccak256, B256};
use alloy_rlp::{Encodable, EMPTY_STRING_CODE};
use alloy_trie::{Nibbles, EMPTY_ROOT_HASH};

/// Number of children in a branch node.
const BRANCH_WIDTH: usize = 16;

/// RLP item count of a branch node.
const BRANCH_LIST_LENGTH: usize = 17;

/// RLP item count of a leaf or extension node.
const LEAF_OR_EXTENSION_LIST_LENGTH: usize = 2;

/// Hex-prefix flag bit marking a leaf path.
const HEX_PREFIX_LEAF: u8 = 2;

/// Hex-prefix flag bit marking an odd-length path.
const HEX_PREFIX_ODD: u8 = 1;

/// Receives `(commitment, encoding)` pairs for every node hashed during a
/// commit.
pub(crate) type NodeSink<'a> = &'a mut dyn FnMut(B256, &[u8]);

/// A node within the Merkle-Patricia trie.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TrieNode {
    /// The empty subtree.
    #[default]
    Empty,
    /// An unloaded subtree, known only by its commitment.
    Blinded {
        /// keccak256 of the subtree's RLP encoding.
        commitment: B256,
    },
    /// A terminal node holding a value at the remainder of its path.
    Leaf {
        /// Path remainder.
        prefix: Nibbles,
        /// Stored value.
        value: Vec<u8>,
    },
    /// A shared-prefix pointer to a single child.
    Extension {
        /// Shared path prefix.
        prefix: Nibbles,
        /// The child node.
        node: Box<TrieNode>,
    },
    /// A sixteen-way fan-out with an optional value.
    Branch {
        /// Child slots, one per nibble.
        children: Box<[TrieNode; BRANCH_WIDTH]>,
        /// Value stored exactly at this path, if any.
        value: Option<Vec<u8>>,
    },
}

impl TrieNode {
    /// A blinded node for the given commitment. The empty root collapses to
    /// [TrieNode::Empty].
    pub fn new_blinded(commitment: B256) -> Self {
        if commitment == EMPTY_ROOT_HASH {
            Self::Empty
        } else {
            Self::Blinded { commitment }
        }
    }

    fn new_branch() -> Self {
        Self::Branch { children: Box::new(std::array::from_fn(|_| Self::Empty)), value: None }
    }

    /// Returns the value stored at `path`, expanding blinded subtrees along
    /// the way.
    pub fn open<P: TrieProvider>(
        &mut self,
        path: &Nibbles,
        provider: &P,
    ) -> TrieResult<Option<&Vec<u8>>> {
        self.unblind(provider)?;
        match self {
            Self::Empty => Ok(None),
            Self::Blinded { .. } => unreachable!("unblinded above"),
            Self::Leaf { prefix, value } => {
                Ok((prefix.as_slice() == path.as_slice()).then_some(&*value))
            }
            Self::Extension { prefix, node } => {
                if path.len() >= prefix.len() && path.slice(..prefix.len()) == *prefix {
                    node.open(&path.slice(prefix.len()..), provider)
                } else {
                    Ok(None)
                }
            }
            Self::Branch { children, value } => {
                if path.is_empty() {
                    Ok(value.as_ref())
                } else {
                    children[path.at(0)].open(&path.slice(1..), provider)
                }
            }
        }
    }

    /// Inserts or replaces the value at `path`.
    pub fn insert<P: TrieProvider>(
        &mut self,
        path: &Nibbles,
        value: Vec<u8>,
        provider: &P,
    ) -> TrieResult<()> {
        self.unblind(provider)?;
        match self {
            Self::Empty => {
                *self = Self::Leaf { prefix: path.clone(), value };
                Ok(())
            }
            Self::Blinded { .. } => unreachable!("unblinded above"),
            Self::Leaf { prefix, value: leaf_value } => {
                if prefix.as_slice() == path.as_slice() {
                    *leaf_value = value;
                    return Ok(());
                }
                let common = prefix.common_prefix_length(path);
                let old_rest = prefix.slice(common..);
                let old_value = std::mem::take(leaf_value);
                let mut branch = Self::new_branch();
                branch.attach_leaf(&old_rest, old_value);
                branch.attach_leaf(&path.slice(common..), value);
                *self = Self::wrap_extension(path.slice(..common), branch);
                Ok(())
            }
            Self::Extension { prefix, node } => {
                let common = prefix.common_prefix_length(path);
                if common == prefix.len() {
                    return node.insert(&path.slice(common..), value, provider);
                }
                // Split the extension at the divergence point.
                let old_child = std::mem::take(node.as_mut());
                let old_node = Self::wrap_extension(prefix.slice(common + 1..), old_child);
                let divergent = prefix.at(common);
                let shared = prefix.slice(..common);
                let mut branch = Self::new_branch();
                branch.attach_at(divergent, old_node);
                branch.attach_leaf(&path.slice(common..), value);
                *self = Self::wrap_extension(shared, branch);
                Ok(())
            }
            Self::Branch { children, value: branch_value } => {
                if path.is_empty() {
                    *branch_value = Some(value);
                    return Ok(());
                }
                children[path.at(0)].insert(&path.slice(1..), value, provider)
            }
        }
    }

    /// Removes the value at `path` if present, collapsing degenerate
    /// branches on the way back up. Returns whether a value was removed.
    pub fn delete<P: TrieProvider>(&mut self, path: &Nibbles, provider: &P) -> TrieResult<bool> {
        self.unblind(provider)?;
        let removed = match self {
            Self::Empty => false,
            Self::Blinded { .. } => unreachable!("unblinded above"),
            Self::Leaf { prefix, .. } => {
                if prefix.as_slice() == path.as_slice() {
                    *self = Self::Empty;
                    true
                } else {
                    false
                }
            }
            Self::Extension { prefix, node } => {
                if path.len() >= prefix.len() && path.slice(..prefix.len()) == *prefix {
                    let removed = node.delete(&path.slice(prefix.len()..), provider)?;
                    if removed {
                        self.collapse_extension(provider)?;
                    }
                    removed
                } else {
                    false
                }
            }
            Self::Branch { children, value } => {
                let removed = if path.is_empty() {
                    value.take().is_some()
                } else {
                    children[path.at(0)].delete(&path.slice(1..), provider)?
                };
                if removed {
                    self.collapse_branch(provider)?;
                }
                removed
            }
        };
        Ok(removed)
    }

    /// Hashes the subtree, reporting every node of 32+ RLP bytes through
    /// `sink` and collapsing it to blinded form. Returns the root
    /// commitment.
    pub(crate) fn commit(&mut self, sink: NodeSink<'_>) -> B256 {
        match self {
            Self::Empty => EMPTY_ROOT_HASH,
            Self::Blinded { commitment } => *commitment,
            _ => {
                let encoding = self.encode_node(sink);
                let commitment = keccak256(&encoding);
                sink(commitment, &encoding);
                *self = Self::Blinded { commitment };
                commitment
            }
        }
    }

    /// Replaces a blinded node with its expansion from the provider.
    fn unblind<P: TrieProvider>(&mut self, provider: &P) -> TrieResult<()> {
        if let Self::Blinded { commitment } = self {
            let encoding =
                provider.trie_node(*commitment)?.ok_or(TrieError::MissingNode(*commitment))?;
            *self = Self::decode_node(&mut encoding.as_slice())?;
        }
        Ok(())
    }

    /// Hangs a leaf off a branch: an empty relative path lands in the branch
    /// value, anything else under the first nibble.
    fn attach_leaf(&mut self, relative_path: &Nibbles, value: Vec<u8>) {
        let Self::Branch { children, value: branch_value } = self else {
            unreachable!("attach target is always a branch")
        };
        if relative_path.is_empty() {
            *branch_value = Some(value);
        } else {
            children[relative_path.at(0)] =
                Self::Leaf { prefix: relative_path.slice(1..), value };
        }
    }

    fn attach_at(&mut self, index: usize, node: Self) {
        let Self::Branch { children, .. } = self else {
            unreachable!("attach target is always a branch")
        };
        children[index] = node;
    }

    /// Wraps `node` in an extension when `prefix` is non-empty, merging
    /// pass-through shapes.
    fn wrap_extension(prefix: Nibbles, node: Self) -> Self {
        if prefix.is_empty() {
            return node;
        }
        match node {
            Self::Leaf { prefix: leaf_prefix, value } => {
                Self::Leaf { prefix: join_nibbles(&prefix, &leaf_prefix), value }
            }
            Self::Extension { prefix: ext_prefix, node } => {
                Self::Extension { prefix: join_nibbles(&prefix, &ext_prefix), node }
            }
            node => Self::Extension { prefix, node: Box::new(node) },
        }
    }

    /// After a delete inside an extension's child, merge pass-through
    /// shapes.
    fn collapse_extension<P: TrieProvider>(&mut self, provider: &P) -> TrieResult<()> {
        let Self::Extension { prefix, node } = self else {
            return Ok(());
        };
        node.unblind(provider)?;
        match node.as_mut() {
            Self::Empty => *self = Self::Empty,
            Self::Leaf { prefix: leaf_prefix, value } => {
                *self = Self::Leaf {
                    prefix: join_nibbles(prefix, leaf_prefix),
                    value: std::mem::take(value),
                };
            }
            Self::Extension { prefix: child_prefix, node: grandchild } => {
                *self = Self::Extension {
                    prefix: join_nibbles(prefix, child_prefix),
                    node: Box::new(std::mem::take(grandchild.as_mut())),
                };
            }
            _ => {}
        }
        Ok(())
    }

    /// After a delete inside a branch, collapse it when at most one slot
    /// remains occupied.
    fn collapse_branch<P: TrieProvider>(&mut self, provider: &P) -> TrieResult<()> {
        let Self::Branch { children, value } = self else {
            return Ok(());
        };
        let occupied: Vec<usize> = children
            .iter()
            .enumerate()
            .filter(|(_, child)| !matches!(child, Self::Empty))
            .map(|(index, _)| index)
            .collect();

        match occupied.len() {
            0 => {
                *self = match value.take() {
                    None => Self::Empty,
                    Some(value) => Self::Leaf { prefix: Nibbles::default(), value },
                };
            }
            1 if value.is_none() => {
                let index = occupied[0];
                let mut child = std::mem::take(&mut children[index]);
                child.unblind(provider)?;
                let nibble = Nibbles::from_nibbles_unchecked([index as u8]);
                *self = Self::wrap_extension(nibble, child);
            }
            _ => {}
        }
        Ok(())
    }

    /// Encodes the node, committing children and recording their preimages
    /// through `sink`. Children shorter than 32 bytes are inlined.
    fn encode_node(&mut self, sink: NodeSink<'_>) -> Vec<u8> {
        match self {
            Self::Empty | Self::Blinded { .. } => {
                unreachable!("only expanded nodes are encoded")
            }
            Self::Leaf { prefix, value } => {
                let path = hex_prefix_encode(prefix, true);
                let payload_length = string_length(&path) + string_length(value);
                let mut out = Vec::with_capacity(payload_length + 2);
                alloy_rlp::Header { list: true, payload_length }.encode(&mut out);
                encode_string(&path, &mut out);
                encode_string(value, &mut out);
                out
            }
            Self::Extension { prefix, node } => {
                let path = hex_prefix_encode(prefix, false);
                let child_ref = node.child_reference(sink);
                let payload_length = string_length(&path) + child_ref.len();
                let mut out = Vec::with_capacity(payload_length + 2);
                alloy_rlp::Header { list: true, payload_length }.encode(&mut out);
                encode_string(&path, &mut out);
                out.extend_from_slice(&child_ref);
                out
            }
            Self::Branch { children, value } => {
                let child_refs: Vec<Vec<u8>> =
                    children.iter_mut().map(|child| child.child_reference(sink)).collect();
                let value_length = match value {
                    Some(value) => string_length(value),
                    None => 1,
                };
                let payload_length = child_refs.iter().map(Vec::len).sum::<usize>() + value_length;
                let mut out = Vec::with_capacity(payload_length + 3);
                alloy_rlp::Header { list: true, payload_length }.encode(&mut out);
                for child_ref in &child_refs {
                    out.extend_from_slice(child_ref);
                }
                match value {
                    Some(value) => encode_string(value, &mut out),
                    None => out.push(EMPTY_STRING_CODE),
                }
                out
            }
        }
    }

    /// The RLP reference a parent embeds for this child: the raw encoding
    /// when shorter than 32 bytes, its hash as a string otherwise. Hashing
    /// collapses the child to blinded form.
    fn child_reference(&mut self, sink: NodeSink<'_>) -> Vec<u8> {
        match self {
            Self::Empty => vec![EMPTY_STRING_CODE],
            Self::Blinded { commitment } => {
                let mut out = Vec::with_capacity(33);
                (*commitment).encode(&mut out);
                out
            }
            _ => {
                let encoding = self.encode_node(sink);
                if encoding.len() < 32 {
                    encoding
                } else {
                    let commitment = keccak256(&encoding);
                    sink(commitment, &encoding);
                    *self = Self::Blinded { commitment };
                    let mut out = Vec::with_capacity(33);
                    commitment.encode(&mut out);
                    out
                }
            }
        }
    }

    /// Decodes a node from its RLP encoding.
    pub(crate) fn decode_node(buf: &mut &[u8]) -> TrieResult<Self> {
        let header = alloy_rlp::Header::decode(buf)?;
        if !header.list {
            return Err(TrieError::Rlp(alloy_rlp::Error::UnexpectedString));
        }
        let mut payload =
            buf.get(..header.payload_length).ok_or(TrieError::Rlp(alloy_rlp::Error::InputTooShort))?;
        *buf = &buf[header.payload_length..];

        let mut items: Vec<Vec<u8>> = Vec::new();
        let mut item_is_inline: Vec<bool> = Vec::new();
        while !payload.is_empty() {
            let (item, inline) = decode_item(&mut payload)?;
            items.push(item);
            item_is_inline.push(inline);
        }
        match items.len() {
            LEAF_OR_EXTENSION_LIST_LENGTH => {
                let mut iter = items.into_iter();
                let path_item = iter.next().expect("two items");
                let target_item = iter.next().expect("two items");
                let (prefix, is_leaf) = hex_prefix_decode(&path_item)?;
                if is_leaf {
                    Ok(Self::Leaf { prefix, value: target_item })
                } else {
                    let child = item_to_child(target_item, item_is_inline[1])?;
                    Ok(Self::Extension { prefix, node: Box::new(child) })
                }
            }
            BRANCH_LIST_LENGTH => {
                let mut iter = items.into_iter().zip(item_is_inline);
                let mut children: [Self; BRANCH_WIDTH] = std::array::from_fn(|_| Self::Empty);
                for child in children.iter_mut() {
                    let (item, inline) = iter.next().expect("seventeen items");
                    *child = item_to_child(item, inline)?;
                }
                let (value_item, _) = iter.next().expect("seventeen items");
                let value = (!value_item.is_empty()).then_some(value_item);
                Ok(Self::Branch { children: Box::new(children), value })
            }
            _ => Err(TrieError::Rlp(alloy_rlp::Error::UnexpectedLength)),
        }
    }
}

/// Decodes the next RLP item. Strings yield their payload; inlined lists
/// (sub-32-byte child nodes) yield their complete encoding so they can be
/// re-decoded as nodes. The flag reports which case applied.
fn decode_item(buf: &mut &[u8]) -> TrieResult<(Vec<u8>, bool)> {
    let first = *buf.first().ok_or(TrieError::Rlp(alloy_rlp::Error::InputTooShort))?;
    if first >= 0xc0 {
        let original = *buf;
        let header = alloy_rlp::Header::decode(buf)?;
        let total = original.len() - buf.len() + header.payload_length;
        let encoding =
            original.get(..total).ok_or(TrieError::Rlp(alloy_rlp::Error::InputTooShort))?;
        *buf = &original[total..];
        Ok((encoding.to_vec(), true))
    } else {
        let header = alloy_rlp::Header::decode(buf)?;
        let payload = buf
            .get(..header.payload_length)
            .ok_or(TrieError::Rlp(alloy_rlp::Error::InputTooShort))?;
        *buf = &buf[header.payload_length..];
        Ok((payload.to_vec(), false))
    }
}

/// Interprets a branch slot or extension target.
fn item_to_child(item: Vec<u8>, inline: bool) -> TrieResult<TrieNode> {
    if inline {
        return TrieNode::decode_node(&mut item.as_slice());
    }
    match item.len() {
        0 => Ok(TrieNode::Empty),
        32 => Ok(TrieNode::Blinded { commitment: B256::from_slice(&item) }),
        _ => Err(TrieError::Rlp(alloy_rlp::Error::UnexpectedLength)),
    }
}

/// Canonical RLP byte-string encoding: a single byte below 0x80 is its own
/// encoding, everything else gets a string header.
fn encode_string(bytes: &[u8], out: &mut Vec<u8>) {
    match bytes {
        [byte] if *byte < EMPTY_STRING_CODE => out.push(*byte),
        _ => {
            alloy_rlp::Header { list: false, payload_length: bytes.len() }.encode(out);
            out.extend_from_slice(bytes);
        }
    }
}

fn string_length(bytes: &[u8]) -> usize {
    match bytes {
        [byte] if *byte < EMPTY_STRING_CODE => 1,
        _ => bytes.len() + alloy_rlp::length_of_length(bytes.len()),
    }
}

fn join_nibbles(left: &Nibbles, right: &Nibbles) -> Nibbles {
    let mut joined = Vec::with_capacity(left.len() + right.len());
    joined.extend_from_slice(left.as_slice());
    joined.extend_from_slice(right.as_slice());
    Nibbles::from_nibbles_unchecked(joined)
}

/// Standard hex-prefix (compact) encoding with the even/odd parity flag.
fn hex_prefix_encode(path: &Nibbles, is_leaf: bool) -> Vec<u8> {
    let flag = if is_leaf { HEX_PREFIX_LEAF } else { 0 };
    let mut out = Vec::with_capacity(path.len() / 2 + 1);
    if path.len() % 2 == 1 {
        out.push(((flag | HEX_PREFIX_ODD) << 4) | path.at(0) as u8);
        for pair in path.as_slice()[1..].chunks(2) {
            out.push((pair[0] << 4) | pair[1]);
        }
    } else {
        out.push(flag << 4);
        for pair in path.as_slice().chunks(2) {
            out.push((pair[0] << 4) | pair[1]);
        }
    }
    out
}

fn hex_prefix_decode(bytes: &[u8]) -> TrieResult<(Nibbles, bool)> {
    let first = *bytes.first().ok_or(TrieError::InvalidHexPrefix)?;
    let flag = first >> 4;
    if flag > 3 {
        return Err(TrieError::InvalidHexPrefix);
    }
    let is_leaf = flag & HEX_PREFIX_LEAF != 0;
    let is_odd = flag & HEX_PREFIX_ODD != 0;
    let mut nibbles = Vec::with_capacity(bytes.len() * 2);
    if is_odd {
        nibbles.push(first & 0x0f);
    } else if first & 0x0f != 0 {
        return Err(TrieError::InvalidHexPrefix);
    }
    for byte in &bytes[1..] {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0f);
    }
    Ok((Nibbles::from_nibbles_unchecked(nibbles), is_leaf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MapProvider, NoopTrieProvider};
    use alloy_primitives::hex;

    fn nibbles(bytes: &[u8]) -> Nibbles {
        Nibbles::unpack(bytes)
    }

    fn root_of(node: &mut TrieNode) -> B256 {
        node.commit(&mut |_, _| {})
    }

    #[test]
    fn test_empty_root() {
        assert_eq!(root_of(&mut TrieNode::Empty), EMPTY_ROOT_HASH);
    }

    #[test]
    fn test_known_single_leaf_root() {
        // Root of {"do" => "verb"} per the canonical hex-prefix rules.
        let mut node = TrieNode::Empty;
        node.insert(&nibbles(b"do"), b"verb".to_vec(), &NoopTrieProvider).unwrap();
        let expected = hex!("014f07ed95e2e028804d915e0dbd4ed451e394e1acfd29e463c11a060b2ddef7");
        assert_eq!(root_of(&mut node), B256::from(expected));
    }

    #[test]
    fn test_known_multi_leaf_root() {
        // The classic {"do": "verb", "dog": "puppy", "doge": "coin",
        // "horse": "stallion"} fixture.
        let mut node = TrieNode::Empty;
        for (key, value) in
            [("do", "verb"), ("dog", "puppy"), ("doge", "coin"), ("horse", "stallion")]
        {
            node.insert(&nibbles(key.as_bytes()), value.as_bytes().to_vec(), &NoopTrieProvider)
                .unwrap();
        }
        let expected = hex!("5991bb8c6514148a29db676a14ac506cd2cd5775ace63c30a4fe457715e9ac84");
        assert_eq!(root_of(&mut node), B256::from(expected));
    }

    #[test]
    fn test_insert_open_delete() {
        let mut node = TrieNode::Empty;
        let provider = NoopTrieProvider;
        node.insert(&nibbles(b"abc"), b"1".to_vec(), &provider).unwrap();
        node.insert(&nibbles(b"abd"), b"2".to_vec(), &provider).unwrap();
        node.insert(&nibbles(b"xyz"), b"3".to_vec(), &provider).unwrap();

        assert_eq!(node.open(&nibbles(b"abc"), &provider).unwrap(), Some(&b"1".to_vec()));
        assert_eq!(node.open(&nibbles(b"abd"), &provider).unwrap(), Some(&b"2".to_vec()));
        assert_eq!(node.open(&nibbles(b"nope"), &provider).unwrap(), None);

        assert!(node.delete(&nibbles(b"abd"), &provider).unwrap());
        assert!(!node.delete(&nibbles(b"abd"), &provider).unwrap());
        assert_eq!(node.open(&nibbles(b"abd"), &provider).unwrap(), None);
        assert_eq!(node.open(&nibbles(b"abc"), &provider).unwrap(), Some(&b"1".to_vec()));
    }

    #[test]
    fn test_delete_restores_prior_root() {
        let provider = NoopTrieProvider;
        let mut node = TrieNode::Empty;
        node.insert(&nibbles(b"first"), b"one".to_vec(), &provider).unwrap();
        let root_before = node.clone().commit(&mut |_, _| {});

        node.insert(&nibbles(b"second"), b"two".to_vec(), &provider).unwrap();
        assert!(node.delete(&nibbles(b"second"), &provider).unwrap());
        assert_eq!(root_of(&mut node), root_before);
    }

    #[test]
    fn test_commit_blinds_and_reopens_through_provider() {
        let mut node = TrieNode::Empty;
        for i in 0u8..32 {
            let key = keccak256([i]);
            node.insert(&nibbles(key.as_slice()), vec![i; 40], &NoopTrieProvider).unwrap();
        }
        let mut provider = MapProvider::new();
        let root = node.commit(&mut |commitment, encoding| {
            provider.insert(commitment, encoding.to_vec());
        });
        assert!(matches!(node, TrieNode::Blinded { .. }));

        // All values are reachable again through the recorded preimages.
        for i in 0u8..32 {
            let key = keccak256([i]);
            let value = node.open(&nibbles(key.as_slice()), &provider).unwrap();
            assert_eq!(value, Some(&vec![i; 40]));
        }

        // And the root is unchanged by reopening.
        assert_eq!(node.commit(&mut |_, _| {}), root);
    }

    #[test]
    fn test_partial_update_after_commit_changes_root_consistently() {
        // Building incrementally across commits must match a fresh build of
        // the same final state.
        let mut provider = MapProvider::new();
        let mut node = TrieNode::Empty;
        for i in 0u8..16 {
            node.insert(&nibbles(keccak256([i]).as_slice()), vec![i; 40], &NoopTrieProvider)
                .unwrap();
        }
        node.commit(&mut |commitment, encoding| provider.insert(commitment, encoding.to_vec()));
        node.insert(&nibbles(keccak256([99u8]).as_slice()), vec![9; 40], &provider).unwrap();
        let incremental = node.commit(&mut |_, _| {});

        let mut fresh = TrieNode::Empty;
        for i in 0u8..16 {
            fresh
                .insert(&nibbles(keccak256([i]).as_slice()), vec![i; 40], &NoopTrieProvider)
                .unwrap();
        }
        fresh.insert(&nibbles(keccak256([99u8]).as_slice()), vec![9; 40], &NoopTrieProvider).unwrap();
        assert_eq!(fresh.commit(&mut |_, _| {}), incremental);
    }

    #[test]
    fn test_missing_preimage_is_an_error() {
        let mut node = TrieNode::new_blinded(B256::repeat_byte(1));
        let result = node.open(&nibbles(b"k"), &NoopTrieProvider);
        assert_eq!(result, Err(TrieError::MissingNode(B256::repeat_byte(1))));
    }

    #[test]
    fn test_hex_prefix_roundtrip() {
        for (path, is_leaf) in
            [(vec![1u8, 2, 3], true), (vec![1, 2, 3, 4], false), (vec![], true), (vec![0xf], false)]
        {
            let encoded = hex_prefix_encode(&Nibbles::from_nibbles_unchecked(path.clone()), is_leaf);
            let (decoded, leaf) = hex_prefix_decode(&encoded).unwrap();
            assert_eq!(decoded.as_slice(), path.as_slice());
            assert_eq!(leaf, is_leaf);
        }
    }

    #[test]
    fn test_decode_encode_preserves_root() {
        let provider = NoopTrieProvider;
        let mut node = TrieNode::Empty;
        for i in 0u8..8 {
            node.insert(&nibbles(keccak256([i]).as_slice()), vec![i + 1; 36], &provider).unwrap();
        }
        let root = node.clone().commit(&mut |_, _| {});
        let encoding = node.encode_node(&mut |_, _| {});
        let mut decoded = TrieNode::decode_node(&mut encoding.as_slice()).unwrap();
        assert_eq!(decoded.commit(&mut |_, _| {}), root);
    }

    proptest::proptest! {
        /// Invariant: the root is independent of insertion order.
        #[test]
        fn prop_root_is_insertion_order_independent(
            mut entries in proptest::collection::btree_map(
                proptest::collection::vec(proptest::prelude::any::<u8>(), 1..8),
                proptest::collection::vec(proptest::prelude::any::<u8>(), 1..40),
                1..24,
            ),
            seed in proptest::prelude::any::<u64>(),
        ) {
            let provider = NoopTrieProvider;
            let mut forward = TrieNode::Empty;
            for (key, value) in &entries {
                forward.insert(&nibbles(key), value.clone(), &provider).unwrap();
            }

            // A deterministic shuffle driven by the seed.
            let mut shuffled: Vec<_> = std::mem::take(&mut entries).into_iter().collect();
            let mut state = seed;
            for i in (1..shuffled.len()).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                shuffled.swap(i, (state % (i as u64 + 1)) as usize);
            }
            let mut reversed = TrieNode::Empty;
            for (key, value) in &shuffled {
                reversed.insert(&nibbles(key), value.clone(), &provider).unwrap();
            }

            proptest::prop_assert_eq!(
                forward.commit(&mut |_, _| {}),
                reversed.commit(&mut |_, _| {})
            );
        }
    }
}
