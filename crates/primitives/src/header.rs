//! The block header and its canonical RLP form.

use crate::{EMPTY_OMMER_ROOT_HASH, EMPTY_ROOT_HASH};
use alloy_primitives::{keccak256, Address, Bloom, Bytes, B256, B64, U256};
use alloy_rlp::{Decodable, Encodable};

/// An execution-layer block header.
///
/// The RLP produced here is the mainnet-canonical encoding: hashing a header
/// through [Header::hash_slow] yields the block hash consensus agrees on.
/// Post-merge optional fields are appended without gaps in fork order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Hash of the parent block's header.
    pub parent_hash: B256,
    /// Hash of the ommer list. Constant post-merge.
    pub ommers_hash: B256,
    /// Fee recipient.
    pub beneficiary: Address,
    /// State trie root after executing this block.
    pub state_root: B256,
    /// Root of the transaction index trie.
    pub transactions_root: B256,
    /// Root of the receipt index trie.
    pub receipts_root: B256,
    /// Bloom over all receipt logs.
    pub logs_bloom: Bloom,
    /// Proof-of-work difficulty. Zero post-merge.
    pub difficulty: U256,
    /// Block height.
    pub number: u64,
    /// Gas limit for the block.
    pub gas_limit: u64,
    /// Total gas used by all transactions.
    pub gas_used: u64,
    /// Unix timestamp.
    pub timestamp: u64,
    /// Arbitrary extra data, at most 32 bytes.
    pub extra_data: Bytes,
    /// Pre-merge mix hash, post-merge prevRandao.
    pub mix_hash: B256,
    /// Proof-of-work nonce. Zero post-merge.
    pub nonce: B64,
    /// Base fee per gas (EIP-1559, London).
    pub base_fee_per_gas: Option<u64>,
    /// Withdrawals trie root (EIP-4895, Shanghai).
    pub withdrawals_root: Option<B256>,
    /// Total blob gas consumed (EIP-4844, Cancun).
    pub blob_gas_used: Option<u64>,
    /// Running blob gas excess (EIP-4844, Cancun).
    pub excess_blob_gas: Option<u64>,
    /// Parent beacon block root (EIP-4788, Cancun).
    pub parent_beacon_block_root: Option<B256>,
    /// Execution requests hash (EIP-7685, Prague).
    pub requests_hash: Option<B256>,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            parent_hash: B256::ZERO,
            ommers_hash: EMPTY_OMMER_ROOT_HASH,
            beneficiary: Address::ZERO,
            state_root: EMPTY_ROOT_HASH,
            transactions_root: EMPTY_ROOT_HASH,
            receipts_root: EMPTY_ROOT_HASH,
            logs_bloom: Bloom::ZERO,
            difficulty: U256::ZERO,
            number: 0,
            gas_limit: 0,
            gas_used: 0,
            timestamp: 0,
            extra_data: Bytes::new(),
            mix_hash: B256::ZERO,
            nonce: B64::ZERO,
            base_fee_per_gas: None,
            withdrawals_root: None,
            blob_gas_used: None,
            excess_blob_gas: None,
            parent_beacon_block_root: None,
            requests_hash: None,
        }
    }
}

impl Header {
    /// Computes the block hash by hashing the canonical RLP encoding.
    pub fn hash_slow(&self) -> B256 {
        let mut buf = Vec::with_capacity(self.length());
        self.encode(&mut buf);
        keccak256(&buf)
    }

    /// Returns true when this header is devoid of transactions, i.e. its
    /// transactions root is the empty-trie root.
    pub fn is_empty_body(&self) -> bool {
        self.transactions_root == EMPTY_ROOT_HASH
    }

    /// Returns true if the header carries no code-relevant bloom bits.
    pub fn logs_bloom_is_empty(&self) -> bool {
        self.logs_bloom == Bloom::ZERO
    }

    fn payload_length(&self) -> usize {
        let mut len = self.parent_hash.length()
            + self.ommers_hash.length()
            + self.beneficiary.length()
            + self.state_root.length()
            + self.transactions_root.length()
            + self.receipts_root.length()
            + self.logs_bloom.length()
            + self.difficulty.length()
            + self.number.length()
            + self.gas_limit.length()
            + self.gas_used.length()
            + self.timestamp.length()
            + self.extra_data.length()
            + self.mix_hash.length()
            + self.nonce.length();
        if let Some(base_fee) = self.base_fee_per_gas {
            len += base_fee.length();
        }
        if let Some(root) = self.withdrawals_root {
            len += root.length();
        }
        if let Some(blob_gas) = self.blob_gas_used {
            len += blob_gas.length();
        }
        if let Some(excess) = self.excess_blob_gas {
            len += excess.length();
        }
        if let Some(root) = self.parent_beacon_block_root {
            len += root.length();
        }
        if let Some(hash) = self.requests_hash {
            len += hash.length();
        }
        len
    }
}

impl Encodable for Header {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        alloy_rlp::Header { list: true, payload_length: self.payload_length() }.encode(out);
        self.parent_hash.encode(out);
        self.ommers_hash.encode(out);
        self.beneficiary.encode(out);
        self.state_root.encode(out);
        self.transactions_root.encode(out);
        self.receipts_root.encode(out);
        self.logs_bloom.encode(out);
        self.difficulty.encode(out);
        self.number.encode(out);
        self.gas_limit.encode(out);
        self.gas_used.encode(out);
        self.timestamp.encode(out);
        self.extra_data.encode(out);
        self.mix_hash.encode(out);
        self.nonce.encode(out);
        if let Some(base_fee) = self.base_fee_per_gas {
            base_fee.encode(out);
        }
        if let Some(root) = self.withdrawals_root {
            root.encode(out);
        }
        if let Some(blob_gas) = self.blob_gas_used {
            blob_gas.encode(out);
        }
        if let Some(excess) = self.excess_blob_gas {
            excess.encode(out);
        }
        if let Some(root) = self.parent_beacon_block_root {
            root.encode(out);
        }
        if let Some(hash) = self.requests_hash {
            hash.encode(out);
        }
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + alloy_rlp::length_of_length(payload_length)
    }
}

impl Decodable for Header {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let rlp_head = alloy_rlp::Header::decode(buf)?;
        if !rlp_head.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        let started_len = buf.len();
        let mut this = Self {
            parent_hash: Decodable::decode(buf)?,
            ommers_hash: Decodable::decode(buf)?,
            beneficiary: Decodable::decode(buf)?,
            state_root: Decodable::decode(buf)?,
            transactions_root: Decodable::decode(buf)?,
            receipts_root: Decodable::decode(buf)?,
            logs_bloom: Decodable::decode(buf)?,
            difficulty: Decodable::decode(buf)?,
            number: Decodable::decode(buf)?,
            gas_limit: Decodable::decode(buf)?,
            gas_used: Decodable::decode(buf)?,
            timestamp: Decodable::decode(buf)?,
            extra_data: Decodable::decode(buf)?,
            mix_hash: Decodable::decode(buf)?,
            nonce: Decodable::decode(buf)?,
            ..Default::default()
        };
        let consumed = |buf: &&[u8]| started_len - buf.len();
        if consumed(buf) < rlp_head.payload_length {
            this.base_fee_per_gas = Some(Decodable::decode(buf)?);
        }
        if consumed(buf) < rlp_head.payload_length {
            this.withdrawals_root = Some(Decodable::decode(buf)?);
        }
        if consumed(buf) < rlp_head.payload_length {
            this.blob_gas_used = Some(Decodable::decode(buf)?);
        }
        if consumed(buf) < rlp_head.payload_length {
            this.excess_blob_gas = Some(Decodable::decode(buf)?);
        }
        if consumed(buf) < rlp_head.payload_length {
            this.parent_beacon_block_root = Some(Decodable::decode(buf)?);
        }
        if consumed(buf) < rlp_head.payload_length {
            this.requests_hash = Some(Decodable::decode(buf)?);
        }
        if consumed(buf) != rlp_head.payload_length {
            return Err(alloy_rlp::Error::ListLengthMismatch {
                expected: rlp_head.payload_length,
                got: consumed(buf),
            });
        }
        Ok(this)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Header {
        Header {
            number: 17,
            gas_limit: 30_000_000,
            gas_used: 21_000,
            timestamp: 1_700_000_000,
            base_fee_per_gas: Some(7),
            withdrawals_root: Some(EMPTY_ROOT_HASH),
            blob_gas_used: Some(0),
            excess_blob_gas: Some(0),
            parent_beacon_block_root: Some(B256::ZERO),
            ..Default::default()
        }
    }

    #[test]
    fn test_header_rlp_roundtrip() {
        let header = sample_header();
        let mut buf = Vec::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), header.length());
        assert_eq!(Header::decode(&mut buf.as_slice()).unwrap(), header);
    }

    #[test]
    fn test_pre_london_header_roundtrip() {
        let header = Header { number: 1, gas_limit: 5_000, ..Default::default() };
        let mut buf = Vec::new();
        header.encode(&mut buf);
        let decoded = Header::decode(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded.base_fee_per_gas, None);
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_hash_changes_with_number() {
        let a = sample_header();
        let mut b = a.clone();
        b.number += 1;
        assert_ne!(a.hash_slow(), b.hash_slow());
    }
}
