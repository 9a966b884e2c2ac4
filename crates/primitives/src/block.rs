//! Blocks, block bodies and sealed headers.

use crate::{Header, TransactionSigned, Withdrawal};
use alloy_primitives::B256;
use alloy_rlp::{Decodable, Encodable};

/// A header paired with its (memoized) hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedHeader {
    header: Header,
    hash: B256,
}

impl SealedHeader {
    /// Seals a header by hashing it.
    pub fn seal(header: Header) -> Self {
        let hash = header.hash_slow();
        Self { header, hash }
    }

    /// Pairs a header with a hash computed elsewhere.
    pub const fn new(header: Header, hash: B256) -> Self {
        Self { header, hash }
    }

    /// The sealed hash.
    pub const fn hash(&self) -> B256 {
        self.hash
    }

    /// The inner header.
    pub const fn header(&self) -> &Header {
        &self.header
    }

    /// Unseals into the inner header.
    pub fn into_header(self) -> Header {
        self.header
    }
}

impl std::ops::Deref for SealedHeader {
    type Target = Header;

    fn deref(&self) -> &Self::Target {
        &self.header
    }
}

/// The transactions, ommers and withdrawals of one block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockBody {
    /// Transactions in execution order.
    pub transactions: Vec<TransactionSigned>,
    /// Ommer headers. Empty post-merge.
    pub ommers: Vec<Header>,
    /// Withdrawals, present post-Shanghai.
    pub withdrawals: Option<Vec<Withdrawal>>,
}

impl BlockBody {
    fn payload_length(&self) -> usize {
        let mut len = self.transactions.length() + self.ommers.length();
        if let Some(withdrawals) = &self.withdrawals {
            len += withdrawals.length();
        }
        len
    }
}

impl Encodable for BlockBody {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        alloy_rlp::Header { list: true, payload_length: self.payload_length() }.encode(out);
        self.transactions.encode(out);
        self.ommers.encode(out);
        if let Some(withdrawals) = &self.withdrawals {
            withdrawals.encode(out);
        }
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + alloy_rlp::length_of_length(payload_length)
    }
}

impl Decodable for BlockBody {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = alloy_rlp::Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        let started_len = buf.len();
        let transactions = Decodable::decode(buf)?;
        let ommers = Decodable::decode(buf)?;
        let withdrawals = if started_len - buf.len() < header.payload_length {
            Some(Decodable::decode(buf)?)
        } else {
            None
        };
        Ok(Self { transactions, ommers, withdrawals })
    }
}

/// A complete block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// The block header.
    pub header: Header,
    /// The block body.
    pub body: BlockBody,
}

impl Block {
    /// The block hash.
    pub fn hash_slow(&self) -> B256 {
        self.header.hash_slow()
    }

    fn payload_length(&self) -> usize {
        let mut len = self.header.length()
            + self.body.transactions.length()
            + self.body.ommers.length();
        if let Some(withdrawals) = &self.body.withdrawals {
            len += withdrawals.length();
        }
        len
    }
}

impl Encodable for Block {
    /// Canonical block RLP: `[header, transactions, ommers, withdrawals?]`.
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        alloy_rlp::Header { list: true, payload_length: self.payload_length() }.encode(out);
        self.header.encode(out);
        self.body.transactions.encode(out);
        self.body.ommers.encode(out);
        if let Some(withdrawals) = &self.body.withdrawals {
            withdrawals.encode(out);
        }
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + alloy_rlp::length_of_length(payload_length)
    }
}

impl Decodable for Block {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let rlp_head = alloy_rlp::Header::decode(buf)?;
        if !rlp_head.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        let started_len = buf.len();
        let header = Header::decode(buf)?;
        let transactions = Decodable::decode(buf)?;
        let ommers = Decodable::decode(buf)?;
        let withdrawals = if started_len - buf.len() < rlp_head.payload_length {
            Some(Decodable::decode(buf)?)
        } else {
            None
        };
        Ok(Self { header, body: BlockBody { transactions, ommers, withdrawals } })
    }
}
