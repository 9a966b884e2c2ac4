//! The block-source boundary.
//!
//! Headers and bodies arrive from the peer network or a consensus driver;
//! both are external collaborators behind these traits. [StaticChain]
//! serves a pre-built chain for imports and tests.

use alloy_primitives::B256;
use stele_primitives::{Block, BlockBody, Header};
use thiserror::Error;

/// A failure in the header or body source.
#[derive(Error, Debug)]
#[error("block source: {0}")]
pub struct SourceError(pub String);

/// Supplies headers for a block range.
pub trait HeaderSource: Send + Sync {
    /// Headers for `from..=to`, in ascending order. May return fewer when
    /// the source has not seen the full range yet.
    fn headers(&self, from: u64, to: u64) -> Result<Vec<Header>, SourceError>;
}

/// Supplies block bodies by number and hash.
pub trait BodySource: Send + Sync {
    /// Bodies for the requested blocks, in request order.
    fn bodies(&self, requests: &[(u64, B256)]) -> Result<Vec<BlockBody>, SourceError>;
}

/// An in-memory chain acting as both sources.
#[derive(Debug, Clone, Default)]
pub struct StaticChain {
    blocks: Vec<Block>,
}

impl StaticChain {
    /// Wraps a chain of blocks; block numbers index the vector offset by
    /// the first block's number.
    pub fn new(blocks: Vec<Block>) -> Self {
        Self { blocks }
    }

    /// Appends a block.
    pub fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }

    /// The highest block number available, if any.
    pub fn tip(&self) -> Option<u64> {
        self.blocks.last().map(|block| block.header.number)
    }

    fn by_number(&self, number: u64) -> Option<&Block> {
        let first = self.blocks.first()?.header.number;
        self.blocks.get(number.checked_sub(first)? as usize)
    }
}

impl HeaderSource for StaticChain {
    fn headers(&self, from: u64, to: u64) -> Result<Vec<Header>, SourceError> {
        Ok((from..=to)
            .map_while(|number| self.by_number(number).map(|block| block.header.clone()))
            .collect())
    }
}

impl BodySource for StaticChain {
    fn bodies(&self, requests: &[(u64, B256)]) -> Result<Vec<BlockBody>, SourceError> {
        requests
            .iter()
            .map(|(number, hash)| {
                let block = self
                    .by_number(*number)
                    .ok_or_else(|| SourceError(format!("unknown block {number}")))?;
                if block.header.hash_slow() != *hash {
                    return Err(SourceError(format!("hash mismatch for block {number}")));
                }
                Ok(block.body.clone())
            })
            .collect()
    }
}
