//! The block environment the transition engine executes under.

use alloy_primitives::{Address, B256};
use stele_primitives::{blob_base_fee, ChainSpec, Hardfork, Header};

/// Everything about the enclosing block a single transaction can observe.
#[derive(Debug, Clone)]
pub struct BlockContext {
    /// Block height.
    pub number: u64,
    /// Block timestamp.
    pub timestamp: u64,
    /// Block gas limit.
    pub gas_limit: u64,
    /// Fee recipient.
    pub coinbase: Address,
    /// EIP-1559 base fee, `None` pre-London.
    pub base_fee: Option<u64>,
    /// EIP-4844 blob base fee, `None` pre-Cancun.
    pub blob_base_fee: Option<u128>,
    /// Post-merge prevRandao (pre-merge mix hash).
    pub prev_randao: B256,
    /// Chain id.
    pub chain_id: u64,
    /// The hardfork active for this block.
    pub fork: Hardfork,
}

impl BlockContext {
    /// Derives the context for executing the block under `header`.
    pub fn from_header(spec: &ChainSpec, header: &Header) -> Self {
        let fork = spec.fork_at(header.number, header.timestamp);
        Self {
            number: header.number,
            timestamp: header.timestamp,
            gas_limit: header.gas_limit,
            coinbase: header.beneficiary,
            base_fee: header.base_fee_per_gas,
            blob_base_fee: header.excess_blob_gas.map(blob_base_fee),
            prev_randao: header.mix_hash,
            chain_id: spec.chain_id,
            fork,
        }
    }
}
