//! Execution logs and the block-level bloom filter.

use alloy_primitives::{Address, Bloom, BloomInput, Bytes, B256};
use alloy_rlp::{RlpDecodable, RlpEncodable};

/// A log record emitted during transaction execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Log {
    /// Address of the emitting contract.
    pub address: Address,
    /// Indexed topics, at most four.
    pub topics: Vec<B256>,
    /// Unindexed payload.
    pub data: Bytes,
}

impl Log {
    /// Folds this log into a bloom filter.
    pub fn accrue_to(&self, bloom: &mut Bloom) {
        bloom.accrue(BloomInput::Raw(self.address.as_slice()));
        for topic in &self.topics {
            bloom.accrue(BloomInput::Raw(topic.as_slice()));
        }
    }
}

/// Computes the bloom filter over a set of logs.
pub fn logs_bloom<'a>(logs: impl IntoIterator<Item = &'a Log>) -> Bloom {
    let mut bloom = Bloom::ZERO;
    for log in logs {
        log.accrue_to(&mut bloom);
    }
    bloom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_logs_bloom_is_zero() {
        assert_eq!(logs_bloom([]), Bloom::ZERO);
    }

    #[test]
    fn test_bloom_covers_address_and_topics() {
        let log = Log {
            address: Address::repeat_byte(0xaa),
            topics: vec![B256::repeat_byte(1)],
            data: Bytes::new(),
        };
        let bloom = logs_bloom([&log]);
        assert!(bloom.contains_input(BloomInput::Raw(log.address.as_slice())));
        assert!(bloom.contains_input(BloomInput::Raw(log.topics[0].as_slice())));
    }
}
