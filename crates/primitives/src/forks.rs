//! Hardfork schedule and the chain specification.
//!
//! Forks activate by block number up to the merge and by timestamp after it.
//! Every fork-sensitive constant in the execution core is resolved through
//! [ChainSpec] so that nothing consults an implicit global.

use crate::TxType;
use std::collections::BTreeMap;

/// The hardforks the execution core distinguishes, in activation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Hardfork {
    /// The genesis ruleset.
    Frontier,
    /// EIP-2, EIP-7.
    Homestead,
    /// EIP-150 gas repricing.
    TangerineWhistle,
    /// EIP-161 empty-account semantics, EIP-155 replay protection.
    SpuriousDragon,
    /// Receipt status byte replaces the intermediate state root.
    Byzantium,
    /// EIP-1014, EIP-1052.
    Constantinople,
    /// Constantinople re-activation without EIP-1283.
    Petersburg,
    /// EIP-2028 calldata repricing.
    Istanbul,
    /// EIP-2929 access gas, EIP-2930 access lists.
    Berlin,
    /// EIP-1559 fee market, EIP-3529 refund reduction.
    London,
    /// The merge. Difficulty is zero from here on.
    Paris,
    /// EIP-3860 initcode metering, withdrawals.
    Shanghai,
    /// EIP-4844 blobs, EIP-1153 transient storage, EIP-6780 selfdestruct.
    Cancun,
    /// EIP-7702 set-code transactions.
    Prague,
    /// EIP-7825 transaction gas cap, blob-count ceiling.
    Osaka,
}

/// When a hardfork turns on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkCondition {
    /// Activates at the given block number.
    Block(u64),
    /// Activates at the given block timestamp (post-merge forks).
    Timestamp(u64),
    /// Never activates.
    Never,
}

impl ForkCondition {
    /// Whether the condition holds for a block at `number`/`timestamp`.
    pub const fn active_at(&self, number: u64, timestamp: u64) -> bool {
        match self {
            Self::Block(block) => number >= *block,
            Self::Timestamp(time) => timestamp >= *time,
            Self::Never => false,
        }
    }
}

/// The chain specification: chain id plus the fork activation schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSpec {
    /// EIP-155 chain id.
    pub chain_id: u64,
    /// Activation conditions per fork. Missing entries never activate.
    pub forks: BTreeMap<Hardfork, ForkCondition>,
}

impl ChainSpec {
    /// The Ethereum mainnet schedule.
    pub fn mainnet() -> Self {
        let forks = BTreeMap::from([
            (Hardfork::Frontier, ForkCondition::Block(0)),
            (Hardfork::Homestead, ForkCondition::Block(1_150_000)),
            (Hardfork::TangerineWhistle, ForkCondition::Block(2_463_000)),
            (Hardfork::SpuriousDragon, ForkCondition::Block(2_675_000)),
            (Hardfork::Byzantium, ForkCondition::Block(4_370_000)),
            (Hardfork::Constantinople, ForkCondition::Block(7_280_000)),
            (Hardfork::Petersburg, ForkCondition::Block(7_280_000)),
            (Hardfork::Istanbul, ForkCondition::Block(9_069_000)),
            (Hardfork::Berlin, ForkCondition::Block(12_244_000)),
            (Hardfork::London, ForkCondition::Block(12_965_000)),
            (Hardfork::Paris, ForkCondition::Block(15_537_394)),
            (Hardfork::Shanghai, ForkCondition::Timestamp(1_681_338_455)),
            (Hardfork::Cancun, ForkCondition::Timestamp(1_710_338_135)),
            (Hardfork::Prague, ForkCondition::Timestamp(1_746_612_311)),
        ]);
        Self { chain_id: 1, forks }
    }

    /// A development schedule with every fork active from genesis.
    pub fn dev(chain_id: u64) -> Self {
        let forks = [
            Hardfork::Frontier,
            Hardfork::Homestead,
            Hardfork::TangerineWhistle,
            Hardfork::SpuriousDragon,
            Hardfork::Byzantium,
            Hardfork::Constantinople,
            Hardfork::Petersburg,
            Hardfork::Istanbul,
            Hardfork::Berlin,
            Hardfork::London,
            Hardfork::Paris,
        ]
        .into_iter()
        .map(|fork| (fork, ForkCondition::Block(0)))
        .chain(
            [Hardfork::Shanghai, Hardfork::Cancun, Hardfork::Prague, Hardfork::Osaka]
                .into_iter()
                .map(|fork| (fork, ForkCondition::Timestamp(0))),
        )
        .collect();
        Self { chain_id, forks }
    }

    /// Whether `fork` is active for a block at `number`/`timestamp`.
    pub fn is_active(&self, fork: Hardfork, number: u64, timestamp: u64) -> bool {
        self.forks
            .get(&fork)
            .map(|condition| condition.active_at(number, timestamp))
            .unwrap_or(false)
    }

    /// The newest fork active for a block at `number`/`timestamp`.
    pub fn fork_at(&self, number: u64, timestamp: u64) -> Hardfork {
        self.forks
            .iter()
            .filter(|(_, condition)| condition.active_at(number, timestamp))
            .map(|(fork, _)| *fork)
            .max()
            .unwrap_or(Hardfork::Frontier)
    }

    /// Whether the given transaction type is valid under `fork`.
    pub fn tx_type_enabled(&self, tx_type: TxType, fork: Hardfork) -> bool {
        fork >= tx_type.activation()
    }

    /// The gas refund divisor: 2 before London (EIP-3529 halved refunds by
    /// raising it to 5).
    pub fn refund_quotient(&self, fork: Hardfork) -> u64 {
        if fork >= Hardfork::London {
            5
        } else {
            2
        }
    }

    /// Whether headers carry a base fee under `fork`.
    pub fn base_fee_active(&self, fork: Hardfork) -> bool {
        fork >= Hardfork::London
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fork_ordering() {
        assert!(Hardfork::London > Hardfork::Berlin);
        assert!(Hardfork::Osaka > Hardfork::Prague);
    }

    #[test]
    fn test_mainnet_fork_at() {
        let spec = ChainSpec::mainnet();
        assert_eq!(spec.fork_at(0, 0), Hardfork::Frontier);
        assert_eq!(spec.fork_at(12_965_000, 0), Hardfork::London);
        assert_eq!(spec.fork_at(20_000_000, 1_710_338_135), Hardfork::Cancun);
    }

    #[test]
    fn test_refund_quotient_changes_at_london() {
        let spec = ChainSpec::mainnet();
        assert_eq!(spec.refund_quotient(Hardfork::Berlin), 2);
        assert_eq!(spec.refund_quotient(Hardfork::London), 5);
    }

    #[test]
    fn test_tx_type_enablement() {
        let spec = ChainSpec::mainnet();
        assert!(!spec.tx_type_enabled(TxType::Eip1559, Hardfork::Berlin));
        assert!(spec.tx_type_enabled(TxType::Eip1559, Hardfork::London));
        assert!(!spec.tx_type_enabled(TxType::Eip4844, Hardfork::Shanghai));
    }

    #[test]
    fn test_dev_spec_enables_everything_at_genesis() {
        let spec = ChainSpec::dev(1337);
        assert_eq!(spec.fork_at(0, 0), Hardfork::Osaka);
    }
}
