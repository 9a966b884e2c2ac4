//! EIP-4895 validator withdrawals.

use alloy_primitives::{Address, U256};
use alloy_rlp::{RlpDecodable, RlpEncodable};

/// Multiplier from gwei-denominated withdrawal amounts to wei.
const GWEI_TO_WEI: u64 = 1_000_000_000;

/// A consensus-layer withdrawal credited at the end of a block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Withdrawal {
    /// Monotonically increasing withdrawal index.
    pub index: u64,
    /// Validator the withdrawal originates from.
    pub validator_index: u64,
    /// Execution-layer recipient.
    pub address: Address,
    /// Amount in gwei.
    pub amount: u64,
}

impl Withdrawal {
    /// The credited amount in wei.
    pub fn amount_wei(&self) -> U256 {
        U256::from(self.amount) * U256::from(GWEI_TO_WEI)
    }
}
