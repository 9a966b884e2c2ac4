//! Intrinsic gas and the block-level gas pools.

use alloy_primitives::Address;
use stele_primitives::{
    Hardfork, Transaction, ACCESS_LIST_ADDRESS_GAS, ACCESS_LIST_STORAGE_KEY_GAS,
    INITCODE_WORD_GAS, PER_EMPTY_ACCOUNT_GAS, TX_BASE_GAS, TX_CREATE_GAS, TX_DATA_NON_ZERO_GAS,
    TX_DATA_ZERO_GAS,
};

/// Pre-Istanbul cost of a non-zero calldata byte.
const TX_DATA_NON_ZERO_GAS_FRONTIER: u64 = 68;

/// The minimum gas a transaction consumes before any bytecode executes:
/// the base cost plus calldata, access-list, initcode and authorization
/// surcharges.
pub fn intrinsic_gas(tx: &Transaction, fork: Hardfork) -> u64 {
    let mut gas = TX_BASE_GAS;
    if tx.is_create() {
        gas += TX_CREATE_GAS;
        if fork >= Hardfork::Shanghai {
            gas += INITCODE_WORD_GAS * (tx.input().len() as u64).div_ceil(32);
        }
    }

    let non_zero_cost = if fork >= Hardfork::Istanbul {
        TX_DATA_NON_ZERO_GAS
    } else {
        TX_DATA_NON_ZERO_GAS_FRONTIER
    };
    let non_zero = tx.input().iter().filter(|&&byte| byte != 0).count() as u64;
    let zero = tx.input().len() as u64 - non_zero;
    gas += zero * TX_DATA_ZERO_GAS + non_zero * non_zero_cost;

    if let Some(list) = tx.access_list() {
        gas += list.len() as u64 * ACCESS_LIST_ADDRESS_GAS
            + list.storage_key_count() as u64 * ACCESS_LIST_STORAGE_KEY_GAS;
    }

    gas += tx.authorization_list().len() as u64 * PER_EMPTY_ACCOUNT_GAS;
    gas
}

/// The precompile addresses active at `fork`, for access-list pre-warming.
pub fn precompile_addresses(fork: Hardfork) -> impl Iterator<Item = Address> {
    let count: u8 = if fork >= Hardfork::Prague {
        17
    } else if fork >= Hardfork::Cancun {
        10
    } else if fork >= Hardfork::Istanbul {
        9
    } else if fork >= Hardfork::Byzantium {
        8
    } else {
        4
    };
    (1..=count).map(|index| Address::with_last_byte(index))
}

/// The block gas pool: established at block start from the header gas
/// limit, debited per transaction up front and credited back for unused
/// gas.
#[derive(Debug, Clone, Copy)]
pub struct GasPool {
    remaining: u64,
}

impl GasPool {
    /// A pool holding the block gas limit.
    pub const fn new(limit: u64) -> Self {
        Self { remaining: limit }
    }

    /// Gas still available in the block.
    pub const fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Reserves `amount`, failing when the pool is exhausted. The caller
    /// maps exhaustion to the block-invalid error.
    pub fn debit(&mut self, amount: u64) -> Result<(), ()> {
        match self.remaining.checked_sub(amount) {
            Some(remaining) => {
                self.remaining = remaining;
                Ok(())
            }
            None => Err(()),
        }
    }

    /// Returns unused gas to the pool.
    pub fn credit(&mut self, amount: u64) {
        self.remaining += amount;
    }
}

/// The blob gas pool (EIP-4844), sized by the per-block blob gas maximum.
#[derive(Debug, Clone, Copy)]
pub struct BlobGasPool {
    remaining: u64,
}

impl BlobGasPool {
    /// A pool holding the block's blob gas allowance.
    pub const fn new(limit: u64) -> Self {
        Self { remaining: limit }
    }

    /// Blob gas still available in the block.
    pub const fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Reserves `amount` of blob gas.
    pub fn debit(&mut self, amount: u64) -> Result<(), ()> {
        match self.remaining.checked_sub(amount) {
            Some(remaining) => {
                self.remaining = remaining;
                Ok(())
            }
            None => Err(()),
        }
    }
}
