//! Protocol constants shared across the execution core.

use alloy_primitives::{b256, B256};

/// Keccak-256 hash of the empty byte string.
pub const KECCAK_EMPTY: B256 =
    b256!("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470");

/// Root hash of an empty Merkle-Patricia trie.
pub const EMPTY_ROOT_HASH: B256 =
    b256!("56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421");

/// Keccak-256 hash of the RLP encoding of an empty ommer list.
pub const EMPTY_OMMER_ROOT_HASH: B256 =
    b256!("1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347");

/// Base cost of any transaction.
pub const TX_BASE_GAS: u64 = 21_000;

/// Additional base cost of a contract-creating transaction.
pub const TX_CREATE_GAS: u64 = 32_000;

/// Calldata cost per zero byte.
pub const TX_DATA_ZERO_GAS: u64 = 4;

/// Calldata cost per non-zero byte (EIP-2028).
pub const TX_DATA_NON_ZERO_GAS: u64 = 16;

/// Per-address cost of an EIP-2930 access list entry.
pub const ACCESS_LIST_ADDRESS_GAS: u64 = 2_400;

/// Per-storage-key cost of an EIP-2930 access list entry.
pub const ACCESS_LIST_STORAGE_KEY_GAS: u64 = 1_900;

/// Per-word cost of initcode (EIP-3860).
pub const INITCODE_WORD_GAS: u64 = 2;

/// Maximum initcode size (EIP-3860).
pub const MAX_INITCODE_SIZE: usize = 2 * 24_576;

/// Per-authorization cost of an EIP-7702 set-code transaction.
pub const PER_EMPTY_ACCOUNT_GAS: u64 = 25_000;

/// Refunded portion of [PER_EMPTY_ACCOUNT_GAS] when the authority already exists.
pub const PER_AUTH_BASE_GAS: u64 = 12_500;

/// Cold account access cost (EIP-2929).
pub const COLD_ACCOUNT_ACCESS_GAS: u64 = 2_600;

/// Warm account access cost (EIP-2929).
pub const WARM_ACCOUNT_ACCESS_GAS: u64 = 100;

/// Cold storage slot access cost (EIP-2929).
pub const COLD_SLOAD_GAS: u64 = 2_100;

/// Warm storage slot access cost (EIP-2929).
pub const WARM_SLOAD_GAS: u64 = 100;

/// Gas consumed per blob (EIP-4844).
pub const GAS_PER_BLOB: u64 = 131_072;

/// Maximum blob gas per block (Cancun: six blobs).
pub const MAX_BLOB_GAS_PER_BLOCK: u64 = 6 * GAS_PER_BLOB;

/// Target blob gas per block (Cancun: three blobs).
pub const TARGET_BLOB_GAS_PER_BLOCK: u64 = 3 * GAS_PER_BLOB;

/// Maximum number of blobs a single transaction may carry post-Osaka.
pub const MAX_BLOBS_PER_TX: usize = 6;

/// Per-transaction gas limit cap enforced post-Osaka.
pub const MAX_TX_GAS_LIMIT: u64 = 30_000_000;

/// Minimum blob base fee (EIP-4844).
pub const MIN_BLOB_BASE_FEE: u128 = 1;

/// Blob base fee exponential denominator (EIP-4844).
pub const BLOB_BASE_FEE_UPDATE_FRACTION: u128 = 3_338_477;

/// Version byte expected in blob versioned hashes.
pub const VERSIONED_HASH_VERSION_KZG: u8 = 0x01;

/// Prefix bytes of an EIP-7702 delegation designation.
pub const DELEGATION_PREFIX: [u8; 3] = [0xef, 0x01, 0x00];

/// First incarnation assigned to a freshly created contract.
pub const FIRST_INCARNATION: u64 = 1;

/// Computes the blob base fee from the parent's excess blob gas via the
/// EIP-4844 `fake_exponential`.
pub fn blob_base_fee(excess_blob_gas: u64) -> u128 {
    fake_exponential(MIN_BLOB_BASE_FEE, excess_blob_gas as u128, BLOB_BASE_FEE_UPDATE_FRACTION)
}

/// Rolls the excess blob gas forward across one block (EIP-4844).
pub const fn next_excess_blob_gas(parent_excess: u64, parent_blob_gas_used: u64) -> u64 {
    let total = parent_excess + parent_blob_gas_used;
    if total < TARGET_BLOB_GAS_PER_BLOCK {
        0
    } else {
        total - TARGET_BLOB_GAS_PER_BLOCK
    }
}

/// Approximates `factor * e^(numerator / denominator)` with integer math,
/// as specified by EIP-4844.
fn fake_exponential(factor: u128, numerator: u128, denominator: u128) -> u128 {
    let mut output: u128 = 0;
    let mut accum = factor * denominator;
    let mut i: u128 = 1;
    while accum > 0 {
        output += accum;
        accum = accum * numerator / (denominator * i);
        i += 1;
    }
    output / denominator
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::keccak256;

    #[test]
    fn test_keccak_empty_constant() {
        assert_eq!(KECCAK_EMPTY, keccak256([]));
    }

    #[test]
    fn test_blob_base_fee_at_zero_excess() {
        assert_eq!(blob_base_fee(0), MIN_BLOB_BASE_FEE);
    }

    #[test]
    fn test_blob_base_fee_monotone() {
        let mut prev = 0;
        for excess in (0..10 * MAX_BLOB_GAS_PER_BLOCK).step_by(GAS_PER_BLOB as usize) {
            let fee = blob_base_fee(excess);
            assert!(fee >= prev);
            prev = fee;
        }
    }

    #[test]
    fn test_next_excess_blob_gas() {
        assert_eq!(next_excess_blob_gas(0, 0), 0);
        assert_eq!(next_excess_blob_gas(0, TARGET_BLOB_GAS_PER_BLOCK), 0);
        assert_eq!(
            next_excess_blob_gas(0, MAX_BLOB_GAS_PER_BLOCK),
            MAX_BLOB_GAS_PER_BLOCK - TARGET_BLOB_GAS_PER_BLOCK
        );
    }
}
