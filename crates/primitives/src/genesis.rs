//! Genesis file parsing.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::Deserialize;
use std::collections::BTreeMap;

/// One pre-funded or pre-deployed account in the genesis allocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenesisAccount {
    /// Starting nonce.
    #[serde(default)]
    pub nonce: u64,
    /// Starting balance in wei.
    #[serde(default)]
    pub balance: U256,
    /// Deployed bytecode, if any.
    #[serde(default)]
    pub code: Option<Bytes>,
    /// Pre-populated storage slots.
    #[serde(default)]
    pub storage: BTreeMap<B256, B256>,
}

/// The genesis block description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Genesis {
    /// Genesis block timestamp.
    #[serde(default)]
    pub timestamp: u64,
    /// Genesis block gas limit.
    pub gas_limit: u64,
    /// Genesis base fee, when London is active from block zero.
    #[serde(default)]
    pub base_fee_per_gas: Option<u64>,
    /// Extra data carried in the genesis header.
    #[serde(default)]
    pub extra_data: Bytes,
    /// The initial state.
    #[serde(default)]
    pub alloc: BTreeMap<Address, GenesisAccount>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_genesis() {
        let raw = r#"{
            "timestamp": 0,
            "gas_limit": 30000000,
            "base_fee_per_gas": 1000000000,
            "alloc": {
                "0x00000000000000000000000000000000000000aa": {
                    "balance": "0xde0b6b3a7640000"
                },
                "0x00000000000000000000000000000000000000bb": {
                    "nonce": 1,
                    "balance": "0x0",
                    "code": "0x60016001",
                    "storage": {
                        "0x0000000000000000000000000000000000000000000000000000000000000001":
                        "0x0000000000000000000000000000000000000000000000000000000000000002"
                    }
                }
            }
        }"#;
        let genesis: Genesis = serde_json::from_str(raw).unwrap();
        assert_eq!(genesis.alloc.len(), 2);
        let contract = &genesis.alloc[&Address::with_last_byte(0xbb)];
        assert_eq!(contract.nonce, 1);
        assert_eq!(contract.storage.len(), 1);
    }
}
