//! Core data model for the stele execution-layer client.
//!
//! Everything the execution pipeline agrees on lives here: accounts, headers,
//! the transaction envelope, receipts, hardfork schedules and the protocol
//! constants shared by the state machine and the stages.

mod account;
pub use account::Account;

mod access_list;
pub use access_list::{AccessList, AccessListItem};

mod block;
pub use block::{Block, BlockBody, SealedHeader};

mod constants;
pub use constants::*;

mod forks;
pub use forks::{ChainSpec, ForkCondition, Hardfork};

mod genesis;
pub use genesis::{Genesis, GenesisAccount};

mod header;
pub use header::Header;

mod log;
pub use log::{logs_bloom, Log};

mod receipt;
pub use receipt::{decode_receipts, encode_receipts, Receipt, ReceiptOutcome};

mod transaction;
pub use transaction::{
    Authorization, Transaction, TransactionSigned, TxEip1559, TxEip2930, TxEip4844, TxEip7702,
    TxLegacy, TxSignature, TxType,
};

mod withdrawal;
pub use withdrawal::Withdrawal;

pub use alloy_primitives::{
    address, b256, bytes, hex, keccak256, Address, Bloom, BloomInput, Bytes, B256, B64, U256,
};
