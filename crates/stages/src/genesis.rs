//! Genesis initialisation: seed the state tables and store block zero.

use crate::{
    provider::{self, KvTrieProvider},
    StageError,
};
use alloy_primitives::{keccak256, B256, U256};
use stele_kv::{keys, DbTxMut, Store, Table};
use stele_primitives::{
    Account, ChainSpec, Genesis, Hardfork, Header, SealedHeader, EMPTY_ROOT_HASH,
    FIRST_INCARNATION, KECCAK_EMPTY,
};
use stele_trie::{Commitment, CommitmentMode, TrieAccount};
use tracing::info;

/// Writes the genesis allocation and header. Idempotent: when block zero is
/// already stored, the existing header is returned untouched.
pub fn init_genesis<S: Store>(
    store: &S,
    spec: &ChainSpec,
    genesis: &Genesis,
    mode: CommitmentMode,
) -> Result<SealedHeader, StageError> {
    let mut tx = store.tx_mut()?;

    if let Some(hash) = provider::canonical_hash(&tx, 0)? {
        let header = provider::header(&tx, 0, hash)?
            .ok_or(StageError::MissingData { block: 0, what: "genesis header" })?;
        tx.abort();
        return Ok(SealedHeader::new(header, hash));
    }

    let mut commitment = Commitment::new(mode);
    for (address, alloc) in &genesis.alloc {
        let code = alloc.code.as_ref().filter(|code| !code.is_empty());
        let code_hash = code.map_or(KECCAK_EMPTY, keccak256);
        let incarnation = if code.is_some() { FIRST_INCARNATION } else { 0 };
        if let Some(code) = code {
            tx.put(Table::Code, code_hash.as_slice(), code)?;
        }

        let account = Account {
            nonce: alloc.nonce,
            balance: alloc.balance,
            code_hash,
            storage_root: EMPTY_ROOT_HASH,
            incarnation,
        };
        let encoded = account.encode();
        let hashed_address = keccak256(address);
        tx.put(Table::PlainState, address.as_slice(), &encoded)?;
        tx.put(Table::HashedAccounts, hashed_address.as_slice(), &encoded)?;
        commitment.update_account(
            hashed_address,
            Some(TrieAccount {
                nonce: account.nonce,
                balance: account.balance,
                storage_root: EMPTY_ROOT_HASH,
                code_hash,
            }),
        );

        for (slot, value) in &alloc.storage {
            if value.is_zero() {
                continue;
            }
            let hashed_slot = keccak256(slot);
            tx.put(
                Table::PlainState,
                &keys::plain_storage_key(&address.0 .0, incarnation, &slot.0),
                value.as_slice(),
            )?;
            tx.put(
                Table::HashedStorage,
                &keys::hashed_storage_key(&hashed_address.0, incarnation, &hashed_slot.0),
                value.as_slice(),
            )?;
            commitment.update_storage(hashed_address, hashed_slot, U256::from_be_bytes(value.0));
        }
    }

    let state_root = match commitment.compute_root(&KvTrieProvider(&tx))? {
        Some(result) => {
            for (hash, encoding) in &result.nodes {
                tx.put(Table::TrieNodes, hash.as_slice(), encoding)?;
            }
            result.root
        }
        None => EMPTY_ROOT_HASH,
    };

    let shanghai = spec.is_active(Hardfork::Shanghai, 0, genesis.timestamp);
    let cancun = spec.is_active(Hardfork::Cancun, 0, genesis.timestamp);
    let header = Header {
        number: 0,
        state_root,
        gas_limit: genesis.gas_limit,
        timestamp: genesis.timestamp,
        extra_data: genesis.extra_data.clone(),
        base_fee_per_gas: genesis.base_fee_per_gas,
        withdrawals_root: shanghai.then_some(EMPTY_ROOT_HASH),
        blob_gas_used: cancun.then_some(0),
        excess_blob_gas: cancun.then_some(0),
        parent_beacon_block_root: cancun.then_some(B256::ZERO),
        ..Default::default()
    };
    let hash = header.hash_slow();

    provider::put_canonical_header(&mut tx, &header, hash)?;
    tx.put(Table::HeaderNumbers, hash.as_slice(), &keys::block_key(0))?;
    provider::put_body(&mut tx, 0, &[], Vec::new(), shanghai.then(Vec::new))?;
    tx.commit()?;

    info!(target: "genesis", %hash, %state_root, "Genesis initialised");
    Ok(SealedHeader::new(header, hash))
}
