//! The execution stage: replay transactions, verify the state root, persist
//! state, changesets and receipts.

use crate::{
    provider::{self, KvStateReader, KvTrieProvider},
    Context, ExecInput, ExecOutput, Stage, StageError, StageId, UnwindInput, ValidationError,
};
use alloy_primitives::{keccak256, Bloom, B256, U256};
use async_trait::async_trait;
use stele_executor::{BlobGasPool, BlockContext, Evm, GasPool, StateTransition, TransitionError};
use stele_kv::{keys, DbCursor, DbTx, DbTxMut, Store, Table};
use stele_primitives::{
    encode_receipts, logs_bloom, Account, ChainSpec, Hardfork, Header, Receipt, ReceiptOutcome,
    EMPTY_ROOT_HASH, MAX_BLOB_GAS_PER_BLOCK,
};
use stele_state::{BlockChanges, IntraBlockState};
use stele_trie::{Commitment, CommitmentMode, TrieAccount};
use tracing::{debug, info};

/// Replays each block in range through the state-transition engine,
/// reconciles the header roots, and persists plain state, hashed state,
/// per-block changesets and receipts. The commitment builder is bound to
/// this stage's write transaction and survives across blocks within one
/// process.
#[derive(Debug)]
pub struct ExecutionStage<E> {
    spec: ChainSpec,
    evm: E,
    mode: CommitmentMode,
    /// Cached across forward passes; dropped on unwind or failure so the
    /// next pass rebuilds from persisted state.
    commitment: Option<Commitment>,
}

impl<E> ExecutionStage<E> {
    /// An execution stage over the given chain spec and EVM collaborator.
    pub const fn new(spec: ChainSpec, evm: E, mode: CommitmentMode) -> Self {
        Self { spec, evm, mode, commitment: None }
    }
}

impl<E: Evm + Send> ExecutionStage<E> {
    /// Produces a commitment builder able to continue from block `from`:
    /// from the persisted interior nodes when they cover the current root,
    /// otherwise by staging the full hashed state.
    fn load_commitment(&self, tx: &impl DbTx, from: u64) -> Result<Commitment, StageError> {
        if self.mode == CommitmentMode::Disabled {
            return Ok(Commitment::new(CommitmentMode::Disabled));
        }
        let root = provider::expect_canonical_header(tx, from)?.state_root;
        if self.mode == CommitmentMode::FullTrie
            && (root == EMPTY_ROOT_HASH
                || tx.get(Table::TrieNodes, root.as_slice())?.is_some())
        {
            return Ok(Commitment::with_root(self.mode, root));
        }

        // Full rebuild from the hashed tables.
        debug!(target: "stages::execution", from, "Rebuilding commitment from hashed state");
        let mut commitment = Commitment::new(self.mode);
        let mut incarnations = std::collections::HashMap::new();
        {
            let mut cursor = tx.cursor(Table::HashedAccounts)?;
            let mut entry = cursor.first()?;
            while let Some((key, value)) = entry {
                let hashed_address = B256::from_slice(&key);
                let account = Account::decode(&value)
                    .map_err(|_| StageError::CorruptData { block: from, what: "hashed account" })?;
                incarnations.insert(hashed_address, account.incarnation);
                commitment.update_account(
                    hashed_address,
                    Some(TrieAccount {
                        nonce: account.nonce,
                        balance: account.balance,
                        storage_root: EMPTY_ROOT_HASH,
                        code_hash: account.code_hash,
                    }),
                );
                entry = cursor.next()?;
            }
        }
        {
            let mut cursor = tx.cursor(Table::HashedStorage)?;
            let mut entry = cursor.first()?;
            while let Some((key, value)) = entry {
                if key.len() == keys::HASH_LEN + keys::NUM_LEN + keys::HASH_LEN {
                    let hashed_address = B256::from_slice(&key[..keys::HASH_LEN]);
                    let incarnation = keys::decode_block_number(
                        &key[keys::HASH_LEN..keys::HASH_LEN + keys::NUM_LEN],
                    )
                    .unwrap_or(0);
                    let hashed_slot = B256::from_slice(&key[keys::HASH_LEN + keys::NUM_LEN..]);
                    // Only the live incarnation participates in the trie.
                    if incarnations.get(&hashed_address) == Some(&incarnation) {
                        commitment.update_storage(
                            hashed_address,
                            hashed_slot,
                            U256::from_be_slice(&value),
                        );
                    }
                }
                entry = cursor.next()?;
            }
        }
        Ok(commitment)
    }

    /// Executes one block's transactions and withdrawals, returning the
    /// receipts and the extracted block changes.
    fn execute_block(
        &mut self,
        tx: &impl DbTx,
        header: &Header,
        commitment: &mut Commitment,
        full_nodes: &mut Vec<(B256, Vec<u8>)>,
    ) -> Result<(Vec<Receipt>, BlockChanges), StageError> {
        let number = header.number;
        let transactions = provider::transactions(tx, number)?;
        let senders = provider::senders(tx, number)?
            .ok_or(StageError::MissingData { block: number, what: "senders" })?;
        if senders.len() != transactions.len() {
            return Err(StageError::CorruptData { block: number, what: "senders" });
        }
        let withdrawals = provider::body(tx, number)?
            .ok_or(StageError::MissingData { block: number, what: "body" })?
            .withdrawals;

        let block_ctx = BlockContext::from_header(&self.spec, header);
        let pre_byzantium = block_ctx.fork < Hardfork::Byzantium;
        let blob_allowance =
            if block_ctx.fork >= Hardfork::Cancun { MAX_BLOB_GAS_PER_BLOCK } else { 0 };
        let mut gas_pool = GasPool::new(header.gas_limit);
        let mut blob_gas_pool = BlobGasPool::new(blob_allowance);

        let mut state = IntraBlockState::new(KvStateReader(tx));
        let mut receipts = Vec::with_capacity(transactions.len());
        let mut cumulative_gas_used = 0u64;
        let mut blob_gas_used = 0u64;

        for (index, (transaction, sender)) in
            transactions.iter().zip(senders.iter()).enumerate()
        {
            let outcome = StateTransition::new(&self.spec, &block_ctx, &mut state, &mut self.evm)
                .execute_transaction(transaction, *sender, &mut gas_pool, &mut blob_gas_pool)
                .map_err(|err| match err {
                    TransitionError::Invalid(error) => StageError::Validation {
                        block: number,
                        error: ValidationError::InvalidTransaction { index, error },
                    },
                    TransitionError::GasLimitReached => StageError::Validation {
                        block: number,
                        error: ValidationError::GasLimitReached,
                    },
                    TransitionError::BlobGasLimitReached => StageError::Validation {
                        block: number,
                        error: ValidationError::BlobGasLimitReached,
                    },
                    TransitionError::State(error) => StageError::State(error),
                    error => StageError::Execution { block: number, error },
                })?;

            cumulative_gas_used += outcome.gas_used;
            blob_gas_used += transaction.transaction.blob_gas();

            // Pre-Byzantium receipts commit to the intermediate state root
            // after each transaction.
            let receipt_outcome = if pre_byzantium {
                let interim = state.take_block_changes();
                apply_changes(commitment, &interim);
                let root = commitment
                    .compute_root(&KvTrieProvider(tx))?
                    .map(|result| {
                        full_nodes.extend(result.nodes);
                        result.root
                    })
                    .unwrap_or(EMPTY_ROOT_HASH);
                ReceiptOutcome::PostState(root)
            } else {
                ReceiptOutcome::Status(outcome.success)
            };

            receipts.push(Receipt {
                tx_type: transaction.transaction.tx_type(),
                outcome: receipt_outcome,
                cumulative_gas_used,
                logs_bloom: logs_bloom(&outcome.logs),
                logs: outcome.logs,
            });
        }

        // System-level credits at block end.
        if let Some(withdrawals) = withdrawals {
            for withdrawal in withdrawals {
                state.add_balance(withdrawal.address, withdrawal.amount_wei())?;
            }
            state.finalize_tx();
        }

        // Header-end checks before anything is persisted.
        if cumulative_gas_used != header.gas_used {
            return Err(StageError::Validation {
                block: number,
                error: ValidationError::GasUsedMismatch {
                    expected: header.gas_used,
                    got: cumulative_gas_used,
                },
            });
        }
        if block_ctx.fork >= Hardfork::Cancun
            && header.blob_gas_used.unwrap_or(0) != blob_gas_used
        {
            return Err(StageError::Validation {
                block: number,
                error: ValidationError::BlobGasUsedMismatch {
                    expected: header.blob_gas_used,
                    got: blob_gas_used,
                },
            });
        }
        let receipts_root =
            stele_trie::ordered_trie_root(&receipts, |receipt, out| receipt.encode_2718(out));
        if receipts_root != header.receipts_root {
            return Err(StageError::Validation {
                block: number,
                error: ValidationError::ReceiptsRootMismatch {
                    expected: header.receipts_root,
                    got: receipts_root,
                },
            });
        }
        let block_bloom = receipts.iter().fold(Bloom::ZERO, |bloom, receipt| {
            bloom | receipt.logs_bloom
        });
        if block_bloom != header.logs_bloom {
            return Err(StageError::Validation {
                block: number,
                error: ValidationError::LogsBloomMismatch,
            });
        }

        Ok((receipts, state.take_block_changes()))
    }
}

/// Persists one block's changes: plain state, hashed state, changesets and
/// code.
fn write_changes(
    tx: &mut impl DbTxMut,
    number: u64,
    changes: &BlockChanges,
) -> Result<(), StageError> {
    for change in &changes.accounts {
        let address = change.address;
        let hashed_address = keccak256(address);
        let prev_encoding = change.prev.map(|account| account.encode()).unwrap_or_default();
        tx.put(
            Table::AccountsHistory,
            &keys::account_history_key(number, &address.0 .0),
            &prev_encoding,
        )?;
        match change.current {
            Some(account) => {
                let encoded = account.encode();
                tx.put(Table::PlainState, address.as_slice(), &encoded)?;
                tx.put(Table::HashedAccounts, hashed_address.as_slice(), &encoded)?;
            }
            None => {
                tx.delete(Table::PlainState, address.as_slice())?;
                tx.delete(Table::HashedAccounts, hashed_address.as_slice())?;
            }
        }
    }

    for change in &changes.storage {
        let address = change.address;
        let hashed_address = keccak256(address);
        let hashed_slot = keccak256(change.slot);
        tx.put(
            Table::StorageHistory,
            &keys::storage_history_key(number, &address.0 .0, change.incarnation, &change.slot.0),
            change.prev.as_slice(),
        )?;
        let plain_key =
            keys::plain_storage_key(&address.0 .0, change.incarnation, &change.slot.0);
        let hashed_key = keys::hashed_storage_key(
            &hashed_address.0,
            change.incarnation,
            &hashed_slot.0,
        );
        if change.current == B256::ZERO {
            tx.delete(Table::PlainState, &plain_key)?;
            tx.delete(Table::HashedStorage, &hashed_key)?;
        } else {
            tx.put(Table::PlainState, &plain_key, change.current.as_slice())?;
            tx.put(Table::HashedStorage, &hashed_key, change.current.as_slice())?;
        }
    }

    for (code_hash, code) in &changes.code {
        tx.put(Table::Code, code_hash.as_slice(), code)?;
    }
    Ok(())
}

/// Stages one block's changes into the commitment builder.
fn apply_changes(commitment: &mut Commitment, changes: &BlockChanges) {
    for change in &changes.accounts {
        let hashed_address = keccak256(change.address);
        match change.current {
            None => commitment.update_account(hashed_address, None),
            Some(account) => {
                // A recreated contract starts from an empty storage
                // sub-trie.
                if change.prev.is_some_and(|prev| prev.incarnation != account.incarnation) {
                    commitment.wipe_storage(hashed_address);
                }
                commitment.update_account(
                    hashed_address,
                    Some(TrieAccount {
                        nonce: account.nonce,
                        balance: account.balance,
                        storage_root: EMPTY_ROOT_HASH,
                        code_hash: account.code_hash,
                    }),
                );
            }
        }
    }
    for change in &changes.storage {
        commitment.update_storage(
            keccak256(change.address),
            keccak256(change.slot),
            U256::from_be_bytes(change.current.0),
        );
    }
}

#[async_trait]
impl<S: Store, E: Evm + Send> Stage<S> for ExecutionStage<E> {
    fn id(&self) -> StageId {
        StageId::EXECUTION
    }

    async fn execute(
        &mut self,
        ctx: &Context,
        tx: &mut S::TxMut,
        input: ExecInput,
    ) -> Result<ExecOutput, StageError> {
        let mut commitment = match self.commitment.take() {
            Some(commitment) => commitment,
            None => self.load_commitment(&*tx, input.from)?,
        };

        let mut processed = 0u64;
        for number in input.from + 1..=input.to {
            if ctx.is_cancelled() {
                // The in-flight transaction is rolled back by the
                // scheduler; the cached commitment no longer matches the
                // store and is dropped with it.
                return Err(StageError::Cancelled);
            }
            if provider::body(&*tx, number)?.is_none() {
                break;
            }
            let header = provider::expect_canonical_header(&*tx, number)?;

            let mut full_nodes = Vec::new();
            let (receipts, changes) =
                self.execute_block(&*tx, &header, &mut commitment, &mut full_nodes)?;

            write_changes(tx, number, &changes)?;
            apply_changes(&mut commitment, &changes);
            if let Some(result) = commitment.compute_root(&KvTrieProvider(&*tx))? {
                full_nodes.extend(result.nodes);
                if result.root != header.state_root {
                    return Err(StageError::Validation {
                        block: number,
                        error: ValidationError::StateRootMismatch {
                            expected: header.state_root,
                            got: result.root,
                        },
                    });
                }
            }
            for (hash, encoding) in full_nodes {
                tx.put(Table::TrieNodes, hash.as_slice(), &encoding)?;
            }

            tx.put(
                Table::BlockReceipts,
                &keys::block_key(number),
                &encode_receipts(&receipts),
            )?;
            debug!(
                target: "stages::execution",
                number,
                txs = receipts.len(),
                gas_used = header.gas_used,
                "Block executed"
            );
            processed += 1;
        }

        info!(target: "stages::execution", from = input.from, processed, "Execution advanced");
        self.commitment = Some(commitment);
        Ok(ExecOutput::done(processed))
    }

    async fn unwind(
        &mut self,
        _ctx: &Context,
        tx: &mut S::TxMut,
        input: UnwindInput,
    ) -> Result<(), StageError> {
        // Any cached trie state is stale the moment state rolls back.
        self.commitment = None;

        // Walk the changesets above the unwind point and restore previous
        // values, newest block first so the oldest `prev` wins.
        let mut account_entries = Vec::new();
        {
            let mut cursor = tx.cursor(Table::AccountsHistory)?;
            let mut entry = cursor.seek(&keys::block_key(input.unwind_to + 1))?;
            while let Some((key, value)) = entry {
                account_entries.push((key, value));
                entry = cursor.next()?;
            }
        }
        for (key, prev) in account_entries.iter().rev() {
            let Some((_, address)) = keys::split_account_history_key(key) else {
                continue;
            };
            let hashed_address = keccak256(address);
            if prev.is_empty() {
                tx.delete(Table::PlainState, &address)?;
                tx.delete(Table::HashedAccounts, hashed_address.as_slice())?;
            } else {
                tx.put(Table::PlainState, &address, prev)?;
                tx.put(Table::HashedAccounts, hashed_address.as_slice(), prev)?;
            }
        }

        let mut storage_entries = Vec::new();
        {
            let mut cursor = tx.cursor(Table::StorageHistory)?;
            let mut entry = cursor.seek(&keys::block_key(input.unwind_to + 1))?;
            while let Some((key, value)) = entry {
                storage_entries.push((key, value));
                entry = cursor.next()?;
            }
        }
        for (key, prev) in storage_entries.iter().rev() {
            let Some((_, address, incarnation, slot)) = keys::split_storage_history_key(key)
            else {
                continue;
            };
            let hashed_address = keccak256(address);
            let hashed_slot = keccak256(slot);
            let plain_key = keys::plain_storage_key(&address, incarnation, &slot);
            let hashed_key =
                keys::hashed_storage_key(&hashed_address.0, incarnation, &hashed_slot.0);
            if prev.iter().all(|&byte| byte == 0) {
                tx.delete(Table::PlainState, &plain_key)?;
                tx.delete(Table::HashedStorage, &hashed_key)?;
            } else {
                tx.put(Table::PlainState, &plain_key, prev)?;
                tx.put(Table::HashedStorage, &hashed_key, prev)?;
            }
        }

        // Drop the changesets, receipts and all persisted commitment state
        // above the unwind point; the interior nodes are rebuilt on the
        // next forward pass.
        provider::unwind_table_above(tx, Table::AccountsHistory, input.unwind_to)?;
        provider::unwind_table_above(tx, Table::StorageHistory, input.unwind_to)?;
        provider::unwind_table_above(tx, Table::BlockReceipts, input.unwind_to)?;
        tx.clear(Table::TrieNodes)?;

        info!(
            target: "stages::execution",
            checkpoint = input.checkpoint,
            unwind_to = input.unwind_to,
            "Execution unwound"
        );
        Ok(())
    }
}
