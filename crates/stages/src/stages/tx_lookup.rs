//! The transaction-lookup stage: index transaction hashes to their blocks.

use crate::{provider, Context, ExecInput, ExecOutput, Stage, StageError, StageId, UnwindInput};
use alloy_primitives::keccak256;
use async_trait::async_trait;
use stele_kv::{keys, DbTxMut, Store, Table};
use tracing::debug;

/// Hashes every stored transaction envelope in range and writes the
/// `txHash → blockNumber` index.
#[derive(Debug, Default)]
pub struct TxLookupStage;

impl TxLookupStage {
    /// A transaction-lookup stage.
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<S: Store> Stage<S> for TxLookupStage {
    fn id(&self) -> StageId {
        StageId::TX_LOOKUP
    }

    async fn execute(
        &mut self,
        ctx: &Context,
        tx: &mut S::TxMut,
        input: ExecInput,
    ) -> Result<ExecOutput, StageError> {
        let mut processed = 0u64;
        for number in input.from + 1..=input.to {
            if ctx.is_cancelled() {
                return Err(StageError::Cancelled);
            }
            if provider::body(tx, number)?.is_none() {
                break;
            }
            for envelope in provider::raw_transactions(tx, number)? {
                let hash = keccak256(&envelope);
                tx.put(Table::TxLookup, hash.as_slice(), &keys::block_key(number))?;
            }
            processed += 1;
        }
        debug!(target: "stages::tx_lookup", from = input.from, processed, "Lookup extended");
        Ok(ExecOutput::done(processed))
    }

    async fn unwind(
        &mut self,
        _ctx: &Context,
        tx: &mut S::TxMut,
        input: UnwindInput,
    ) -> Result<(), StageError> {
        for number in input.unwind_to + 1..=input.checkpoint {
            for envelope in provider::raw_transactions(tx, number)? {
                tx.delete(Table::TxLookup, keccak256(&envelope).as_slice())?;
            }
        }
        Ok(())
    }
}
