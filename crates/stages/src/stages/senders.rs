//! The senders stage: recover transaction signers ahead of execution.

use crate::{
    provider, Context, ExecInput, ExecOutput, Stage, StageError, StageId, UnwindInput,
    ValidationError,
};
use alloy_primitives::Address;
use async_trait::async_trait;
use rayon::prelude::*;
use stele_kv::{Store, Table};
use tracing::info;

/// Recovers the sender of every transaction in range over a worker pool and
/// stores them as per-block concatenated addresses. Recovery is stateless
/// and per-transaction, so the pool parallelises freely.
#[derive(Debug, Default)]
pub struct SenderStage;

impl SenderStage {
    /// A senders stage.
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<S: Store> Stage<S> for SenderStage {
    fn id(&self) -> StageId {
        StageId::SENDERS
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
                // Bodies have not reached this height yet.
                break;
            }
            let transactions = provider::transactions(tx, number)?;
            let senders: Result<Vec<Address>, usize> = transactions
                .par_iter()
                .enumerate()
                .map(|(index, transaction)| transaction.recover_sender().map_err(|_| index))
                .collect();
            let senders = senders.map_err(|index| StageError::Validation {
                block: number,
                error: ValidationError::SenderRecovery { index },
            })?;
            provider::put_senders(tx, number, &senders)?;
            processed += 1;
        }
        info!(target: "stages::senders", from = input.from, processed, "Senders recovered");
        Ok(ExecOutput::done(processed))
    }

    async fn unwind(
        &mut self,
        _ctx: &Context,
        tx: &mut S::TxMut,
        input: UnwindInput,
    ) -> Result<(), StageError> {
        provider::unwind_table_above(tx, Table::Senders, input.unwind_to)?;
        Ok(())
    }
}
