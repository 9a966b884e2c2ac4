//! The block-hashes stage: maintain the hash → number index.

use crate::{
    provider, Context, ExecInput, ExecOutput, Stage, StageError, StageId, UnwindInput,
};
use async_trait::async_trait;
use stele_kv::{keys, DbTxMut, Store, Table};
use tracing::debug;

/// Walks the canonical hashes written by the headers stage and mirrors them
/// into `HeaderNumbers`.
#[derive(Debug, Default)]
pub struct BlockHashStage;

impl BlockHashStage {
    /// A block-hashes stage.
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<S: Store> Stage<S> for BlockHashStage {
    fn id(&self) -> StageId {
        StageId::BLOCK_HASHES
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
            let Some(hash) = provider::canonical_hash(tx, number)? else {
                // Headers have not reached this height yet.
                break;
            };
            tx.put(Table::HeaderNumbers, hash.as_slice(), &keys::block_key(number))?;
            processed += 1;
        }
        debug!(target: "stages::block_hashes", from = input.from, processed, "Index extended");
        Ok(ExecOutput::done(processed))
    }

    async fn unwind(
        &mut self,
        _ctx: &Context,
        tx: &mut S::TxMut,
        input: UnwindInput,
    ) -> Result<(), StageError> {
        // The canonical hashes are still present: headers unwind after this
        // stage in the reverse order.
        for number in input.unwind_to + 1..=input.checkpoint {
            if let Some(hash) = provider::canonical_hash(tx, number)? {
                tx.delete(Table::HeaderNumbers, hash.as_slice())?;
            }
        }
        Ok(())
    }
}
