//! The finish stage: mark the head and prune history for non-archive
//! configurations.

use crate::{Context, ExecInput, ExecOutput, Stage, StageError, StageId, UnwindInput};
use async_trait::async_trait;
use stele_kv::{keys, DbCursor, DbTx, DbTxMut, Store, Table};
use tracing::{debug, info};

/// Completes the forward pass. With a prune distance configured, changesets
/// and receipts older than `head - distance` are dropped; archive nodes
/// leave everything in place.
#[derive(Debug, Default)]
pub struct FinishStage {
    prune_distance: Option<u64>,
}

impl FinishStage {
    /// An archive-mode finish stage.
    pub const fn new() -> Self {
        Self { prune_distance: None }
    }

    /// A pruning finish stage keeping `distance` blocks of history.
    pub const fn with_prune_distance(distance: u64) -> Self {
        Self { prune_distance: Some(distance) }
    }

    fn prune_below(
        tx: &mut impl DbTxMut,
        table: Table,
        cutoff: u64,
    ) -> Result<usize, StageError> {
        let mut doomed = Vec::new();
        {
            let mut cursor = tx.cursor(table)?;
            let mut entry = cursor.first()?;
            while let Some((key, _)) = entry {
                match keys::decode_block_number(&key[..keys::NUM_LEN.min(key.len())]) {
                    Some(number) if number < cutoff => doomed.push(key),
                    _ => break,
                }
                entry = cursor.next()?;
            }
        }
        let count = doomed.len();
        for key in doomed {
            tx.delete(table, &key)?;
        }
        Ok(count)
    }
}

#[async_trait]
impl<S: Store> Stage<S> for FinishStage {
    fn id(&self) -> StageId {
        StageId::FINISH
    }

    async fn execute(
        &mut self,
        _ctx: &Context,
        tx: &mut S::TxMut,
        input: ExecInput,
    ) -> Result<ExecOutput, StageError> {
        // The head never runs ahead of what execution actually verified.
        let head = crate::read_progress(tx, StageId::EXECUTION)?.min(input.to);
        if let Some(distance) = self.prune_distance {
            let cutoff = head.saturating_sub(distance);
            if cutoff > 0 {
                let accounts = Self::prune_below(tx, Table::AccountsHistory, cutoff)?;
                let storage = Self::prune_below(tx, Table::StorageHistory, cutoff)?;
                let receipts = Self::prune_below(tx, Table::BlockReceipts, cutoff)?;
                debug!(
                    target: "stages::finish",
                    cutoff,
                    accounts,
                    storage,
                    receipts,
                    "History pruned"
                );
            }
        }
        info!(target: "stages::finish", head, "Sync head advanced");
        Ok(ExecOutput::done(head.saturating_sub(input.from)))
    }

    async fn unwind(
        &mut self,
        _ctx: &Context,
        _tx: &mut S::TxMut,
        _input: UnwindInput,
    ) -> Result<(), StageError> {
        // Nothing beyond the checkpoint itself to roll back.
        Ok(())
    }
}
