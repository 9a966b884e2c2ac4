//! The stage contract: identifiers, dependency edges, inputs and outputs.

use crate::{Context, StageError};
use async_trait::async_trait;
use stele_kv::{DbTx, DbTxMut, Store, Table};

/// A stage identifier, keyed by name in the `SyncStageProgress` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageId(pub &'static str);

impl StageId {
    /// Bulk historical import from immutable segments.
    pub const SNAPSHOTS: Self = Self("Snapshots");
    /// Header download and canonical-chain extension.
    pub const HEADERS: Self = Self("Headers");
    /// The hash → number index.
    pub const BLOCK_HASHES: Self = Self("BlockHashes");
    /// Body download and transaction persistence.
    pub const BODIES: Self = Self("Bodies");
    /// Sender recovery.
    pub const SENDERS: Self = Self("Senders");
    /// Transaction replay and state-root verification.
    pub const EXECUTION: Self = Self("Execution");
    /// The transaction-hash → block index.
    pub const TX_LOOKUP: Self = Self("TxLookup");
    /// Head marking and pruning.
    pub const FINISH: Self = Self("Finish");

    /// The canonical stage order, optional Snapshots prefix included.
    pub const ORDER: [Self; 8] = [
        Self::SNAPSHOTS,
        Self::HEADERS,
        Self::BLOCK_HASHES,
        Self::BODIES,
        Self::SENDERS,
        Self::EXECUTION,
        Self::TX_LOOKUP,
        Self::FINISH,
    ];

    /// The stages this stage must never run ahead of.
    pub fn depends_on(&self) -> &'static [Self] {
        match self.0 {
            "Bodies" => &[Self::HEADERS],
            "BlockHashes" => &[Self::HEADERS],
            "Senders" => &[Self::BODIES],
            "Execution" => &[Self::SENDERS],
            "TxLookup" => &[Self::BODIES],
            "Finish" => &[
                Self::HEADERS,
                Self::BLOCK_HASHES,
                Self::BODIES,
                Self::SENDERS,
                Self::EXECUTION,
                Self::TX_LOOKUP,
            ],
            _ => &[],
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// Input to a forward pass: the persisted checkpoint and the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecInput {
    /// The stage's current checkpoint; work starts at the next block.
    pub from: u64,
    /// The block to sync up to, inclusive.
    pub to: u64,
}

/// Output of a forward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOutput {
    /// Number of blocks the stage advanced past its checkpoint.
    pub blocks_processed: u64,
    /// Whether the stage considers itself caught up to the target. A stage
    /// reporting `false` is re-invoked with its advanced checkpoint.
    pub done: bool,
}

impl ExecOutput {
    /// A completed pass over `blocks_processed` blocks.
    pub const fn done(blocks_processed: u64) -> Self {
        Self { blocks_processed, done: true }
    }
}

/// Input to an unwind: the persisted checkpoint and the block to unwind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnwindInput {
    /// The stage's current checkpoint.
    pub checkpoint: u64,
    /// The block to unwind to; all effects above it must be removed.
    pub unwind_to: u64,
}

/// One pass of the staged sync pipeline.
///
/// `execute` must be idempotent against restart from any persisted
/// checkpoint; `unwind` must be idempotent against being invoked when the
/// checkpoint is already at or below the unwind target.
#[async_trait]
pub trait Stage<S: Store>: Send {
    /// The stage's identifier.
    fn id(&self) -> StageId;

    /// Advances the stage from `input.from` toward `input.to`.
    async fn execute(
        &mut self,
        ctx: &Context,
        tx: &mut S::TxMut,
        input: ExecInput,
    ) -> Result<ExecOutput, StageError>;

    /// Removes every effect of this stage above `input.unwind_to`.
    async fn unwind(
        &mut self,
        ctx: &Context,
        tx: &mut S::TxMut,
        input: UnwindInput,
    ) -> Result<(), StageError>;
}

/// Reads a stage checkpoint; zero when the stage never ran.
pub fn read_progress(tx: &impl DbTx, id: StageId) -> Result<u64, StageError> {
    Ok(tx
        .get(Table::SyncStageProgress, id.0.as_bytes())?
        .and_then(|value| stele_kv::keys::decode_block_number(&value))
        .unwrap_or(0))
}

/// Persists a stage checkpoint as an 8-byte big-endian block number.
pub(crate) fn write_progress(
    tx: &mut impl DbTxMut,
    id: StageId,
    block: u64,
) -> Result<(), StageError> {
    tx.put(Table::SyncStageProgress, id.0.as_bytes(), &stele_kv::keys::block_key(block))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_edges_point_backwards_in_order() {
        let position =
            |id: &StageId| StageId::ORDER.iter().position(|other| other == id).unwrap();
        for id in StageId::ORDER {
            for dep in id.depends_on() {
                assert!(position(dep) < position(&id), "{dep} must precede {id}");
            }
        }
    }
}
