//! The consensus-facing engine surface.
//!
//! `new_payload` lands a single block in the execution pipeline;
//! `forkchoice_updated` unwinds when the chosen head is behind the current
//! one. Both feed the same sources the sync pipeline reads from, so a
//! payload is just a one-block forward pass.

use alloy_primitives::B256;
use std::sync::{Arc, RwLock};
use stele_kv::Store;
use stele_primitives::{Block, BlockBody, Header};
use stele_stages::{
    provider, read_progress, BodySource, Context, HeaderSource, Pipeline, SourceError,
    StageError, StageId,
};
use tracing::{info, warn};

/// Outcome of a `new_payload` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadStatus {
    /// The payload extended the canonical chain.
    Valid {
        /// The new head hash.
        latest_valid_hash: B256,
    },
    /// The payload failed validation and was discarded.
    Invalid {
        /// Why it was rejected.
        validation_error: String,
    },
    /// The payload does not attach to the current head.
    Syncing,
}

/// A shared in-memory block buffer acting as the pipeline's header and body
/// source. The engine pushes payloads in; the stages pull them out.
#[derive(Debug, Clone, Default)]
pub struct PayloadBuffer {
    blocks: Arc<RwLock<Vec<Block>>>,
}

impl PayloadBuffer {
    /// An empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers one block.
    pub fn push(&self, block: Block) {
        self.blocks.write().expect("buffer lock poisoned").push(block);
    }

    /// Drops every block above `number`.
    pub fn truncate_above(&self, number: u64) {
        self.blocks
            .write()
            .expect("buffer lock poisoned")
            .retain(|block| block.header.number <= number);
    }

    fn find(&self, number: u64) -> Option<Block> {
        self.blocks
            .read()
            .expect("buffer lock poisoned")
            .iter()
            .find(|block| block.header.number == number)
            .cloned()
    }
}

impl HeaderSource for PayloadBuffer {
    fn headers(&self, from: u64, to: u64) -> Result<Vec<Header>, SourceError> {
        Ok((from..=to)
            .map_while(|number| self.find(number).map(|block| block.header))
            .collect())
    }
}

impl BodySource for PayloadBuffer {
    fn bodies(&self, requests: &[(u64, B256)]) -> Result<Vec<BlockBody>, SourceError> {
        requests
            .iter()
            .map(|(number, hash)| {
                let block = self
                    .find(*number)
                    .ok_or_else(|| SourceError(format!("unknown payload {number}")))?;
                if block.hash_slow() != *hash {
                    return Err(SourceError(format!("payload hash mismatch at {number}")));
                }
                Ok(block.body)
            })
            .collect()
    }
}

/// The engine API endpoints, bound to a pipeline and its payload buffer.
#[derive(Debug)]
pub struct EngineApi<S: Store> {
    pipeline: Pipeline<S>,
    buffer: PayloadBuffer,
    ctx: Context,
}

impl<S: Store> EngineApi<S> {
    /// Binds the engine to a pipeline whose sources read from `buffer`.
    pub fn new(pipeline: Pipeline<S>, buffer: PayloadBuffer, ctx: Context) -> Self {
        Self { pipeline, buffer, ctx }
    }

    /// The underlying pipeline.
    pub fn pipeline(&mut self) -> &mut Pipeline<S> {
        &mut self.pipeline
    }

    /// Executes one payload through the pipeline. Validation failures roll
    /// the chain back to the payload's parent and report `Invalid`.
    pub async fn new_payload(&mut self, block: Block) -> Result<PayloadStatus, StageError> {
        let number = block.header.number;
        let hash = block.hash_slow();
        let head = self.pipeline.progress(StageId::FINISH)?;
        if number != head + 1 {
            info!(target: "engine", number, head, "Payload does not extend the head");
            return Ok(PayloadStatus::Syncing);
        }

        self.buffer.push(block);
        match self.pipeline.run_to(&self.ctx, number).await {
            Ok(()) if self.pipeline.progress(StageId::FINISH)? == number => {
                Ok(PayloadStatus::Valid { latest_valid_hash: hash })
            }
            Ok(()) => {
                // A stage stopped short without an error; the payload is
                // not fully applied.
                self.buffer.truncate_above(number - 1);
                self.pipeline.unwind(&self.ctx, number - 1).await?;
                Ok(PayloadStatus::Syncing)
            }
            Err(StageError::Validation { block, error }) => {
                warn!(target: "engine", block, %error, "Invalid payload");
                self.buffer.truncate_above(number - 1);
                self.pipeline.unwind(&self.ctx, number - 1).await?;
                Ok(PayloadStatus::Invalid { validation_error: error.to_string() })
            }
            Err(err) => Err(err),
        }
    }

    /// Applies a forkchoice update: an unwind when the chosen head is a
    /// known block behind the current one.
    pub async fn forkchoice_updated(&mut self, head: B256) -> Result<PayloadStatus, StageError> {
        let tx = self.pipeline.store().tx()?;
        let Some(number) = provider::header_number(&tx, head)? else {
            return Ok(PayloadStatus::Syncing);
        };
        let current = read_progress(&tx, StageId::FINISH)?;
        drop(tx);

        if number < current {
            info!(target: "engine", number, current, "Forkchoice behind head; unwinding");
            self.buffer.truncate_above(number);
            self.pipeline.unwind(&self.ctx, number).await?;
        }
        Ok(PayloadStatus::Valid { latest_valid_hash: head })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stele_executor::NoopEvm;
    use stele_kv::MemStore;
    use stele_primitives::{ChainSpec, Genesis, SealedHeader, EMPTY_ROOT_HASH};
    use stele_stages::{
        init_genesis, BlockHashStage, BodyStage, ExecutionStage, FinishStage, HeaderStage,
        SenderStage, TxLookupStage,
    };
    use stele_trie::CommitmentMode;

    fn engine() -> (EngineApi<MemStore>, SealedHeader, ChainSpec) {
        let spec = ChainSpec::dev(1337);
        let genesis = Genesis { gas_limit: 30_000_000, ..Default::default() };
        let store = MemStore::in_memory();
        let sealed = init_genesis(&store, &spec, &genesis, CommitmentMode::FullTrie).unwrap();

        let buffer = PayloadBuffer::new();
        let pipeline = Pipeline::new(store)
            .push(HeaderStage::new(buffer.clone()))
            .push(BlockHashStage::new())
            .push(BodyStage::new(buffer.clone()))
            .push(SenderStage::new())
            .push(ExecutionStage::new(spec.clone(), NoopEvm, CommitmentMode::FullTrie))
            .push(TxLookupStage::new())
            .push(FinishStage::new());
        (EngineApi::new(pipeline, buffer, Context::new()), sealed, spec)
    }

    fn empty_block_on(parent: &SealedHeader) -> Block {
        Block {
            header: Header {
                number: parent.number + 1,
                parent_hash: parent.hash(),
                timestamp: parent.timestamp + 12,
                gas_limit: parent.gas_limit,
                state_root: parent.state_root,
                receipts_root: EMPTY_ROOT_HASH,
                transactions_root: EMPTY_ROOT_HASH,
                ..Default::default()
            },
            body: BlockBody::default(),
        }
    }

    #[tokio::test]
    async fn test_valid_empty_payload_advances_head() {
        let (mut engine, genesis, _) = engine();
        let block = empty_block_on(&genesis);
        let expected_hash = block.hash_slow();
        let status = engine.new_payload(block).await.unwrap();
        assert_eq!(status, PayloadStatus::Valid { latest_valid_hash: expected_hash });
        assert_eq!(engine.pipeline().progress(StageId::FINISH).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalid_state_root_is_rejected_and_rolled_back() {
        let (mut engine, genesis, _) = engine();
        let mut block = empty_block_on(&genesis);
        block.header.state_root = alloy_primitives::B256::repeat_byte(0xde);
        let status = engine.new_payload(block).await.unwrap();
        assert!(matches!(status, PayloadStatus::Invalid { .. }));

        // The chain is back at genesis, ready for the correct payload.
        assert_eq!(engine.pipeline().progress(StageId::FINISH).unwrap(), 0);
        let good = empty_block_on(&genesis);
        let status = engine.new_payload(good).await.unwrap();
        assert!(matches!(status, PayloadStatus::Valid { .. }));
    }

    #[tokio::test]
    async fn test_gapped_payload_reports_syncing() {
        let (mut engine, genesis, _) = engine();
        let mut far = empty_block_on(&genesis);
        far.header.number = 5;
        let status = engine.new_payload(far).await.unwrap();
        assert_eq!(status, PayloadStatus::Syncing);
    }

    #[tokio::test]
    async fn test_forkchoice_unwinds_to_earlier_block() {
        let (mut engine, genesis, _) = engine();
        let first = empty_block_on(&genesis);
        let first_sealed = SealedHeader::seal(first.header.clone());
        engine.new_payload(first).await.unwrap();
        let second = empty_block_on(&first_sealed);
        engine.new_payload(second).await.unwrap();
        assert_eq!(engine.pipeline().progress(StageId::FINISH).unwrap(), 2);

        let status = engine.forkchoice_updated(first_sealed.hash()).await.unwrap();
        assert_eq!(status, PayloadStatus::Valid { latest_valid_hash: first_sealed.hash() });
        assert_eq!(engine.pipeline().progress(StageId::FINISH).unwrap(), 1);
        assert_eq!(engine.pipeline().progress(StageId::EXECUTION).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_forkchoice_head_is_syncing() {
        let (mut engine, _, _) = engine();
        let status =
            engine.forkchoice_updated(alloy_primitives::B256::repeat_byte(7)).await.unwrap();
        assert_eq!(status, PayloadStatus::Syncing);
    }
}
