//! The headers stage: extend the canonical chain from the header source.

use crate::{
    provider, Context, ExecInput, ExecOutput, HeaderSource, Stage, StageError, StageId,
    UnwindInput, ValidationError,
};
use async_trait::async_trait;
use stele_kv::{Store, Table};
use tracing::{debug, info};

/// Downloads headers for the requested range, verifies the parent-hash
/// chain and extends `Headers` + `CanonicalHashes`.
#[derive(Debug)]
pub struct HeaderStage<H> {
    source: H,
}

impl<H> HeaderStage<H> {
    /// A headers stage over the given source.
    pub const fn new(source: H) -> Self {
        Self { source }
    }
}

#[async_trait]
impl<S: Store, H: HeaderSource> Stage<S> for HeaderStage<H> {
    fn id(&self) -> StageId {
        StageId::HEADERS
    }

    async fn execute(
        &mut self,
        _ctx: &Context,
        tx: &mut S::TxMut,
        input: ExecInput,
    ) -> Result<ExecOutput, StageError> {
        let parent = provider::expect_canonical_header(tx, input.from)?;
        let mut parent_hash = parent.hash_slow();
        let mut parent_timestamp = parent.timestamp;

        let headers = self.source.headers(input.from + 1, input.to)?;
        let mut processed = 0u64;
        for header in headers {
            let expected_number = input.from + 1 + processed;
            if header.number != expected_number
                || header.parent_hash != parent_hash
                || header.timestamp <= parent_timestamp
            {
                return Err(StageError::Validation {
                    block: expected_number,
                    error: ValidationError::BrokenParentLink { number: header.number },
                });
            }
            let hash = header.hash_slow();
            provider::put_canonical_header(tx, &header, hash)?;
            parent_hash = hash;
            parent_timestamp = header.timestamp;
            processed += 1;
        }

        info!(
            target: "stages::headers",
            from = input.from,
            processed,
            "Headers extended"
        );
        Ok(ExecOutput::done(processed))
    }

    async fn unwind(
        &mut self,
        _ctx: &Context,
        tx: &mut S::TxMut,
        input: UnwindInput,
    ) -> Result<(), StageError> {
        let headers = provider::unwind_table_above(tx, Table::Headers, input.unwind_to)?;
        let canonical =
            provider::unwind_table_above(tx, Table::CanonicalHashes, input.unwind_to)?;
        debug!(
            target: "stages::headers",
            unwind_to = input.unwind_to,
            headers,
            canonical,
            "Headers unwound"
        );
        Ok(())
    }
}
