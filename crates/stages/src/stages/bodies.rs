//! The bodies stage: fetch block bodies and persist their transactions.

use crate::{
    provider, BodySource, Context, ExecInput, ExecOutput, Stage, StageError, StageId,
    UnwindInput, ValidationError,
};
use alloy_primitives::keccak256;
use alloy_rlp::Encodable;
use async_trait::async_trait;
use stele_kv::{Store, Table};
use stele_primitives::{BlockBody, Header};
use stele_trie::ordered_trie_root;
use tracing::info;

/// Downloads bodies for the canonical headers in range, verifies them
/// against the header roots and fills `Bodies` + `Transactions`.
#[derive(Debug)]
pub struct BodyStage<B> {
    source: B,
}

impl<B> BodyStage<B> {
    /// A bodies stage over the given source.
    pub const fn new(source: B) -> Self {
        Self { source }
    }
}

/// Verifies a body against its header's roots.
fn validate_body(header: &Header, body: &BlockBody) -> Result<(), ValidationError> {
    let transactions_root =
        ordered_trie_root(&body.transactions, |transaction, out| transaction.encode_2718(out));
    if transactions_root != header.transactions_root {
        return Err(ValidationError::TransactionsRootMismatch {
            expected: header.transactions_root,
            got: transactions_root,
        });
    }

    let mut ommers_rlp = Vec::new();
    body.ommers.encode(&mut ommers_rlp);
    if keccak256(&ommers_rlp) != header.ommers_hash {
        return Err(ValidationError::OmmersHashMismatch);
    }

    match (header.withdrawals_root, &body.withdrawals) {
        (None, None) => {}
        (Some(expected), Some(withdrawals)) => {
            let got = ordered_trie_root(withdrawals, |withdrawal, out| withdrawal.encode(out));
            if got != expected {
                return Err(ValidationError::WithdrawalsRootMismatch);
            }
        }
        _ => return Err(ValidationError::WithdrawalsRootMismatch),
    }
    Ok(())
}

#[async_trait]
impl<S: Store, B: BodySource> Stage<S> for BodyStage<B> {
    fn id(&self) -> StageId {
        StageId::BODIES
    }

    async fn execute(
        &mut self,
        ctx: &Context,
        tx: &mut S::TxMut,
        input: ExecInput,
    ) -> Result<ExecOutput, StageError> {
        // Request everything the canonical chain covers in range.
        let mut requests = Vec::new();
        for number in input.from + 1..=input.to {
            match provider::canonical_hash(tx, number)? {
                Some(hash) => requests.push((number, hash)),
                None => break,
            }
        }
        if requests.is_empty() {
            return Ok(ExecOutput::done(0));
        }

        let bodies = self.source.bodies(&requests)?;
        let mut processed = 0u64;
        for ((number, hash), body) in requests.into_iter().zip(bodies) {
            if ctx.is_cancelled() {
                return Err(StageError::Cancelled);
            }
            let header = provider::header(tx, number, hash)?
                .ok_or(StageError::MissingData { block: number, what: "header" })?;
            validate_body(&header, &body)
                .map_err(|error| StageError::Validation { block: number, error })?;
            provider::put_body(tx, number, &body.transactions, body.ommers, body.withdrawals)?;
            processed += 1;
        }

        info!(target: "stages::bodies", from = input.from, processed, "Bodies stored");
        Ok(ExecOutput::done(processed))
    }

    async fn unwind(
        &mut self,
        _ctx: &Context,
        tx: &mut S::TxMut,
        input: UnwindInput,
    ) -> Result<(), StageError> {
        provider::unwind_table_above(tx, Table::Bodies, input.unwind_to)?;
        provider::unwind_table_above(tx, Table::Transactions, input.unwind_to)?;
        Ok(())
    }
}
