//! The scheduler: drives the stage list forward to a target and unwinds it
//! in reverse on reorg.

use crate::{
    stage::{read_progress, write_progress},
    Context, ExecInput, ExecOutput, Stage, StageError, StageId, UnwindInput,
};
use stele_kv::{DbTxMut, Store};
use tracing::{debug, info, warn};

/// The staged sync pipeline. Stages run in insertion order on the forward
/// pass and in reverse order on unwind; each invocation gets its own write
/// transaction, committed only on success, so checkpoints always describe
/// fully persisted work.
pub struct Pipeline<S: Store> {
    store: S,
    stages: Vec<Box<dyn Stage<S>>>,
}

impl<S: Store> std::fmt::Debug for Pipeline<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages.iter().map(|stage| stage.id()).collect::<Vec<_>>())
            .finish()
    }
}

impl<S: Store> Pipeline<S> {
    /// An empty pipeline over the store.
    pub fn new(store: S) -> Self {
        Self { store, stages: Vec::new() }
    }

    /// Appends a stage. Order of calls is execution order.
    pub fn push(mut self, stage: impl Stage<S> + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// The store the pipeline operates on.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// The persisted checkpoint of a stage.
    pub fn progress(&self, id: StageId) -> Result<u64, StageError> {
        let tx = self.store.tx()?;
        read_progress(&tx, id)
    }

    /// Runs one forward pass, advancing every stage toward `target`.
    pub async fn run_to(&mut self, ctx: &Context, target: u64) -> Result<(), StageError> {
        info!(target: "pipeline", target_block = target, "Starting forward pass");
        for index in 0..self.stages.len() {
            self.run_stage(ctx, index, target).await?;
        }
        info!(target: "pipeline", target_block = target, "Forward pass complete");
        Ok(())
    }

    async fn run_stage(
        &mut self,
        ctx: &Context,
        index: usize,
        target: u64,
    ) -> Result<(), StageError> {
        let id = self.stages[index].id();
        loop {
            if ctx.is_cancelled() {
                return Err(StageError::Cancelled);
            }
            let mut tx = self.store.tx_mut()?;
            let progress = read_progress(&tx, id)?;
            if progress >= target {
                debug!(target: "pipeline", stage = %id, progress, "Stage already at target");
                tx.abort();
                return Ok(());
            }

            // Never run a stage ahead of its prerequisites.
            for dependency in id.depends_on() {
                let dependency_progress = read_progress(&tx, *dependency)?;
                if dependency_progress < progress {
                    warn!(
                        target: "pipeline",
                        stage = %id,
                        dependency = %dependency,
                        stage_progress = progress,
                        dependency_progress,
                        "Dependency behind stage; skipping"
                    );
                    tx.abort();
                    return Ok(());
                }
            }

            debug!(target: "pipeline", stage = %id, from = progress, to = target, "Executing stage");
            let input = ExecInput { from: progress, to: target };
            match self.stages[index].execute(ctx, &mut tx, input).await {
                Ok(ExecOutput { blocks_processed, done }) => {
                    write_progress(&mut tx, id, progress + blocks_processed)?;
                    tx.commit()?;
                    debug!(
                        target: "pipeline",
                        stage = %id,
                        progress = progress + blocks_processed,
                        done,
                        "Stage committed"
                    );
                    if done {
                        return Ok(());
                    }
                }
                Err(err) => {
                    tx.abort();
                    warn!(target: "pipeline", stage = %id, %err, "Stage failed; rolled back");
                    return Err(err);
                }
            }
        }
    }

    /// Unwinds every stage, in reverse order, down to `unwind_to`. Stages
    /// already at or below the target are skipped, making a cancelled
    /// unwind re-runnable to completion.
    pub async fn unwind(&mut self, ctx: &Context, unwind_to: u64) -> Result<(), StageError> {
        info!(target: "pipeline", unwind_to, "Starting unwind");
        for index in (0..self.stages.len()).rev() {
            if ctx.is_cancelled() {
                return Err(StageError::Cancelled);
            }
            let id = self.stages[index].id();
            let mut tx = self.store.tx_mut()?;
            let checkpoint = read_progress(&tx, id)?;
            if checkpoint <= unwind_to {
                tx.abort();
                continue;
            }
            debug!(target: "pipeline", stage = %id, checkpoint, unwind_to, "Unwinding stage");
            let input = UnwindInput { checkpoint, unwind_to };
            match self.stages[index].unwind(ctx, &mut tx, input).await {
                Ok(()) => {
                    write_progress(&mut tx, id, unwind_to)?;
                    tx.commit()?;
                }
                Err(err) => {
                    tx.abort();
                    warn!(target: "pipeline", stage = %id, %err, "Unwind failed; rolled back");
                    return Err(err);
                }
            }
        }
        info!(target: "pipeline", unwind_to, "Unwind complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExecInput, ExecOutput, UnwindInput};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use stele_kv::MemStore;

    /// Records execution and unwind calls, advancing to the target.
    struct RecordingStage {
        id: StageId,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Stage<MemStore> for RecordingStage {
        fn id(&self) -> StageId {
            self.id
        }

        async fn execute(
            &mut self,
            _ctx: &Context,
            _tx: &mut <MemStore as Store>::TxMut,
            input: ExecInput,
        ) -> Result<ExecOutput, StageError> {
            self.log.lock().unwrap().push(format!("execute {}", self.id));
            Ok(ExecOutput::done(input.to - input.from))
        }

        async fn unwind(
            &mut self,
            _ctx: &Context,
            _tx: &mut <MemStore as Store>::TxMut,
            _input: UnwindInput,
        ) -> Result<(), StageError> {
            self.log.lock().unwrap().push(format!("unwind {}", self.id));
            Ok(())
        }
    }

    fn recording_pipeline(
        ids: &[StageId],
    ) -> (Pipeline<MemStore>, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new(MemStore::in_memory());
        for id in ids {
            pipeline = pipeline.push(RecordingStage { id: *id, log: Arc::clone(&log) });
        }
        (pipeline, log)
    }

    const CORE_STAGES: [StageId; 4] =
        [StageId::HEADERS, StageId::BODIES, StageId::SENDERS, StageId::EXECUTION];

    #[tokio::test]
    async fn test_forward_pass_runs_stages_in_order() {
        let (mut pipeline, log) = recording_pipeline(&CORE_STAGES);
        pipeline.run_to(&Context::new(), 100).await.unwrap();
        assert_eq!(
            log.lock().unwrap().as_slice(),
            [
                "execute Headers",
                "execute Bodies",
                "execute Senders",
                "execute Execution"
            ]
        );
        for id in CORE_STAGES {
            assert_eq!(pipeline.progress(id).unwrap(), 100);
        }
    }

    #[tokio::test]
    async fn test_forward_pass_is_idempotent() {
        let (mut pipeline, log) = recording_pipeline(&CORE_STAGES);
        pipeline.run_to(&Context::new(), 50).await.unwrap();
        log.lock().unwrap().clear();

        // A second pass with an unchanged target leaves all checkpoints
        // alone and invokes nothing.
        pipeline.run_to(&Context::new(), 50).await.unwrap();
        assert!(log.lock().unwrap().is_empty());
        for id in CORE_STAGES {
            assert_eq!(pipeline.progress(id).unwrap(), 50);
        }
    }

    #[tokio::test]
    async fn test_unwind_walks_stages_in_reverse_dependency_order() {
        // Checkpoints Headers=100, Bodies=100, Senders=100, Execution=100;
        // unwind(30) must call each unwind exactly once, in the order
        // Execution, Senders, Bodies, Headers, and reset all checkpoints.
        let (mut pipeline, log) = recording_pipeline(&CORE_STAGES);
        pipeline.run_to(&Context::new(), 100).await.unwrap();
        log.lock().unwrap().clear();

        pipeline.unwind(&Context::new(), 30).await.unwrap();
        assert_eq!(
            log.lock().unwrap().as_slice(),
            [
                "unwind Execution",
                "unwind Senders",
                "unwind Bodies",
                "unwind Headers"
            ]
        );
        for id in CORE_STAGES {
            assert_eq!(pipeline.progress(id).unwrap(), 30);
        }
    }

    #[tokio::test]
    async fn test_unwind_skips_stages_at_or_below_target() {
        let (mut pipeline, log) = recording_pipeline(&CORE_STAGES);
        pipeline.run_to(&Context::new(), 20).await.unwrap();
        log.lock().unwrap().clear();

        pipeline.unwind(&Context::new(), 20).await.unwrap();
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dependency_violation_skips_stage() {
        // Execution's checkpoint is artificially ahead of Senders'; the
        // scheduler must refuse to run it further rather than execute ahead
        // of its prerequisite.
        let (mut pipeline, log) = recording_pipeline(&[StageId::EXECUTION]);
        {
            let mut tx = pipeline.store().tx_mut().unwrap();
            write_progress(&mut tx, StageId::EXECUTION, 40).unwrap();
            write_progress(&mut tx, StageId::SENDERS, 10).unwrap();
            tx.commit().unwrap();
        }
        pipeline.run_to(&Context::new(), 100).await.unwrap();
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(pipeline.progress(StageId::EXECUTION).unwrap(), 40);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_forward_pass() {
        let (mut pipeline, log) = recording_pipeline(&CORE_STAGES);
        let ctx = Context::new();
        ctx.cancellation.cancel();
        let result = pipeline.run_to(&ctx, 10).await;
        assert!(matches!(result, Err(StageError::Cancelled)));
        assert!(log.lock().unwrap().is_empty());

        // The flag resets and the pass completes.
        ctx.cancellation.reset();
        pipeline.run_to(&ctx, 10).await.unwrap();
        assert_eq!(pipeline.progress(StageId::EXECUTION).unwrap(), 10);
    }

    #[tokio::test]
    async fn test_failing_stage_keeps_checkpoint() {
        struct FailingStage;

        #[async_trait]
        impl Stage<MemStore> for FailingStage {
            fn id(&self) -> StageId {
                StageId::HEADERS
            }

            async fn execute(
                &mut self,
                _ctx: &Context,
                _tx: &mut <MemStore as Store>::TxMut,
                input: ExecInput,
            ) -> Result<ExecOutput, StageError> {
                Err(StageError::MissingData { block: input.from, what: "header" })
            }

            async fn unwind(
                &mut self,
                _ctx: &Context,
                _tx: &mut <MemStore as Store>::TxMut,
                _input: UnwindInput,
            ) -> Result<(), StageError> {
                Ok(())
            }
        }

        let mut pipeline = Pipeline::new(MemStore::in_memory()).push(FailingStage);
        assert!(pipeline.run_to(&Context::new(), 5).await.is_err());
        assert_eq!(pipeline.progress(StageId::HEADERS).unwrap(), 0);
    }
}
