//! The staged sync scheduler.
//!
//! Chain replay is decomposed into a fixed, dependency-ordered list of
//! stages, each independently checkpointed in the store so that a restart
//! resumes where the last commit left off and a reorg unwinds every stage
//! in reverse order.

mod context;
pub use context::{Cancellation, Context};

mod errors;
pub use errors::{StageError, ValidationError};

mod genesis;
pub use genesis::init_genesis;

mod pipeline;
pub use pipeline::Pipeline;

pub mod provider;

mod sources;
pub use sources::{BodySource, HeaderSource, SourceError, StaticChain};

mod stage;
pub use stage::{read_progress, ExecInput, ExecOutput, Stage, StageId, UnwindInput};

mod stages;
pub use stages::{
    export_segments, BlockHashStage, BodyStage, ExecutionStage, FinishStage, HeaderStage,
    SenderStage, SnapshotStage, TxLookupStage,
};
