//! The stage implementations, in canonical order.

mod snapshots;
pub use snapshots::{export_segments, SnapshotStage};

mod headers;
pub use headers::HeaderStage;

mod block_hashes;
pub use block_hashes::BlockHashStage;

mod bodies;
pub use bodies::BodyStage;

mod senders;
pub use senders::SenderStage;

mod execution;
pub use execution::ExecutionStage;

mod tx_lookup;
pub use tx_lookup::TxLookupStage;

mod finish;
pub use finish::FinishStage;
