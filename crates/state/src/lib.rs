//! The intra-block state machine.
//!
//! [IntraBlockState] sits between the EVM and the store during execution of
//! one block: it buffers account, storage, code, access-list, refund and
//! transient-storage changes, journaling every mutation so that nested
//! snapshots revert exactly.

mod access_list;
pub use access_list::AccessListState;

mod changes;
pub use changes::{AccountChange, BlockChanges, StorageChange};

mod errors;
pub use errors::{StateError, StateResult};

mod journal;
pub use journal::JournalEntry;

mod reader;
pub use reader::{MemoryStateReader, StateReader};

mod state;
pub use state::{IntraBlockState, Snapshot};
