//! The state-transition engine.
//!
//! Drives one transaction from validation through final bookkeeping:
//! pre-checks in protocol order, gas purchase, the call into the external
//! [Evm] collaborator, refunds, fee payment and receipt material. The EVM
//! proper lives behind the [Evm] trait; this crate ships [NoopEvm], a
//! transfer-only stand-in.

mod context;
pub use context::BlockContext;

mod errors;
pub use errors::{EvmError, InvalidTransaction, TransitionError, TransitionResult};

mod evm;
pub use evm::{CallFrame, Evm, ExecutionResult, NoopEvm};

mod gas;
pub use gas::{intrinsic_gas, precompile_addresses, BlobGasPool, GasPool};

mod transition;
pub use transition::{StateTransition, TransactionOutcome};
