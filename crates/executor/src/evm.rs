//! The call boundary between the transition engine and the EVM.

use crate::{BlockContext, EvmError};
use alloy_primitives::{Address, Bytes, TxKind, U256};
use stele_primitives::Log;
use stele_state::{IntraBlockState, StateReader};

/// The call frame handed to the EVM for one transaction.
#[derive(Debug, Clone)]
pub struct CallFrame {
    /// The recovered sender.
    pub caller: Address,
    /// Call target or contract creation.
    pub kind: TxKind,
    /// Wei accompanying the call. Already transferred when the EVM runs.
    pub value: U256,
    /// Calldata or initcode.
    pub input: Bytes,
    /// Gas available to bytecode execution (limit minus intrinsic).
    pub gas: u64,
}

/// What the EVM reports back for one executed frame.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    /// Whether execution succeeded.
    pub success: bool,
    /// Return or revert data.
    pub return_data: Bytes,
    /// Gas consumed by bytecode execution, beyond the intrinsic cost.
    pub gas_used: u64,
    /// Refund accumulated during execution, mirroring the state handle's
    /// counter.
    pub gas_refund: u64,
    /// Logs emitted during execution.
    pub logs: Vec<Log>,
}

/// The external EVM collaborator. It may read and mutate the intra-block
/// state, including taking snapshots and journaling, for the duration of
/// one call; the transition engine owns everything around it.
pub trait Evm {
    /// Executes one call frame against the given state.
    fn execute<R: StateReader>(
        &mut self,
        frame: &CallFrame,
        ctx: &BlockContext,
        state: &mut IntraBlockState<R>,
    ) -> Result<ExecutionResult, EvmError>;
}

/// The in-repo EVM stub: no bytecode runs, every frame succeeds consuming
/// zero execution gas. Value transfer has already been performed by the
/// transition engine, so plain transfers behave correctly end to end.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEvm;

impl Evm for NoopEvm {
    fn execute<R: StateReader>(
        &mut self,
        _frame: &CallFrame,
        _ctx: &BlockContext,
        state: &mut IntraBlockState<R>,
    ) -> Result<ExecutionResult, EvmError> {
        Ok(ExecutionResult {
            success: true,
            return_data: Bytes::new(),
            gas_used: 0,
            gas_refund: state.refund(),
            logs: Vec::new(),
        })
    }
}
