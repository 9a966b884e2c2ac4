//! Driving one transaction from validation through final bookkeeping.

use crate::{
    gas::{intrinsic_gas, precompile_addresses, BlobGasPool, GasPool},
    BlockContext, CallFrame, Evm, InvalidTransaction, TransitionError, TransitionResult,
};
use alloy_primitives::{keccak256, Address, Bytes, TxKind, B256, U256};
use alloy_rlp::Encodable;
use stele_primitives::{
    Authorization, ChainSpec, Hardfork, Log, Transaction, TransactionSigned, KECCAK_EMPTY,
    MAX_BLOBS_PER_TX, MAX_TX_GAS_LIMIT, PER_AUTH_BASE_GAS, PER_EMPTY_ACCOUNT_GAS,
};
use stele_state::{IntraBlockState, StateReader};
use tracing::{debug, trace};

/// What one executed transaction contributes to its receipt.
#[derive(Debug, Clone)]
pub struct TransactionOutcome {
    /// Whether the transaction succeeded.
    pub success: bool,
    /// Total gas consumed, refunds applied.
    pub gas_used: u64,
    /// Logs emitted during execution.
    pub logs: Vec<Log>,
    /// Return or revert data.
    pub return_data: Bytes,
}

/// The per-transaction state transition engine, bound to one block context
/// and one intra-block state.
#[derive(Debug)]
pub struct StateTransition<'a, R, E> {
    spec: &'a ChainSpec,
    ctx: &'a BlockContext,
    state: &'a mut IntraBlockState<R>,
    evm: &'a mut E,
    /// Skip balance checks and fee transfers; used by read-only call
    /// simulation.
    free_gas: bool,
}

impl<'a, R: StateReader, E: Evm> StateTransition<'a, R, E> {
    /// Binds the engine to a block context and state.
    pub fn new(
        spec: &'a ChainSpec,
        ctx: &'a BlockContext,
        state: &'a mut IntraBlockState<R>,
        evm: &'a mut E,
    ) -> Self {
        Self { spec, ctx, state, evm, free_gas: false }
    }

    /// Disables balance checks and fee transfers (`eth_call` semantics).
    pub fn with_free_gas(mut self) -> Self {
        self.free_gas = true;
        self
    }

    /// Executes one transaction: pre-checks in protocol order, gas
    /// purchase, the EVM call, refunds and fee payment. On EVM-level
    /// failure the state reverts to the pre-execution snapshot but gas
    /// stays charged and the nonce increment persists.
    pub fn execute_transaction(
        &mut self,
        tx: &TransactionSigned,
        sender: Address,
        gas_pool: &mut GasPool,
        blob_gas_pool: &mut BlobGasPool,
    ) -> TransitionResult<TransactionOutcome> {
        let transaction = &tx.transaction;
        let gas_limit = transaction.gas_limit();
        let effective_gas_price = transaction.effective_gas_price(self.ctx.base_fee);

        self.pre_check(transaction, sender, effective_gas_price)?;

        // Buy gas: debit the sender and both pools up front.
        let blob_gas = transaction.blob_gas();
        let blob_gas_cost =
            U256::from(blob_gas) * U256::from(self.ctx.blob_base_fee.unwrap_or_default());
        gas_pool.debit(gas_limit).map_err(|()| TransitionError::GasLimitReached)?;
        blob_gas_pool.debit(blob_gas).map_err(|()| TransitionError::BlobGasLimitReached)?;
        if !self.free_gas {
            let purchase =
                U256::from(gas_limit) * U256::from(effective_gas_price) + blob_gas_cost;
            self.state.sub_balance(sender, purchase)?;
        }

        // Pre-warm the access list: origin, target, precompiles, coinbase
        // post-Shanghai (EIP-3651) and any EIP-2930 entries.
        let target = match transaction.to() {
            TxKind::Call(address) => Some(address),
            TxKind::Create => None,
        };
        self.state.begin_tx(
            sender,
            target,
            transaction.access_list(),
            precompile_addresses(self.ctx.fork)
                .chain((self.ctx.fork >= Hardfork::Shanghai).then_some(self.ctx.coinbase)),
        );

        // The nonce increment persists even when execution fails.
        let sender_nonce = self.state.get_nonce(sender)?;
        self.state.set_nonce(sender, sender_nonce + 1)?;

        self.apply_authorizations(transaction)?;

        // Everything past this point is undone on execution failure.
        let snapshot = self.state.snapshot();

        let kind = match transaction.to() {
            TxKind::Call(address) => {
                self.state.sub_balance(sender, transaction.value())?;
                self.state.add_balance(address, transaction.value())?;
                TxKind::Call(address)
            }
            TxKind::Create => {
                let created = create_address(sender, sender_nonce);
                self.state.create_contract(created)?;
                if self.ctx.fork >= Hardfork::SpuriousDragon {
                    self.state.set_nonce(created, 1)?;
                }
                self.state.sub_balance(sender, transaction.value())?;
                self.state.add_balance(created, transaction.value())?;
                TxKind::Call(created)
            }
        };

        let intrinsic = intrinsic_gas(transaction, self.ctx.fork);
        let frame = CallFrame {
            caller: sender,
            kind,
            value: transaction.value(),
            input: transaction.input().clone(),
            gas: gas_limit - intrinsic,
        };
        trace!(
            target: "exec",
            gas = frame.gas,
            "Handing frame to the EVM"
        );
        let result = self.evm.execute(&frame, self.ctx, self.state)?;
        if !result.success {
            self.state.revert_to(snapshot);
        }

        // Refund, capped at the fork-specific fraction of the gas used.
        let mut gas_used = intrinsic + result.gas_used;
        let refund_cap = gas_used / self.spec.refund_quotient(self.ctx.fork);
        let refund = self.state.refund().min(refund_cap);
        gas_used -= refund;

        if !self.free_gas {
            // Unused gas back to the sender at the effective price, the tip
            // to the coinbase, the base-fee share burned by omission.
            let leftover = U256::from(gas_limit - gas_used) * U256::from(effective_gas_price);
            self.state.add_balance(sender, leftover)?;
            let tip_per_gas = effective_gas_price
                - self.ctx.base_fee.map_or(0, |base_fee| base_fee as u128);
            self.state
                .add_balance(self.ctx.coinbase, U256::from(gas_used) * U256::from(tip_per_gas))?;
        }
        gas_pool.credit(gas_limit - gas_used);

        debug!(
            target: "exec",
            gas_used,
            refund,
            success = result.success,
            "Transaction executed"
        );

        // Transient storage and all per-transaction tracking end here,
        // regardless of success.
        self.state.finalize_tx();

        Ok(TransactionOutcome {
            success: result.success,
            gas_used,
            logs: result.logs,
            return_data: result.return_data,
        })
    }

    /// The pre-check chain, in exactly the protocol order. Each failure is
    /// a hard per-transaction error.
    fn pre_check(
        &mut self,
        transaction: &Transaction,
        sender: Address,
        effective_gas_price: u128,
    ) -> TransitionResult<()> {
        let fork = self.ctx.fork;

        // 1. Transaction-type validation.
        if !self.spec.tx_type_enabled(transaction.tx_type(), fork) {
            return Err(InvalidTransaction::TxTypeNotSupported(transaction.tx_type() as u8).into());
        }
        if fork >= Hardfork::Osaka && transaction.blob_versioned_hashes().len() > MAX_BLOBS_PER_TX {
            return Err(InvalidTransaction::TooManyBlobs {
                have: transaction.blob_versioned_hashes().len(),
            }
            .into());
        }

        // 2. Nonce.
        let state_nonce = self.state.get_nonce(sender)?;
        if transaction.nonce() > state_nonce {
            return Err(
                InvalidTransaction::NonceTooHigh { tx: transaction.nonce(), state: state_nonce }
                    .into(),
            );
        }
        if transaction.nonce() < state_nonce {
            return Err(
                InvalidTransaction::NonceTooLow { tx: transaction.nonce(), state: state_nonce }
                    .into(),
            );
        }
        if state_nonce == u64::MAX {
            return Err(InvalidTransaction::NonceOverflow.into());
        }

        // 3. The sender must be an EOA (EIP-3607), modulo an EIP-7702
        // delegation designation.
        let code_hash = self.state.get_code_hash(sender)?;
        if code_hash != KECCAK_EMPTY
            && code_hash != B256::ZERO
            && !self.state.has_delegated_designation(sender)?
        {
            return Err(InvalidTransaction::SenderNoEOA.into());
        }

        // 4. EIP-1559 fee validity.
        if let Some(base_fee) = self.ctx.base_fee {
            if transaction.fee_cap() < transaction.tip_cap() {
                return Err(InvalidTransaction::TipAboveFeeCap.into());
            }
            if !self.free_gas && transaction.fee_cap() < base_fee as u128 {
                return Err(InvalidTransaction::FeeCapTooLow.into());
            }
        }

        // 5. Blob fee.
        if let Some(max_fee_per_blob_gas) = transaction.max_fee_per_blob_gas() {
            let blob_base_fee = self.ctx.blob_base_fee.unwrap_or_default();
            if blob_base_fee > max_fee_per_blob_gas {
                return Err(InvalidTransaction::MaxFeePerBlobGasTooLow.into());
            }
        }

        // 6. Per-transaction gas cap (EIP-7825).
        if fork >= Hardfork::Osaka && transaction.gas_limit() > MAX_TX_GAS_LIMIT {
            return Err(
                InvalidTransaction::GasLimitTooHigh { limit: transaction.gas_limit() }.into()
            );
        }

        // 7. Intrinsic gas.
        let intrinsic = intrinsic_gas(transaction, fork);
        if transaction.gas_limit() < intrinsic {
            return Err(InvalidTransaction::IntrinsicGasTooLow {
                required: intrinsic,
                limit: transaction.gas_limit(),
            }
            .into());
        }

        // 8. Balance check.
        if !self.free_gas {
            let blob_cost = U256::from(transaction.blob_gas())
                * U256::from(self.ctx.blob_base_fee.unwrap_or_default());
            let required = U256::from(transaction.gas_limit())
                * U256::from(effective_gas_price)
                + blob_cost
                + transaction.value();
            let available = self.state.get_balance(sender)?;
            if available < required {
                return Err(InvalidTransaction::InsufficientFunds { required, available }.into());
            }
        }
        Ok(())
    }

    /// Applies EIP-7702 authorizations ahead of execution. Invalid entries
    /// are skipped, not errors: the transaction itself stays valid.
    /// Structural state failures still propagate.
    fn apply_authorizations(&mut self, transaction: &Transaction) -> TransitionResult<()> {
        for authorization in transaction.authorization_list() {
            if let Some(reason) = self.apply_authorization(authorization)? {
                trace!(target: "exec", reason, "Skipping authorization");
            }
        }
        Ok(())
    }

    /// Applies one authorization, returning the skip reason when it does
    /// not take effect.
    fn apply_authorization(
        &mut self,
        authorization: &Authorization,
    ) -> TransitionResult<Option<&'static str>> {
        if authorization.chain_id != 0 && authorization.chain_id != self.ctx.chain_id {
            return Ok(Some("chain id mismatch"));
        }
        if authorization.nonce == u64::MAX {
            return Ok(Some("authority nonce at maximum"));
        }
        let Ok(authority) = authorization.recover_authority() else {
            return Ok(Some("unrecoverable signature"));
        };
        self.state.access_address(authority);

        let existing = self.state.exists(authority)?;
        let code_hash = self.state.get_code_hash(authority)?;
        if code_hash != KECCAK_EMPTY
            && code_hash != B256::ZERO
            && !self.state.has_delegated_designation(authority)?
        {
            return Ok(Some("authority has code"));
        }
        let nonce = self.state.get_nonce(authority)?;
        if nonce != authorization.nonce {
            return Ok(Some("authority nonce mismatch"));
        }

        // Write or clear the delegation designation and bump the authority
        // nonce.
        let code = if authorization.address == Address::ZERO {
            Bytes::new()
        } else {
            let mut designation = stele_primitives::DELEGATION_PREFIX.to_vec();
            designation.extend_from_slice(authorization.address.as_slice());
            designation.into()
        };
        self.state.set_code(authority, code)?;
        self.state.set_nonce(authority, nonce + 1)?;

        if existing {
            self.state.add_refund(PER_EMPTY_ACCOUNT_GAS - PER_AUTH_BASE_GAS);
        }
        Ok(None)
    }
}

/// The address a CREATE deployment lands at:
/// `keccak256(rlp([sender, nonce]))[12..]`.
pub(crate) fn create_address(sender: Address, nonce: u64) -> Address {
    let payload_length = sender.length() + nonce.length();
    let mut out = Vec::with_capacity(payload_length + 1);
    alloy_rlp::Header { list: true, payload_length }.encode(&mut out);
    sender.encode(&mut out);
    nonce.encode(&mut out);
    Address::from_slice(&keccak256(&out)[12..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NoopEvm;
    use rstest::rstest;
    use stele_primitives::{
        Account, TxEip1559, TxEip4844, TxLegacy, TxSignature, MAX_BLOB_GAS_PER_BLOCK,
        TX_BASE_GAS,
    };
    use stele_state::MemoryStateReader;

    const GWEI: u128 = 1_000_000_000;

    fn sender() -> Address {
        Address::repeat_byte(0x51)
    }

    fn ctx(base_fee: Option<u64>) -> BlockContext {
        BlockContext {
            number: 1,
            timestamp: 1,
            gas_limit: 30_000_000,
            coinbase: Address::repeat_byte(0xc0),
            base_fee,
            blob_base_fee: Some(1),
            prev_randao: B256::ZERO,
            chain_id: 1337,
            fork: Hardfork::Osaka,
        }
    }

    fn state_with(balance: u128, nonce: u64) -> IntraBlockState<MemoryStateReader> {
        let mut reader = MemoryStateReader::new();
        reader.insert_account(
            sender(),
            Account { nonce, balance: U256::from(balance), ..Default::default() },
        );
        IntraBlockState::new(reader)
    }

    fn transfer_tx(nonce: u64, gas_price: u128, value: u64) -> TransactionSigned {
        TransactionSigned::new(
            Transaction::Legacy(TxLegacy {
                chain_id: Some(1337),
                nonce,
                gas_price,
                gas_limit: TX_BASE_GAS,
                to: TxKind::Call(Address::repeat_byte(0x99)),
                value: U256::from(value),
                input: Bytes::new(),
            }),
            TxSignature::default(),
        )
    }

    fn run(
        state: &mut IntraBlockState<MemoryStateReader>,
        ctx: &BlockContext,
        tx: &TransactionSigned,
    ) -> TransitionResult<TransactionOutcome> {
        let spec = ChainSpec::dev(1337);
        let mut evm = NoopEvm;
        let mut gas_pool = GasPool::new(ctx.gas_limit);
        let mut blob_gas_pool = BlobGasPool::new(MAX_BLOB_GAS_PER_BLOCK);
        StateTransition::new(&spec, ctx, state, &mut evm).execute_transaction(
            tx,
            sender(),
            &mut gas_pool,
            &mut blob_gas_pool,
        )
    }

    #[rstest]
    #[case::nonce_too_low(4, 5)]
    #[case::nonce_too_high(6, 5)]
    fn test_nonce_mismatch(#[case] tx_nonce: u64, #[case] state_nonce: u64) {
        let ctx = ctx(None);
        let mut state = state_with(10u128.pow(18), state_nonce);
        let result = run(&mut state, &ctx, &transfer_tx(tx_nonce, GWEI, 0));
        match result {
            Err(TransitionError::Invalid(InvalidTransaction::NonceTooLow { tx, state })) => {
                assert_eq!((tx, state), (4, 5));
            }
            Err(TransitionError::Invalid(InvalidTransaction::NonceTooHigh { tx, state })) => {
                assert_eq!((tx, state), (6, 5));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_insufficient_funds_for_gas() {
        let ctx = ctx(None);
        let mut state = state_with(0, 5);
        let result = run(&mut state, &ctx, &transfer_tx(5, GWEI, 0));
        assert!(matches!(
            result,
            Err(TransitionError::Invalid(InvalidTransaction::InsufficientFunds { .. }))
        ));
    }

    #[test]
    fn test_fee_cap_checks() {
        // base fee 50 gwei; tip 200 > cap 100 -> TipAboveFeeCap.
        let ctx = ctx(Some(50 * GWEI as u64));
        let mut state = state_with(10u128.pow(19), 0);
        let tip_above = TransactionSigned::new(
            Transaction::Eip1559(TxEip1559 {
                chain_id: 1337,
                nonce: 0,
                max_priority_fee_per_gas: 200 * GWEI,
                max_fee_per_gas: 100 * GWEI,
                gas_limit: TX_BASE_GAS,
                to: TxKind::Call(Address::ZERO),
                value: U256::ZERO,
                input: Bytes::new(),
                access_list: Default::default(),
            }),
            TxSignature::default(),
        );
        assert!(matches!(
            run(&mut state, &ctx, &tip_above),
            Err(TransitionError::Invalid(InvalidTransaction::TipAboveFeeCap))
        ));

        // tip 2, cap 40 < base 50 -> FeeCapTooLow.
        let cap_low = TransactionSigned::new(
            Transaction::Eip1559(TxEip1559 {
                chain_id: 1337,
                nonce: 0,
                max_priority_fee_per_gas: 2 * GWEI,
                max_fee_per_gas: 40 * GWEI,
                gas_limit: TX_BASE_GAS,
                to: TxKind::Call(Address::ZERO),
                value: U256::ZERO,
                input: Bytes::new(),
                access_list: Default::default(),
            }),
            TxSignature::default(),
        );
        assert!(matches!(
            run(&mut state, &ctx, &cap_low),
            Err(TransitionError::Invalid(InvalidTransaction::FeeCapTooLow))
        ));
    }

    #[test]
    fn test_effective_price_and_tip_payment() {
        // base fee 50 gwei, tip cap 2, fee cap 100: effective price 52,
        // coinbase earns 2 gwei per gas unit.
        let ctx = ctx(Some(50 * GWEI as u64));
        let mut state = state_with(10u128.pow(19), 0);
        let tx = TransactionSigned::new(
            Transaction::Eip1559(TxEip1559 {
                chain_id: 1337,
                nonce: 0,
                max_priority_fee_per_gas: 2 * GWEI,
                max_fee_per_gas: 100 * GWEI,
                gas_limit: TX_BASE_GAS,
                to: TxKind::Call(Address::repeat_byte(9)),
                value: U256::ZERO,
                input: Bytes::new(),
                access_list: Default::default(),
            }),
            TxSignature::default(),
        );
        let outcome = run(&mut state, &ctx, &tx).unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.gas_used, TX_BASE_GAS);

        let coinbase_balance = state.get_balance(ctx.coinbase).unwrap();
        assert_eq!(coinbase_balance, U256::from(TX_BASE_GAS as u128 * 2 * GWEI));

        let spent = U256::from(10u128.pow(19)) - state.get_balance(sender()).unwrap();
        assert_eq!(spent, U256::from(TX_BASE_GAS as u128 * 52 * GWEI));
    }

    #[test]
    fn test_value_transfer_executes() {
        let ctx = ctx(None);
        let mut state = state_with(10u128.pow(18), 0);
        let outcome = run(&mut state, &ctx, &transfer_tx(0, GWEI, 1_000)).unwrap();
        assert!(outcome.success);
        assert_eq!(
            state.get_balance(Address::repeat_byte(0x99)).unwrap(),
            U256::from(1_000u64)
        );
        assert_eq!(state.get_nonce(sender()).unwrap(), 1);
    }

    #[test]
    fn test_gas_limit_exactly_intrinsic_succeeds_with_noop_evm() {
        let ctx = ctx(None);
        let mut state = state_with(10u128.pow(18), 0);
        let outcome = run(&mut state, &ctx, &transfer_tx(0, GWEI, 0)).unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.gas_used, TX_BASE_GAS);
    }

    #[test]
    fn test_intrinsic_gas_too_low() {
        let ctx = ctx(None);
        let mut state = state_with(10u128.pow(18), 0);
        let mut tx = transfer_tx(0, GWEI, 0);
        if let Transaction::Legacy(ref mut legacy) = tx.transaction {
            legacy.gas_limit = TX_BASE_GAS - 1;
        }
        assert!(matches!(
            run(&mut state, &ctx, &tx),
            Err(TransitionError::Invalid(InvalidTransaction::IntrinsicGasTooLow { .. }))
        ));
    }

    #[test]
    fn test_per_tx_gas_cap() {
        let ctx = ctx(None);
        let mut state = state_with(u128::MAX / 2, 0);
        let mut tx = transfer_tx(0, 1, 0);
        if let Transaction::Legacy(ref mut legacy) = tx.transaction {
            legacy.gas_limit = MAX_TX_GAS_LIMIT + 1;
        }
        assert!(matches!(
            run(&mut state, &ctx, &tx),
            Err(TransitionError::Invalid(InvalidTransaction::GasLimitTooHigh { .. }))
        ));
    }

    #[test]
    fn test_blob_fee_too_low() {
        let mut ctx = ctx(Some(1));
        ctx.blob_base_fee = Some(100);
        let mut state = state_with(10u128.pow(19), 0);
        let tx = TransactionSigned::new(
            Transaction::Eip4844(TxEip4844 {
                chain_id: 1337,
                nonce: 0,
                max_priority_fee_per_gas: 1,
                max_fee_per_gas: GWEI,
                gas_limit: TX_BASE_GAS,
                to: Address::repeat_byte(9),
                value: U256::ZERO,
                input: Bytes::new(),
                access_list: Default::default(),
                max_fee_per_blob_gas: 99,
                blob_versioned_hashes: vec![B256::repeat_byte(1)],
            }),
            TxSignature::default(),
        );
        assert!(matches!(
            run(&mut state, &ctx, &tx),
            Err(TransitionError::Invalid(InvalidTransaction::MaxFeePerBlobGasTooLow))
        ));
    }

    #[test]
    fn test_too_many_blobs_post_osaka() {
        let ctx = ctx(Some(1));
        let mut state = state_with(10u128.pow(19), 0);
        let tx = TransactionSigned::new(
            Transaction::Eip4844(TxEip4844 {
                chain_id: 1337,
                nonce: 0,
                max_priority_fee_per_gas: 1,
                max_fee_per_gas: GWEI,
                gas_limit: TX_BASE_GAS,
                to: Address::repeat_byte(9),
                value: U256::ZERO,
                input: Bytes::new(),
                access_list: Default::default(),
                max_fee_per_blob_gas: GWEI,
                blob_versioned_hashes: vec![B256::repeat_byte(1); 7],
            }),
            TxSignature::default(),
        );
        assert!(matches!(
            run(&mut state, &ctx, &tx),
            Err(TransitionError::Invalid(InvalidTransaction::TooManyBlobs { have: 7 }))
        ));
    }

    #[test]
    fn test_block_gas_pool_exhaustion_is_block_invalid() {
        let ctx = ctx(None);
        let mut state = state_with(10u128.pow(19), 0);
        let spec = ChainSpec::dev(1337);
        let mut evm = NoopEvm;
        let mut gas_pool = GasPool::new(TX_BASE_GAS - 1);
        let mut blob_gas_pool = BlobGasPool::new(0);
        let result = StateTransition::new(&spec, &ctx, &mut state, &mut evm)
            .execute_transaction(&transfer_tx(0, GWEI, 0), sender(), &mut gas_pool, &mut blob_gas_pool);
        assert!(matches!(result, Err(TransitionError::GasLimitReached)));
    }

    #[test]
    fn test_create_address_derivation() {
        // Known vector: sender 0x6ac7ea33f8831ea9dcc53393aaa88b25a785dbf0,
        // nonce 0 deploys to 0xcd234a471b72ba2f1ccf0a70fcaba648a5eecd8d.
        let deployer: Address = "0x6ac7ea33f8831ea9dcc53393aaa88b25a785dbf0".parse().unwrap();
        let expected: Address = "0xcd234a471b72ba2f1ccf0a70fcaba648a5eecd8d".parse().unwrap();
        assert_eq!(create_address(deployer, 0), expected);
    }

    #[test]
    fn test_sender_with_code_rejected() {
        let ctx = ctx(None);
        let mut reader = MemoryStateReader::new();
        reader.insert_account(
            sender(),
            Account {
                balance: U256::from(10u128.pow(18)),
                code_hash: B256::repeat_byte(0xee),
                ..Default::default()
            },
        );
        let mut state = IntraBlockState::new(reader);
        assert!(matches!(
            run(&mut state, &ctx, &transfer_tx(0, GWEI, 0)),
            Err(TransitionError::Invalid(InvalidTransaction::SenderNoEOA))
        ));
    }
}
