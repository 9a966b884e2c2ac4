//! JSON-RPC query routing.
//!
//! No HTTP framing lives here: [EthApi] maps each supported method onto the
//! chain tables through one consistent read snapshot per request, and
//! [EthApi::dispatch] routes a parsed request to its handler.

use alloy_primitives::{hex, Address, Bytes, TxKind, B256, U256};
use serde_json::{json, Value};
use stele_executor::{BlobGasPool, BlockContext, GasPool, NoopEvm, StateTransition};
use stele_kv::{keys, DbTx, Store, Table};
use stele_primitives::{
    decode_receipts, ChainSpec, Header, Transaction, TransactionSigned, TxLegacy,
    MAX_BLOB_GAS_PER_BLOCK,
};
use stele_stages::{provider, read_progress, StageError, StageId};
use stele_state::IntraBlockState;
use thiserror::Error;

/// RPC-level failures, mapped to JSON-RPC error responses by the caller.
#[derive(Error, Debug)]
pub enum RpcError {
    /// The method is not part of the supported surface.
    #[error("method not found: {0}")]
    UnknownMethod(String),
    /// The request parameters did not parse.
    #[error("invalid params: {0}")]
    InvalidParams(&'static str),
    /// The underlying store failed.
    #[error(transparent)]
    Stage(#[from] StageError),
    /// The simulated call failed validation.
    #[error("execution reverted: {0}")]
    CallFailed(String),
}

/// The eth-namespace query surface over a synced store.
#[derive(Debug)]
pub struct EthApi<S> {
    store: S,
    spec: ChainSpec,
}

impl<S: Store> EthApi<S> {
    /// An API bound to the store and chain spec.
    pub const fn new(store: S, spec: ChainSpec) -> Self {
        Self { store, spec }
    }

    /// Routes one request to its handler.
    pub fn dispatch(&self, method: &str, params: &Value) -> Result<Value, RpcError> {
        match method {
            "eth_chainId" => Ok(hex_u64(self.spec.chain_id)),
            "eth_blockNumber" => self.block_number(),
            "eth_syncing" => self.syncing(),
            "eth_gasPrice" => self.gas_price(),
            "eth_getBlockByNumber" => self.block_by_number(params),
            "eth_getBlockByHash" => self.block_by_hash(params),
            "eth_getBalance" => self.balance(params),
            "eth_getCode" => self.code(params),
            "eth_getStorageAt" => self.storage_at(params),
            "eth_getTransactionByHash" => self.transaction_by_hash(params),
            "eth_getTransactionReceipt" => self.transaction_receipt(params),
            "eth_call" => self.call(params),
            "eth_estimateGas" => self.estimate_gas(params),
            other => Err(RpcError::UnknownMethod(other.to_string())),
        }
    }

    fn head(&self, tx: &S::Tx) -> Result<u64, RpcError> {
        Ok(read_progress(tx, StageId::FINISH)?)
    }

    fn block_number(&self) -> Result<Value, RpcError> {
        let tx = self.store.tx().map_err(StageError::Kv)?;
        Ok(hex_u64(self.head(&tx)?))
    }

    fn syncing(&self) -> Result<Value, RpcError> {
        let tx = self.store.tx().map_err(StageError::Kv)?;
        let current = self.head(&tx)?;
        let highest = read_progress(&tx, StageId::HEADERS)?;
        if current >= highest {
            return Ok(Value::Bool(false));
        }
        Ok(json!({
            "startingBlock": hex_u64(0),
            "currentBlock": hex_u64(current),
            "highestBlock": hex_u64(highest),
        }))
    }

    fn gas_price(&self) -> Result<Value, RpcError> {
        let tx = self.store.tx().map_err(StageError::Kv)?;
        let head = self.head(&tx)?;
        let base_fee = provider::canonical_header(&tx, head)?
            .and_then(|header| header.base_fee_per_gas)
            .unwrap_or(0) as u128;
        // Base fee plus a one-gwei tip suggestion.
        Ok(hex_u128(base_fee + 1_000_000_000))
    }

    /// Resolves a block tag: a hex number, "latest", "earliest" or
    /// "pending" (treated as latest).
    fn resolve_block(&self, tx: &S::Tx, tag: Option<&Value>) -> Result<u64, RpcError> {
        match tag {
            None => self.head(tx),
            Some(Value::String(tag)) => match tag.as_str() {
                "latest" | "pending" | "safe" | "finalized" => self.head(tx),
                "earliest" => Ok(0),
                hex => parse_u64(hex).ok_or(RpcError::InvalidParams("block tag")),
            },
            Some(_) => Err(RpcError::InvalidParams("block tag")),
        }
    }

    fn block_by_number(&self, params: &Value) -> Result<Value, RpcError> {
        let tx = self.store.tx().map_err(StageError::Kv)?;
        let number = self.resolve_block(&tx, params.get(0))?;
        let full = params.get(1).and_then(Value::as_bool).unwrap_or(false);
        self.render_block(&tx, number, full)
    }

    fn block_by_hash(&self, params: &Value) -> Result<Value, RpcError> {
        let tx = self.store.tx().map_err(StageError::Kv)?;
        let hash = parse_b256(params.get(0))?;
        let Some(number) = provider::header_number(&tx, hash)? else {
            return Ok(Value::Null);
        };
        let full = params.get(1).and_then(Value::as_bool).unwrap_or(false);
        self.render_block(&tx, number, full)
    }

    fn render_block(&self, tx: &S::Tx, number: u64, full: bool) -> Result<Value, RpcError> {
        let Some(header) = provider::canonical_header(tx, number)? else {
            return Ok(Value::Null);
        };
        let hash = header.hash_slow();
        let transactions = provider::transactions(tx, number)?;
        let transactions_json: Vec<Value> = if full {
            transactions
                .iter()
                .enumerate()
                .map(|(index, transaction)| render_transaction(transaction, number, index))
                .collect()
        } else {
            transactions
                .iter()
                .map(|transaction| json!(format!("{}", transaction.hash())))
                .collect()
        };
        Ok(render_header(&header, hash, transactions_json))
    }

    fn balance(&self, params: &Value) -> Result<Value, RpcError> {
        let tx = self.store.tx().map_err(StageError::Kv)?;
        let address = parse_address(params.get(0))?;
        let block = self.resolve_block(&tx, params.get(1))?;
        let account = self.account_at(&tx, address, block)?;
        Ok(json!(format!("{:#x}", account.map(|account| account.balance).unwrap_or_default())))
    }

    fn code(&self, params: &Value) -> Result<Value, RpcError> {
        let tx = self.store.tx().map_err(StageError::Kv)?;
        let address = parse_address(params.get(0))?;
        let block = self.resolve_block(&tx, params.get(1))?;
        let code = match self.account_at(&tx, address, block)? {
            Some(account) if !account.has_no_code() => tx
                .get(Table::Code, account.code_hash.as_slice())
                .map_err(StageError::Kv)?
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        Ok(json!(format!("0x{}", hex::encode(code))))
    }

    fn storage_at(&self, params: &Value) -> Result<Value, RpcError> {
        let tx = self.store.tx().map_err(StageError::Kv)?;
        let address = parse_address(params.get(0))?;
        let slot = parse_b256(params.get(1))?;
        let block = self.resolve_block(&tx, params.get(2))?;
        let incarnation =
            self.account_at(&tx, address, block)?.map(|account| account.incarnation).unwrap_or(0);
        let value = provider::historical_storage(&tx, address, incarnation, slot, block)?;
        Ok(json!(format!("{value}")))
    }

    fn account_at(
        &self,
        tx: &S::Tx,
        address: Address,
        block: u64,
    ) -> Result<Option<stele_primitives::Account>, RpcError> {
        let head = self.head(tx)?;
        if block >= head {
            return Ok(provider::plain_account(tx, address)?);
        }
        Ok(provider::historical_account(tx, address, block)?)
    }

    fn transaction_by_hash(&self, params: &Value) -> Result<Value, RpcError> {
        let tx = self.store.tx().map_err(StageError::Kv)?;
        let hash = parse_b256(params.get(0))?;
        let Some((number, index, transaction)) = self.locate_transaction(&tx, hash)? else {
            return Ok(Value::Null);
        };
        Ok(render_transaction(&transaction, number, index))
    }

    fn transaction_receipt(&self, params: &Value) -> Result<Value, RpcError> {
        let tx = self.store.tx().map_err(StageError::Kv)?;
        let hash = parse_b256(params.get(0))?;
        let Some((number, index, transaction)) = self.locate_transaction(&tx, hash)? else {
            return Ok(Value::Null);
        };
        let raw = tx
            .get(Table::BlockReceipts, &keys::block_key(number))
            .map_err(StageError::Kv)?
            .ok_or(StageError::MissingData { block: number, what: "receipts" })?;
        let receipts = decode_receipts(&raw)
            .map_err(|_| StageError::CorruptData { block: number, what: "receipts" })?;
        let receipt =
            receipts.get(index).ok_or(StageError::MissingData { block: number, what: "receipt" })?;
        let previous_cumulative =
            index.checked_sub(1).map_or(0, |prev| receipts[prev].cumulative_gas_used);
        Ok(json!({
            "transactionHash": format!("{hash}"),
            "transactionIndex": hex_u64(index as u64),
            "blockNumber": hex_u64(number),
            "status": match receipt.outcome {
                stele_primitives::ReceiptOutcome::Status(true) => Some("0x1"),
                stele_primitives::ReceiptOutcome::Status(false) => Some("0x0"),
                stele_primitives::ReceiptOutcome::PostState(_) => None,
            },
            "cumulativeGasUsed": hex_u64(receipt.cumulative_gas_used),
            "gasUsed": hex_u64(receipt.cumulative_gas_used - previous_cumulative),
            "logs": receipt.logs.iter().map(|log| json!({
                "address": format!("{}", log.address),
                "topics": log.topics.iter().map(|topic| format!("{topic}")).collect::<Vec<_>>(),
                "data": format!("0x{}", hex::encode(&log.data)),
            })).collect::<Vec<_>>(),
            "from": transaction.recover_sender().map(|sender| format!("{sender}")).ok(),
        }))
    }

    fn locate_transaction(
        &self,
        tx: &S::Tx,
        hash: B256,
    ) -> Result<Option<(u64, usize, TransactionSigned)>, RpcError> {
        let Some(number) = tx
            .get(Table::TxLookup, hash.as_slice())
            .map_err(StageError::Kv)?
            .and_then(|value| keys::decode_block_number(&value))
        else {
            return Ok(None);
        };
        for (index, transaction) in provider::transactions(tx, number)?.into_iter().enumerate() {
            if transaction.hash() == hash {
                return Ok(Some((number, index, transaction)));
            }
        }
        Ok(None)
    }

    /// Simulates a call against the latest state without charging fees.
    fn simulate(&self, params: &Value) -> Result<(bool, Bytes, u64), RpcError> {
        let request = params.get(0).ok_or(RpcError::InvalidParams("call object"))?;
        let from = match request.get("from") {
            Some(value) => parse_address(Some(value))?,
            None => Address::ZERO,
        };
        let to = match request.get("to") {
            Some(value) => TxKind::Call(parse_address(Some(value))?),
            None => TxKind::Create,
        };
        let value = request
            .get("value")
            .and_then(Value::as_str)
            .map(|raw| parse_u256(raw).ok_or(RpcError::InvalidParams("value")))
            .transpose()?
            .unwrap_or_default();
        let input = request
            .get("data")
            .or_else(|| request.get("input"))
            .and_then(Value::as_str)
            .map(|raw| {
                hex::decode(raw.trim_start_matches("0x"))
                    .map_err(|_| RpcError::InvalidParams("data"))
            })
            .transpose()?
            .unwrap_or_default();

        let tx = self.store.tx().map_err(StageError::Kv)?;
        let head = self.head(&tx)?;
        let header = provider::canonical_header(&tx, head)?
            .ok_or(StageError::MissingData { block: head, what: "head header" })?;
        let gas_limit = request
            .get("gas")
            .and_then(Value::as_str)
            .and_then(parse_u64)
            .unwrap_or(header.gas_limit);

        let nonce = provider::plain_account(&tx, from)?.map(|account| account.nonce).unwrap_or(0);
        let call = TransactionSigned::new(
            Transaction::Legacy(TxLegacy {
                chain_id: Some(self.spec.chain_id),
                nonce,
                gas_price: 0,
                gas_limit,
                to,
                value,
                input: input.into(),
            }),
            Default::default(),
        );

        let block_ctx = BlockContext::from_header(&self.spec, &header);
        let mut state = IntraBlockState::new(provider::KvStateReader(&tx));
        let mut evm = NoopEvm;
        let mut gas_pool = GasPool::new(header.gas_limit);
        let mut blob_gas_pool = BlobGasPool::new(MAX_BLOB_GAS_PER_BLOCK);
        let outcome = StateTransition::new(&self.spec, &block_ctx, &mut state, &mut evm)
            .with_free_gas()
            .execute_transaction(&call, from, &mut gas_pool, &mut blob_gas_pool)
            .map_err(|err| RpcError::CallFailed(err.to_string()))?;
        Ok((outcome.success, outcome.return_data, outcome.gas_used))
    }

    fn call(&self, params: &Value) -> Result<Value, RpcError> {
        let (success, return_data, _) = self.simulate(params)?;
        if !success {
            return Err(RpcError::CallFailed("execution reverted".to_string()));
        }
        Ok(json!(format!("0x{}", hex::encode(return_data))))
    }

    fn estimate_gas(&self, params: &Value) -> Result<Value, RpcError> {
        let (_, _, gas_used) = self.simulate(params)?;
        Ok(hex_u64(gas_used))
    }
}

fn render_header(header: &Header, hash: B256, transactions: Vec<Value>) -> Value {
    json!({
        "hash": format!("{hash}"),
        "parentHash": format!("{}", header.parent_hash),
        "stateRoot": format!("{}", header.state_root),
        "transactionsRoot": format!("{}", header.transactions_root),
        "receiptsRoot": format!("{}", header.receipts_root),
        "number": hex_u64(header.number),
        "gasLimit": hex_u64(header.gas_limit),
        "gasUsed": hex_u64(header.gas_used),
        "timestamp": hex_u64(header.timestamp),
        "miner": format!("{}", header.beneficiary),
        "baseFeePerGas": header.base_fee_per_gas.map(hex_u64),
        "extraData": format!("0x{}", hex::encode(&header.extra_data)),
        "transactions": transactions,
    })
}

fn render_transaction(transaction: &TransactionSigned, number: u64, index: usize) -> Value {
    let inner = &transaction.transaction;
    json!({
        "hash": format!("{}", transaction.hash()),
        "blockNumber": hex_u64(number),
        "transactionIndex": hex_u64(index as u64),
        "nonce": hex_u64(inner.nonce()),
        "gas": hex_u64(inner.gas_limit()),
        "gasPrice": hex_u128(inner.fee_cap()),
        "to": match inner.to() {
            TxKind::Call(address) => Some(format!("{address}")),
            TxKind::Create => None,
        },
        "value": format!("{:#x}", inner.value()),
        "input": format!("0x{}", hex::encode(inner.input())),
        "type": hex_u64(inner.tx_type() as u64),
        "from": transaction.recover_sender().map(|sender| format!("{sender}")).ok(),
    })
}

fn hex_u64(value: u64) -> Value {
    json!(format!("{value:#x}"))
}

fn hex_u128(value: u128) -> Value {
    json!(format!("{value:#x}"))
}

fn parse_u64(raw: &str) -> Option<u64> {
    u64::from_str_radix(raw.trim_start_matches("0x"), 16).ok()
}

fn parse_u256(raw: &str) -> Option<U256> {
    U256::from_str_radix(raw.trim_start_matches("0x"), 16).ok()
}

fn parse_address(value: Option<&Value>) -> Result<Address, RpcError> {
    value
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse().ok())
        .ok_or(RpcError::InvalidParams("address"))
}

fn parse_b256(value: Option<&Value>) -> Result<B256, RpcError> {
    value
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse().ok())
        .ok_or(RpcError::InvalidParams("hash"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use stele_kv::MemStore;
    use stele_primitives::{Genesis, GenesisAccount};
    use stele_stages::init_genesis;
    use stele_trie::CommitmentMode;

    fn api() -> EthApi<MemStore> {
        let spec = ChainSpec::dev(1337);
        let store = MemStore::in_memory();
        let mut genesis = Genesis {
            gas_limit: 30_000_000,
            base_fee_per_gas: Some(7),
            ..Default::default()
        };
        genesis.alloc.insert(
            address!("00000000000000000000000000000000000000aa"),
            GenesisAccount { balance: U256::from(1_000_000u64), ..Default::default() },
        );
        init_genesis(&store, &spec, &genesis, CommitmentMode::FullTrie).unwrap();
        EthApi::new(store, spec)
    }

    #[test]
    fn test_chain_id_and_block_number() {
        let api = api();
        assert_eq!(api.dispatch("eth_chainId", &json!([])).unwrap(), json!("0x539"));
        assert_eq!(api.dispatch("eth_blockNumber", &json!([])).unwrap(), json!("0x0"));
    }

    #[test]
    fn test_get_balance_latest() {
        let api = api();
        let result = api
            .dispatch(
                "eth_getBalance",
                &json!(["0x00000000000000000000000000000000000000aa", "latest"]),
            )
            .unwrap();
        assert_eq!(result, json!("0xf4240"));
    }

    #[test]
    fn test_get_block_by_number() {
        let api = api();
        let block = api.dispatch("eth_getBlockByNumber", &json!(["0x0", false])).unwrap();
        assert_eq!(block["number"], json!("0x0"));
        assert!(block["stateRoot"].as_str().unwrap().starts_with("0x"));
        assert_eq!(block["transactions"], json!([]));
    }

    #[test]
    fn test_syncing_is_false_when_caught_up() {
        let api = api();
        assert_eq!(api.dispatch("eth_syncing", &json!([])).unwrap(), json!(false));
    }

    #[test]
    fn test_eth_call_transfer() {
        let api = api();
        let result = api
            .dispatch(
                "eth_call",
                &json!([{
                    "from": "0x00000000000000000000000000000000000000aa",
                    "to": "0x00000000000000000000000000000000000000bb",
                    "value": "0x64",
                }, "latest"]),
            )
            .unwrap();
        assert_eq!(result, json!("0x"));
    }

    #[test]
    fn test_estimate_gas_plain_transfer() {
        let api = api();
        let result = api
            .dispatch(
                "eth_estimateGas",
                &json!([{
                    "from": "0x00000000000000000000000000000000000000aa",
                    "to": "0x00000000000000000000000000000000000000bb",
                }]),
            )
            .unwrap();
        assert_eq!(result, json!("0x5208"));
    }

    #[test]
    fn test_unknown_method() {
        let api = api();
        assert!(matches!(
            api.dispatch("eth_mining", &json!([])),
            Err(RpcError::UnknownMethod(_))
        ));
    }

    #[test]
    fn test_unknown_transaction_is_null() {
        let api = api();
        let result = api
            .dispatch(
                "eth_getTransactionByHash",
                &json!([format!("{}", B256::repeat_byte(9))]),
            )
            .unwrap();
        assert_eq!(result, Value::Null);
    }
}
