//! Typed access to the chain tables, shared by the stages, genesis
//! initialisation and the RPC query surface.

use crate::StageError;
use alloy_primitives::{Address, Bytes, B256};
use alloy_rlp::{Decodable, Encodable};
use stele_kv::{keys, DbCursor, DbTx, DbTxMut, Table};
use stele_primitives::{Account, Header, TransactionSigned, Withdrawal};
use stele_state::{StateError, StateReader, StateResult};
use stele_trie::{TrieProvider, TrieResult};

/// The per-block body envelope stored in [Table::Bodies]. Transactions live
/// in [Table::Transactions] under their own keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredBody {
    /// Number of transactions in the block.
    pub tx_count: u32,
    /// Ommer headers.
    pub ommers: Vec<Header>,
    /// Withdrawals, post-Shanghai.
    pub withdrawals: Option<Vec<Withdrawal>>,
}

impl StoredBody {
    fn payload_length(&self) -> usize {
        let mut length = self.tx_count.length() + self.ommers.length();
        if let Some(withdrawals) = &self.withdrawals {
            length += withdrawals.length();
        }
        length
    }
}

impl Encodable for StoredBody {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        alloy_rlp::Header { list: true, payload_length: self.payload_length() }.encode(out);
        self.tx_count.encode(out);
        self.ommers.encode(out);
        if let Some(withdrawals) = &self.withdrawals {
            withdrawals.encode(out);
        }
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + alloy_rlp::length_of_length(payload_length)
    }
}

impl Decodable for StoredBody {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = alloy_rlp::Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        let started_len = buf.len();
        let tx_count = Decodable::decode(buf)?;
        let ommers = Decodable::decode(buf)?;
        let withdrawals = if started_len - buf.len() < header.payload_length {
            Some(Decodable::decode(buf)?)
        } else {
            None
        };
        Ok(Self { tx_count, ommers, withdrawals })
    }
}

// ----- headers -----

/// The canonical hash of a block number, if assigned.
pub fn canonical_hash(tx: &impl DbTx, number: u64) -> Result<Option<B256>, StageError> {
    Ok(tx
        .get(Table::CanonicalHashes, &keys::block_key(number))?
        .map(|value| B256::from_slice(&value)))
}

/// The canonical hash of a block number; missing rows are an integrity
/// error.
pub fn expect_canonical_hash(tx: &impl DbTx, number: u64) -> Result<B256, StageError> {
    canonical_hash(tx, number)?
        .ok_or(StageError::MissingData { block: number, what: "canonical hash" })
}

/// The header stored under `(number, hash)`.
pub fn header(tx: &impl DbTx, number: u64, hash: B256) -> Result<Option<Header>, StageError> {
    tx.get(Table::Headers, &keys::num_hash_key(number, &hash.0))?
        .map(|value| {
            Header::decode(&mut value.as_slice())
                .map_err(|e| { eprintln!("DEBUG header decode err: {:?} bytes={:?}", e, value); StageError::CorruptData { block: number, what: "header" }})
        })
        .transpose()
}

/// The canonical header at `number`.
pub fn canonical_header(tx: &impl DbTx, number: u64) -> Result<Option<Header>, StageError> {
    match canonical_hash(tx, number)? {
        None => Ok(None),
        Some(hash) => header(tx, number, hash),
    }
}

/// The canonical header at `number`; missing rows are an integrity error.
pub fn expect_canonical_header(tx: &impl DbTx, number: u64) -> Result<Header, StageError> {
    canonical_header(tx, number)?
        .ok_or(StageError::MissingData { block: number, what: "canonical header" })
}

/// The block number a header hash belongs to.
pub fn header_number(tx: &impl DbTx, hash: B256) -> Result<Option<u64>, StageError> {
    Ok(tx
        .get(Table::HeaderNumbers, hash.as_slice())?
        .and_then(|value| keys::decode_block_number(&value)))
}

/// Stores a header under `(number, hash)` and marks it canonical.
pub fn put_canonical_header(
    tx: &mut impl DbTxMut,
    header: &Header,
    hash: B256,
) -> Result<(), StageError> {
    let mut encoded = Vec::with_capacity(header.length());
    header.encode(&mut encoded);
    tx.put(Table::Headers, &keys::num_hash_key(header.number, &hash.0), &encoded)?;
    tx.put(Table::CanonicalHashes, &keys::block_key(header.number), hash.as_slice())?;
    Ok(())
}

// ----- bodies and transactions -----

/// The stored body envelope of a block.
pub fn body(tx: &impl DbTx, number: u64) -> Result<Option<StoredBody>, StageError> {
    tx.get(Table::Bodies, &keys::block_key(number))?
        .map(|value| {
            StoredBody::decode(&mut value.as_slice())
                .map_err(|_| StageError::CorruptData { block: number, what: "body" })
        })
        .transpose()
}

/// Stores a block body: the envelope row plus one transaction row per
/// transaction.
pub fn put_body(
    tx: &mut impl DbTxMut,
    number: u64,
    transactions: &[TransactionSigned],
    ommers: Vec<Header>,
    withdrawals: Option<Vec<Withdrawal>>,
) -> Result<(), StageError> {
    let stored =
        StoredBody { tx_count: transactions.len() as u32, ommers, withdrawals };
    let mut encoded = Vec::with_capacity(stored.length());
    stored.encode(&mut encoded);
    tx.put(Table::Bodies, &keys::block_key(number), &encoded)?;
    for (index, transaction) in transactions.iter().enumerate() {
        let mut envelope = Vec::with_capacity(transaction.encoded_2718_length());
        transaction.encode_2718(&mut envelope);
        tx.put(Table::Transactions, &keys::tx_key(number, index as u32), &envelope)?;
    }
    Ok(())
}

/// The raw transaction envelopes of a block, in index order.
pub fn raw_transactions(tx: &impl DbTx, number: u64) -> Result<Vec<Vec<u8>>, StageError> {
    let mut envelopes = Vec::new();
    let mut cursor = tx.cursor(Table::Transactions)?;
    let prefix = keys::block_key(number);
    let mut entry = cursor.seek(&keys::tx_key(number, 0))?;
    while let Some((key, value)) = entry {
        if !key.starts_with(&prefix) {
            break;
        }
        envelopes.push(value);
        entry = cursor.next()?;
    }
    Ok(envelopes)
}

/// The decoded transactions of a block, in index order.
pub fn transactions(tx: &impl DbTx, number: u64) -> Result<Vec<TransactionSigned>, StageError> {
    raw_transactions(tx, number)?
        .into_iter()
        .map(|envelope| {
            TransactionSigned::decode_2718(&mut envelope.as_slice())
                .map_err(|_| StageError::CorruptData { block: number, what: "transaction" })
        })
        .collect()
}

// ----- senders -----

/// The recovered senders of a block, one address per transaction.
pub fn senders(tx: &impl DbTx, number: u64) -> Result<Option<Vec<Address>>, StageError> {
    Ok(tx.get(Table::Senders, &keys::block_key(number))?.map(|value| {
        value.chunks_exact(keys::ADDRESS_LEN).map(Address::from_slice).collect()
    }))
}

/// Stores a block's senders as concatenated addresses in index order.
pub fn put_senders(
    tx: &mut impl DbTxMut,
    number: u64,
    senders: &[Address],
) -> Result<(), StageError> {
    let mut concatenated = Vec::with_capacity(senders.len() * keys::ADDRESS_LEN);
    for sender in senders {
        concatenated.extend_from_slice(sender.as_slice());
    }
    tx.put(Table::Senders, &keys::block_key(number), &concatenated)?;
    Ok(())
}

// ----- plain state -----

/// The committed account at `address`.
pub fn plain_account(tx: &impl DbTx, address: Address) -> Result<Option<Account>, StageError> {
    tx.get(Table::PlainState, address.as_slice())?
        .map(|value| {
            Account::decode(&value)
                .map_err(|_| StageError::CorruptData { block: 0, what: "account" })
        })
        .transpose()
}

// ----- range deletion -----

/// Deletes every entry of a block-indexed table with block number above
/// `unwind_to`.
pub fn unwind_table_above(
    tx: &mut impl DbTxMut,
    table: Table,
    unwind_to: u64,
) -> Result<usize, StageError> {
    debug_assert!(table.block_indexed(), "{table} is not block indexed");
    let mut doomed = Vec::new();
    {
        let mut cursor = tx.cursor(table)?;
        let mut entry = cursor.seek(&keys::block_key(unwind_to + 1))?;
        while let Some((key, _)) = entry {
            doomed.push(key);
            entry = cursor.next()?;
        }
    }
    let count = doomed.len();
    for key in doomed {
        tx.delete(table, &key)?;
    }
    Ok(count)
}

// ----- adapters -----

/// [StateReader] over a store transaction: plain state, plain storage and
/// the code table.
#[derive(Debug)]
pub struct KvStateReader<'a, T>(pub &'a T);

impl<T: DbTx> StateReader for KvStateReader<'_, T> {
    fn account(&self, address: &Address) -> StateResult<Option<Account>> {
        self.0
            .get(Table::PlainState, address.as_slice())
            .map_err(|err| StateError::Database(err.to_string()))?
            .map(|value| Account::decode(&value).map_err(StateError::Rlp))
            .transpose()
    }

    fn storage(&self, address: &Address, incarnation: u64, slot: &B256) -> StateResult<B256> {
        let key = keys::plain_storage_key(&address.0 .0, incarnation, &slot.0);
        Ok(self
            .0
            .get(Table::PlainState, &key)
            .map_err(|err| StateError::Database(err.to_string()))?
            .map(|value| B256::from_slice(&value))
            .unwrap_or(B256::ZERO))
    }

    fn code(&self, code_hash: &B256) -> StateResult<Bytes> {
        Ok(self
            .0
            .get(Table::Code, code_hash.as_slice())
            .map_err(|err| StateError::Database(err.to_string()))?
            .map(Bytes::from)
            .unwrap_or_default())
    }
}

/// [TrieProvider] over the persisted interior-node table.
#[derive(Debug)]
pub struct KvTrieProvider<'a, T>(pub &'a T);

impl<T: DbTx> TrieProvider for KvTrieProvider<'_, T> {
    fn trie_node(&self, commitment: B256) -> TrieResult<Option<Vec<u8>>> {
        self.0
            .get(Table::TrieNodes, commitment.as_slice())
            .map_err(|err| stele_trie::TrieError::Provider(err.to_string()))
    }
}

// ----- history -----

/// The account state as of `block`, reconstructed from the changesets: the
/// earliest changeset entry above `block` carries the value that held at
/// `block`; with none, the current plain state applies.
pub fn historical_account(
    tx: &impl DbTx,
    address: Address,
    block: u64,
) -> Result<Option<Account>, StageError> {
    let mut cursor = tx.cursor(Table::AccountsHistory)?;
    let mut entry = cursor.seek(&keys::block_key(block + 1))?;
    while let Some((key, value)) = entry {
        if let Some((_, entry_address)) = keys::split_account_history_key(&key) {
            if entry_address == address.0 .0 {
                if value.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(Account::decode(&value).map_err(|_| {
                    StageError::CorruptData { block, what: "account changeset" }
                })?));
            }
        }
        entry = cursor.next()?;
    }
    plain_account(tx, address)
}

/// The storage slot value as of `block`, reconstructed like
/// [historical_account].
pub fn historical_storage(
    tx: &impl DbTx,
    address: Address,
    incarnation: u64,
    slot: B256,
    block: u64,
) -> Result<B256, StageError> {
    let mut cursor = tx.cursor(Table::StorageHistory)?;
    let mut entry = cursor.seek(&keys::block_key(block + 1))?;
    while let Some((key, value)) = entry {
        if let Some((_, entry_address, entry_incarnation, entry_slot)) =
            keys::split_storage_history_key(&key)
        {
            if entry_address == address.0 .0
                && entry_incarnation == incarnation
                && entry_slot == slot.0
            {
                return Ok(B256::from_slice(&value));
            }
        }
        entry = cursor.next()?;
    }
    let reader = KvStateReader(tx);
    reader
        .storage(&address, incarnation, &slot)
        .map_err(|err| StageError::State(err))
}
