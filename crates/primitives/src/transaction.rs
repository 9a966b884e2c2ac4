//! The transaction envelope: a tagged sum over every supported transaction
//! type with canonical (EIP-2718) encoding and secp256k1 sender recovery.

use crate::{AccessList, Hardfork, GAS_PER_BLOB};
use alloy_primitives::{keccak256, Address, Bytes, Parity, Signature, SignatureError, TxKind, B256, U256};
use alloy_rlp::{Decodable, Encodable, EMPTY_STRING_CODE};

/// Discriminant of the transaction envelope (EIP-2718 type byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TxType {
    /// Untyped pre-2718 transaction.
    Legacy = 0,
    /// EIP-2930 access list transaction.
    Eip2930 = 1,
    /// EIP-1559 dynamic fee transaction.
    Eip1559 = 2,
    /// EIP-4844 blob transaction.
    Eip4844 = 3,
    /// EIP-7702 set-code transaction.
    Eip7702 = 4,
}

impl TxType {
    /// The hardfork at which this transaction type becomes valid.
    pub const fn activation(self) -> Hardfork {
        match self {
            Self::Legacy => Hardfork::Frontier,
            Self::Eip2930 => Hardfork::Berlin,
            Self::Eip1559 => Hardfork::London,
            Self::Eip4844 => Hardfork::Cancun,
            Self::Eip7702 => Hardfork::Prague,
        }
    }

    /// Parses a type byte.
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Legacy),
            1 => Some(Self::Eip2930),
            2 => Some(Self::Eip1559),
            3 => Some(Self::Eip4844),
            4 => Some(Self::Eip7702),
            _ => None,
        }
    }
}

/// A legacy (pre-EIP-2718) transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxLegacy {
    /// EIP-155 chain id, None for pre-155 transactions.
    pub chain_id: Option<u64>,
    /// Sender nonce.
    pub nonce: u64,
    /// Wei per gas unit.
    pub gas_price: u128,
    /// Gas limit.
    pub gas_limit: u64,
    /// Call target or contract creation.
    pub to: TxKind,
    /// Wei transferred.
    pub value: U256,
    /// Calldata or initcode.
    pub input: Bytes,
}

/// An EIP-2930 access list transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxEip2930 {
    /// Chain id.
    pub chain_id: u64,
    /// Sender nonce.
    pub nonce: u64,
    /// Wei per gas unit.
    pub gas_price: u128,
    /// Gas limit.
    pub gas_limit: u64,
    /// Call target or contract creation.
    pub to: TxKind,
    /// Wei transferred.
    pub value: U256,
    /// Calldata or initcode.
    pub input: Bytes,
    /// Pre-declared warm addresses and slots.
    pub access_list: AccessList,
}

/// An EIP-1559 dynamic fee transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxEip1559 {
    /// Chain id.
    pub chain_id: u64,
    /// Sender nonce.
    pub nonce: u64,
    /// Max priority fee per gas (tip cap).
    pub max_priority_fee_per_gas: u128,
    /// Max fee per gas (fee cap).
    pub max_fee_per_gas: u128,
    /// Gas limit.
    pub gas_limit: u64,
    /// Call target or contract creation.
    pub to: TxKind,
    /// Wei transferred.
    pub value: U256,
    /// Calldata or initcode.
    pub input: Bytes,
    /// Pre-declared warm addresses and slots.
    pub access_list: AccessList,
}

/// An EIP-4844 blob transaction. Must be a call; blobs travel in the sidecar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxEip4844 {
    /// Chain id.
    pub chain_id: u64,
    /// Sender nonce.
    pub nonce: u64,
    /// Max priority fee per gas (tip cap).
    pub max_priority_fee_per_gas: u128,
    /// Max fee per gas (fee cap).
    pub max_fee_per_gas: u128,
    /// Gas limit.
    pub gas_limit: u64,
    /// Call target. Blob transactions cannot create contracts.
    pub to: Address,
    /// Wei transferred.
    pub value: U256,
    /// Calldata.
    pub input: Bytes,
    /// Pre-declared warm addresses and slots.
    pub access_list: AccessList,
    /// Max fee per unit of blob gas.
    pub max_fee_per_blob_gas: u128,
    /// KZG versioned hashes of the carried blobs.
    pub blob_versioned_hashes: Vec<B256>,
}

/// An EIP-7702 set-code transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxEip7702 {
    /// Chain id.
    pub chain_id: u64,
    /// Sender nonce.
    pub nonce: u64,
    /// Max priority fee per gas (tip cap).
    pub max_priority_fee_per_gas: u128,
    /// Max fee per gas (fee cap).
    pub max_fee_per_gas: u128,
    /// Gas limit.
    pub gas_limit: u64,
    /// Call target. Set-code transactions cannot create contracts.
    pub to: Address,
    /// Wei transferred.
    pub value: U256,
    /// Calldata.
    pub input: Bytes,
    /// Pre-declared warm addresses and slots.
    pub access_list: AccessList,
    /// Delegation authorizations to apply before execution.
    pub authorization_list: Vec<Authorization>,
}

/// A signed EIP-7702 delegation authorization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Authorization {
    /// Chain id the authorization is valid on; zero means any chain.
    pub chain_id: u64,
    /// Delegation target.
    pub address: Address,
    /// Authority nonce the authorization is bound to.
    pub nonce: u64,
    /// Authority signature over the authorization payload.
    pub signature: TxSignature,
}

/// Domain separator byte for EIP-7702 authorization signing.
const AUTHORIZATION_MAGIC: u8 = 0x05;

impl Authorization {
    /// Hash the authority signed: `keccak256(0x05 || rlp([chain_id, address, nonce]))`.
    pub fn signing_hash(&self) -> B256 {
        let payload_length =
            self.chain_id.length() + self.address.length() + self.nonce.length();
        let mut buf = Vec::with_capacity(payload_length + 4);
        buf.push(AUTHORIZATION_MAGIC);
        alloy_rlp::Header { list: true, payload_length }.encode(&mut buf);
        self.chain_id.encode(&mut buf);
        self.address.encode(&mut buf);
        self.nonce.encode(&mut buf);
        keccak256(&buf)
    }

    /// Recovers the authorizing account.
    pub fn recover_authority(&self) -> Result<Address, SignatureError> {
        self.signature.recover(self.signing_hash())
    }
}

impl Encodable for Authorization {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        let payload_length = self.chain_id.length()
            + self.address.length()
            + self.nonce.length()
            + self.signature.odd_y_parity.length()
            + self.signature.r.length()
            + self.signature.s.length();
        alloy_rlp::Header { list: true, payload_length }.encode(out);
        self.chain_id.encode(out);
        self.address.encode(out);
        self.nonce.encode(out);
        self.signature.odd_y_parity.encode(out);
        self.signature.r.encode(out);
        self.signature.s.encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.chain_id.length()
            + self.address.length()
            + self.nonce.length()
            + self.signature.odd_y_parity.length()
            + self.signature.r.length()
            + self.signature.s.length();
        payload_length + alloy_rlp::length_of_length(payload_length)
    }
}

impl Decodable for Authorization {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = alloy_rlp::Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        Ok(Self {
            chain_id: Decodable::decode(buf)?,
            address: Decodable::decode(buf)?,
            nonce: Decodable::decode(buf)?,
            signature: TxSignature {
                odd_y_parity: Decodable::decode(buf)?,
                r: Decodable::decode(buf)?,
                s: Decodable::decode(buf)?,
            },
        })
    }
}

/// A secp256k1 signature in its consensus form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxSignature {
    /// Parity of the curve point's y coordinate.
    pub odd_y_parity: bool,
    /// The r scalar.
    pub r: U256,
    /// The s scalar.
    pub s: U256,
}

impl TxSignature {
    /// The legacy `v` value for this signature: EIP-155 protected when a chain
    /// id is present, pre-155 (27/28) otherwise.
    pub fn v(&self, chain_id: Option<u64>) -> u64 {
        let parity = self.odd_y_parity as u64;
        match chain_id {
            Some(id) => parity + 35 + id * 2,
            None => parity + 27,
        }
    }

    /// Splits a legacy `v` into parity and chain id.
    pub const fn from_v(v: u64) -> Option<(bool, Option<u64>)> {
        match v {
            27 | 28 => Some((v == 28, None)),
            v if v >= 35 => Some(((v - 35) % 2 == 1, Some((v - 35) / 2))),
            _ => None,
        }
    }

    /// Recovers the signing address over the given prehash.
    pub fn recover(&self, prehash: B256) -> Result<Address, SignatureError> {
        Signature::from_rs_and_parity(self.r, self.s, Parity::Parity(self.odd_y_parity))?
            .recover_address_from_prehash(&prehash)
    }
}

/// The transaction variants, common fields hoisted behind accessors so that
/// fork upgrades surface as exhaustive-match requirements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    /// Untyped pre-2718 transaction.
    Legacy(TxLegacy),
    /// EIP-2930 access list transaction.
    Eip2930(TxEip2930),
    /// EIP-1559 dynamic fee transaction.
    Eip1559(TxEip1559),
    /// EIP-4844 blob transaction.
    Eip4844(TxEip4844),
    /// EIP-7702 set-code transaction.
    Eip7702(TxEip7702),
}

impl Transaction {
    /// The envelope discriminant.
    pub const fn tx_type(&self) -> TxType {
        match self {
            Self::Legacy(_) => TxType::Legacy,
            Self::Eip2930(_) => TxType::Eip2930,
            Self::Eip1559(_) => TxType::Eip1559,
            Self::Eip4844(_) => TxType::Eip4844,
            Self::Eip7702(_) => TxType::Eip7702,
        }
    }

    /// Sender nonce.
    pub const fn nonce(&self) -> u64 {
        match self {
            Self::Legacy(tx) => tx.nonce,
            Self::Eip2930(tx) => tx.nonce,
            Self::Eip1559(tx) => tx.nonce,
            Self::Eip4844(tx) => tx.nonce,
            Self::Eip7702(tx) => tx.nonce,
        }
    }

    /// Gas limit.
    pub const fn gas_limit(&self) -> u64 {
        match self {
            Self::Legacy(tx) => tx.gas_limit,
            Self::Eip2930(tx) => tx.gas_limit,
            Self::Eip1559(tx) => tx.gas_limit,
            Self::Eip4844(tx) => tx.gas_limit,
            Self::Eip7702(tx) => tx.gas_limit,
        }
    }

    /// Call target, or `TxKind::Create` for deployments.
    pub const fn to(&self) -> TxKind {
        match self {
            Self::Legacy(tx) => tx.to,
            Self::Eip2930(tx) => tx.to,
            Self::Eip1559(tx) => tx.to,
            Self::Eip4844(tx) => TxKind::Call(tx.to),
            Self::Eip7702(tx) => TxKind::Call(tx.to),
        }
    }

    /// Wei transferred with the call.
    pub const fn value(&self) -> U256 {
        match self {
            Self::Legacy(tx) => tx.value,
            Self::Eip2930(tx) => tx.value,
            Self::Eip1559(tx) => tx.value,
            Self::Eip4844(tx) => tx.value,
            Self::Eip7702(tx) => tx.value,
        }
    }

    /// Calldata or initcode.
    pub const fn input(&self) -> &Bytes {
        match self {
            Self::Legacy(tx) => &tx.input,
            Self::Eip2930(tx) => &tx.input,
            Self::Eip1559(tx) => &tx.input,
            Self::Eip4844(tx) => &tx.input,
            Self::Eip7702(tx) => &tx.input,
        }
    }

    /// Chain id, None only for pre-EIP-155 legacy transactions.
    pub const fn chain_id(&self) -> Option<u64> {
        match self {
            Self::Legacy(tx) => tx.chain_id,
            Self::Eip2930(tx) => Some(tx.chain_id),
            Self::Eip1559(tx) => Some(tx.chain_id),
            Self::Eip4844(tx) => Some(tx.chain_id),
            Self::Eip7702(tx) => Some(tx.chain_id),
        }
    }

    /// The EIP-2930 access list, if the variant carries one.
    pub const fn access_list(&self) -> Option<&AccessList> {
        match self {
            Self::Legacy(_) => None,
            Self::Eip2930(tx) => Some(&tx.access_list),
            Self::Eip1559(tx) => Some(&tx.access_list),
            Self::Eip4844(tx) => Some(&tx.access_list),
            Self::Eip7702(tx) => Some(&tx.access_list),
        }
    }

    /// Fee cap: `gas_price` for pre-1559 variants, `max_fee_per_gas` after.
    pub const fn fee_cap(&self) -> u128 {
        match self {
            Self::Legacy(tx) => tx.gas_price,
            Self::Eip2930(tx) => tx.gas_price,
            Self::Eip1559(tx) => tx.max_fee_per_gas,
            Self::Eip4844(tx) => tx.max_fee_per_gas,
            Self::Eip7702(tx) => tx.max_fee_per_gas,
        }
    }

    /// Tip cap: `gas_price` for pre-1559 variants, `max_priority_fee_per_gas`
    /// after.
    pub const fn tip_cap(&self) -> u128 {
        match self {
            Self::Legacy(tx) => tx.gas_price,
            Self::Eip2930(tx) => tx.gas_price,
            Self::Eip1559(tx) => tx.max_priority_fee_per_gas,
            Self::Eip4844(tx) => tx.max_priority_fee_per_gas,
            Self::Eip7702(tx) => tx.max_priority_fee_per_gas,
        }
    }

    /// Blob versioned hashes for blob transactions, empty otherwise.
    pub fn blob_versioned_hashes(&self) -> &[B256] {
        match self {
            Self::Eip4844(tx) => &tx.blob_versioned_hashes,
            _ => &[],
        }
    }

    /// Max fee per unit of blob gas, if the variant carries blobs.
    pub const fn max_fee_per_blob_gas(&self) -> Option<u128> {
        match self {
            Self::Eip4844(tx) => Some(tx.max_fee_per_blob_gas),
            _ => None,
        }
    }

    /// Total blob gas consumed by this transaction.
    pub fn blob_gas(&self) -> u64 {
        self.blob_versioned_hashes().len() as u64 * GAS_PER_BLOB
    }

    /// The EIP-7702 authorization list, empty for other variants.
    pub fn authorization_list(&self) -> &[Authorization] {
        match self {
            Self::Eip7702(tx) => &tx.authorization_list,
            _ => &[],
        }
    }

    /// Returns true for contract-creating transactions.
    pub const fn is_create(&self) -> bool {
        matches!(self.to(), TxKind::Create)
    }

    /// Effective gas price under the given base fee: `gas_price` for
    /// pre-1559 variants, `min(tip_cap, fee_cap - base_fee) + base_fee` after.
    pub fn effective_gas_price(&self, base_fee: Option<u64>) -> u128 {
        match base_fee {
            None => self.fee_cap(),
            Some(base_fee) => match self {
                Self::Legacy(tx) => tx.gas_price,
                Self::Eip2930(tx) => tx.gas_price,
                _ => {
                    let base_fee = base_fee as u128;
                    self.tip_cap().min(self.fee_cap().saturating_sub(base_fee)) + base_fee
                }
            },
        }
    }
}

fn encode_tx_kind(kind: TxKind, out: &mut dyn alloy_rlp::BufMut) {
    match kind {
        TxKind::Call(address) => address.encode(out),
        TxKind::Create => out.put_u8(EMPTY_STRING_CODE),
    }
}

const fn tx_kind_length(kind: TxKind) -> usize {
    match kind {
        TxKind::Call(_) => 21,
        TxKind::Create => 1,
    }
}

fn decode_tx_kind(buf: &mut &[u8]) -> alloy_rlp::Result<TxKind> {
    match buf.first() {
        Some(&EMPTY_STRING_CODE) => {
            *buf = &buf[1..];
            Ok(TxKind::Create)
        }
        Some(_) => Ok(TxKind::Call(Address::decode(buf)?)),
        None => Err(alloy_rlp::Error::InputTooShort),
    }
}

macro_rules! sum {
    ($($e:expr),+ $(,)?) => { 0 $(+ $e)+ };
}

impl TxLegacy {
    fn fields_length(&self) -> usize {
        sum!(
            self.nonce.length(),
            self.gas_price.length(),
            self.gas_limit.length(),
            tx_kind_length(self.to),
            self.value.length(),
            self.input.length()
        )
    }

    fn encode_fields(&self, out: &mut dyn alloy_rlp::BufMut) {
        self.nonce.encode(out);
        self.gas_price.encode(out);
        self.gas_limit.encode(out);
        encode_tx_kind(self.to, out);
        self.value.encode(out);
        self.input.encode(out);
    }
}

impl TxEip2930 {
    fn fields_length(&self) -> usize {
        sum!(
            self.chain_id.length(),
            self.nonce.length(),
            self.gas_price.length(),
            self.gas_limit.length(),
            tx_kind_length(self.to),
            self.value.length(),
            self.input.length(),
            self.access_list.length()
        )
    }

    fn encode_fields(&self, out: &mut dyn alloy_rlp::BufMut) {
        self.chain_id.encode(out);
        self.nonce.encode(out);
        self.gas_price.encode(out);
        self.gas_limit.encode(out);
        encode_tx_kind(self.to, out);
        self.value.encode(out);
        self.input.encode(out);
        self.access_list.encode(out);
    }
}

impl TxEip1559 {
    fn fields_length(&self) -> usize {
        sum!(
            self.chain_id.length(),
            self.nonce.length(),
            self.max_priority_fee_per_gas.length(),
            self.max_fee_per_gas.length(),
            self.gas_limit.length(),
            tx_kind_length(self.to),
            self.value.length(),
            self.input.length(),
            self.access_list.length()
        )
    }

    fn encode_fields(&self, out: &mut dyn alloy_rlp::BufMut) {
        self.chain_id.encode(out);
        self.nonce.encode(out);
        self.max_priority_fee_per_gas.encode(out);
        self.max_fee_per_gas.encode(out);
        self.gas_limit.encode(out);
        encode_tx_kind(self.to, out);
        self.value.encode(out);
        self.input.encode(out);
        self.access_list.encode(out);
    }
}

impl TxEip4844 {
    fn fields_length(&self) -> usize {
        sum!(
            self.chain_id.length(),
            self.nonce.length(),
            self.max_priority_fee_per_gas.length(),
            self.max_fee_per_gas.length(),
            self.gas_limit.length(),
            self.to.length(),
            self.value.length(),
            self.input.length(),
            self.access_list.length(),
            self.max_fee_per_blob_gas.length(),
            self.blob_versioned_hashes.length()
        )
    }

    fn encode_fields(&self, out: &mut dyn alloy_rlp::BufMut) {
        self.chain_id.encode(out);
        self.nonce.encode(out);
        self.max_priority_fee_per_gas.encode(out);
        self.max_fee_per_gas.encode(out);
        self.gas_limit.encode(out);
        self.to.encode(out);
        self.value.encode(out);
        self.input.encode(out);
        self.access_list.encode(out);
        self.max_fee_per_blob_gas.encode(out);
        self.blob_versioned_hashes.encode(out);
    }
}

impl TxEip7702 {
    fn fields_length(&self) -> usize {
        sum!(
            self.chain_id.length(),
            self.nonce.length(),
            self.max_priority_fee_per_gas.length(),
            self.max_fee_per_gas.length(),
            self.gas_limit.length(),
            self.to.length(),
            self.value.length(),
            self.input.length(),
            self.access_list.length(),
            self.authorization_list.length()
        )
    }

    fn encode_fields(&self, out: &mut dyn alloy_rlp::BufMut) {
        self.chain_id.encode(out);
        self.nonce.encode(out);
        self.max_priority_fee_per_gas.encode(out);
        self.max_fee_per_gas.encode(out);
        self.gas_limit.encode(out);
        self.to.encode(out);
        self.value.encode(out);
        self.input.encode(out);
        self.access_list.encode(out);
        self.authorization_list.encode(out);
    }
}

impl Transaction {
    fn fields_length(&self) -> usize {
        match self {
            Self::Legacy(tx) => tx.fields_length(),
            Self::Eip2930(tx) => tx.fields_length(),
            Self::Eip1559(tx) => tx.fields_length(),
            Self::Eip4844(tx) => tx.fields_length(),
            Self::Eip7702(tx) => tx.fields_length(),
        }
    }

    fn encode_fields(&self, out: &mut dyn alloy_rlp::BufMut) {
        match self {
            Self::Legacy(tx) => tx.encode_fields(out),
            Self::Eip2930(tx) => tx.encode_fields(out),
            Self::Eip1559(tx) => tx.encode_fields(out),
            Self::Eip4844(tx) => tx.encode_fields(out),
            Self::Eip7702(tx) => tx.encode_fields(out),
        }
    }

    /// Hash the sender signed. Legacy transactions use the EIP-155 payload
    /// when a chain id is present; typed transactions prepend their type byte.
    pub fn signing_hash(&self) -> B256 {
        let mut buf = Vec::new();
        match self {
            Self::Legacy(tx) => {
                let mut payload_length = tx.fields_length();
                if let Some(chain_id) = tx.chain_id {
                    payload_length += chain_id.length() + 2;
                }
                alloy_rlp::Header { list: true, payload_length }.encode(&mut buf);
                tx.encode_fields(&mut buf);
                if let Some(chain_id) = tx.chain_id {
                    chain_id.encode(&mut buf);
                    0u8.encode(&mut buf);
                    0u8.encode(&mut buf);
                }
            }
            _ => {
                buf.push(self.tx_type() as u8);
                let payload_length = self.fields_length();
                alloy_rlp::Header { list: true, payload_length }.encode(&mut buf);
                self.encode_fields(&mut buf);
            }
        }
        keccak256(&buf)
    }
}

/// A transaction with its signature, as stored in block bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionSigned {
    /// The unsigned payload.
    pub transaction: Transaction,
    /// The sender's signature.
    pub signature: TxSignature,
}

impl TransactionSigned {
    /// Constructs a signed transaction.
    pub const fn new(transaction: Transaction, signature: TxSignature) -> Self {
        Self { transaction, signature }
    }

    /// The transaction hash: keccak256 of the EIP-2718 envelope.
    pub fn hash(&self) -> B256 {
        let mut buf = Vec::with_capacity(self.encoded_2718_length());
        self.encode_2718(&mut buf);
        keccak256(&buf)
    }

    /// Recovers the sender address from the signature.
    pub fn recover_sender(&self) -> Result<Address, SignatureError> {
        self.signature.recover(self.transaction.signing_hash())
    }

    fn signed_fields_length(&self) -> usize {
        let signature_length = match &self.transaction {
            Transaction::Legacy(tx) => {
                self.signature.v(tx.chain_id).length()
                    + self.signature.r.length()
                    + self.signature.s.length()
            }
            _ => {
                self.signature.odd_y_parity.length()
                    + self.signature.r.length()
                    + self.signature.s.length()
            }
        };
        self.transaction.fields_length() + signature_length
    }

    /// Length of the EIP-2718 envelope encoding.
    pub fn encoded_2718_length(&self) -> usize {
        let payload_length = self.signed_fields_length();
        let list_length = payload_length + alloy_rlp::length_of_length(payload_length);
        match self.transaction {
            Transaction::Legacy(_) => list_length,
            _ => 1 + list_length,
        }
    }

    /// Encodes the EIP-2718 envelope: a plain RLP list for legacy
    /// transactions, `type || rlp([fields..., y_parity, r, s])` for typed.
    pub fn encode_2718(&self, out: &mut dyn alloy_rlp::BufMut) {
        let payload_length = self.signed_fields_length();
        match &self.transaction {
            Transaction::Legacy(tx) => {
                alloy_rlp::Header { list: true, payload_length }.encode(out);
                tx.encode_fields(out);
                self.signature.v(tx.chain_id).encode(out);
            }
            _ => {
                out.put_u8(self.transaction.tx_type() as u8);
                alloy_rlp::Header { list: true, payload_length }.encode(out);
                self.transaction.encode_fields(out);
                self.signature.odd_y_parity.encode(out);
            }
        }
        self.signature.r.encode(out);
        self.signature.s.encode(out);
    }

    /// Decodes an EIP-2718 envelope.
    pub fn decode_2718(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        match buf.first() {
            None => Err(alloy_rlp::Error::InputTooShort),
            Some(&byte) if byte >= EMPTY_STRING_CODE => Self::decode_legacy(buf),
            Some(&byte) => {
                let tx_type =
                    TxType::from_byte(byte).ok_or(alloy_rlp::Error::Custom("unknown tx type"))?;
                *buf = &buf[1..];
                Self::decode_typed(tx_type, buf)
            }
        }
    }

    fn decode_legacy(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = alloy_rlp::Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        let mut tx = TxLegacy {
            chain_id: None,
            nonce: Decodable::decode(buf)?,
            gas_price: Decodable::decode(buf)?,
            gas_limit: Decodable::decode(buf)?,
            to: decode_tx_kind(buf)?,
            value: Decodable::decode(buf)?,
            input: Decodable::decode(buf)?,
        };
        let v: u64 = Decodable::decode(buf)?;
        let (odd_y_parity, chain_id) =
            TxSignature::from_v(v).ok_or(alloy_rlp::Error::Custom("invalid v"))?;
        tx.chain_id = chain_id;
        let signature = TxSignature {
            odd_y_parity,
            r: Decodable::decode(buf)?,
            s: Decodable::decode(buf)?,
        };
        Ok(Self::new(Transaction::Legacy(tx), signature))
    }

    fn decode_typed(tx_type: TxType, buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = alloy_rlp::Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        let transaction = match tx_type {
            TxType::Legacy => return Err(alloy_rlp::Error::Custom("legacy type byte")),
            TxType::Eip2930 => Transaction::Eip2930(TxEip2930 {
                chain_id: Decodable::decode(buf)?,
                nonce: Decodable::decode(buf)?,
                gas_price: Decodable::decode(buf)?,
                gas_limit: Decodable::decode(buf)?,
                to: decode_tx_kind(buf)?,
                value: Decodable::decode(buf)?,
                input: Decodable::decode(buf)?,
                access_list: Decodable::decode(buf)?,
            }),
            TxType::Eip1559 => Transaction::Eip1559(TxEip1559 {
                chain_id: Decodable::decode(buf)?,
                nonce: Decodable::decode(buf)?,
                max_priority_fee_per_gas: Decodable::decode(buf)?,
                max_fee_per_gas: Decodable::decode(buf)?,
                gas_limit: Decodable::decode(buf)?,
                to: decode_tx_kind(buf)?,
                value: Decodable::decode(buf)?,
                input: Decodable::decode(buf)?,
                access_list: Decodable::decode(buf)?,
            }),
            TxType::Eip4844 => Transaction::Eip4844(TxEip4844 {
                chain_id: Decodable::decode(buf)?,
                nonce: Decodable::decode(buf)?,
                max_priority_fee_per_gas: Decodable::decode(buf)?,
                max_fee_per_gas: Decodable::decode(buf)?,
                gas_limit: Decodable::decode(buf)?,
                to: Decodable::decode(buf)?,
                value: Decodable::decode(buf)?,
                input: Decodable::decode(buf)?,
                access_list: Decodable::decode(buf)?,
                max_fee_per_blob_gas: Decodable::decode(buf)?,
                blob_versioned_hashes: Decodable::decode(buf)?,
            }),
            TxType::Eip7702 => Transaction::Eip7702(TxEip7702 {
                chain_id: Decodable::decode(buf)?,
                nonce: Decodable::decode(buf)?,
                max_priority_fee_per_gas: Decodable::decode(buf)?,
                max_fee_per_gas: Decodable::decode(buf)?,
                gas_limit: Decodable::decode(buf)?,
                to: Decodable::decode(buf)?,
                value: Decodable::decode(buf)?,
                input: Decodable::decode(buf)?,
                access_list: Decodable::decode(buf)?,
                authorization_list: Decodable::decode(buf)?,
            }),
        };
        let signature = TxSignature {
            odd_y_parity: Decodable::decode(buf)?,
            r: Decodable::decode(buf)?,
            s: Decodable::decode(buf)?,
        };
        Ok(Self::new(transaction, signature))
    }
}

impl Encodable for TransactionSigned {
    /// Block-body form: legacy transactions are plain RLP lists, typed ones
    /// are RLP strings wrapping the 2718 envelope.
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        match self.transaction {
            Transaction::Legacy(_) => self.encode_2718(out),
            _ => {
                let envelope_length = self.encoded_2718_length();
                alloy_rlp::Header { list: false, payload_length: envelope_length }.encode(out);
                self.encode_2718(out);
            }
        }
    }

    fn length(&self) -> usize {
        match self.transaction {
            Transaction::Legacy(_) => self.encoded_2718_length(),
            _ => {
                let envelope_length = self.encoded_2718_length();
                envelope_length + alloy_rlp::length_of_length(envelope_length)
            }
        }
    }
}

impl Decodable for TransactionSigned {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        match buf.first() {
            None => Err(alloy_rlp::Error::InputTooShort),
            // A list header means an untyped legacy transaction.
            Some(&byte) if byte >= 0xc0 => Self::decode_legacy(buf),
            Some(_) => {
                let header = alloy_rlp::Header::decode(buf)?;
                if header.list {
                    return Err(alloy_rlp::Error::UnexpectedList);
                }
                let (mut envelope, rest) = buf.split_at(header.payload_length);
                let tx = Self::decode_2718(&mut envelope)?;
                if !envelope.is_empty() {
                    return Err(alloy_rlp::Error::UnexpectedLength);
                }
                *buf = rest;
                Ok(tx)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AccessListItem;
    use k256::ecdsa::SigningKey;

    fn sign(transaction: Transaction, key: &SigningKey) -> TransactionSigned {
        let hash = transaction.signing_hash();
        let (sig, recovery_id) = key.sign_prehash_recoverable(hash.as_slice()).unwrap();
        let signature = TxSignature {
            odd_y_parity: recovery_id.is_y_odd(),
            r: U256::from_be_slice(&sig.r().to_bytes()),
            s: U256::from_be_slice(&sig.s().to_bytes()),
        };
        TransactionSigned::new(transaction, signature)
    }

    fn signer() -> (SigningKey, Address) {
        let key = SigningKey::from_slice(&[0x42; 32]).unwrap();
        let address = Address::from_raw_public_key(
            &key.verifying_key().to_encoded_point(false).as_bytes()[1..],
        );
        (key, address)
    }

    fn sample_1559() -> Transaction {
        Transaction::Eip1559(TxEip1559 {
            chain_id: 1,
            nonce: 3,
            max_priority_fee_per_gas: 2_000_000_000,
            max_fee_per_gas: 100_000_000_000,
            gas_limit: 21_000,
            to: TxKind::Call(Address::repeat_byte(0x11)),
            value: U256::from(1_000u64),
            input: Bytes::new(),
            access_list: AccessList::default(),
        })
    }

    #[test]
    fn test_recover_sender() {
        let (key, address) = signer();
        let signed = sign(sample_1559(), &key);
        assert_eq!(signed.recover_sender().unwrap(), address);
    }

    #[test]
    fn test_legacy_eip155_recover() {
        let (key, address) = signer();
        let tx = Transaction::Legacy(TxLegacy {
            chain_id: Some(1),
            nonce: 0,
            gas_price: 20_000_000_000,
            gas_limit: 21_000,
            to: TxKind::Call(Address::repeat_byte(0x22)),
            value: U256::from(5u64),
            input: Bytes::new(),
        });
        let signed = sign(tx, &key);
        assert!(signed.signature.v(Some(1)) >= 37);
        assert_eq!(signed.recover_sender().unwrap(), address);
    }

    #[test]
    fn test_envelope_roundtrip_all_types() {
        let (key, _) = signer();
        let txs = vec![
            Transaction::Legacy(TxLegacy {
                chain_id: None,
                nonce: 9,
                gas_price: 1,
                gas_limit: 21_000,
                to: TxKind::Create,
                value: U256::ZERO,
                input: Bytes::from(vec![1, 2, 3]),
            }),
            Transaction::Eip2930(TxEip2930 {
                chain_id: 1,
                nonce: 1,
                gas_price: 10,
                gas_limit: 50_000,
                to: TxKind::Call(Address::repeat_byte(3)),
                value: U256::from(7u64),
                input: Bytes::new(),
                access_list: AccessList(vec![AccessListItem {
                    address: Address::repeat_byte(4),
                    storage_keys: vec![B256::repeat_byte(5)],
                }]),
            }),
            sample_1559(),
            Transaction::Eip4844(TxEip4844 {
                chain_id: 1,
                nonce: 2,
                max_priority_fee_per_gas: 1,
                max_fee_per_gas: 2,
                gas_limit: 21_000,
                to: Address::repeat_byte(6),
                value: U256::ZERO,
                input: Bytes::new(),
                access_list: AccessList::default(),
                max_fee_per_blob_gas: 1,
                blob_versioned_hashes: vec![B256::repeat_byte(1)],
            }),
            Transaction::Eip7702(TxEip7702 {
                chain_id: 1,
                nonce: 4,
                max_priority_fee_per_gas: 1,
                max_fee_per_gas: 2,
                gas_limit: 60_000,
                to: Address::repeat_byte(7),
                value: U256::ZERO,
                input: Bytes::new(),
                access_list: AccessList::default(),
                authorization_list: vec![Authorization {
                    chain_id: 1,
                    address: Address::repeat_byte(8),
                    nonce: 0,
                    signature: TxSignature {
                        odd_y_parity: false,
                        r: U256::from(1u64),
                        s: U256::from(2u64),
                    },
                }],
            }),
        ];
        for tx in txs {
            let signed = sign(tx, &key);
            let mut buf = Vec::new();
            signed.encode_2718(&mut buf);
            assert_eq!(buf.len(), signed.encoded_2718_length());
            let decoded = TransactionSigned::decode_2718(&mut buf.as_slice()).unwrap();
            assert_eq!(decoded, signed);

            // Body form roundtrip.
            let mut body_buf = Vec::new();
            signed.encode(&mut body_buf);
            assert_eq!(body_buf.len(), signed.length());
            let decoded = TransactionSigned::decode(&mut body_buf.as_slice()).unwrap();
            assert_eq!(decoded, signed);
        }
    }

    #[test]
    fn test_effective_gas_price() {
        let gwei = 1_000_000_000u128;
        let tx = Transaction::Eip1559(TxEip1559 {
            max_priority_fee_per_gas: 2 * gwei,
            max_fee_per_gas: 100 * gwei,
            ..Default::default()
        });
        assert_eq!(tx.effective_gas_price(Some(50_000_000_000)), 52 * gwei);
    }

    #[test]
    fn test_authorization_recover() {
        let (key, address) = signer();
        let mut auth =
            Authorization { chain_id: 1, address: Address::repeat_byte(9), nonce: 1, ..Default::default() };
        let (sig, recovery_id) =
            key.sign_prehash_recoverable(auth.signing_hash().as_slice()).unwrap();
        auth.signature = TxSignature {
            odd_y_parity: recovery_id.is_y_odd(),
            r: U256::from_be_slice(&sig.r().to_bytes()),
            s: U256::from_be_slice(&sig.s().to_bytes()),
        };
        assert_eq!(auth.recover_authority().unwrap(), address);
    }
}
