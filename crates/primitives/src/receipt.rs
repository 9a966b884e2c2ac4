//! Transaction receipts and their canonical (EIP-2718) encoding.

use crate::{Log, TxType};
use alloy_primitives::{Bloom, B256};
use alloy_rlp::{Decodable, Encodable};

/// The outcome field of a receipt: a status bit post-Byzantium, an
/// intermediate state root before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptOutcome {
    /// Post-Byzantium success flag.
    Status(bool),
    /// Pre-Byzantium intermediate state root.
    PostState(B256),
}

impl ReceiptOutcome {
    /// Returns the success flag, treating any pre-Byzantium root as success.
    pub const fn is_success(&self) -> bool {
        match self {
            Self::Status(status) => *status,
            Self::PostState(_) => true,
        }
    }
}

/// A transaction receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// Envelope type of the originating transaction.
    pub tx_type: TxType,
    /// Execution outcome.
    pub outcome: ReceiptOutcome,
    /// Running total of gas used in the block up to and including this
    /// transaction.
    pub cumulative_gas_used: u64,
    /// Bloom over `logs`.
    pub logs_bloom: Bloom,
    /// Logs emitted during execution.
    pub logs: Vec<Log>,
}

impl Receipt {
    fn payload_length(&self) -> usize {
        let outcome_length = match self.outcome {
            ReceiptOutcome::Status(status) => status.length(),
            ReceiptOutcome::PostState(root) => root.length(),
        };
        outcome_length
            + self.cumulative_gas_used.length()
            + self.logs_bloom.length()
            + self.logs.length()
    }

    /// Length of the EIP-2718 receipt envelope.
    pub fn encoded_2718_length(&self) -> usize {
        let payload_length = self.payload_length();
        let list_length = payload_length + alloy_rlp::length_of_length(payload_length);
        match self.tx_type {
            TxType::Legacy => list_length,
            _ => 1 + list_length,
        }
    }

    /// Encodes the EIP-2718 receipt envelope: `rlp([outcome,
    /// cumulative_gas_used, logs_bloom, logs])` with a leading type byte for
    /// typed transactions.
    pub fn encode_2718(&self, out: &mut dyn alloy_rlp::BufMut) {
        if self.tx_type != TxType::Legacy {
            out.put_u8(self.tx_type as u8);
        }
        alloy_rlp::Header { list: true, payload_length: self.payload_length() }.encode(out);
        match self.outcome {
            ReceiptOutcome::Status(status) => status.encode(out),
            ReceiptOutcome::PostState(root) => root.encode(out),
        }
        self.cumulative_gas_used.encode(out);
        self.logs_bloom.encode(out);
        self.logs.encode(out);
    }

    /// Decodes an EIP-2718 receipt envelope.
    pub fn decode_2718(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let tx_type = match buf.first() {
            None => return Err(alloy_rlp::Error::InputTooShort),
            Some(&byte) if byte < 0x80 => {
                let tx_type =
                    TxType::from_byte(byte).ok_or(alloy_rlp::Error::Custom("unknown tx type"))?;
                *buf = &buf[1..];
                tx_type
            }
            Some(_) => TxType::Legacy,
        };
        let header = alloy_rlp::Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        // The outcome is a status bit when encoded in one byte, an
        // intermediate root when encoded as a 32-byte string.
        let outcome = match buf.first() {
            Some(&byte) if byte == 0x80 || byte <= 0x01 => {
                let status: bool = Decodable::decode(buf)?;
                ReceiptOutcome::Status(status)
            }
            _ => ReceiptOutcome::PostState(Decodable::decode(buf)?),
        };
        Ok(Self {
            tx_type,
            outcome,
            cumulative_gas_used: Decodable::decode(buf)?,
            logs_bloom: Decodable::decode(buf)?,
            logs: Decodable::decode(buf)?,
        })
    }
}

/// Encodes a list of receipts for the per-block receipts table.
pub fn encode_receipts(receipts: &[Receipt]) -> Vec<u8> {
    let payload_length: usize = receipts.iter().map(Receipt::encoded_2718_length).sum();
    let mut buf = Vec::with_capacity(payload_length + 4);
    alloy_rlp::Header { list: true, payload_length }.encode(&mut buf);
    for receipt in receipts {
        receipt.encode_2718(&mut buf);
    }
    buf
}

/// Decodes a list of receipts from the per-block receipts table.
///
/// Typed receipt envelopes are stored back to back inside one RLP list, so
/// the element boundary is the envelope itself rather than an RLP string.
pub fn decode_receipts(mut buf: &[u8]) -> alloy_rlp::Result<Vec<Receipt>> {
    let header = alloy_rlp::Header::decode(&mut buf)?;
    if !header.list {
        return Err(alloy_rlp::Error::UnexpectedString);
    }
    let mut receipts = Vec::new();
    while !buf.is_empty() {
        receipts.push(Receipt::decode_2718(&mut buf)?);
    }
    Ok(receipts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs_bloom;
    use alloy_primitives::{Address, Bytes};

    fn sample_receipt(tx_type: TxType) -> Receipt {
        let logs = vec![Log {
            address: Address::repeat_byte(1),
            topics: vec![B256::repeat_byte(2)],
            data: Bytes::from(vec![3, 4]),
        }];
        Receipt {
            tx_type,
            outcome: ReceiptOutcome::Status(true),
            cumulative_gas_used: 21_000,
            logs_bloom: logs_bloom(&logs),
            logs,
        }
    }

    #[test]
    fn test_receipt_roundtrip() {
        for tx_type in [TxType::Legacy, TxType::Eip1559, TxType::Eip4844] {
            let receipt = sample_receipt(tx_type);
            let mut buf = Vec::new();
            receipt.encode_2718(&mut buf);
            assert_eq!(buf.len(), receipt.encoded_2718_length());
            assert_eq!(Receipt::decode_2718(&mut buf.as_slice()).unwrap(), receipt);
        }
    }

    #[test]
    fn test_failed_receipt_roundtrip() {
        let mut receipt = sample_receipt(TxType::Eip1559);
        receipt.outcome = ReceiptOutcome::Status(false);
        let mut buf = Vec::new();
        receipt.encode_2718(&mut buf);
        assert_eq!(Receipt::decode_2718(&mut buf.as_slice()).unwrap(), receipt);
    }

    #[test]
    fn test_pre_byzantium_receipt_roundtrip() {
        let mut receipt = sample_receipt(TxType::Legacy);
        receipt.outcome = ReceiptOutcome::PostState(B256::repeat_byte(0xaa));
        let mut buf = Vec::new();
        receipt.encode_2718(&mut buf);
        assert_eq!(Receipt::decode_2718(&mut buf.as_slice()).unwrap(), receipt);
    }

    #[test]
    fn test_block_receipts_roundtrip() {
        let receipts = vec![sample_receipt(TxType::Legacy), sample_receipt(TxType::Eip1559)];
        let encoded = encode_receipts(&receipts);
        assert_eq!(decode_receipts(&encoded).unwrap(), receipts);
    }
}
