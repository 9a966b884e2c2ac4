//! Canonical key encodings.
//!
//! Block numbers are 8-byte big-endian so lexicographic cursor order equals
//! numeric order. Composite keys concatenate fixed-width fields with no
//! length prefixes.

/// Width of an address field.
pub const ADDRESS_LEN: usize = 20;
/// Width of a hash or storage slot field.
pub const HASH_LEN: usize = 32;
/// Width of a block number or incarnation field.
pub const NUM_LEN: usize = 8;

/// `blockNum:8`.
pub fn block_key(number: u64) -> [u8; NUM_LEN] {
    number.to_be_bytes()
}

/// Reads a block number back out of an 8-byte key or value.
pub fn decode_block_number(bytes: &[u8]) -> Option<u64> {
    Some(u64::from_be_bytes(bytes.try_into().ok()?))
}

/// `blockNum:8 ‖ hash:32` for the Headers table.
pub fn num_hash_key(number: u64, hash: &[u8; HASH_LEN]) -> [u8; NUM_LEN + HASH_LEN] {
    let mut key = [0u8; NUM_LEN + HASH_LEN];
    key[..NUM_LEN].copy_from_slice(&number.to_be_bytes());
    key[NUM_LEN..].copy_from_slice(hash);
    key
}

/// `blockNum:8 ‖ txIndex:4` for the Transactions table.
pub fn tx_key(number: u64, index: u32) -> [u8; NUM_LEN + 4] {
    let mut key = [0u8; NUM_LEN + 4];
    key[..NUM_LEN].copy_from_slice(&number.to_be_bytes());
    key[NUM_LEN..].copy_from_slice(&index.to_be_bytes());
    key
}

/// `address:20 ‖ incarnation:8 ‖ slot:32` for plain storage entries.
pub fn plain_storage_key(
    address: &[u8; ADDRESS_LEN],
    incarnation: u64,
    slot: &[u8; HASH_LEN],
) -> [u8; ADDRESS_LEN + NUM_LEN + HASH_LEN] {
    let mut key = [0u8; ADDRESS_LEN + NUM_LEN + HASH_LEN];
    key[..ADDRESS_LEN].copy_from_slice(address);
    key[ADDRESS_LEN..ADDRESS_LEN + NUM_LEN].copy_from_slice(&incarnation.to_be_bytes());
    key[ADDRESS_LEN + NUM_LEN..].copy_from_slice(slot);
    key
}

/// `keccak(address):32 ‖ incarnation:8 ‖ keccak(slot):32` for hashed storage.
pub fn hashed_storage_key(
    hashed_address: &[u8; HASH_LEN],
    incarnation: u64,
    hashed_slot: &[u8; HASH_LEN],
) -> [u8; HASH_LEN + NUM_LEN + HASH_LEN] {
    let mut key = [0u8; HASH_LEN + NUM_LEN + HASH_LEN];
    key[..HASH_LEN].copy_from_slice(hashed_address);
    key[HASH_LEN..HASH_LEN + NUM_LEN].copy_from_slice(&incarnation.to_be_bytes());
    key[HASH_LEN + NUM_LEN..].copy_from_slice(hashed_slot);
    key
}

/// `blockNum:8 ‖ address:20` for the account changeset table.
pub fn account_history_key(
    number: u64,
    address: &[u8; ADDRESS_LEN],
) -> [u8; NUM_LEN + ADDRESS_LEN] {
    let mut key = [0u8; NUM_LEN + ADDRESS_LEN];
    key[..NUM_LEN].copy_from_slice(&number.to_be_bytes());
    key[NUM_LEN..].copy_from_slice(address);
    key
}

/// `blockNum:8 ‖ address:20 ‖ incarnation:8 ‖ slot:32` for the storage
/// changeset table.
pub fn storage_history_key(
    number: u64,
    address: &[u8; ADDRESS_LEN],
    incarnation: u64,
    slot: &[u8; HASH_LEN],
) -> [u8; NUM_LEN + ADDRESS_LEN + NUM_LEN + HASH_LEN] {
    let mut key = [0u8; NUM_LEN + ADDRESS_LEN + NUM_LEN + HASH_LEN];
    key[..NUM_LEN].copy_from_slice(&number.to_be_bytes());
    key[NUM_LEN..NUM_LEN + ADDRESS_LEN].copy_from_slice(address);
    key[NUM_LEN + ADDRESS_LEN..NUM_LEN + ADDRESS_LEN + NUM_LEN]
        .copy_from_slice(&incarnation.to_be_bytes());
    key[NUM_LEN + ADDRESS_LEN + NUM_LEN..].copy_from_slice(slot);
    key
}

/// Splits a plain storage key back into its fields.
pub fn split_plain_storage_key(key: &[u8]) -> Option<([u8; ADDRESS_LEN], u64, [u8; HASH_LEN])> {
    if key.len() != ADDRESS_LEN + NUM_LEN + HASH_LEN {
        return None;
    }
    let address: [u8; ADDRESS_LEN] = key[..ADDRESS_LEN].try_into().ok()?;
    let incarnation = decode_block_number(&key[ADDRESS_LEN..ADDRESS_LEN + NUM_LEN])?;
    let slot: [u8; HASH_LEN] = key[ADDRESS_LEN + NUM_LEN..].try_into().ok()?;
    Some((address, incarnation, slot))
}

/// Splits an account changeset key into block number and address.
pub fn split_account_history_key(key: &[u8]) -> Option<(u64, [u8; ADDRESS_LEN])> {
    if key.len() != NUM_LEN + ADDRESS_LEN {
        return None;
    }
    let number = decode_block_number(&key[..NUM_LEN])?;
    let address: [u8; ADDRESS_LEN] = key[NUM_LEN..].try_into().ok()?;
    Some((number, address))
}

/// Splits a storage changeset key into its fields.
pub fn split_storage_history_key(
    key: &[u8],
) -> Option<(u64, [u8; ADDRESS_LEN], u64, [u8; HASH_LEN])> {
    if key.len() != NUM_LEN + ADDRESS_LEN + NUM_LEN + HASH_LEN {
        return None;
    }
    let number = decode_block_number(&key[..NUM_LEN])?;
    let address: [u8; ADDRESS_LEN] = key[NUM_LEN..NUM_LEN + ADDRESS_LEN].try_into().ok()?;
    let incarnation =
        decode_block_number(&key[NUM_LEN + ADDRESS_LEN..NUM_LEN + ADDRESS_LEN + NUM_LEN])?;
    let slot: [u8; HASH_LEN] = key[NUM_LEN + ADDRESS_LEN + NUM_LEN..].try_into().ok()?;
    Some((number, address, incarnation, slot))
}
