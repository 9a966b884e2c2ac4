//! EIP-2929 warm/cold tracking.

use alloy_primitives::{
    map::{HashMap, HashSet},
    Address, B256,
};
use stele_primitives::{
    COLD_ACCOUNT_ACCESS_GAS, COLD_SLOAD_GAS, WARM_ACCOUNT_ACCESS_GAS, WARM_SLOAD_GAS,
};

/// The per-transaction access list: warm addresses and warm slots, tracked
/// separately so an address can be warm while its slots are still unknown.
#[derive(Debug, Default)]
pub struct AccessListState {
    addresses: HashSet<Address>,
    slots: HashMap<Address, HashSet<B256>>,
}

impl AccessListState {
    /// Marks an address warm, reporting whether it was cold before.
    pub fn add_address(&mut self, address: Address) -> bool {
        self.addresses.insert(address)
    }

    /// Marks a slot warm, reporting whether it was cold before.
    pub fn add_slot(&mut self, address: Address, slot: B256) -> bool {
        self.slots.entry(address).or_default().insert(slot)
    }

    /// Whether the address is warm.
    pub fn contains_address(&self, address: &Address) -> bool {
        self.addresses.contains(address)
    }

    /// Whether the slot is warm.
    pub fn contains_slot(&self, address: &Address, slot: &B256) -> bool {
        self.slots.get(address).is_some_and(|slots| slots.contains(slot))
    }

    /// Removes an address from the warm set (journal undo).
    pub(crate) fn remove_address(&mut self, address: &Address) {
        self.addresses.remove(address);
    }

    /// Removes a slot from the warm set (journal undo).
    pub(crate) fn remove_slot(&mut self, address: &Address, slot: &B256) {
        if let Some(slots) = self.slots.get_mut(address) {
            slots.remove(slot);
            if slots.is_empty() {
                self.slots.remove(address);
            }
        }
    }

    /// Drops all warm entries (transaction boundary).
    pub(crate) fn clear(&mut self) {
        self.addresses.clear();
        self.slots.clear();
    }

    /// The EIP-2929 gas cost of an address access.
    pub const fn address_access_gas(cold: bool) -> u64 {
        if cold {
            COLD_ACCOUNT_ACCESS_GAS
        } else {
            WARM_ACCOUNT_ACCESS_GAS
        }
    }

    /// The EIP-2929 gas cost of a slot access.
    pub const fn slot_access_gas(cold: bool) -> u64 {
        if cold {
            COLD_SLOAD_GAS
        } else {
            WARM_SLOAD_GAS
        }
    }
}
