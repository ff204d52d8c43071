//! Contract storage
//!
//! Storage is versioned per slot: the identity is the `(contract, slot)`
//! pair, so two slots of one contract supersede independently. Each version
//! keeps the value it replaced, filled in under the slot's writer lock, so a
//! consumer can apply or revert one version without reading its predecessor.
//! A `None` value is a cleared slot; the slot keeps versioning.

use super::fact::{Catalog, Version, VersionedFact};
use chainstate_core::{
    Bytes, ContractId, IdentityKey, Payload, RowSnapshot, Slot, StoreResult, Table, Timestamp,
};
use serde_json::Value;

/// Identity of one storage slot
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotKey {
    /// Contract owning the slot
    pub contract: ContractId,
    /// Slot index
    pub slot: Slot,
}

impl SlotKey {
    /// Key for `slot` of `contract`
    pub fn new(contract: ContractId, slot: impl Into<Slot>) -> Self {
        SlotKey {
            contract,
            slot: slot.into(),
        }
    }
}

impl IdentityKey for SlotKey {
    fn key_string(&self) -> String {
        format!("{}/{}", self.contract, self.slot)
    }

    fn write_fields(&self, row: &mut RowSnapshot) {
        row.set("contract", self.contract.address())
            .set("slot", &self.slot);
    }

    fn from_row(row: &RowSnapshot) -> StoreResult<Self> {
        Ok(SlotKey {
            contract: ContractId::from_row(row)?,
            slot: row.decode("slot")?,
        })
    }
}

/// Slot content of one version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotValue {
    /// Value; `None` when cleared
    pub value: Option<Bytes>,
    /// Value of the superseded version
    pub previous_value: Option<Bytes>,
}

impl SlotValue {
    /// Slot holding `value`
    pub fn set(value: impl Into<Bytes>) -> Self {
        SlotValue {
            value: Some(value.into()),
            previous_value: None,
        }
    }

    /// Cleared slot
    pub fn cleared() -> Self {
        SlotValue {
            value: None,
            previous_value: None,
        }
    }
}

fn bytes_or_null(bytes: &Option<Bytes>) -> Value {
    bytes.as_ref().map_or(Value::Null, Value::from)
}

impl Payload for SlotValue {
    fn write_fields(&self, row: &mut RowSnapshot) {
        row.set("value", bytes_or_null(&self.value))
            .set("previous_value", bytes_or_null(&self.previous_value));
    }

    fn from_row(row: &RowSnapshot) -> StoreResult<Self> {
        Ok(SlotValue {
            value: row.decode("value")?,
            previous_value: row.decode("previous_value")?,
        })
    }
}

/// A storage write as observed by ingestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractStorage {
    /// Slot written
    pub key: SlotKey,
    /// New value; `None` clears the slot
    pub value: Option<Bytes>,
}

impl ContractStorage {
    /// Write of `value` to `slot` of `contract`
    pub fn new(contract: ContractId, slot: impl Into<Slot>, value: Option<Bytes>) -> Self {
        ContractStorage {
            key: SlotKey::new(contract, slot),
            value,
        }
    }
}

impl VersionedFact for ContractStorage {
    type Identity = SlotKey;
    type Payload = SlotValue;
    const TABLE: Table = Table::ContractStorage;

    fn identity(&self) -> SlotKey {
        self.key.clone()
    }

    fn into_payload(self) -> SlotValue {
        SlotValue {
            value: self.value,
            previous_value: None,
        }
    }

    fn link_previous(payload: &mut SlotValue, previous: Option<&SlotValue>) {
        payload.previous_value = previous.and_then(|p| p.value.clone());
    }
}

impl Catalog<ContractStorage> {
    /// Open slot versions of `contract`, ordered by slot
    pub fn slots_of(&self, contract: &ContractId) -> Vec<Version<ContractStorage>> {
        self.store().current_where(|key| key.contract == *contract)
    }

    /// Slot versions of `contract` valid at `at`, ordered by slot
    pub fn slots_as_of(
        &self,
        contract: &ContractId,
        at: Timestamp,
    ) -> Vec<Version<ContractStorage>> {
        self.store().as_of_where(at, |key| key.contract == *contract)
    }

    /// Current value of one slot; `None` if never written or cleared
    pub fn value_of(&self, contract: &ContractId, slot: &Slot) -> Option<Bytes> {
        let key = SlotKey::new(contract.clone(), slot.clone());
        self.current(&key)?.payload.value
    }
}
