//! Schema-free row snapshots
//!
//! Audit entries capture rows as a mapping from field name to JSON value so a
//! single log can hold every table. Snapshots are built explicitly: each
//! identity and payload type writes its own fields through [`IdentityKey`] and
//! [`Payload`], no reflection involved.

use crate::error::{StoreError, StoreResult};
use crate::timestamp::Timestamp;
use crate::types::{Bytes, ComponentId, ContractId, RecordId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::hash::Hash;

/// Field name → serialized value
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowSnapshot(BTreeMap<String, Value>);

impl RowSnapshot {
    /// Empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, replacing any previous value
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> &mut Self {
        self.0.insert(field.to_string(), value.into());
        self
    }

    /// Builder form of [`RowSnapshot::set`]
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Read a field
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Decode a field written by `set`
    ///
    /// Fails with `Persistence` when the field is missing or has the wrong
    /// shape; snapshots are decoded only when reloading the audit trail.
    pub fn decode<T: DeserializeOwned>(&self, field: &str) -> StoreResult<T> {
        let value = self.0.get(field).ok_or_else(|| {
            StoreError::persistence(format!("row snapshot has no field '{}'", field))
        })?;
        T::deserialize(value).map_err(|e| {
            StoreError::persistence(format!("row snapshot field '{}': {}", field, e))
        })
    }

    /// Iterate fields in name order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the snapshot has no fields
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Names of fields whose values differ between two snapshots
    pub fn changed_fields(&self, other: &RowSnapshot) -> Vec<String> {
        let mut changed: Vec<String> = self
            .0
            .iter()
            .filter(|(k, v)| other.0.get(*k) != Some(*v))
            .map(|(k, _)| k.clone())
            .collect();
        changed.extend(
            other
                .0
                .keys()
                .filter(|k| !self.0.contains_key(*k))
                .cloned(),
        );
        changed.sort();
        changed
    }
}

/// Identity a chain of versions shares
///
/// `key_string` is the stable string form used for audit indexing and error
/// messages; it must be injective over the identity space.
pub trait IdentityKey: Clone + Eq + Hash + Ord + Debug + Send + Sync + 'static {
    /// Stable string form
    fn key_string(&self) -> String;

    /// Write the identity's columns into a snapshot
    fn write_fields(&self, row: &mut RowSnapshot);

    /// Read the identity back from the columns `write_fields` wrote
    fn from_row(row: &RowSnapshot) -> StoreResult<Self>;
}

/// Versioned or mutable row content
pub trait Payload: Clone + Debug + Send + Sync + 'static {
    /// Write the payload's columns into a snapshot
    fn write_fields(&self, row: &mut RowSnapshot);

    /// Read the payload back from the columns `write_fields` wrote
    fn from_row(row: &RowSnapshot) -> StoreResult<Self>;
}

impl IdentityKey for ContractId {
    fn key_string(&self) -> String {
        self.to_string()
    }

    fn write_fields(&self, row: &mut RowSnapshot) {
        row.set("contract", self.address());
    }

    fn from_row(row: &RowSnapshot) -> StoreResult<Self> {
        row.decode("contract").map(ContractId)
    }
}

impl IdentityKey for ComponentId {
    fn key_string(&self) -> String {
        self.as_str().to_string()
    }

    fn write_fields(&self, row: &mut RowSnapshot) {
        row.set("component", self.as_str());
    }

    fn from_row(row: &RowSnapshot) -> StoreResult<Self> {
        row.decode("component").map(ComponentId)
    }
}

impl From<&Bytes> for Value {
    fn from(bytes: &Bytes) -> Self {
        Value::String(bytes.to_hex())
    }
}

impl From<Bytes> for Value {
    fn from(bytes: Bytes) -> Self {
        Value::from(&bytes)
    }
}

impl From<Timestamp> for Value {
    fn from(ts: Timestamp) -> Self {
        Value::from(ts.as_micros())
    }
}

impl From<RecordId> for Value {
    fn from(id: RecordId) -> Self {
        Value::from(id.0)
    }
}
