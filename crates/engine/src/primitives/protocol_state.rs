//! Protocol component state
//!
//! One chain per protocol component. Each version carries the component's
//! total value locked, its per-token inertias and a free-form attribute map.

use super::fact::{Catalog, VersionedFact};
use chainstate_core::{ComponentId, Payload, RowSnapshot, StoreResult, Table, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// State of one protocol component
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComponentState {
    /// Total value locked, if known
    pub tvl: Option<f64>,
    /// Per-token inertia
    pub inertias: Vec<f64>,
    /// Free-form protocol attributes
    pub attributes: BTreeMap<String, Value>,
}

impl ComponentState {
    /// State with the given TVL and no attributes
    pub fn with_tvl(tvl: f64) -> Self {
        ComponentState {
            tvl: Some(tvl),
            ..Default::default()
        }
    }

    /// Set an attribute
    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

impl Payload for ComponentState {
    fn write_fields(&self, row: &mut RowSnapshot) {
        row.set("tvl", self.tvl.map_or(Value::Null, Value::from))
            .set("inertias", self.inertias.clone())
            .set(
                "state",
                Value::Object(self.attributes.clone().into_iter().collect()),
            );
    }

    fn from_row(row: &RowSnapshot) -> StoreResult<Self> {
        Ok(ComponentState {
            tvl: row.decode("tvl")?,
            inertias: row.decode("inertias")?,
            attributes: row.decode("state")?,
        })
    }
}

/// A protocol component's state as observed by ingestion
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolState {
    /// Component the state belongs to
    pub component: ComponentId,
    /// Observed state
    pub state: ComponentState,
}

impl ProtocolState {
    /// State fact for `component`
    pub fn new(component: ComponentId, state: ComponentState) -> Self {
        ProtocolState { component, state }
    }
}

impl VersionedFact for ProtocolState {
    type Identity = ComponentId;
    type Payload = ComponentState;
    const TABLE: Table = Table::ProtocolState;

    fn identity(&self) -> ComponentId {
        self.component.clone()
    }

    fn into_payload(self) -> ComponentState {
        self.state
    }
}

impl Catalog<ProtocolState> {
    /// TVL of `component` at `at`, or currently when `at` is `None`
    pub fn tvl_of(&self, component: &ComponentId, at: Option<Timestamp>) -> Option<f64> {
        let version = match at {
            Some(at) => self.as_of(component, at),
            None => self.current(component),
        }?;
        version.payload.tvl
    }
}
