//! Protocol component ↔ contract association
//!
//! A version exists while a component uses a contract. Unlinking retires
//! the association; linking again later opens a new version.

use super::fact::{Catalog, Version, VersionedFact};
use chainstate_core::{
    ComponentId, ContractId, IdentityKey, Payload, Principal, RowSnapshot, StoreResult, Table,
    Timestamp,
};

/// Identity of one association
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkKey {
    /// Protocol component
    pub component: ComponentId,
    /// Contract it uses
    pub contract: ContractId,
}

impl IdentityKey for LinkKey {
    fn key_string(&self) -> String {
        format!("{}/{}", self.component, self.contract)
    }

    fn write_fields(&self, row: &mut RowSnapshot) {
        row.set("component", self.component.as_str())
            .set("contract", self.contract.address());
    }

    fn from_row(row: &RowSnapshot) -> StoreResult<Self> {
        Ok(LinkKey {
            component: ComponentId::from_row(row)?,
            contract: ContractId::from_row(row)?,
        })
    }
}

/// Existence marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Linked;

impl Payload for Linked {
    fn write_fields(&self, _row: &mut RowSnapshot) {}

    fn from_row(_row: &RowSnapshot) -> StoreResult<Self> {
        Ok(Linked)
    }
}

/// An association as observed by ingestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentContract {
    /// Protocol component
    pub component: ComponentId,
    /// Contract it uses
    pub contract: ContractId,
}

impl ComponentContract {
    /// Association of `component` with `contract`
    pub fn new(component: ComponentId, contract: ContractId) -> Self {
        ComponentContract {
            component,
            contract,
        }
    }

    /// The association's identity
    pub fn key(&self) -> LinkKey {
        LinkKey {
            component: self.component.clone(),
            contract: self.contract.clone(),
        }
    }
}

impl VersionedFact for ComponentContract {
    type Identity = LinkKey;
    type Payload = Linked;
    const TABLE: Table = Table::ComponentContract;

    fn identity(&self) -> LinkKey {
        self.key()
    }

    fn into_payload(self) -> Linked {
        Linked
    }
}

impl Catalog<ComponentContract> {
    /// Associate `component` with `contract` from `valid_from` on
    pub fn link(
        &self,
        component: ComponentId,
        contract: ContractId,
        valid_from: Timestamp,
        principal: &Principal,
    ) -> StoreResult<Version<ComponentContract>> {
        self.record(ComponentContract::new(component, contract), valid_from, principal)
    }

    /// End the association at `at`
    pub fn unlink(
        &self,
        component: &ComponentId,
        contract: &ContractId,
        at: Timestamp,
        principal: &Principal,
    ) -> StoreResult<Version<ComponentContract>> {
        let key = ComponentContract::new(component.clone(), contract.clone()).key();
        self.retire(&key, at, principal)
    }

    /// Contracts currently used by `component`
    pub fn contracts_of(&self, component: &ComponentId) -> Vec<ContractId> {
        self.store()
            .current_where(|key| key.component == *component)
            .into_iter()
            .map(|v| v.identity.contract)
            .collect()
    }

    /// Components currently using `contract`
    pub fn components_of(&self, contract: &ContractId) -> Vec<ComponentId> {
        self.store()
            .current_where(|key| key.contract == *contract)
            .into_iter()
            .map(|v| v.identity.component)
            .collect()
    }

    /// Contracts used by `component` at `at`
    pub fn contracts_of_as_of(&self, component: &ComponentId, at: Timestamp) -> Vec<ContractId> {
        self.store()
            .as_of_where(at, |key| key.component == *component)
            .into_iter()
            .map(|v| v.identity.contract)
            .collect()
    }
}
