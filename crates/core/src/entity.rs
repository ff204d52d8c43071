//! Entity addressing
//!
//! Every tracked row belongs to a [`Table`] and is addressed within it by the
//! string form of its identity key. [`EntityRef`] pairs the two and is what
//! errors and audit entries refer to.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tracked tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    /// Versioned protocol component state
    ProtocolState,
    /// Versioned contract balance
    ContractBalance,
    /// Versioned contract code
    ContractCode,
    /// Versioned contract storage, one chain per (contract, slot)
    ContractStorage,
    /// Versioned protocol component ↔ contract association
    ComponentContract,
    /// Mutable ingestion cursor metadata
    ExtractionState,
}

impl Table {
    /// All tables
    pub const ALL: [Table; 6] = [
        Table::ProtocolState,
        Table::ContractBalance,
        Table::ContractCode,
        Table::ContractStorage,
        Table::ComponentContract,
        Table::ExtractionState,
    ];

    /// Table name as stored in audit entries
    pub const fn name(&self) -> &'static str {
        match self {
            Table::ProtocolState => "protocol_state",
            Table::ContractBalance => "contract_balance",
            Table::ContractCode => "contract_code",
            Table::ContractStorage => "contract_storage",
            Table::ComponentContract => "component_contract",
            Table::ExtractionState => "extraction_state",
        }
    }

    /// Whether rows of this table are versioned (append-only chains)
    pub const fn is_versioned(&self) -> bool {
        !matches!(self, Table::ExtractionState)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reference to one identity within a table
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// Owning table
    pub table: Table,
    /// Identity key in string form
    pub identity: String,
}

impl EntityRef {
    /// Create a reference
    pub fn new(table: Table, identity: impl Into<String>) -> Self {
        EntityRef {
            table,
            identity: identity.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.table, self.identity)
    }
}
