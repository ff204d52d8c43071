//! Entity catalogs
//!
//! Each tracked fact kind is a [`VersionedFact`] served by a generic
//! [`Catalog`]:
//! - **ProtocolState**: component TVL, inertias and attributes, per component
//! - **ContractBalance**: native balance, per contract
//! - **ContractCode**: bytecode and content hash, per contract
//! - **ContractStorage**: slot values with previous value, per (contract, slot)
//! - **ComponentContract**: component ↔ contract association, per pair
//!
//! **ExtractionStates** is the one mutable metadata table.

pub mod component_contract;
pub mod contract_balance;
pub mod contract_code;
pub mod contract_storage;
pub mod extraction_state;
pub mod fact;
pub mod protocol_state;

pub use component_contract::{ComponentContract, LinkKey, Linked};
pub use contract_balance::{Balance, ContractBalance};
pub use contract_code::{Code, ContractCode};
pub use contract_storage::{ContractStorage, SlotKey, SlotValue};
pub use extraction_state::{ExtractionRow, ExtractionState, ExtractionStates, ExtractorKey};
pub use fact::{Catalog, Version, VersionedFact};
pub use protocol_state::{ComponentState, ProtocolState};
