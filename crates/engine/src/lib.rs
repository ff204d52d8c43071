//! Database engine for chainstate
//!
//! This crate orchestrates all lower layers:
//! - Database: wiring of audit log, catalogs and metadata tables; open/shutdown
//! - Primitives: the entity catalogs built on the generic `Catalog<F>`
//! - Configuration (`chainstate.toml`) and retry policy
//!
//! The engine is the only component that knows about:
//! - Which tables exist and which fact type each one versions
//! - Audit persistence and replay on open

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod database;
pub mod primitives;

pub use database::{
    AuditConfig, ConflictBackoff, Database, EngineConfig, CONFIG_FILE_NAME,
};
pub use primitives::{
    Balance, Catalog, Code, ComponentContract, ComponentState, ContractBalance, ContractCode,
    ContractStorage, ExtractionRow, ExtractionState, ExtractionStates, ExtractorKey, LinkKey,
    Linked, ProtocolState, SlotKey, SlotValue, Version, VersionedFact,
};
