//! Extraction state
//!
//! Mutable per-extractor ingestion cursor, keyed by extractor name and
//! chain. Not versioned: each save replaces the row, stamps `modified_at`
//! and records an audit entry.

use chainstate_core::{Bytes, Chain, IdentityKey, Payload, Principal, RowSnapshot, StoreResult, Table};
use chainstate_durability::AuditEntry;
use chainstate_storage::{MetadataRow, MetadataTable, StoreContext};
use serde_json::Value;
use std::collections::BTreeMap;

/// Extractor instance identity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExtractorKey {
    /// Extractor name
    pub name: String,
    /// Chain the extractor is scoped to
    pub chain: Chain,
}

impl ExtractorKey {
    /// Key for extractor `name` on `chain`
    pub fn new(name: impl Into<String>, chain: Chain) -> Self {
        ExtractorKey {
            name: name.into(),
            chain,
        }
    }
}

impl IdentityKey for ExtractorKey {
    fn key_string(&self) -> String {
        format!("{}:{}", self.chain, self.name)
    }

    fn write_fields(&self, row: &mut RowSnapshot) {
        row.set("name", self.name.as_str())
            .set("chain", self.chain.as_str());
    }

    fn from_row(row: &RowSnapshot) -> StoreResult<Self> {
        Ok(ExtractorKey {
            name: row.decode("name")?,
            chain: row.decode("chain")?,
        })
    }
}

/// Ingestion progress of one extractor
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtractionState {
    /// Extractor version
    pub version: String,
    /// Last fully processed stream cursor
    pub cursor: Option<Bytes>,
    /// Hash of the last processed block
    pub block_hash: Option<Bytes>,
    /// Extractor-specific attributes
    pub attributes: BTreeMap<String, Value>,
}

impl Payload for ExtractionState {
    fn write_fields(&self, row: &mut RowSnapshot) {
        row.set("version", self.version.as_str())
            .set("cursor", self.cursor.as_ref().map_or(Value::Null, Value::from))
            .set(
                "block_hash",
                self.block_hash.as_ref().map_or(Value::Null, Value::from),
            )
            .set(
                "attributes",
                Value::Object(self.attributes.clone().into_iter().collect()),
            );
    }

    fn from_row(row: &RowSnapshot) -> StoreResult<Self> {
        Ok(ExtractionState {
            version: row.decode("version")?,
            cursor: row.decode("cursor")?,
            block_hash: row.decode("block_hash")?,
            attributes: row.decode("attributes")?,
        })
    }
}

/// Stored extraction state row
pub type ExtractionRow = MetadataRow<ExtractorKey, ExtractionState>;

/// Extraction state table
pub struct ExtractionStates {
    table: MetadataTable<ExtractorKey, ExtractionState>,
}

impl ExtractionStates {
    /// Empty table writing through `ctx`
    pub fn new(ctx: StoreContext) -> Self {
        ExtractionStates {
            table: MetadataTable::new(Table::ExtractionState, ctx),
        }
    }

    /// Create or replace the state of `key`
    pub fn save(
        &self,
        key: ExtractorKey,
        state: ExtractionState,
        principal: &Principal,
    ) -> StoreResult<ExtractionRow> {
        self.table.save(key, state, principal)
    }

    /// Advance the cursor of an existing extractor
    pub fn advance(
        &self,
        key: &ExtractorKey,
        cursor: Bytes,
        block_hash: Bytes,
        principal: &Principal,
    ) -> StoreResult<ExtractionRow> {
        self.table.update(
            key,
            |state| {
                state.cursor = Some(cursor);
                state.block_hash = Some(block_hash);
            },
            principal,
        )
    }

    /// State of `key`
    pub fn get(&self, key: &ExtractorKey) -> Option<ExtractionRow> {
        self.table.get(key)
    }

    /// Remove the state of `key`
    pub fn delete(&self, key: &ExtractorKey, principal: &Principal) -> StoreResult<ExtractionRow> {
        self.table.delete(key, principal)
    }

    /// Every extractor's state
    pub fn list(&self) -> Vec<ExtractionRow> {
        self.table.list()
    }

    /// Replay committed audit entries into the table
    pub fn restore<'a, I>(&self, entries: I) -> StoreResult<usize>
    where
        I: IntoIterator<Item = &'a AuditEntry>,
    {
        self.table.restore(entries)
    }
}
