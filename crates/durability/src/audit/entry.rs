//! Audit entry types
//!
//! An [`AuditEntry`] is the immutable record of one row mutation. Entries are
//! created once, when the mutation commits, and are never updated or deleted.

use chainstate_core::{EntityRef, Principal, RowSnapshot, Table, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of row mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOperation {
    /// Row created; only `after` is present
    Insert,
    /// Row changed; both `before` and `after` are present
    Update,
    /// Row removed; only `before` is present
    Delete,
}

impl fmt::Display for AuditOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuditOperation::Insert => "insert",
            AuditOperation::Update => "update",
            AuditOperation::Delete => "delete",
        })
    }
}

/// Immutable record of one mutation
///
/// `seq` is assigned by the [`AuditLog`](super::AuditLog) on append and is
/// unique and increasing in append order; it is zero before recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Append sequence number
    pub seq: u64,
    /// Mutation kind
    pub operation: AuditOperation,
    /// Table of the mutated row
    pub table: Table,
    /// Identity key of the mutated row
    pub identity: String,
    /// When the mutation happened
    pub timestamp: Timestamp,
    /// Who performed it
    pub principal: Principal,
    /// Row before the mutation, absent for inserts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<RowSnapshot>,
    /// Row after the mutation, absent for deletes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<RowSnapshot>,
}

impl AuditEntry {
    /// Entry for a created row
    pub fn insert(
        entity: EntityRef,
        after: RowSnapshot,
        timestamp: Timestamp,
        principal: &Principal,
    ) -> Self {
        Self::build(AuditOperation::Insert, entity, None, Some(after), timestamp, principal)
    }

    /// Entry for a changed row
    pub fn update(
        entity: EntityRef,
        before: RowSnapshot,
        after: RowSnapshot,
        timestamp: Timestamp,
        principal: &Principal,
    ) -> Self {
        Self::build(
            AuditOperation::Update,
            entity,
            Some(before),
            Some(after),
            timestamp,
            principal,
        )
    }

    /// Entry for a removed row
    pub fn delete(
        entity: EntityRef,
        before: RowSnapshot,
        timestamp: Timestamp,
        principal: &Principal,
    ) -> Self {
        Self::build(AuditOperation::Delete, entity, Some(before), None, timestamp, principal)
    }

    fn build(
        operation: AuditOperation,
        entity: EntityRef,
        before: Option<RowSnapshot>,
        after: Option<RowSnapshot>,
        timestamp: Timestamp,
        principal: &Principal,
    ) -> Self {
        AuditEntry {
            seq: 0,
            operation,
            table: entity.table,
            identity: entity.identity,
            timestamp,
            principal: principal.clone(),
            before,
            after,
        }
    }

    /// The row this entry describes
    pub fn entity(&self) -> EntityRef {
        EntityRef::new(self.table, self.identity.clone())
    }

    /// Whether the snapshots present match what the operation requires
    pub fn is_well_formed(&self) -> bool {
        match self.operation {
            AuditOperation::Insert => self.before.is_none() && self.after.is_some(),
            AuditOperation::Update => self.before.is_some() && self.after.is_some(),
            AuditOperation::Delete => self.before.is_some() && self.after.is_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity() -> EntityRef {
        EntityRef::new(Table::ContractBalance, "0x01")
    }

    #[test]
    fn test_constructors_are_well_formed() {
        let p = Principal::new("indexer");
        let row = RowSnapshot::new().with("balance", "0x05");
        let ts = Timestamp::from_micros(1);

        let insert = AuditEntry::insert(entity(), row.clone(), ts, &p);
        let update = AuditEntry::update(entity(), row.clone(), row.clone(), ts, &p);
        let delete = AuditEntry::delete(entity(), row, ts, &p);

        assert_eq!(insert.operation, AuditOperation::Insert);
        assert!(insert.is_well_formed());
        assert!(update.is_well_formed());
        assert!(delete.is_well_formed());
        assert_eq!(delete.entity(), entity());
    }

    #[test]
    fn test_insert_omits_before_in_json() {
        let entry = AuditEntry::insert(
            entity(),
            RowSnapshot::new(),
            Timestamp::EPOCH,
            &Principal::new("p"),
        );
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("before"));
        assert!(json.contains(r#""operation":"insert""#));
        assert!(json.contains(r#""table":"contract_balance""#));
    }
}
