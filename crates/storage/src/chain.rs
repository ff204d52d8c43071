//! Version chain for one identity
//!
//! Versions are kept in ascending `valid_from` order. Because every write
//! must advance the chain, a new version is always appended at the tail and
//! only the tail can be open; point-in-time lookups are a binary search.
//!
//! A published chain lives behind an `Arc`. Writers change it in place with
//! `Arc::make_mut`, which only copies when a reader still holds an
//! `Arc<VersionChain>` snapshot; that snapshot stays consistent for as long
//! as it is kept.

use chainstate_core::{Timestamp, VersionedRecord};
use std::sync::Arc;

/// The pair of rows produced when an open version is closed
#[derive(Debug, Clone)]
pub struct Superseded<K, P> {
    /// The open version as it was
    pub before: Arc<VersionedRecord<K, P>>,
    /// The same version with `valid_to` set
    pub after: Arc<VersionedRecord<K, P>>,
}

/// Whether a version starting at `valid_from` may follow `tail`
///
/// With an open tail the new version must start strictly after it; with a
/// closed tail it may start at the instant the tail ended. On rejection the
/// bound that had to be met is returned.
pub fn admits<K, P>(
    tail: Option<&VersionedRecord<K, P>>,
    valid_from: Timestamp,
) -> Result<(), Timestamp> {
    match tail {
        None => Ok(()),
        Some(tail) => match tail.valid_to {
            None if valid_from > tail.valid_from => Ok(()),
            None => Err(tail.valid_from),
            Some(end) if valid_from >= end => Ok(()),
            Some(end) => Err(end),
        },
    }
}

/// Ordered versions of one identity
#[derive(Debug, Clone)]
pub struct VersionChain<K, P> {
    versions: Vec<Arc<VersionedRecord<K, P>>>,
}

impl<K, P> Default for VersionChain<K, P> {
    fn default() -> Self {
        VersionChain {
            versions: Vec::new(),
        }
    }
}

impl<K: Clone, P: Clone> VersionChain<K, P> {
    /// Empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain of previously committed versions, in any order
    ///
    /// Fails with a description of the first violated invariant.
    pub fn from_versions(mut versions: Vec<VersionedRecord<K, P>>) -> Result<Self, String> {
        versions.sort_by_key(|v| (v.valid_from, v.id));
        let chain = VersionChain {
            versions: versions.into_iter().map(Arc::new).collect(),
        };
        chain.check_invariants()?;
        Ok(chain)
    }

    /// Number of versions
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Whether the chain has no versions
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Most recent version, open or not
    pub fn latest(&self) -> Option<&Arc<VersionedRecord<K, P>>> {
        self.versions.last()
    }

    /// The open version, if any
    pub fn open(&self) -> Option<&Arc<VersionedRecord<K, P>>> {
        self.versions.last().filter(|v| v.is_open())
    }

    /// Version whose interval contains `at`
    pub fn as_of(&self, at: Timestamp) -> Option<&Arc<VersionedRecord<K, P>>> {
        let idx = self.versions.partition_point(|v| v.valid_from <= at);
        if idx == 0 {
            return None;
        }
        self.versions.get(idx - 1).filter(|v| v.contains(at))
    }

    /// All versions, oldest first
    pub fn history(&self) -> impl Iterator<Item = &Arc<VersionedRecord<K, P>>> + '_ {
        self.versions.iter()
    }

    /// Versions whose `valid_from` falls in `(start, end]`
    pub fn changed_between(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> impl Iterator<Item = &Arc<VersionedRecord<K, P>>> + '_ {
        let lo = self.versions.partition_point(|v| v.valid_from <= start);
        let hi = self.versions.partition_point(|v| v.valid_from <= end);
        self.versions[lo..hi.max(lo)].iter()
    }

    /// Check that a version starting at `valid_from` may be appended; see [`admits`]
    pub fn admit(&self, valid_from: Timestamp) -> Result<(), Timestamp> {
        admits(self.versions.last().map(|v| v.as_ref()), valid_from)
    }

    /// Append `record`, closing the open tail at `record.valid_from`
    ///
    /// The caller must have checked [`VersionChain::admit`]. `now` stamps the
    /// closed version's `modified_at`.
    pub fn push(
        &mut self,
        record: VersionedRecord<K, P>,
        now: Timestamp,
    ) -> Option<Superseded<K, P>> {
        debug_assert!(record.is_open());
        debug_assert!(self.admit(record.valid_from).is_ok());
        let superseded = self.close_tail(record.valid_from, now);
        self.versions.push(Arc::new(record));
        superseded
    }

    /// Close the open tail at `at` without a successor
    pub fn close_tail(&mut self, at: Timestamp, now: Timestamp) -> Option<Superseded<K, P>> {
        let tail = self.versions.last_mut()?;
        if !tail.is_open() {
            return None;
        }
        let before = Arc::clone(tail);
        let after = Arc::new(before.closed_at(at, now));
        *tail = Arc::clone(&after);
        Some(Superseded { before, after })
    }

    /// Verify ordering, single open version and non-overlap
    pub fn check_invariants(&self) -> Result<(), String> {
        for (i, v) in self.versions.iter().enumerate() {
            if let Some(end) = v.valid_to {
                if end <= v.valid_from {
                    return Err(format!("version {} has empty interval", v.id.0));
                }
            } else if i + 1 != self.versions.len() {
                return Err(format!("version {} is open but not last", v.id.0));
            }
        }
        for pair in self.versions.windows(2) {
            if pair[0].valid_from >= pair[1].valid_from {
                return Err(format!(
                    "versions {} and {} out of order",
                    pair[0].id.0, pair[1].id.0
                ));
            }
            if pair[0].overlaps(&pair[1]) {
                return Err(format!(
                    "versions {} and {} overlap",
                    pair[0].id.0, pair[1].id.0
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainstate_core::RecordId;

    type Chain = VersionChain<u8, &'static str>;

    fn ts(us: u64) -> Timestamp {
        Timestamp::from_micros(us)
    }

    fn version(id: u64, from: u64, payload: &'static str) -> VersionedRecord<u8, &'static str> {
        VersionedRecord {
            id: RecordId(id),
            identity: 1,
            payload,
            valid_from: ts(from),
            valid_to: None,
            inserted_at: ts(0),
            modified_at: ts(0),
        }
    }

    fn chain_of(versions: &[(u64, &'static str)]) -> Chain {
        let mut chain = Chain::new();
        for (i, (from, p)) in versions.iter().enumerate() {
            chain.push(version(i as u64 + 1, *from, *p), ts(1_000));
        }
        chain
    }

    #[test]
    fn test_push_closes_previous() {
        let mut chain = chain_of(&[(100, "a")]);
        let superseded = chain.push(version(2, 200, "b"), ts(7)).unwrap();
        assert!(superseded.before.is_open());
        assert_eq!(superseded.after.valid_to, Some(ts(200)));
        assert_eq!(superseded.after.modified_at, ts(7));
        assert_eq!(chain.open().unwrap().payload, "b");
        assert!(chain.check_invariants().is_ok());
    }

    #[test]
    fn test_first_push_supersedes_nothing() {
        let mut chain = Chain::new();
        assert!(chain.push(version(1, 100, "a"), ts(1)).is_none());
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_as_of_boundaries() {
        let chain = chain_of(&[(100, "a"), (200, "b")]);
        assert!(chain.as_of(ts(99)).is_none());
        assert_eq!(chain.as_of(ts(100)).unwrap().payload, "a");
        assert_eq!(chain.as_of(ts(199)).unwrap().payload, "a");
        assert_eq!(chain.as_of(ts(200)).unwrap().payload, "b");
        assert_eq!(chain.as_of(Timestamp::MAX).unwrap().payload, "b");
    }

    #[test]
    fn test_as_of_in_gap_after_close() {
        let mut chain = chain_of(&[(100, "a")]);
        chain.close_tail(ts(150), ts(1));
        assert!(chain.open().is_none());
        assert!(chain.as_of(ts(150)).is_none());
        chain.push(version(2, 300, "b"), ts(2));
        assert!(chain.as_of(ts(200)).is_none());
        assert_eq!(chain.as_of(ts(300)).unwrap().payload, "b");
    }

    #[test]
    fn test_admit_rules() {
        let chain = chain_of(&[(100, "a")]);
        assert_eq!(chain.admit(ts(100)), Err(ts(100)));
        assert_eq!(chain.admit(ts(50)), Err(ts(100)));
        assert!(chain.admit(ts(101)).is_ok());

        let mut closed = chain.clone();
        closed.close_tail(ts(150), ts(1));
        assert_eq!(closed.admit(ts(149)), Err(ts(150)));
        assert!(closed.admit(ts(150)).is_ok());
    }

    #[test]
    fn test_from_versions_sorts_and_checks() {
        let mut first = version(1, 100, "a");
        first.valid_to = Some(ts(200));
        let second = version(2, 200, "b");
        let chain = Chain::from_versions(vec![second.clone(), first.clone()]).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.open().unwrap().payload, "b");
        assert_eq!(chain.as_of(ts(150)).unwrap().payload, "a");

        // Two open versions cannot form a chain
        assert!(Chain::from_versions(vec![version(1, 100, "a"), second]).is_err());
    }

    #[test]
    fn test_clone_is_independent_snapshot() {
        let chain = chain_of(&[(100, "a")]);
        let mut next = chain.clone();
        next.push(version(2, 200, "b"), ts(1));
        assert!(chain.open().is_some());
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.open().unwrap().payload, "a");
        assert_eq!(next.len(), 2);
    }

    #[test]
    fn test_changed_between_window() {
        let chain = chain_of(&[(100, "a"), (200, "b"), (300, "c")]);
        let hits: Vec<_> = chain
            .changed_between(ts(100), ts(300))
            .map(|v| v.payload)
            .collect();
        assert_eq!(hits, vec!["b", "c"]);
        assert_eq!(chain.changed_between(ts(300), ts(400)).count(), 0);
        assert_eq!(chain.changed_between(ts(0), ts(100)).count(), 1);
        assert_eq!(chain.changed_between(ts(250), ts(150)).count(), 0);
    }
}
