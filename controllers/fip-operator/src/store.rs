//! Resource store.
//!
//! Authoritative in-memory mirror of the FloatingIPRange and FloatingIP
//! objects the operator has accepted. Records are keyed, so upserting the
//! same identity twice replaces rather than duplicates. The store does no
//! locking of its own; [`crate::inventory::Inventory`] owns it together with
//! the allocator behind one mutex.

use crate::model::{FipKey, FloatingIpRecord, RangeRecord};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Store lookup failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Removal of a record the store never saw
    #[error("{kind} not found in store: {key}")]
    NotFound { kind: &'static str, key: String },
}

#[derive(Debug, Default)]
pub struct ResourceStore {
    ranges: BTreeMap<String, RangeRecord>,
    fips: BTreeMap<FipKey, FloatingIpRecord>,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a range; returns the replaced record.
    pub fn upsert_range(&mut self, record: RangeRecord) -> Option<RangeRecord> {
        self.ranges.insert(record.name.clone(), record)
    }

    pub fn remove_range(&mut self, name: &str) -> Result<RangeRecord, StoreError> {
        self.ranges.remove(name).ok_or_else(|| StoreError::NotFound {
            kind: "FloatingIPRange",
            key: name.to_string(),
        })
    }

    pub fn range(&self, name: &str) -> Option<&RangeRecord> {
        self.ranges.get(name)
    }

    /// Inserts or replaces a FloatingIP; returns the replaced record.
    pub fn upsert_fip(&mut self, record: FloatingIpRecord) -> Option<FloatingIpRecord> {
        self.fips.insert(record.key.clone(), record)
    }

    pub fn remove_fip(&mut self, key: &FipKey) -> Result<FloatingIpRecord, StoreError> {
        self.fips.remove(key).ok_or_else(|| StoreError::NotFound {
            kind: "FloatingIP",
            key: key.to_string(),
        })
    }

    pub fn fip(&self, key: &FipKey) -> Option<&FloatingIpRecord> {
        self.fips.get(key)
    }

    /// FloatingIPs drawing from `range`
    pub fn fips_in_range<'a>(&'a self, range: &'a str) -> impl Iterator<Item = &'a FloatingIpRecord> + 'a {
        self.fips.values().filter(move |fip| fip.range == range)
    }

    pub fn len(&self) -> (usize, usize) {
        (self.ranges.len(), self.fips.len())
    }

    /// Immutable point-in-time copy of both collections.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            ranges: self.ranges.clone(),
            fips: self.fips.values().cloned().collect(),
        }
    }
}

/// Read-only copy of the store taken before a sweep.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    ranges: BTreeMap<String, RangeRecord>,
    fips: Arc<[FloatingIpRecord]>,
}

impl Snapshot {
    /// FloatingIPs, ordered by namespace then name
    pub fn fips(&self) -> &[FloatingIpRecord] {
        &self.fips
    }

    /// Ranges, ordered by name
    pub fn ranges(&self) -> impl Iterator<Item = &RangeRecord> {
        self.ranges.values()
    }

    pub fn range(&self, name: &str) -> Option<&RangeRecord> {
        self.ranges.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{fip_record, range_record};

    #[test]
    fn test_upsert_replaces_by_key() {
        let mut store = ResourceStore::new();
        assert!(store.upsert_fip(fip_record("ns", "a", "lab", None)).is_none());
        let old = store.upsert_fip(fip_record("ns", "a", "lab", Some("10.0.0.5")));
        assert_eq!(old.map(|r| r.address), Some(None));
        assert_eq!(store.len(), (0, 1));
        assert_eq!(
            store.fip(&FipKey::new("ns", "a")).and_then(|r| r.address),
            Some("10.0.0.5".parse().unwrap())
        );
    }

    #[test]
    fn test_remove_unknown_is_not_found() {
        let mut store = ResourceStore::new();
        assert_eq!(
            store.remove_range("lab"),
            Err(StoreError::NotFound {
                kind: "FloatingIPRange",
                key: "lab".to_string()
            })
        );
        assert!(store.remove_fip(&FipKey::new("ns", "a")).is_err());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut store = ResourceStore::new();
        store.upsert_range(range_record("lab", "10.0.0.0/24"));
        store.upsert_fip(fip_record("ns", "b", "lab", None));
        store.upsert_fip(fip_record("ns", "a", "lab", None));

        let snapshot = store.snapshot();
        store.remove_fip(&FipKey::new("ns", "a")).unwrap();
        store.remove_range("lab").unwrap();

        let names: Vec<_> = snapshot.fips().iter().map(|f| f.key.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(snapshot.range("lab").is_some());
        assert_eq!(store.len(), (0, 1));
    }

    #[test]
    fn test_fips_in_range() {
        let mut store = ResourceStore::new();
        store.upsert_fip(fip_record("ns", "a", "lab", None));
        store.upsert_fip(fip_record("ns", "b", "other", None));
        let in_lab: Vec<_> = store.fips_in_range("lab").map(|f| f.key.name.clone()).collect();
        assert_eq!(in_lab, vec!["a"]);
    }
}
