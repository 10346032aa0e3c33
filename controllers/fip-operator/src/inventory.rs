//! Allocator and resource store behind one lock.
//!
//! Every public method takes the lock once, applies all allocator and store
//! changes for one operation, and releases it before returning. Nothing here
//! is async, so the lock is never held across an await point.

use crate::error::ControllerError;
use crate::model::{FipKey, FloatingIpRecord, RangeRecord};
use crate::store::{ResourceStore, Snapshot, StoreError};
use ipam::Allocator;
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;

#[derive(Debug, Default)]
struct Inner {
    allocator: Allocator,
    store: ResourceStore,
}

/// Result of registering a range.
#[derive(Debug, Clone)]
pub struct RangeRegistration {
    pub record: RangeRecord,
    pub capacity: u32,
    /// Stored FloatingIPs whose address was reserved again
    pub readopted: usize,
}

/// Result of removing a range.
#[derive(Debug, Clone)]
pub struct RangeRemoval {
    pub record: RangeRecord,
    /// Addresses still held when the range went away
    pub released: usize,
    /// Stored FloatingIPs still pointing at the removed range
    pub orphaned: usize,
}

/// Result of claiming an address for a FloatingIP.
#[derive(Debug, Clone)]
pub struct Claim {
    /// Stored record, address filled in
    pub record: FloatingIpRecord,
    /// Address was chosen by the allocator rather than requested
    pub allocated: bool,
    pub range: Option<RangeRecord>,
}

/// Result of releasing a FloatingIP.
#[derive(Debug, Clone)]
pub struct Release {
    pub record: FloatingIpRecord,
    /// Whether the allocator actually held the address
    pub released: bool,
    pub range: Option<RangeRecord>,
}

/// Shared allocation state of the operator.
#[derive(Debug, Default)]
pub struct Inventory {
    inner: Mutex<Inner>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a range and re-reserves the addresses of stored
    /// FloatingIPs that reference it.
    pub fn create_range(&self, record: RangeRecord) -> Result<RangeRegistration, ControllerError> {
        let mut guard = self.lock();
        let Inner { allocator, store } = &mut *guard;

        let span = allocator.register_range(&record.name, &record.cidr)?;

        let mut readopted = 0;
        for fip in store.fips_in_range(&record.name) {
            let Some(address) = fip.address else { continue };
            match allocator.acquire(&record.name, &fip.owner(), Some(address)) {
                Ok(_) => readopted += 1,
                Err(e) => warn!("FloatingIP {} keeps {} untracked: {}", fip.key, address, e),
            }
        }

        store.upsert_range(record.clone());
        Ok(RangeRegistration {
            record,
            capacity: span.capacity(),
            readopted,
        })
    }

    /// Drops a range and all of its allocator bookkeeping. FloatingIP records
    /// that reference it stay in the store.
    pub fn delete_range(&self, name: &str) -> Result<RangeRemoval, ControllerError> {
        let mut guard = self.lock();
        let Inner { allocator, store } = &mut *guard;

        let released = allocator.deregister_range(name)?;
        let record = store.remove_range(name)?;
        let orphaned = store.fips_in_range(name).count();
        Ok(RangeRemoval {
            record,
            released,
            orphaned,
        })
    }

    /// Reserves the requested (or next free) address and stores the record.
    pub fn claim_fip(&self, mut record: FloatingIpRecord) -> Result<Claim, ControllerError> {
        let mut guard = self.lock();
        let Inner { allocator, store } = &mut *guard;

        let address = allocator.acquire(&record.range, &record.owner(), record.address)?;
        let allocated = record.address.is_none();
        record.address = Some(address);
        store.upsert_fip(record.clone());

        Ok(Claim {
            range: store.range(&record.range).cloned(),
            record,
            allocated,
        })
    }

    /// Undoes a claim whose address could not be persisted.
    pub fn rollback_claim(&self, key: &FipKey) {
        let mut guard = self.lock();
        let Inner { allocator, store } = &mut *guard;

        if let Ok(record) = store.remove_fip(key) {
            if let Some(address) = record.address {
                allocator.release(&record.range, address);
            }
        }
    }

    /// Releases the address of a stored FloatingIP and removes the record.
    pub fn release_fip(&self, key: &FipKey) -> Result<Release, ControllerError> {
        let mut guard = self.lock();
        let Inner { allocator, store } = &mut *guard;

        let record = store.fip(key).cloned().ok_or_else(|| StoreError::NotFound {
            kind: "FloatingIP",
            key: key.to_string(),
        })?;
        let released = record
            .address
            .is_some_and(|address| allocator.release(&record.range, address));
        store.remove_fip(key)?;

        Ok(Release {
            range: store.range(&record.range).cloned(),
            record,
            released,
        })
    }

    pub fn range(&self, name: &str) -> Option<RangeRecord> {
        self.lock().store.range(name).cloned()
    }

    pub fn fip(&self, key: &FipKey) -> Option<FloatingIpRecord> {
        self.lock().store.fip(key).cloned()
    }

    /// Immutable copy of the stored records.
    pub fn snapshot(&self) -> Snapshot {
        self.lock().store.snapshot()
    }

    /// Addresses held in `range`, lowest first
    pub fn allocated(&self, range: &str) -> Vec<Ipv4Addr> {
        self.lock().allocator.allocated(range)
    }

    /// (capacity, held) of a registered range
    pub fn usage(&self, range: &str) -> Option<(u32, usize)> {
        let guard = self.lock();
        let capacity = guard.allocator.capacity(range)?;
        Some((capacity, guard.allocator.allocated(range).len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{fip_record, range_record};
    use ipam::IpamError;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_claim_next_free_and_requested() {
        let inv = Inventory::new();
        inv.create_range(range_record("lab", "10.0.0.0/29")).unwrap();

        let a = inv.claim_fip(fip_record("ns", "a", "lab", None)).unwrap();
        assert!(a.allocated);
        assert_eq!(a.record.address, Some(Ipv4Addr::new(10, 0, 0, 1)));

        let b = inv.claim_fip(fip_record("ns", "b", "lab", Some("10.0.0.5"))).unwrap();
        assert!(!b.allocated);
        assert_eq!(inv.allocated("lab").len(), 2);
        assert_eq!(inv.usage("lab"), Some((6, 2)));
    }

    #[test]
    fn test_failed_claim_leaves_state_untouched() {
        let inv = Inventory::new();
        inv.create_range(range_record("lab", "10.0.0.0/24")).unwrap();
        inv.claim_fip(fip_record("ns", "a", "lab", Some("10.0.0.5"))).unwrap();

        let err = inv.claim_fip(fip_record("ns", "b", "lab", Some("10.0.0.5"))).unwrap_err();
        assert!(matches!(err, ControllerError::Ipam(IpamError::AddressAlreadyAllocated { .. })));
        assert!(inv.fip(&FipKey::new("ns", "b")).is_none());

        let err = inv.claim_fip(fip_record("ns", "c", "missing", None)).unwrap_err();
        assert!(matches!(err, ControllerError::Ipam(IpamError::RangeNotFound(_))));
    }

    #[test]
    fn test_release_and_rollback() {
        let inv = Inventory::new();
        inv.create_range(range_record("lab", "10.0.0.0/24")).unwrap();
        inv.claim_fip(fip_record("ns", "a", "lab", None)).unwrap();
        inv.claim_fip(fip_record("ns", "b", "lab", None)).unwrap();

        let release = inv.release_fip(&FipKey::new("ns", "a")).unwrap();
        assert!(release.released);
        assert_eq!(release.range.map(|r| r.name), Some("lab".to_string()));

        inv.rollback_claim(&FipKey::new("ns", "b"));
        assert!(inv.allocated("lab").is_empty());
        assert!(inv.snapshot().fips().is_empty());

        assert!(matches!(
            inv.release_fip(&FipKey::new("ns", "a")),
            Err(ControllerError::Store(StoreError::NotFound { .. }))
        ));
    }

    #[test]
    fn test_range_delete_orphans_and_recreate_readopts() {
        let inv = Inventory::new();
        inv.create_range(range_record("lab", "10.0.0.0/24")).unwrap();
        inv.claim_fip(fip_record("ns", "a", "lab", None)).unwrap();
        inv.claim_fip(fip_record("ns", "b", "lab", Some("10.0.0.200"))).unwrap();

        let removal = inv.delete_range("lab").unwrap();
        assert_eq!(removal.released, 2);
        assert_eq!(removal.orphaned, 2);
        assert!(inv.usage("lab").is_none());

        // shrunk range: 10.0.0.200 no longer fits and stays untracked
        let registration = inv.create_range(range_record("lab", "10.0.0.0/25")).unwrap();
        assert_eq!(registration.readopted, 1);
        assert_eq!(inv.allocated("lab"), vec![Ipv4Addr::new(10, 0, 0, 1)]);

        // the readopted address is not handed out twice
        let c = inv.claim_fip(fip_record("ns", "c", "lab", None)).unwrap();
        assert_eq!(c.record.address, Some(Ipv4Addr::new(10, 0, 0, 2)));
    }

    #[test]
    fn test_concurrent_claims_never_share_an_address() {
        let inv = Arc::new(Inventory::new());
        inv.create_range(range_record("lab", "10.0.0.0/26")).unwrap();

        let addresses: Vec<Ipv4Addr> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|t| {
                    let inv = Arc::clone(&inv);
                    scope.spawn(move || {
                        (0..10)
                            .filter_map(|i| {
                                inv.claim_fip(fip_record("ns", &format!("fip-{t}-{i}"), "lab", None))
                                    .ok()
                                    .and_then(|c| c.record.address)
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        // 62 usable addresses for 80 claims
        assert_eq!(addresses.len(), 62);
        assert_eq!(addresses.iter().collect::<HashSet<_>>().len(), 62);
        assert_eq!(inv.snapshot().fips().len(), 62);
    }
}
