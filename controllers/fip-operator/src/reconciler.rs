//! Event reconciliation for FloatingIPRange and FloatingIP objects.
//!
//! The watch delivers the current object, not a create/update distinction.
//! Each `Apply` is compared with the stored record: an unknown identity is a
//! create, a changed record is a delete of the old record followed by a
//! create of the new one, and an identical record is ignored. The last case
//! absorbs the echo of an address the operator wrote back itself.

use crate::error::ControllerError;
use crate::inventory::Inventory;
use crate::metrics::Metrics;
use crate::model::{FipKey, FloatingIpRecord, RangeRecord};
use crate::source::FloatingIpSource;
use crds::{FloatingIP, FloatingIPRange};
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Counts from the startup bulk load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub ranges: usize,
    pub fips: usize,
    pub failed: usize,
}

/// Applies range and FloatingIP events to the inventory.
pub struct EventReconciler {
    inventory: Arc<Inventory>,
    metrics: Arc<Metrics>,
    source: Arc<dyn FloatingIpSource>,
}

impl EventReconciler {
    pub fn new(inventory: Arc<Inventory>, metrics: Arc<Metrics>, source: Arc<dyn FloatingIpSource>) -> Self {
        Self {
            inventory,
            metrics,
            source,
        }
    }

    /// Handles an `Apply` of a FloatingIPRange.
    pub async fn apply_range(&self, obj: &FloatingIPRange) -> Result<(), ControllerError> {
        let name = obj.name_any();
        let incoming = RangeRecord::try_from(obj);

        let Some(stored) = self.inventory.range(&name) else {
            return self.create_range(incoming?);
        };

        if incoming.as_ref().is_ok_and(|record| *record == stored) {
            debug!("FloatingIPRange {} unchanged", name);
            return Ok(());
        }

        info!("FloatingIPRange {} updated", name);
        if let Err(e) = self.remove_range(&stored.name) {
            error!("Failed to remove previous FloatingIPRange {}: {}", name, e);
        }
        self.create_range(incoming?)
    }

    /// Handles a `Delete` of a FloatingIPRange.
    pub async fn delete_range(&self, obj: &FloatingIPRange) -> Result<(), ControllerError> {
        self.remove_range(&obj.name_any())
    }

    fn create_range(&self, record: RangeRecord) -> Result<(), ControllerError> {
        let registration = self.inventory.create_range(record)?;
        self.metrics
            .set_range_usage(&registration.record, registration.capacity, registration.readopted);
        info!(
            "FloatingIPRange {} registered: {} ({} usable, {} readopted)",
            registration.record.name, registration.record.span, registration.capacity, registration.readopted
        );
        Ok(())
    }

    fn remove_range(&self, name: &str) -> Result<(), ControllerError> {
        let removal = self.inventory.delete_range(name)?;
        self.metrics.remove_range(&removal.record);
        if removal.orphaned > 0 {
            warn!(
                "FloatingIPRange {} removed while {} FloatingIPs still reference it",
                name, removal.orphaned
            );
        } else {
            info!("FloatingIPRange {} removed", name);
        }
        Ok(())
    }

    /// Handles an `Apply` of a FloatingIP.
    pub async fn apply_floating_ip(&self, obj: &FloatingIP) -> Result<(), ControllerError> {
        let key = FipKey::new(obj.namespace().unwrap_or_default(), obj.name_any());
        let incoming = FloatingIpRecord::try_from(obj);

        let Some(stored) = self.inventory.fip(&key) else {
            let incoming = incoming?;
            let upstream_has_address = incoming.address.is_some();
            return self.create_fip(incoming, upstream_has_address).await;
        };

        let mut incoming = match incoming {
            Ok(record) => record,
            Err(e) => {
                info!("FloatingIP {} updated to an invalid object, releasing it", key);
                if let Err(release_err) = self.release_fip(&stored.key) {
                    error!("Failed to release previous FloatingIP {}: {}", stored.key, release_err);
                }
                return Err(e.into());
            }
        };
        let upstream_has_address = incoming.address.is_some();

        // an object not yet carrying our write-back keeps its address
        if incoming.address.is_none() && incoming.range == stored.range {
            incoming.address = stored.address;
        }
        if incoming == stored {
            debug!("FloatingIP {} unchanged", incoming.key);
            if !upstream_has_address {
                if let Some(address) = stored.address {
                    self.source.persist_address(&stored.key, address).await?;
                }
            }
            return Ok(());
        }

        info!("FloatingIP {} updated", incoming.key);
        if let Err(e) = self.release_fip(&stored.key) {
            error!("Failed to release previous FloatingIP {}: {}", stored.key, e);
        }
        self.create_fip(incoming, upstream_has_address).await
    }

    /// Handles a `Delete` of a FloatingIP. The owning cluster's guest series
    /// are queued for removal.
    pub async fn delete_floating_ip(&self, obj: &FloatingIP) -> Result<(), ControllerError> {
        let key = FipKey::new(obj.namespace().unwrap_or_default(), obj.name_any());
        let record = self.release_fip(&key)?;
        self.metrics.queue_cleanup(&record.cluster);
        Ok(())
    }

    /// Claims an address, writes it back if the object lacks it, and rolls
    /// the claim back when the write fails.
    async fn create_fip(&self, record: FloatingIpRecord, upstream_has_address: bool) -> Result<(), ControllerError> {
        let key = record.key.clone();
        let claim = self.inventory.claim_fip(record)?;

        if let (false, Some(address)) = (upstream_has_address, claim.record.address) {
            if let Err(e) = self.source.persist_address(&key, address).await {
                self.inventory.rollback_claim(&key);
                return Err(e);
            }
        }

        if let Some(range) = &claim.range {
            self.metrics.inc_reserved(range);
        }
        info!(
            "FloatingIP {} holds {} from {}{}",
            key,
            claim
                .record
                .address
                .map(|a| a.to_string())
                .unwrap_or_default(),
            claim.record.range,
            if claim.allocated { " (allocated)" } else { "" }
        );
        Ok(())
    }

    fn release_fip(&self, key: &FipKey) -> Result<FloatingIpRecord, ControllerError> {
        let release = self.inventory.release_fip(key)?;
        if let (true, Some(range)) = (release.released, &release.range) {
            self.metrics.dec_reserved(range);
        }
        info!("FloatingIP {} released", key);
        Ok(release.record)
    }

    /// Seeds the inventory from the startup bulk list. Ranges go first, in
    /// name order, then FloatingIPs that already carry an address, so that
    /// next-free allocation never takes an address claimed further down the
    /// list. Individual failures are logged and counted.
    pub async fn seed(&self, mut ranges: Vec<FloatingIPRange>, mut fips: Vec<FloatingIP>) -> SeedReport {
        let mut report = SeedReport::default();
        ranges.sort_by_key(|r| r.name_any());
        fips.sort_by_key(|f| f.spec.ipaddress.as_deref().is_none_or(|a| a.trim().is_empty()));

        for range in &ranges {
            match self.apply_range(range).await {
                Ok(()) => report.ranges += 1,
                Err(e) => {
                    error!("Failed to load FloatingIPRange {}: {}", range.name_any(), e);
                    report.failed += 1;
                }
            }
        }
        for fip in &fips {
            match self.apply_floating_ip(fip).await {
                Ok(()) => report.fips += 1,
                Err(e) => {
                    error!(
                        "Failed to load FloatingIP {}/{}: {}",
                        fip.namespace().unwrap_or_default(),
                        fip.name_any(),
                        e
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }
}
