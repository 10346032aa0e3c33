//! Test utilities for unit testing the operator
//!
//! Builders for custom resources and typed records, plus an in-memory
//! [`FloatingIpSource`].

use crate::error::ControllerError;
use crate::model::{FipKey, FloatingIpRecord, RangeRecord};
use crate::source::FloatingIpSource;
use crds::annotations;
use crds::{FloatingIP, FloatingIPRange, FloatingIPRangeSpec, FloatingIPSpec};
use ipam::UsableSpan;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Helper to create a FloatingIPRange object
pub fn create_test_range(name: &str, cidr: Option<&str>) -> FloatingIPRange {
    FloatingIPRange::new(
        name,
        FloatingIPRangeSpec {
            iprange: cidr.map(str::to_string),
        },
    )
}

/// Helper to create a FloatingIPRange object with provider annotations
pub fn create_test_range_for(name: &str, cidr: &str, cluster: &str, network: Option<&str>) -> FloatingIPRange {
    let mut range = create_test_range(name, Some(cidr));
    let ann = range.annotations_mut();
    ann.insert(annotations::HARVESTER_CLUSTER_NAME.to_string(), cluster.to_string());
    if let Some(network) = network {
        ann.insert(annotations::HARVESTER_NETWORK_NAME.to_string(), network.to_string());
    }
    range
}

/// Helper to create a FloatingIP object. Empty `cluster`/`range` still set
/// the annotation, to exercise validation.
pub fn create_test_fip(
    namespace: &str,
    name: &str,
    cluster: &str,
    range: &str,
    address: Option<&str>,
) -> FloatingIP {
    let mut fip = FloatingIP::new(
        name,
        FloatingIPSpec {
            ipaddress: address.map(str::to_string),
        },
    );
    fip.metadata.namespace = Some(namespace.to_string());
    let ann = fip.annotations_mut();
    ann.insert(annotations::CLUSTER_NAME.to_string(), cluster.to_string());
    ann.insert(annotations::FIP_RANGE.to_string(), range.to_string());
    fip
}

/// Helper to create a validated range record
pub fn range_record(name: &str, cidr: &str) -> RangeRecord {
    RangeRecord {
        name: name.to_string(),
        cidr: cidr.to_string(),
        span: UsableSpan::parse(cidr).unwrap(),
        harvester_cluster: None,
        harvester_network: None,
    }
}

/// Helper to create a validated FloatingIP record owned by cluster `name`
pub fn fip_record(namespace: &str, name: &str, range: &str, address: Option<&str>) -> FloatingIpRecord {
    FloatingIpRecord {
        key: FipKey::new(namespace, name),
        address: address.map(|a| a.parse().unwrap()),
        cluster: name.to_string(),
        range: range.to_string(),
        force_refresh: false,
    }
}

/// In-memory [`FloatingIpSource`].
#[derive(Clone, Default)]
pub struct MemorySource {
    ranges: Arc<Mutex<Vec<FloatingIPRange>>>,
    fips: Arc<Mutex<Vec<FloatingIP>>>,
    persisted: Arc<Mutex<Vec<(FipKey, Ipv4Addr)>>>,
    fail_persist: Arc<AtomicBool>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_range(&self, range: FloatingIPRange) {
        self.ranges.lock().unwrap().push(range);
    }

    pub fn add_fip(&self, fip: FloatingIP) {
        self.fips.lock().unwrap().push(fip);
    }

    /// Makes every `persist_address` call fail
    pub fn fail_persist(&self, fail: bool) {
        self.fail_persist.store(fail, Ordering::SeqCst);
    }

    /// Addresses written back, in call order
    pub fn persisted(&self) -> Vec<(FipKey, Ipv4Addr)> {
        self.persisted.lock().unwrap().clone()
    }

    pub fn fips(&self) -> Vec<FloatingIP> {
        self.fips.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl FloatingIpSource for MemorySource {
    async fn list_ranges(&self) -> Result<Vec<FloatingIPRange>, ControllerError> {
        Ok(self.ranges.lock().unwrap().clone())
    }

    async fn list_floating_ips(&self) -> Result<Vec<FloatingIP>, ControllerError> {
        Ok(self.fips())
    }

    async fn persist_address(&self, key: &FipKey, address: Ipv4Addr) -> Result<(), ControllerError> {
        if self.fail_persist.load(Ordering::SeqCst) {
            return Err(io::Error::other(format!("cannot patch {key}")).into());
        }
        self.persisted.lock().unwrap().push((key.clone(), address));

        let mut fips = self.fips.lock().unwrap();
        if let Some(fip) = fips
            .iter_mut()
            .find(|f| f.metadata.namespace.as_deref() == Some(key.namespace.as_str()) && f.name_any() == key.name)
        {
            fip.spec.ipaddress = Some(address.to_string());
        }
        Ok(())
    }

    async fn namespace_has_floating_ips(&self, namespace: &str) -> Result<bool, ControllerError> {
        Ok(self
            .fips
            .lock()
            .unwrap()
            .iter()
            .any(|f| f.metadata.namespace.as_deref() == Some(namespace)))
    }

    async fn create_floating_ip(&self, fip: &FloatingIP) -> Result<(), ControllerError> {
        self.add_fip(fip.clone());
        Ok(())
    }
}

/// Labels map helper
pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
