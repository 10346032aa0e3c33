//! Guest cluster namespace discovery.
//!
//! Rancher creates a `c-m-*` namespace for every new guest cluster. When one
//! appears, the operator creates a FloatingIP for the cluster in it, drawn
//! from a range on the cluster's Harvester provider. The allocation itself
//! then goes through the normal FloatingIP path.

use crate::error::ControllerError;
use crate::inventory::Inventory;
use crate::model::{FipKey, RangeRecord};
use crate::source::FloatingIpSource;
use crds::{FloatingIP, FloatingIPSpec, annotations};
use guest_client::ManagementClusterTrait;
use kube::ResourceExt;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Prefix of the management namespaces of guest clusters
pub const GUEST_NAMESPACE_PREFIX: &str = "c-m-";

/// Wait for the provisioning objects of a new namespace to appear
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(15);

/// What discovery did with a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// Not a guest cluster namespace, or already handled
    Ignored,
    NoCluster,
    AlreadyHasFloatingIps,
    NoRange,
    Created(FipKey),
}

/// Picks the range for a new guest cluster.
///
/// Candidates are the ranges on `provider`, in name order. The first one on
/// `network` wins; without a network match the first candidate does.
pub fn select_range<'a>(
    ranges: impl IntoIterator<Item = &'a RangeRecord>,
    provider: &str,
    network: Option<&str>,
) -> Option<&'a RangeRecord> {
    let mut candidates: Vec<&RangeRecord> = ranges
        .into_iter()
        .filter(|r| r.harvester_cluster.as_deref() == Some(provider))
        .collect();
    candidates.sort_by(|a, b| a.name.cmp(&b.name));

    network
        .and_then(|network| {
            candidates
                .iter()
                .copied()
                .find(|r| r.harvester_network.as_deref() == Some(network))
        })
        .or_else(|| candidates.first().copied())
}

pub struct NamespaceDiscovery {
    inventory: Arc<Inventory>,
    management: Arc<dyn ManagementClusterTrait>,
    source: Arc<dyn FloatingIpSource>,
    settle_delay: Duration,
    seen: Mutex<HashSet<String>>,
}

impl NamespaceDiscovery {
    pub fn new(
        inventory: Arc<Inventory>,
        management: Arc<dyn ManagementClusterTrait>,
        source: Arc<dyn FloatingIpSource>,
    ) -> Self {
        Self {
            inventory,
            management,
            source,
            settle_delay: DEFAULT_SETTLE_DELAY,
            seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Returns false if `namespace` was handled before.
    fn mark_seen(&self, namespace: &str) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(namespace.to_string())
    }

    fn forget(&self, namespace: &str) {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(namespace);
    }

    /// Handles a namespace notification. A namespace whose handling failed is
    /// retried on its next notification.
    pub async fn handle_namespace(&self, namespace: &str) -> Result<DiscoveryOutcome, ControllerError> {
        if !namespace.starts_with(GUEST_NAMESPACE_PREFIX) || !self.mark_seen(namespace) {
            return Ok(DiscoveryOutcome::Ignored);
        }

        let outcome = self.discover(namespace).await;
        if outcome.is_err() {
            self.forget(namespace);
        }
        outcome
    }

    async fn discover(&self, namespace: &str) -> Result<DiscoveryOutcome, ControllerError> {
        debug!("Namespace {} added, waiting {:?} before lookup", namespace, self.settle_delay);
        tokio::time::sleep(self.settle_delay).await;

        let Some(cluster) = self.management.find_guest_cluster_by_namespace(namespace).await? else {
            info!("No guest cluster owns namespace {}", namespace);
            return Ok(DiscoveryOutcome::NoCluster);
        };
        let Some(provider) = self.management.provider_cluster_name(&cluster).await? else {
            warn!("Guest cluster {} has no provider cluster, no FloatingIP created", cluster.name);
            return Ok(DiscoveryOutcome::NoRange);
        };
        let network = self.management.provider_network_name(&cluster).await?;

        if self.source.namespace_has_floating_ips(namespace).await? {
            debug!("Namespace {} already holds FloatingIPs", namespace);
            return Ok(DiscoveryOutcome::AlreadyHasFloatingIps);
        }

        let snapshot = self.inventory.snapshot();
        let Some(range) = select_range(snapshot.ranges(), &provider, network.as_deref()) else {
            warn!(
                "No FloatingIPRange for provider {} (network {:?}), guest cluster {} gets no FloatingIP",
                provider, network, cluster.name
            );
            return Ok(DiscoveryOutcome::NoRange);
        };

        let key = FipKey::new(namespace, format!("{}-kubevip", cluster.name));
        let mut fip = FloatingIP::new(&key.name, FloatingIPSpec::default());
        fip.metadata.namespace = Some(key.namespace.clone());
        let ann = fip.annotations_mut();
        ann.insert(annotations::CLUSTER_NAME.to_string(), cluster.name.clone());
        ann.insert(annotations::FIP_RANGE.to_string(), range.name.clone());
        ann.insert(annotations::UPDATE_CONFIG_MAP.to_string(), "true".to_string());

        self.source.create_floating_ip(&fip).await?;
        info!("Created FloatingIP {} from range {}", key, range.name);
        Ok(DiscoveryOutcome::Created(key))
    }
}
