//! Guest cluster orchestration.
//!
//! A sweep walks a snapshot of every stored FloatingIP, one target at a time:
//!
//! 1. Check that the owning guest cluster still exists and still owns the
//!    FloatingIP's namespace; skip it as orphaned otherwise
//! 2. Probe the guest's API server
//! 3. Install or upgrade kube-vip and the kube-vip cloud provider, if the
//!    install policy selects the cluster
//! 4. Create the `kubevip` ConfigMap carrying the address, or replace it
//!    when the FloatingIP asks for a refresh
//!
//! A failing step is logged and counted and the sweep moves on; nothing a
//! single guest does can abort the pass over the others.

use crate::config::{ComponentConfig, OperatorConfig, SharedConfig};
use crate::inventory::Inventory;
use crate::metrics::{GuestEvent, Metrics, Outcome};
use crate::model::FloatingIpRecord;
use crate::scheduler::PeriodicJob;
use crate::store::Snapshot;
use chrono::{DateTime, Utc};
use guest_client::{
    ChartInstallerTrait, GuestClusterInfo, GuestClusterTrait, GuestError, GuestKubeconfig, ManagementClusterTrait,
};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name of the ConfigMap kube-vip reads its address pool from
pub const KUBEVIP_CONFIG_MAP: &str = "kubevip";

/// Data key holding the pool
pub const CIDR_GLOBAL_KEY: &str = "cidr-global";

/// Summary of one sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub visited: usize,
    pub orphaned: usize,
    /// Steps that failed with an error, across all targets
    pub failed: usize,
}

enum TargetOutcome {
    Orphaned,
    Visited { failed: usize },
}

/// Per-target labels and credentials, resolved once per visit.
struct Target<'a> {
    fip: &'a FloatingIpRecord,
    provider: String,
    kubeconfig: GuestKubeconfig,
}

impl Target<'_> {
    fn cluster(&self) -> &str {
        &self.fip.cluster
    }
}

pub struct GuestOrchestrator {
    inventory: Arc<Inventory>,
    metrics: Arc<Metrics>,
    config: Arc<SharedConfig>,
    management: Arc<dyn ManagementClusterTrait>,
    guests: Arc<dyn GuestClusterTrait>,
    installer: Arc<dyn ChartInstallerTrait>,
}

impl GuestOrchestrator {
    pub fn new(
        inventory: Arc<Inventory>,
        metrics: Arc<Metrics>,
        config: Arc<SharedConfig>,
        management: Arc<dyn ManagementClusterTrait>,
        guests: Arc<dyn GuestClusterTrait>,
        installer: Arc<dyn ChartInstallerTrait>,
    ) -> Self {
        Self {
            inventory,
            metrics,
            config,
            management,
            guests,
            installer,
        }
    }

    /// Runs one full pass over the stored FloatingIPs.
    pub async fn sweep(&self) -> SweepReport {
        let _sweeping = self.metrics.begin_sweep();
        let config = self.config.snapshot();
        let snapshot = self.inventory.snapshot();
        let mut report = SweepReport {
            started_at: Utc::now(),
            visited: 0,
            orphaned: 0,
            failed: 0,
        };
        info!("Guest cluster sweep started with {} FloatingIPs", snapshot.fips().len());

        for fip in snapshot.fips() {
            report.visited += 1;
            match self.visit(fip, &snapshot, &config).await {
                TargetOutcome::Orphaned => report.orphaned += 1,
                TargetOutcome::Visited { failed } => report.failed += failed,
            }
        }

        if config.trace_ipam_data {
            self.dump(&snapshot);
        }
        info!(
            "Guest cluster sweep started at {} finished: {} visited, {} orphaned, {} failed steps",
            report.started_at.to_rfc3339(),
            report.visited,
            report.orphaned,
            report.failed
        );
        report
    }

    async fn visit(&self, fip: &FloatingIpRecord, snapshot: &Snapshot, config: &OperatorConfig) -> TargetOutcome {
        let fallback_provider = snapshot
            .range(&fip.range)
            .and_then(|r| r.harvester_cluster.clone())
            .unwrap_or_default();

        let cluster = match self.management.get_guest_cluster(&fip.cluster).await {
            Ok(Some(cluster)) if cluster.owns_namespace(&fip.key.namespace) => cluster,
            Ok(_) => {
                info!(
                    "Guest cluster {} of FloatingIP {} no longer exists, skipping",
                    fip.cluster, fip.key
                );
                return TargetOutcome::Orphaned;
            }
            Err(e) => {
                warn!("Cannot look up guest cluster {}: {}", fip.cluster, e);
                self.metrics.set_guest_status(&fip.cluster, &fallback_provider, false);
                self.metrics
                    .inc_guest_event(&fip.cluster, &fallback_provider, GuestEvent::Connectivity, Outcome::Error);
                return TargetOutcome::Visited { failed: 1 };
            }
        };

        let provider = self.provider_name(&cluster, fallback_provider).await;

        let kubeconfig = match self.management.guest_kubeconfig(&fip.cluster).await {
            Ok(kubeconfig) => kubeconfig,
            Err(e) => {
                warn!("Cannot fetch kubeconfig of guest cluster {}: {}", fip.cluster, e);
                self.metrics.set_guest_status(&fip.cluster, &provider, false);
                self.metrics
                    .inc_guest_event(&fip.cluster, &provider, GuestEvent::Connectivity, Outcome::Error);
                return TargetOutcome::Visited { failed: 1 };
            }
        };
        let target = Target {
            fip,
            provider,
            kubeconfig,
        };

        if let Err(failed) = self.probe(&target).await {
            return TargetOutcome::Visited { failed };
        }

        let mut failed = 0;
        if config.install_policy.selects(&cluster.labels) {
            if self
                .install(&target, config, &config.kube_vip, GuestEvent::Install)
                .await
                .is_err()
            {
                failed += 1;
            }
            if self
                .install(&target, config, &config.cloud_provider, GuestEvent::InstallSecondary)
                .await
                .is_err()
            {
                failed += 1;
            }
        } else {
            debug!("Install policy {:?} skips guest cluster {}", config.install_policy, fip.cluster);
        }

        if self.reconcile_config_map(&target, config).await.is_err() {
            failed += 1;
        }
        TargetOutcome::Visited { failed }
    }

    async fn provider_name(&self, cluster: &GuestClusterInfo, fallback: String) -> String {
        match self.management.provider_cluster_name(cluster).await {
            Ok(Some(name)) => name,
            Ok(None) => fallback,
            Err(e) => {
                debug!("Cannot resolve provider cluster of {}: {}", cluster.name, e);
                fallback
            }
        }
    }

    /// Returns the number of failed steps when the target cannot be worked on.
    async fn probe(&self, target: &Target<'_>) -> Result<(), usize> {
        let cluster = target.cluster();
        match self.guests.probe(&target.kubeconfig).await {
            Ok(()) => {
                debug!("Guest cluster {} reachable", cluster);
                self.metrics.set_guest_status(cluster, &target.provider, true);
                self.metrics
                    .inc_guest_event(cluster, &target.provider, GuestEvent::Connectivity, Outcome::Success);
                Ok(())
            }
            Err(e) if e.is_provisioning() => {
                debug!("Guest cluster {} is still provisioning", cluster);
                self.metrics.set_guest_status(cluster, &target.provider, false);
                Err(0)
            }
            Err(e) => {
                warn!("Guest cluster {} unreachable: {}", cluster, e);
                self.metrics.set_guest_status(cluster, &target.provider, false);
                self.metrics
                    .inc_guest_event(cluster, &target.provider, GuestEvent::Connectivity, Outcome::Error);
                Err(1)
            }
        }
    }

    async fn install(
        &self,
        target: &Target<'_>,
        config: &OperatorConfig,
        component: &ComponentConfig,
        event: GuestEvent,
    ) -> Result<(), GuestError> {
        let result = self.install_component(target, config, component).await;
        match &result {
            Ok(false) => {}
            Ok(true) => self
                .metrics
                .inc_guest_event(target.cluster(), &target.provider, event, Outcome::Success),
            Err(e) => {
                warn!(
                    "Failed to install {} into guest cluster {}: {}",
                    component.release_name,
                    target.cluster(),
                    e
                );
                self.metrics
                    .inc_guest_event(target.cluster(), &target.provider, event, Outcome::Error);
            }
        }
        result.map(|_| ())
    }

    /// Returns whether install-or-upgrade ran.
    async fn install_component(
        &self,
        target: &Target<'_>,
        config: &OperatorConfig,
        component: &ComponentConfig,
    ) -> Result<bool, GuestError> {
        if !config.update_in_place
            && self
                .installer
                .release_exists(&target.kubeconfig, &component.namespace, &component.release_name)
                .await?
        {
            debug!(
                "Release {}/{} already present in guest cluster {}",
                component.namespace,
                component.release_name,
                target.cluster()
            );
            return Ok(false);
        }
        self.installer
            .install_or_upgrade(&target.kubeconfig, &config.chart_spec(component))
            .await?;
        Ok(true)
    }

    async fn reconcile_config_map(&self, target: &Target<'_>, config: &OperatorConfig) -> Result<(), GuestError> {
        let fip = target.fip;
        let Some(address) = fip.address else {
            warn!("FloatingIP {} has no address yet, skipping the kubevip ConfigMap", fip.key);
            return Ok(());
        };

        let result = self
            .write_config_map(target, &config.kube_vip.namespace, format!("{address}/32"))
            .await;
        match &result {
            Ok(false) => {}
            Ok(true) => self.metrics.inc_guest_event(
                target.cluster(),
                &target.provider,
                GuestEvent::ConfigReconcile,
                Outcome::Success,
            ),
            Err(e) => {
                warn!(
                    "Failed to reconcile the kubevip ConfigMap of guest cluster {}: {}",
                    target.cluster(),
                    e
                );
                self.metrics.inc_guest_event(
                    target.cluster(),
                    &target.provider,
                    GuestEvent::ConfigReconcile,
                    Outcome::Error,
                );
            }
        }
        result.map(|_| ())
    }

    /// Returns whether the ConfigMap was written.
    async fn write_config_map(&self, target: &Target<'_>, namespace: &str, cidr: String) -> Result<bool, GuestError> {
        let existing = self
            .guests
            .get_config_map(&target.kubeconfig, namespace, KUBEVIP_CONFIG_MAP)
            .await?;

        match existing {
            None => {
                let config_map = ConfigMap {
                    metadata: ObjectMeta {
                        name: Some(KUBEVIP_CONFIG_MAP.to_string()),
                        namespace: Some(namespace.to_string()),
                        ..Default::default()
                    },
                    data: Some(BTreeMap::from([(CIDR_GLOBAL_KEY.to_string(), cidr.clone())])),
                    ..Default::default()
                };
                self.guests.create_config_map(&target.kubeconfig, &config_map).await?;
                info!("Created kubevip ConfigMap in guest cluster {} ({})", target.cluster(), cidr);
                Ok(true)
            }
            Some(mut config_map) if target.fip.force_refresh => {
                config_map
                    .data
                    .get_or_insert_with(BTreeMap::new)
                    .insert(CIDR_GLOBAL_KEY.to_string(), cidr.clone());
                self.guests.replace_config_map(&target.kubeconfig, &config_map).await?;
                info!("Updated kubevip ConfigMap in guest cluster {} ({})", target.cluster(), cidr);
                Ok(true)
            }
            Some(_) => {
                debug!("kubevip ConfigMap of guest cluster {} left untouched", target.cluster());
                Ok(false)
            }
        }
    }

    fn dump(&self, snapshot: &Snapshot) {
        for fip in snapshot.fips() {
            info!(
                "IPAM FloatingIP {}: cluster={} range={} address={:?} refresh={}",
                fip.key, fip.cluster, fip.range, fip.address, fip.force_refresh
            );
        }
        for range in snapshot.ranges() {
            let (capacity, held) = self.inventory.usage(&range.name).unwrap_or_default();
            info!(
                "IPAM FloatingIPRange {}: {} provider={:?} network={:?} capacity={} held={} {:?}",
                range.name,
                range.span,
                range.harvester_cluster,
                range.harvester_network,
                capacity,
                held,
                self.inventory.allocated(&range.name)
            );
        }
    }
}

#[async_trait::async_trait]
impl PeriodicJob for GuestOrchestrator {
    fn name(&self) -> &'static str {
        "guest-sweep"
    }

    async fn run(&self) {
        self.sweep().await;
    }
}
