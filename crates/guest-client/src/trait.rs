//! Collaborator traits for mocking
//!
//! The operator talks to the outside world only through these traits. The
//! concrete clients implement them against the Kubernetes API and the helm
//! binary; tests use the in-memory mocks from the `test-util` feature.
//! All async methods must be `Send` to work with Tokio's work-stealing runtime.

use crate::error::GuestError;
use crate::models::{ChartSpec, GuestClusterInfo, GuestKubeconfig};
use k8s_openapi::api::core::v1::ConfigMap;

/// Cluster registry and credential store of the management cluster.
#[async_trait::async_trait]
pub trait ManagementClusterTrait: Send + Sync {
    /// Looks up a guest cluster by name; `None` when it does not exist.
    async fn get_guest_cluster(&self, name: &str) -> Result<Option<GuestClusterInfo>, GuestError>;

    /// Finds the guest cluster whose management namespace is `namespace`.
    async fn find_guest_cluster_by_namespace(
        &self,
        namespace: &str,
    ) -> Result<Option<GuestClusterInfo>, GuestError>;

    /// Display name of the provider (Harvester) cluster hosting `cluster`.
    async fn provider_cluster_name(&self, cluster: &GuestClusterInfo) -> Result<Option<String>, GuestError>;

    /// Provider network name the cluster's machine pool is attached to.
    async fn provider_network_name(&self, cluster: &GuestClusterInfo) -> Result<Option<String>, GuestError>;

    /// Fetches the kubeconfig used to reach the guest cluster.
    async fn guest_kubeconfig(&self, cluster_name: &str) -> Result<GuestKubeconfig, GuestError>;
}

/// Operations executed inside a guest cluster.
#[async_trait::async_trait]
pub trait GuestClusterTrait: Send + Sync {
    /// Connectivity probe. Fails with [`GuestError::Provisioning`] when the
    /// guest answers with the "still provisioning" signal.
    async fn probe(&self, kubeconfig: &GuestKubeconfig) -> Result<(), GuestError>;

    /// Reads a config map; `None` when absent.
    async fn get_config_map(
        &self,
        kubeconfig: &GuestKubeconfig,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, GuestError>;

    /// Creates a config map in its own namespace.
    async fn create_config_map(&self, kubeconfig: &GuestKubeconfig, config_map: &ConfigMap) -> Result<(), GuestError>;

    /// Replaces an existing config map.
    async fn replace_config_map(&self, kubeconfig: &GuestKubeconfig, config_map: &ConfigMap) -> Result<(), GuestError>;
}

/// Installs chart releases into guest clusters.
#[async_trait::async_trait]
pub trait ChartInstallerTrait: Send + Sync {
    /// Whether `release` is already installed in `namespace`.
    async fn release_exists(
        &self,
        kubeconfig: &GuestKubeconfig,
        namespace: &str,
        release: &str,
    ) -> Result<bool, GuestError>;

    /// Installs the chart, or upgrades it in place if the release exists.
    async fn install_or_upgrade(&self, kubeconfig: &GuestKubeconfig, chart: &ChartSpec) -> Result<(), GuestError>;
}
