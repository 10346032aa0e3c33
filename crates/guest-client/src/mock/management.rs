use crate::error::GuestError;
use crate::guest_trait::ManagementClusterTrait;
use crate::models::{GuestClusterInfo, GuestKubeconfig};
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Mock cluster registry.
///
/// A cluster added with [`MockManagementCluster::add_cluster`] gets a
/// kubeconfig automatically unless [`MockManagementCluster::drop_kubeconfig`]
/// is called for it.
#[derive(Clone, Default)]
pub struct MockManagementCluster {
    clusters: Arc<Mutex<HashMap<String, GuestClusterInfo>>>,
    provider_clusters: Arc<Mutex<HashMap<String, String>>>,
    provider_networks: Arc<Mutex<HashMap<String, String>>>,
    missing_kubeconfigs: Arc<Mutex<HashSet<String>>>,
    registry_down: Arc<AtomicBool>,
}

impl MockManagementCluster {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a guest cluster named `name` living in management namespace `namespace`
    pub fn add_cluster(&self, name: &str, namespace: &str) -> GuestClusterInfo {
        let info = GuestClusterInfo {
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
            ..GuestClusterInfo::default()
        };
        self.put_cluster(info.clone());
        info
    }

    /// Register or replace a fully specified guest cluster
    pub fn put_cluster(&self, info: GuestClusterInfo) {
        self.clusters.lock().unwrap().insert(info.name.clone(), info);
    }

    /// Set a label on a registered cluster
    pub fn set_label(&self, cluster: &str, key: &str, value: &str) {
        if let Some(info) = self.clusters.lock().unwrap().get_mut(cluster) {
            info.labels.insert(key.to_string(), value.to_string());
        }
    }

    /// Remove a cluster from the registry
    pub fn remove_cluster(&self, name: &str) {
        self.clusters.lock().unwrap().remove(name);
    }

    /// Set the provider cluster name resolved for `cluster`
    pub fn set_provider_cluster_name(&self, cluster: &str, provider: &str) {
        self.provider_clusters
            .lock()
            .unwrap()
            .insert(cluster.to_string(), provider.to_string());
    }

    /// Set the provider network name resolved for `cluster`
    pub fn set_provider_network_name(&self, cluster: &str, network: &str) {
        self.provider_networks
            .lock()
            .unwrap()
            .insert(cluster.to_string(), network.to_string());
    }

    /// Make kubeconfig retrieval for `cluster` fail with NotFound
    pub fn drop_kubeconfig(&self, cluster: &str) {
        self.missing_kubeconfigs.lock().unwrap().insert(cluster.to_string());
    }

    /// Make cluster lookups fail until reset
    pub fn fail_lookups(&self, fail: bool) {
        self.registry_down.store(fail, Ordering::SeqCst);
    }

    fn check_registry(&self) -> Result<(), GuestError> {
        if self.registry_down.load(Ordering::SeqCst) {
            return Err(GuestError::Io(io::Error::other("injected registry failure")));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ManagementClusterTrait for MockManagementCluster {
    async fn get_guest_cluster(&self, name: &str) -> Result<Option<GuestClusterInfo>, GuestError> {
        self.check_registry()?;
        Ok(self.clusters.lock().unwrap().get(name).cloned())
    }

    async fn find_guest_cluster_by_namespace(
        &self,
        namespace: &str,
    ) -> Result<Option<GuestClusterInfo>, GuestError> {
        self.check_registry()?;
        let clusters = self.clusters.lock().unwrap();
        let mut matching: Vec<_> = clusters.values().filter(|c| c.owns_namespace(namespace)).collect();
        matching.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(matching.first().map(|c| (*c).clone()))
    }

    async fn provider_cluster_name(&self, cluster: &GuestClusterInfo) -> Result<Option<String>, GuestError> {
        Ok(self.provider_clusters.lock().unwrap().get(&cluster.name).cloned())
    }

    async fn provider_network_name(&self, cluster: &GuestClusterInfo) -> Result<Option<String>, GuestError> {
        Ok(self.provider_networks.lock().unwrap().get(&cluster.name).cloned())
    }

    async fn guest_kubeconfig(&self, cluster_name: &str) -> Result<GuestKubeconfig, GuestError> {
        if self.missing_kubeconfigs.lock().unwrap().contains(cluster_name) {
            return Err(GuestError::NotFound(format!("secret fleet-default/{cluster_name}-kubeconfig")));
        }
        Ok(GuestKubeconfig::new(
            cluster_name,
            format!("apiVersion: v1\nkind: Config\ncurrent-context: {cluster_name}\n"),
        ))
    }
}
