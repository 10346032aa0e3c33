use crate::error::GuestError;
use crate::guest_trait::ChartInstallerTrait;
use crate::models::{ChartSpec, GuestKubeconfig};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Mock chart installer keeping releases per (cluster, namespace, release).
#[derive(Clone, Default)]
pub struct MockChartInstaller {
    releases: Arc<Mutex<HashSet<(String, String, String)>>>,
    failing: Arc<Mutex<HashSet<(String, String)>>>,
    installs: Arc<Mutex<Vec<(String, ChartSpec)>>>,
}

impl MockChartInstaller {
    /// Create an installer with no releases
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `release` as already installed in `cluster`
    pub fn add_release(&self, cluster: &str, namespace: &str, release: &str) {
        self.releases
            .lock()
            .unwrap()
            .insert((cluster.to_string(), namespace.to_string(), release.to_string()));
    }

    /// Make installs of `release` into `cluster` fail
    pub fn fail_release(&self, cluster: &str, release: &str) {
        self.failing
            .lock()
            .unwrap()
            .insert((cluster.to_string(), release.to_string()));
    }

    /// Every install_or_upgrade call, in order
    pub fn installs(&self) -> Vec<(String, ChartSpec)> {
        self.installs.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ChartInstallerTrait for MockChartInstaller {
    async fn release_exists(
        &self,
        kubeconfig: &GuestKubeconfig,
        namespace: &str,
        release: &str,
    ) -> Result<bool, GuestError> {
        Ok(self.releases.lock().unwrap().contains(&(
            kubeconfig.cluster().to_string(),
            namespace.to_string(),
            release.to_string(),
        )))
    }

    async fn install_or_upgrade(&self, kubeconfig: &GuestKubeconfig, chart: &ChartSpec) -> Result<(), GuestError> {
        let cluster = kubeconfig.cluster().to_string();
        self.installs.lock().unwrap().push((cluster.clone(), chart.clone()));
        if self
            .failing
            .lock()
            .unwrap()
            .contains(&(cluster.clone(), chart.release_name.clone()))
        {
            return Err(GuestError::Helm(format!("injected failure installing {}", chart.release_name)));
        }
        self.releases
            .lock()
            .unwrap()
            .insert((cluster, chart.namespace.clone(), chart.release_name.clone()));
        Ok(())
    }
}
