use crate::error::GuestError;
use crate::guest_trait::GuestClusterTrait;
use crate::models::GuestKubeconfig;
use k8s_openapi::api::core::v1::ConfigMap;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex};

/// Result the mock probe returns for a guest cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Probe succeeds
    #[default]
    Reachable,
    /// Probe fails with the "still provisioning" signal
    Provisioning,
    /// Probe fails with any other error
    Unreachable(String),
}

type ConfigMapKey = (String, String, String);

/// Mock guest clusters, keyed by the cluster name in the kubeconfig.
#[derive(Clone, Default)]
pub struct MockGuestCluster {
    probes: Arc<Mutex<HashMap<String, ProbeOutcome>>>,
    config_maps: Arc<Mutex<BTreeMap<ConfigMapKey, ConfigMap>>>,
    failing_writes: Arc<Mutex<HashSet<String>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockGuestCluster {
    /// Create mock guests that are all reachable and empty
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the probe outcome for `cluster`
    pub fn set_probe(&self, cluster: &str, outcome: ProbeOutcome) {
        self.probes.lock().unwrap().insert(cluster.to_string(), outcome);
    }

    /// Make config map writes to `cluster` fail
    pub fn fail_writes(&self, cluster: &str) {
        self.failing_writes.lock().unwrap().insert(cluster.to_string());
    }

    /// Seed a config map in `cluster`
    pub fn add_config_map(&self, cluster: &str, config_map: ConfigMap) {
        let key = (
            cluster.to_string(),
            config_map.metadata.namespace.clone().unwrap_or_default(),
            config_map.metadata.name.clone().unwrap_or_default(),
        );
        self.config_maps.lock().unwrap().insert(key, config_map);
    }

    /// Stored config map, if any
    pub fn config_map(&self, cluster: &str, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.config_maps
            .lock()
            .unwrap()
            .get(&(cluster.to_string(), namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Calls recorded so far, e.g. `probe guest-a` or `create guest-a kube-system/kubevip`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Recorded calls that targeted `cluster`
    pub fn calls_for(&self, cluster: &str) -> Vec<String> {
        let needle = format!(" {cluster}");
        self.calls()
            .into_iter()
            .filter(|c| c.contains(&needle))
            .collect()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn write(&self, verb: &str, kubeconfig: &GuestKubeconfig, config_map: &ConfigMap) -> Result<(), GuestError> {
        let cluster = kubeconfig.cluster().to_string();
        let namespace = config_map.metadata.namespace.clone().unwrap_or_default();
        let name = config_map.metadata.name.clone().unwrap_or_default();
        self.record(format!("{verb} {cluster} {namespace}/{name}"));

        if self.failing_writes.lock().unwrap().contains(&cluster) {
            return Err(GuestError::Io(io::Error::other(format!("injected {verb} failure for {cluster}"))));
        }
        let mut maps = self.config_maps.lock().unwrap();
        let key = (cluster, namespace, name);
        match (verb, maps.contains_key(&key)) {
            ("create", true) => Err(GuestError::MissingData(format!("{}/{} already exists", key.1, key.2))),
            ("replace", false) => Err(GuestError::NotFound(format!("{}/{}", key.1, key.2))),
            _ => {
                maps.insert(key, config_map.clone());
                Ok(())
            }
        }
    }
}

#[async_trait::async_trait]
impl GuestClusterTrait for MockGuestCluster {
    async fn probe(&self, kubeconfig: &GuestKubeconfig) -> Result<(), GuestError> {
        let cluster = kubeconfig.cluster();
        self.record(format!("probe {cluster}"));
        let outcome = self.probes.lock().unwrap().get(cluster).cloned().unwrap_or_default();
        match outcome {
            ProbeOutcome::Reachable => Ok(()),
            ProbeOutcome::Provisioning => Err(GuestError::Provisioning(cluster.to_string())),
            ProbeOutcome::Unreachable(msg) => Err(GuestError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, msg))),
        }
    }

    async fn get_config_map(
        &self,
        kubeconfig: &GuestKubeconfig,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, GuestError> {
        self.record(format!("get {} {namespace}/{name}", kubeconfig.cluster()));
        Ok(self.config_map(kubeconfig.cluster(), namespace, name))
    }

    async fn create_config_map(&self, kubeconfig: &GuestKubeconfig, config_map: &ConfigMap) -> Result<(), GuestError> {
        self.write("create", kubeconfig, config_map)
    }

    async fn replace_config_map(&self, kubeconfig: &GuestKubeconfig, config_map: &ConfigMap) -> Result<(), GuestError> {
        self.write("replace", kubeconfig, config_map)
    }
}
