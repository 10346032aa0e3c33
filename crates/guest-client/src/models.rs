//! Data exchanged with the guest-access collaborators

use kube::core::DynamicObject;
use std::collections::BTreeMap;
use std::fmt;

/// Guest cluster as registered in the management cluster
/// (`clusters.provisioning.cattle.io` in `fleet-default`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuestClusterInfo {
    /// Object name, which is also the cluster name used in annotations
    pub name: String,
    /// `status.clusterName`: the management namespace of the cluster
    pub namespace: Option<String>,
    /// Object labels
    pub labels: BTreeMap<String, String>,
    /// Secret name from `spec.cloudCredentialSecretName` (`<ns>:<name>`)
    pub cloud_credential_secret: Option<String>,
    /// First `HarvesterConfig` machine pool config reference
    pub machine_config_ref: Option<String>,
}

impl GuestClusterInfo {
    /// Extracts the fields kube-fip needs from a provisioning cluster object.
    pub fn from_dynamic(obj: &DynamicObject) -> Self {
        let data = &obj.data;
        let namespace = data
            .pointer("/status/clusterName")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let cloud_credential_secret = data
            .pointer("/spec/cloudCredentialSecretName")
            .and_then(|v| v.as_str())
            .and_then(|s| s.split_once(':').map(|(_, name)| name).or(Some(s)))
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let machine_config_ref = data
            .pointer("/spec/rkeConfig/machinePools")
            .and_then(|v| v.as_array())
            .and_then(|pools| {
                pools.iter().find_map(|pool| {
                    let config_ref = pool.get("machineConfigRef")?;
                    if config_ref.get("kind")?.as_str()? != "HarvesterConfig" {
                        return None;
                    }
                    config_ref.get("name")?.as_str().map(str::to_string)
                })
            });

        Self {
            name: obj.metadata.name.clone().unwrap_or_default(),
            namespace,
            labels: obj.metadata.labels.clone().unwrap_or_default(),
            cloud_credential_secret,
            machine_config_ref,
        }
    }

    /// Whether this cluster object currently owns `namespace`.
    pub fn owns_namespace(&self, namespace: &str) -> bool {
        self.namespace.as_deref() == Some(namespace)
    }
}

/// Raw kubeconfig of a guest cluster.
///
/// `Debug` never prints the contents.
#[derive(Clone, PartialEq, Eq)]
pub struct GuestKubeconfig {
    cluster: String,
    yaml: String,
}

impl GuestKubeconfig {
    /// Wraps kubeconfig YAML for `cluster`.
    pub fn new(cluster: impl Into<String>, yaml: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            yaml: yaml.into(),
        }
    }

    /// Guest cluster the kubeconfig belongs to
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Kubeconfig YAML
    pub fn yaml(&self) -> &str {
        &self.yaml
    }
}

impl fmt::Debug for GuestKubeconfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuestKubeconfig")
            .field("cluster", &self.cluster)
            .field("yaml", &"<redacted>")
            .finish()
    }
}

/// One chart release to install or upgrade in a guest cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChartSpec {
    /// Helm release name
    pub release_name: String,
    /// Chart reference, e.g. `kube-vip/kube-vip`
    pub chart: String,
    /// Target namespace
    pub namespace: String,
    /// Local name of the chart repository
    pub repo_name: String,
    /// Chart repository URL
    pub repo_url: String,
    /// Chart version; latest when `None`
    pub version: Option<String>,
    /// Values document (YAML or JSON)
    pub values: String,
}
