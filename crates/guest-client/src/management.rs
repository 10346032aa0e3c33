//! Rancher management-cluster client
//!
//! Resolves guest clusters from `clusters.provisioning.cattle.io`, the
//! provider cluster name through the cloud credential secret and
//! `clusters.management.cattle.io`, and the provider network through
//! `harvesterconfigs.rke-machine-config.cattle.io`.

use crate::error::GuestError;
use crate::models::{GuestClusterInfo, GuestKubeconfig};
use crate::guest_trait::ManagementClusterTrait;
use k8s_openapi::api::core::v1::Secret;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::api::ListParams;
use kube::{Api, Client};
use tracing::debug;

/// Namespace holding provisioning clusters, machine configs and kubeconfigs
pub const FLEET_NAMESPACE: &str = "fleet-default";

/// Namespace holding cloud credential secrets
pub const CREDENTIAL_NAMESPACE: &str = "cattle-global-data";

const CREDENTIAL_CLUSTER_ID_KEY: &str = "harvestercredentialConfig-clusterId";
const KUBECONFIG_KEY: &str = "value";

/// Client for the management cluster the operator runs in.
#[derive(Clone)]
pub struct ManagementClient {
    client: Client,
    provisioning_clusters: ApiResource,
    management_clusters: ApiResource,
    harvester_configs: ApiResource,
}

impl ManagementClient {
    /// Creates a client on top of an existing kube client.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            provisioning_clusters: ApiResource::from_gvk(&GroupVersionKind::gvk(
                "provisioning.cattle.io",
                "v1",
                "Cluster",
            )),
            management_clusters: ApiResource::from_gvk(&GroupVersionKind::gvk(
                "management.cattle.io",
                "v3",
                "Cluster",
            )),
            harvester_configs: ApiResource::from_gvk(&GroupVersionKind::gvk(
                "rke-machine-config.cattle.io",
                "v1",
                "HarvesterConfig",
            )),
        }
    }

    fn clusters(&self) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), FLEET_NAMESPACE, &self.provisioning_clusters)
    }

    async fn secret_value(&self, namespace: &str, name: &str, key: &str) -> Result<String, GuestError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets
            .get_opt(name)
            .await?
            .ok_or_else(|| GuestError::NotFound(format!("secret {namespace}/{name}")))?;
        let bytes = secret
            .data
            .as_ref()
            .and_then(|data| data.get(key))
            .ok_or_else(|| GuestError::MissingData(format!("key {key} in secret {namespace}/{name}")))?;
        String::from_utf8(bytes.0.clone())
            .map_err(|e| GuestError::MissingData(format!("key {key} in secret {namespace}/{name} is not UTF-8: {e}")))
    }
}

#[async_trait::async_trait]
impl ManagementClusterTrait for ManagementClient {
    async fn get_guest_cluster(&self, name: &str) -> Result<Option<GuestClusterInfo>, GuestError> {
        let obj = self.clusters().get_opt(name).await?;
        Ok(obj.as_ref().map(GuestClusterInfo::from_dynamic))
    }

    async fn find_guest_cluster_by_namespace(
        &self,
        namespace: &str,
    ) -> Result<Option<GuestClusterInfo>, GuestError> {
        let list = self.clusters().list(&ListParams::default()).await?;
        let found = list
            .items
            .iter()
            .map(GuestClusterInfo::from_dynamic)
            .find(|info| info.owns_namespace(namespace));
        debug!("Guest cluster for namespace {}: {:?}", namespace, found.as_ref().map(|c| &c.name));
        Ok(found)
    }

    async fn provider_cluster_name(&self, cluster: &GuestClusterInfo) -> Result<Option<String>, GuestError> {
        let Some(secret_name) = cluster.cloud_credential_secret.as_deref() else {
            debug!("Guest cluster {} has no cloud credential", cluster.name);
            return Ok(None);
        };
        let cluster_id = self
            .secret_value(CREDENTIAL_NAMESPACE, secret_name, CREDENTIAL_CLUSTER_ID_KEY)
            .await?;

        let management: Api<DynamicObject> = Api::all_with(self.client.clone(), &self.management_clusters);
        let provider = management
            .get_opt(&cluster_id)
            .await?
            .ok_or_else(|| GuestError::NotFound(format!("management cluster {cluster_id}")))?;
        let display_name = provider
            .data
            .pointer("/spec/displayName")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        debug!("Provider cluster of {}: {:?}", cluster.name, display_name);
        Ok(display_name)
    }

    async fn provider_network_name(&self, cluster: &GuestClusterInfo) -> Result<Option<String>, GuestError> {
        let Some(config_ref) = cluster.machine_config_ref.as_deref() else {
            return Ok(None);
        };
        let configs: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), FLEET_NAMESPACE, &self.harvester_configs);
        let Some(config) = configs.get_opt(config_ref).await? else {
            return Ok(None);
        };
        // networkName is "<namespace>/<network>"
        let network = config
            .data
            .get("networkName")
            .and_then(|v| v.as_str())
            .and_then(|s| s.split_once('/'))
            .map(|(_, network)| network.to_string())
            .filter(|s| !s.is_empty());
        Ok(network)
    }

    async fn guest_kubeconfig(&self, cluster_name: &str) -> Result<GuestKubeconfig, GuestError> {
        let yaml = self
            .secret_value(FLEET_NAMESPACE, &format!("{cluster_name}-kubeconfig"), KUBECONFIG_KEY)
            .await?;
        Ok(GuestKubeconfig::new(cluster_name, yaml))
    }
}
