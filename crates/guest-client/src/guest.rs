//! Guest cluster access through its kubeconfig

use crate::error::GuestError;
use crate::guest_trait::GuestClusterTrait;
use crate::models::GuestKubeconfig;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::api::{ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use tracing::debug;

/// Namespace listed by the connectivity probe
pub const PROBE_NAMESPACE: &str = "kube-system";

/// Opens a fresh client per call; guest credentials are never cached.
#[derive(Debug, Clone, Default)]
pub struct GuestClient;

impl GuestClient {
    /// Creates a guest client.
    pub fn new() -> Self {
        Self
    }

    async fn connect(&self, kubeconfig: &GuestKubeconfig) -> Result<Client, GuestError> {
        let parsed = Kubeconfig::from_yaml(kubeconfig.yaml())
            .map_err(|e| GuestError::Kubeconfig(format!("{}: {e}", kubeconfig.cluster())))?;
        let config = Config::from_custom_kubeconfig(parsed, &KubeConfigOptions::default())
            .await
            .map_err(|e| GuestError::Kubeconfig(format!("{}: {e}", kubeconfig.cluster())))?;
        Ok(Client::try_from(config)?)
    }
}

fn namespace_of(config_map: &ConfigMap) -> Result<&str, GuestError> {
    config_map
        .metadata
        .namespace
        .as_deref()
        .ok_or_else(|| GuestError::MissingData("config map without namespace".to_string()))
}

fn name_of(config_map: &ConfigMap) -> Result<&str, GuestError> {
    config_map
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| GuestError::MissingData("config map without name".to_string()))
}

#[async_trait::async_trait]
impl GuestClusterTrait for GuestClient {
    async fn probe(&self, kubeconfig: &GuestKubeconfig) -> Result<(), GuestError> {
        let client = self.connect(kubeconfig).await?;
        let pods: Api<Pod> = Api::namespaced(client, PROBE_NAMESPACE);
        match pods.list(&ListParams::default().limit(1)).await {
            Ok(_) => Ok(()),
            // Rancher answers 403 until the guest finished bootstrapping
            Err(kube::Error::Api(resp)) if resp.code == 403 => {
                debug!("Guest cluster {} answered 403: {}", kubeconfig.cluster(), resp.message);
                Err(GuestError::Provisioning(kubeconfig.cluster().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_config_map(
        &self,
        kubeconfig: &GuestKubeconfig,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, GuestError> {
        let client = self.connect(kubeconfig).await?;
        let api: Api<ConfigMap> = Api::namespaced(client, namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_config_map(&self, kubeconfig: &GuestKubeconfig, config_map: &ConfigMap) -> Result<(), GuestError> {
        let client = self.connect(kubeconfig).await?;
        let api: Api<ConfigMap> = Api::namespaced(client, namespace_of(config_map)?);
        api.create(&PostParams::default(), config_map).await?;
        Ok(())
    }

    async fn replace_config_map(&self, kubeconfig: &GuestKubeconfig, config_map: &ConfigMap) -> Result<(), GuestError> {
        let client = self.connect(kubeconfig).await?;
        let api: Api<ConfigMap> = Api::namespaced(client, namespace_of(config_map)?);
        api.replace(name_of(config_map)?, &PostParams::default(), config_map)
            .await?;
        Ok(())
    }
}
