//! Upstream source of truth for FloatingIP and FloatingIPRange objects.

use crate::error::ControllerError;
use crate::model::FipKey;
use crds::{FloatingIP, FloatingIPRange};
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use std::net::Ipv4Addr;
use tracing::debug;

/// Reads and writes the custom resources the operator works from.
#[async_trait::async_trait]
pub trait FloatingIpSource: Send + Sync {
    /// Bulk list of every FloatingIPRange
    async fn list_ranges(&self) -> Result<Vec<FloatingIPRange>, ControllerError>;

    /// Bulk list of every FloatingIP in every namespace
    async fn list_floating_ips(&self) -> Result<Vec<FloatingIP>, ControllerError>;

    /// Writes an allocated address back onto the FloatingIP.
    async fn persist_address(&self, key: &FipKey, address: Ipv4Addr) -> Result<(), ControllerError>;

    async fn namespace_has_floating_ips(&self, namespace: &str) -> Result<bool, ControllerError>;

    async fn create_floating_ip(&self, fip: &FloatingIP) -> Result<(), ControllerError>;
}

/// [`FloatingIpSource`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeSource {
    client: Client,
}

impl KubeSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl FloatingIpSource for KubeSource {
    async fn list_ranges(&self) -> Result<Vec<FloatingIPRange>, ControllerError> {
        let api: Api<FloatingIPRange> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_floating_ips(&self) -> Result<Vec<FloatingIP>, ControllerError> {
        let api: Api<FloatingIP> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn persist_address(&self, key: &FipKey, address: Ipv4Addr) -> Result<(), ControllerError> {
        let api: Api<FloatingIP> = Api::namespaced(self.client.clone(), &key.namespace);
        let patch = serde_json::json!({
            "spec": {
                "ipaddress": address.to_string()
            }
        });
        api.patch(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!("Persisted address {} on FloatingIP {}", address, key);
        Ok(())
    }

    async fn namespace_has_floating_ips(&self, namespace: &str) -> Result<bool, ControllerError> {
        let api: Api<FloatingIP> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default().limit(1)).await?;
        Ok(!list.items.is_empty())
    }

    async fn create_floating_ip(&self, fip: &FloatingIP) -> Result<(), ControllerError> {
        let namespace = fip
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| ControllerError::InvalidConfig("FloatingIP without namespace".to_string()))?;
        let api: Api<FloatingIP> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), fip).await?;
        Ok(())
    }
}
