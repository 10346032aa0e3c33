//! Kubernetes resource watchers.
//!
//! One watch per resource kind, each running in its own task so that events
//! of one kind are processed in order while different kinds proceed
//! independently. Every watch drops events until the activation window has
//! passed; the startup bulk load has already covered those objects.

use crate::config::OperatorConfig;
use crate::controller::ConfigReloader;
use crate::discovery::NamespaceDiscovery;
use crate::error::ControllerError;
use crate::reconciler::EventReconciler;
use crds::{FloatingIP, FloatingIPRange};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use kube::{Api, Client, ResourceExt};
use kube_runtime::{WatchStreamExt, watcher};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Events arriving this soon after the watches start are discarded
pub const ACTIVATION_WINDOW: Duration = Duration::from_secs(30);

/// Opens once the activation window has elapsed.
#[derive(Debug, Clone, Copy)]
pub struct ActivationGate {
    opens_at: Instant,
}

impl ActivationGate {
    pub fn new(window: Duration) -> Self {
        Self {
            opens_at: Instant::now() + window,
        }
    }

    pub fn is_open(&self) -> bool {
        Instant::now() >= self.opens_at
    }
}

/// An object change delivered by a watch, after gating.
enum Change<K> {
    Apply(K),
    Delete(K),
}

/// Watches the operator's resources and dispatches their events.
pub struct Watcher {
    client: Client,
    gate: ActivationGate,
    reconciler: Arc<EventReconciler>,
    discovery: Arc<NamespaceDiscovery>,
    reloader: Arc<ConfigReloader>,
}

impl Watcher {
    pub fn new(
        client: Client,
        gate: ActivationGate,
        reconciler: Arc<EventReconciler>,
        discovery: Arc<NamespaceDiscovery>,
        reloader: Arc<ConfigReloader>,
    ) -> Self {
        Self {
            client,
            gate,
            reconciler,
            discovery,
            reloader,
        }
    }

    /// Maps a watch event onto a change, dropping it while the gate is closed.
    fn admit<K: ResourceExt>(&self, kind: &str, event: watcher::Event<K>) -> Option<Change<K>> {
        let change = match event {
            watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) => Change::Apply(obj),
            watcher::Event::Delete(obj) => Change::Delete(obj),
            watcher::Event::Init => {
                debug!("{} watcher (re)listing", kind);
                return None;
            }
            watcher::Event::InitDone => {
                debug!("{} watcher initialization complete", kind);
                return None;
            }
        };
        if self.gate.is_open() {
            Some(change)
        } else {
            let name = match &change {
                Change::Apply(obj) | Change::Delete(obj) => obj.name_any(),
            };
            debug!("Discarding {} event for {} during activation window", kind, name);
            None
        }
    }

    /// Starts watching FloatingIPRange resources.
    pub async fn watch_ranges(&self) -> Result<(), ControllerError> {
        info!("Starting FloatingIPRange watcher");
        let api: Api<FloatingIPRange> = Api::all(self.client.clone());
        let mut stream = watcher(api, watcher::Config::default()).default_backoff().boxed();

        while let Some(event) = stream.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    warn!("FloatingIPRange watch error: {}", e);
                    continue;
                }
            };
            match self.admit("FloatingIPRange", event) {
                Some(Change::Apply(range)) => {
                    debug!("FloatingIPRange applied: {}", range.name_any());
                    if let Err(e) = self.reconciler.apply_range(&range).await {
                        warn!("Failed to apply FloatingIPRange {}: {}", range.name_any(), e);
                    }
                }
                Some(Change::Delete(range)) => {
                    info!("FloatingIPRange deleted: {}", range.name_any());
                    if let Err(e) = self.reconciler.delete_range(&range).await {
                        warn!("Failed to delete FloatingIPRange {}: {}", range.name_any(), e);
                    }
                }
                None => {}
            }
        }

        Err(ControllerError::Watch("FloatingIPRange watch stream ended".to_string()))
    }

    /// Starts watching FloatingIP resources in all namespaces.
    pub async fn watch_floating_ips(&self) -> Result<(), ControllerError> {
        info!("Starting FloatingIP watcher");
        let api: Api<FloatingIP> = Api::all(self.client.clone());
        let mut stream = watcher(api, watcher::Config::default()).default_backoff().boxed();

        while let Some(event) = stream.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    warn!("FloatingIP watch error: {}", e);
                    continue;
                }
            };
            match self.admit("FloatingIP", event) {
                Some(Change::Apply(fip)) => {
                    let key = format!("{}/{}", fip.namespace().unwrap_or_default(), fip.name_any());
                    debug!("FloatingIP applied: {}", key);
                    if let Err(e) = self.reconciler.apply_floating_ip(&fip).await {
                        warn!("Failed to apply FloatingIP {}: {}", key, e);
                    }
                }
                Some(Change::Delete(fip)) => {
                    let key = format!("{}/{}", fip.namespace().unwrap_or_default(), fip.name_any());
                    info!("FloatingIP deleted: {}", key);
                    if let Err(e) = self.reconciler.delete_floating_ip(&fip).await {
                        warn!("Failed to delete FloatingIP {}: {}", key, e);
                    }
                }
                None => {}
            }
        }

        Err(ControllerError::Watch("FloatingIP watch stream ended".to_string()))
    }

    /// Starts watching namespaces for new guest clusters.
    pub async fn watch_namespaces(&self) -> Result<(), ControllerError> {
        info!("Starting Namespace watcher");
        let api: Api<Namespace> = Api::all(self.client.clone());
        let mut stream = watcher(api, watcher::Config::default()).default_backoff().boxed();

        while let Some(event) = stream.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    warn!("Namespace watch error: {}", e);
                    continue;
                }
            };
            let Some(Change::Apply(namespace)) = self.admit("Namespace", event) else {
                continue;
            };
            if namespace.metadata.deletion_timestamp.is_some() {
                continue;
            }

            // discovery waits for the cluster objects; don't hold up the watch
            let discovery = self.discovery.clone();
            let name = namespace.name_any();
            tokio::spawn(async move {
                if let Err(e) = discovery.handle_namespace(&name).await {
                    warn!("FloatingIP discovery for namespace {} failed: {}", name, e);
                }
            });
        }

        Err(ControllerError::Watch("Namespace watch stream ended".to_string()))
    }

    /// Starts watching the runtime ConfigMap.
    pub async fn watch_config(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        info!("Starting ConfigMap watcher for {}/{}", namespace, name);
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let config = watcher::Config::default().fields(&format!("metadata.name={name}"));
        let mut stream = watcher(api, config).default_backoff().boxed();

        while let Some(event) = stream.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    warn!("ConfigMap watch error: {}", e);
                    continue;
                }
            };
            match self.admit("ConfigMap", event) {
                Some(Change::Apply(config_map)) => {
                    info!("ConfigMap {}/{} changed, reloading options", namespace, name);
                    self.reloader.apply(OperatorConfig::from_config_map(&config_map)).await;
                }
                Some(Change::Delete(_)) => {
                    warn!("ConfigMap {}/{} deleted, restoring defaults", namespace, name);
                    self.reloader.apply(OperatorConfig::default()).await;
                }
                None => {}
            }
        }

        Err(ControllerError::Watch("ConfigMap watch stream ended".to_string()))
    }
}
