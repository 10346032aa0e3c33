//! Main controller implementation.
//!
//! This module wires the inventory, the reconcilers, the periodic sweep and
//! the watchers together and runs them until shutdown.

use crate::config::{OperatorConfig, ProcessSettings, SharedConfig};
use crate::discovery::NamespaceDiscovery;
use crate::error::ControllerError;
use crate::inventory::Inventory;
use crate::logging::LogControl;
use crate::metrics::Metrics;
use crate::orchestrator::GuestOrchestrator;
use crate::reconciler::EventReconciler;
use crate::scheduler::Scheduler;
use crate::server;
use crate::source::{FloatingIpSource, KubeSource};
use crate::watcher::{ACTIVATION_WINDOW, ActivationGate, Watcher};
use guest_client::{GuestClient, HelmInstaller, ManagementClient};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Applies a new runtime config to the running operator.
pub struct ConfigReloader {
    config: Arc<SharedConfig>,
    log: LogControl,
    scheduler: Arc<Scheduler>,
}

impl ConfigReloader {
    pub fn new(config: Arc<SharedConfig>, log: LogControl, scheduler: Arc<Scheduler>) -> Self {
        Self { config, log, scheduler }
    }

    /// Installs `new`, adjusting the log level and the sweep schedule when
    /// they changed.
    pub async fn apply(&self, new: OperatorConfig) {
        let old = self.config.replace(new.clone());
        if old == new {
            return;
        }

        if old.log_level != new.log_level {
            self.log.set_level(&new.log_level);
        }
        if old.sweep_interval != new.sweep_interval {
            self.scheduler.reschedule(new.sweep_interval).await;
        }
        if old.metrics_port != new.metrics_port {
            warn!(
                "Metrics port changed from {} to {}, takes effect after restart",
                old.metrics_port, new.metrics_port
            );
        }
    }
}

type WatchTask = JoinHandle<Result<(), ControllerError>>;

/// Main controller for floating IPs and guest clusters.
pub struct Controller {
    scheduler: Arc<Scheduler>,
    watchers: Vec<(&'static str, WatchTask)>,
    metrics_server: JoinHandle<()>,
}

impl Controller {
    /// Loads the config and the existing resources, then starts the sweep,
    /// the metrics endpoint and the watchers.
    pub async fn new(settings: ProcessSettings, log: LogControl) -> Result<Self, ControllerError> {
        info!("Initializing floating IP operator");

        let client = Client::try_default().await?;

        let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), &settings.namespace);
        let config = match config_maps.get_opt(&settings.config_map).await? {
            Some(config_map) => OperatorConfig::from_config_map(&config_map),
            None => {
                warn!(
                    "ConfigMap {}/{} not found, using defaults",
                    settings.namespace, settings.config_map
                );
                OperatorConfig::default()
            }
        };
        log.set_level(&config.log_level);
        info!("Configuration:");
        info!("  Sweep interval: {:?}", config.sweep_interval);
        info!("  Metrics port: {}", config.metrics_port);
        info!("  Install policy: {:?}", config.install_policy);

        let metrics = Arc::new(Metrics::new()?);
        let metrics_server = server::serve(config.metrics_port, metrics.clone()).await?;

        let inventory = Arc::new(Inventory::new());
        let source: Arc<dyn FloatingIpSource> = Arc::new(KubeSource::new(client.clone()));
        let reconciler = Arc::new(EventReconciler::new(inventory.clone(), metrics.clone(), source.clone()));

        let ranges = source.list_ranges().await?;
        let fips = source.list_floating_ips().await?;
        let report = reconciler.seed(ranges, fips).await;
        info!(
            "Loaded {} FloatingIPRanges and {} FloatingIPs ({} rejected)",
            report.ranges, report.fips, report.failed
        );

        let shared_config = Arc::new(SharedConfig::new(config.clone()));
        let management = Arc::new(ManagementClient::new(client.clone()));
        let orchestrator = Arc::new(GuestOrchestrator::new(
            inventory.clone(),
            metrics.clone(),
            shared_config.clone(),
            management.clone(),
            Arc::new(GuestClient::new()),
            Arc::new(HelmInstaller::default()),
        ));
        let discovery = Arc::new(NamespaceDiscovery::new(inventory, management, source));

        let scheduler = Arc::new(Scheduler::new(orchestrator, metrics));
        scheduler.reschedule(config.sweep_interval).await;

        let reloader = Arc::new(ConfigReloader::new(shared_config, log, scheduler.clone()));
        let watcher = Arc::new(Watcher::new(
            client,
            ActivationGate::new(ACTIVATION_WINDOW),
            reconciler,
            discovery,
            reloader,
        ));

        let mut watchers: Vec<(&'static str, WatchTask)> = Vec::new();
        let w = watcher.clone();
        watchers.push(("FloatingIPRange", tokio::spawn(async move { w.watch_ranges().await })));
        let w = watcher.clone();
        watchers.push(("FloatingIP", tokio::spawn(async move { w.watch_floating_ips().await })));
        let w = watcher.clone();
        watchers.push(("Namespace", tokio::spawn(async move { w.watch_namespaces().await })));
        let w = watcher;
        watchers.push((
            "ConfigMap",
            tokio::spawn(async move { w.watch_config(&settings.namespace, &settings.config_map).await }),
        ));

        Ok(Self {
            scheduler,
            watchers,
            metrics_server,
        })
    }

    /// Runs the controller until a watcher exits or the process is interrupted.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("Floating IP operator running");

        let (names, handles): (Vec<_>, Vec<_>) = self.watchers.into_iter().unzip();
        let result = tokio::select! {
            (result, index, remaining) = futures::future::select_all(handles) => {
                for handle in remaining {
                    handle.abort();
                }
                let kind = names[index];
                match result {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(ControllerError::Watch(format!("{} watcher error: {}", kind, e))),
                    Err(e) => Err(ControllerError::Watch(format!("{} watcher panicked: {}", kind, e))),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("Interrupt received, shutting down"),
                    Err(e) => warn!("Failed to listen for interrupt: {}", e),
                }
                Ok(())
            }
        };

        self.scheduler.shutdown().await;
        self.metrics_server.abort();
        result
    }
}
