//! Floating IP Operator
//!
//! Allocates floating IPv4 addresses to Rancher guest clusters and keeps
//! kube-vip configured in them:
//! - FloatingIPRange: an address range on a Harvester provider cluster
//! - FloatingIP: one address claimed from a range for a guest cluster
//!
//! New guest cluster namespaces get a FloatingIP automatically, and a
//! periodic sweep installs kube-vip and writes the `kubevip` ConfigMap into
//! every reachable guest cluster.

mod config;
mod controller;
mod discovery;
mod error;
mod inventory;
mod logging;
mod metrics;
mod model;
mod orchestrator;
mod reconciler;
mod scheduler;
mod server;
mod source;
mod store;
mod watcher;

#[cfg(test)]
mod test_utils;
#[cfg(test)]
mod reconciler_test;

use crate::config::ProcessSettings;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    // kube's rustls client needs a process-wide crypto provider
    let _ = rustls::crypto::ring::default_provider().install_default();

    let log = logging::init();

    info!("Starting Floating IP Operator");

    let settings = ProcessSettings::from_env();
    info!("Configuration:");
    info!("  ConfigMap: {}/{}", settings.namespace, settings.config_map);

    let controller = Controller::new(settings, log).await?;
    controller.run().await?;

    Ok(())
}
