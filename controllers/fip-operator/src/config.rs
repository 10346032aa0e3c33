//! Operator configuration.
//!
//! Process settings come from environment variables; runtime options come
//! from the `kube-fip-config` ConfigMap and can change while the operator
//! runs. Every option has a default, and a value that fails to parse keeps
//! its default.

use guest_client::ChartSpec;
use k8s_openapi::api::core::v1::ConfigMap;
use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::{error, warn};

/// Namespace the operator and its ConfigMap live in
pub const DEFAULT_NAMESPACE: &str = "kube-fip";

/// Name of the runtime ConfigMap
pub const DEFAULT_CONFIG_MAP: &str = "kube-fip-config";

/// Local name of the kube-vip chart repository
pub const CHART_REPO_NAME: &str = "kube-vip";

/// Cluster label read by the label-gated install policy
pub const INSTALL_LABEL: &str = "kube-vip";

const DEFAULT_KUBE_VIP_VALUES: &str = r#"{"image":{"repository":"plndr/kube-vip","tag":"v0.6.4"},"config":{"vip_interface":"enp1s0"},"nodeSelector":{"node-role.kubernetes.io/master":"true"}}"#;
const DEFAULT_CLOUD_PROVIDER_VALUES: &str = r#"{"image":{"repository":"kubevip/kube-vip-cloud-provider","tag":"v0.0.7"}}"#;

/// Process-level settings read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSettings {
    /// Namespace holding the runtime ConfigMap
    pub namespace: String,
    /// Name of the runtime ConfigMap
    pub config_map: String,
}

impl ProcessSettings {
    /// Reads `KUBEFIP_NAMESPACE` and `KUBEFIP_CONFIGMAP`.
    pub fn from_env() -> Self {
        Self {
            namespace: env::var("KUBEFIP_NAMESPACE").unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string()),
            config_map: env::var("KUBEFIP_CONFIGMAP").unwrap_or_else(|_| DEFAULT_CONFIG_MAP.to_string()),
        }
    }
}

/// When kube-vip is installed into guest clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstallPolicy {
    /// Never install
    Disabled,
    /// Always install or upgrade
    Enabled,
    /// Install only if the cluster's `kube-vip` label is true
    #[default]
    LabelGated,
}

impl FromStr for InstallPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" => Ok(InstallPolicy::Disabled),
            "enabled" => Ok(InstallPolicy::Enabled),
            "clusterlabel" | "label-gated" => Ok(InstallPolicy::LabelGated),
            other => Err(format!("unknown install policy {other:?}")),
        }
    }
}

impl InstallPolicy {
    /// Whether a cluster with `labels` gets the components installed.
    pub fn selects(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            InstallPolicy::Disabled => false,
            InstallPolicy::Enabled => true,
            InstallPolicy::LabelGated => match labels.get(INSTALL_LABEL) {
                None => false,
                Some(value) => parse_bool(value).unwrap_or_else(|| {
                    error!("Cannot parse cluster label {}={:?} as a boolean", INSTALL_LABEL, value);
                    false
                }),
            },
        }
    }
}

/// One chart installed into guest clusters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentConfig {
    /// Namespace of the release
    pub namespace: String,
    /// Helm release name
    pub release_name: String,
    /// Chart reference
    pub chart: String,
    /// Chart version; latest when `None`
    pub version: Option<String>,
    /// Values document
    pub values: String,
}

/// Options read from the runtime ConfigMap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    pub log_level: String,
    pub trace_ipam_data: bool,
    pub sweep_interval: Duration,
    pub metrics_port: u16,
    pub install_policy: InstallPolicy,
    pub chart_repo_url: String,
    /// kube-vip; its namespace also receives the `kubevip` ConfigMap
    pub kube_vip: ComponentConfig,
    pub cloud_provider: ComponentConfig,
    /// Upgrade releases that are already installed
    pub update_in_place: bool,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            log_level: "Info".to_string(),
            trace_ipam_data: false,
            sweep_interval: Duration::from_secs(480),
            metrics_port: 8080,
            install_policy: InstallPolicy::LabelGated,
            chart_repo_url: "https://kube-vip.io/helm-charts".to_string(),
            kube_vip: ComponentConfig {
                namespace: "kube-system".to_string(),
                release_name: "kube-vip".to_string(),
                chart: format!("{CHART_REPO_NAME}/kube-vip"),
                version: None,
                values: DEFAULT_KUBE_VIP_VALUES.to_string(),
            },
            cloud_provider: ComponentConfig {
                namespace: "kube-system".to_string(),
                release_name: "kube-vip-cloud-provider".to_string(),
                chart: format!("{CHART_REPO_NAME}/kube-vip-cloud-provider"),
                version: None,
                values: DEFAULT_CLOUD_PROVIDER_VALUES.to_string(),
            },
            update_in_place: false,
        }
    }
}

/// Parses booleans the way Kubernetes annotations are usually written:
/// `1/t/T/true/TRUE/True` and `0/f/F/false/FALSE/False`.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn non_empty(data: &BTreeMap<String, String>, key: &str) -> Option<String> {
    data.get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parsed<T>(data: &BTreeMap<String, String>, key: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
    let raw = non_empty(data, key)?;
    let value = parse(&raw);
    if value.is_none() {
        error!("Cannot parse config option {}={:?}, keeping the default", key, raw);
    }
    value
}

fn values_document(data: &BTreeMap<String, String>, key: &str) -> Option<String> {
    parsed(data, key, |raw| {
        serde_yaml::from_str::<serde_yaml::Value>(raw)
            .ok()
            .map(|_| raw.to_string())
    })
}

impl OperatorConfig {
    /// Builds the config from ConfigMap data, falling back to defaults.
    pub fn from_data(data: &BTreeMap<String, String>) -> Self {
        let mut config = Self::default();

        if let Some(level) = non_empty(data, "logLevel") {
            config.log_level = level;
        }
        if let Some(trace) = parsed(data, "traceIpamData", parse_bool) {
            config.trace_ipam_data = trace;
        }
        if let Some(secs) = parsed(data, "operateGuestClusterInterval", |raw| {
            raw.parse::<u64>().ok().filter(|secs| *secs > 0)
        }) {
            config.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(port) = parsed(data, "metricsPort", |raw| raw.parse::<u16>().ok()) {
            config.metrics_port = port;
        }
        if let Some(policy) = parsed(data, "kubevipGuestInstall", |raw| raw.parse::<InstallPolicy>().ok()) {
            config.install_policy = policy;
        }
        if let Some(url) = non_empty(data, "kubevipChartRepoUrl") {
            config.chart_repo_url = url;
        }
        if let Some(update) = parsed(data, "kubevipUpdate", parse_bool) {
            config.update_in_place = update;
        }

        // kube-vip
        if let Some(ns) = non_empty(data, "kubevipNamespace") {
            config.kube_vip.namespace = ns;
        }
        if let Some(release) = non_empty(data, "kubevipReleaseName") {
            config.kube_vip.release_name = release;
        }
        if let Some(chart) = non_empty(data, "kubevipChartRef") {
            config.kube_vip.chart = chart;
        }
        config.kube_vip.version = non_empty(data, "kubevipChartVersion");
        if let Some(values) = values_document(data, "kubevipChartValues") {
            config.kube_vip.values = values;
        }

        // kube-vip-cloud-provider, installed next to kube-vip unless overridden
        config.cloud_provider.namespace =
            non_empty(data, "kubevipCloudProviderNamespace").unwrap_or_else(|| config.kube_vip.namespace.clone());
        if let Some(release) = non_empty(data, "kubevipCloudProviderReleaseName") {
            config.cloud_provider.release_name = release;
        }
        if let Some(chart) = non_empty(data, "kubevipCloudProviderChartRef") {
            config.cloud_provider.chart = chart;
        }
        config.cloud_provider.version = non_empty(data, "kubevipCloudProviderChartVersion");
        if let Some(values) = values_document(data, "kubevipCloudProviderChartValues") {
            config.cloud_provider.values = values;
        }

        for key in data.keys() {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                warn!("Ignoring unknown config option {}", key);
            }
        }

        config
    }

    /// Builds the config from a ConfigMap object.
    pub fn from_config_map(config_map: &ConfigMap) -> Self {
        config_map
            .data
            .as_ref()
            .map(Self::from_data)
            .unwrap_or_default()
    }

    /// Installer request for one of the components.
    pub fn chart_spec(&self, component: &ComponentConfig) -> ChartSpec {
        ChartSpec {
            release_name: component.release_name.clone(),
            chart: component.chart.clone(),
            namespace: component.namespace.clone(),
            repo_name: CHART_REPO_NAME.to_string(),
            repo_url: self.chart_repo_url.clone(),
            version: component.version.clone(),
            values: component.values.clone(),
        }
    }
}

const KNOWN_KEYS: &[&str] = &[
    "logLevel",
    "traceIpamData",
    "operateGuestClusterInterval",
    "metricsPort",
    "kubevipGuestInstall",
    "kubevipNamespace",
    "kubevipReleaseName",
    "kubevipChartRepoUrl",
    "kubevipChartRef",
    "kubevipChartVersion",
    "kubevipChartValues",
    "kubevipCloudProviderNamespace",
    "kubevipCloudProviderReleaseName",
    "kubevipCloudProviderChartRef",
    "kubevipCloudProviderChartVersion",
    "kubevipCloudProviderChartValues",
    "kubevipUpdate",
];

/// Current runtime config, shared between the sweep and the config watcher.
#[derive(Debug, Default)]
pub struct SharedConfig {
    inner: RwLock<OperatorConfig>,
}

impl SharedConfig {
    pub fn new(config: OperatorConfig) -> Self {
        Self {
            inner: RwLock::new(config),
        }
    }

    /// Copy of the current config.
    pub fn snapshot(&self) -> OperatorConfig {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Installs `config` and returns the one it replaced.
    pub fn replace(&self, config: OperatorConfig) -> OperatorConfig {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, config)
    }
}
