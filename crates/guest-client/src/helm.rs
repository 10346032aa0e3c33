//! Helm CLI chart installer
//!
//! Runs the `helm` binary with the guest kubeconfig written to a temporary
//! file. Repository state lives in private paths so the operator never
//! touches a user's helm configuration.

use crate::error::GuestError;
use crate::guest_trait::ChartInstallerTrait;
use crate::models::{ChartSpec, GuestKubeconfig};
use std::io::Write;
use std::path::PathBuf;
use std::process::Output;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, info};

/// Installer backed by the `helm` executable.
#[derive(Debug, Clone)]
pub struct HelmInstaller {
    binary: PathBuf,
    repository_config: PathBuf,
    repository_cache: PathBuf,
}

impl Default for HelmInstaller {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("helm"),
            repository_config: PathBuf::from("/tmp/.helmrepo-kube-vip"),
            repository_cache: PathBuf::from("/tmp/.helmcache-kube-vip"),
        }
    }
}

impl HelmInstaller {
    /// Creates an installer that runs `binary`.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            ..Self::default()
        }
    }

    fn command(&self, kubeconfig: &NamedTempFile) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--kubeconfig")
            .arg(kubeconfig.path())
            .arg("--repository-config")
            .arg(&self.repository_config)
            .arg("--repository-cache")
            .arg(&self.repository_cache)
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, mut cmd: Command, what: &str) -> Result<Output, GuestError> {
        debug!("Running helm {}", what);
        let output = cmd.output().await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(GuestError::Helm(format!(
                "helm {what} failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

fn temp_file_with(contents: &str) -> Result<NamedTempFile, GuestError> {
    let mut file = NamedTempFile::new()?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    Ok(file)
}

#[async_trait::async_trait]
impl ChartInstallerTrait for HelmInstaller {
    async fn release_exists(
        &self,
        kubeconfig: &GuestKubeconfig,
        namespace: &str,
        release: &str,
    ) -> Result<bool, GuestError> {
        let kubeconfig_file = temp_file_with(kubeconfig.yaml())?;
        let mut cmd = self.command(&kubeconfig_file);
        cmd.args(["status", release, "--namespace", namespace]);

        match self.run(cmd, "status").await {
            Ok(_) => Ok(true),
            Err(GuestError::Helm(msg)) if msg.contains("release: not found") => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn install_or_upgrade(&self, kubeconfig: &GuestKubeconfig, chart: &ChartSpec) -> Result<(), GuestError> {
        let kubeconfig_file = temp_file_with(kubeconfig.yaml())?;
        let values_file = temp_file_with(&chart.values)?;

        let mut repo_add = self.command(&kubeconfig_file);
        repo_add.args(["repo", "add", "--force-update", &chart.repo_name, &chart.repo_url]);
        self.run(repo_add, "repo add").await?;

        let mut upgrade = self.command(&kubeconfig_file);
        upgrade
            .args(["upgrade", "--install", &chart.release_name, &chart.chart])
            .args(["--namespace", &chart.namespace, "--create-namespace"])
            .arg("--values")
            .arg(values_file.path());
        if let Some(version) = chart.version.as_deref() {
            upgrade.args(["--version", version]);
        }
        self.run(upgrade, "upgrade --install").await?;

        info!(
            "Release {}/{} ({}) installed in guest cluster {}",
            chart.namespace,
            chart.release_name,
            chart.chart,
            kubeconfig.cluster()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_file_holds_contents() {
        let file = temp_file_with("image:\n  tag: v0.6.4\n").unwrap();
        let read = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(read, "image:\n  tag: v0.6.4\n");
    }

    #[tokio::test]
    async fn test_missing_binary_is_io_error() {
        let installer = HelmInstaller::new("/nonexistent/helm-binary");
        let kc = GuestKubeconfig::new("guest-1", "apiVersion: v1\nkind: Config\n");
        let err = installer.release_exists(&kc, "kube-system", "kube-vip").await.unwrap_err();
        assert!(matches!(err, GuestError::Io(_)), "{err:?}");
    }
}
