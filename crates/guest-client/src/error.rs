//! Guest access errors

use thiserror::Error;

/// Errors raised while talking to the management cluster, a guest cluster
/// or the chart installer.
#[derive(Debug, Error)]
pub enum GuestError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The guest API refused the request because the cluster is still being
    /// provisioned
    #[error("Guest cluster {0} is still provisioning")]
    Provisioning(String),

    /// Kubeconfig could not be loaded
    #[error("Invalid kubeconfig: {0}")]
    Kubeconfig(String),

    /// A referenced object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// An object exists but lacks the expected field or key
    #[error("Missing data: {0}")]
    MissingData(String),

    /// Helm returned a failure
    #[error("Helm error: {0}")]
    Helm(String),

    /// Local I/O (temp files, spawning helm)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GuestError {
    /// Whether the error is the recognised "still provisioning" signal.
    pub fn is_provisioning(&self) -> bool {
        matches!(self, GuestError::Provisioning(_))
    }
}
