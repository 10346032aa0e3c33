//! Controller-specific error types.
//!
//! Wraps the errors of the allocator, the resource store, the guest-access
//! collaborators and the Kubernetes API into one type for the operator.

use crate::model::RecordError;
use crate::store::StoreError;
use guest_client::GuestError;
use ipam::IpamError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the floating IP operator.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Allocation conflict or invalid range
    #[error("IPAM error: {0}")]
    Ipam(#[from] IpamError),

    /// Resource store lookup failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Malformed FloatingIP or FloatingIPRange object
    #[error("Invalid resource: {0}")]
    Record(#[from] RecordError),

    /// Management cluster, guest cluster or installer failure
    #[error("Guest access error: {0}")]
    Guest(#[from] GuestError),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Local I/O (metrics listener)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}
