//! kube-fip CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the floating IP operator.

pub mod annotations;
pub mod floating_ip;
pub mod floating_ip_range;

pub use floating_ip::*;
pub use floating_ip_range::*;
