//! FloatingIP CRD
//!
//! One externally reachable address bound to one guest cluster. The address
//! is written back into `spec.ipaddress` once the operator allocates it.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kubefip.k8s.binbash.org",
    version = "v1",
    kind = "FloatingIP",
    plural = "floatingips",
    shortname = "fip",
    namespaced
)]
pub struct FloatingIPSpec {
    /// Assigned IPv4 address; empty until allocated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipaddress: Option<String>,
}
