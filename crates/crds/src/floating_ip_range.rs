//! FloatingIPRange CRD
//!
//! Cluster-scoped pool of floating addresses. The CIDR is carried in
//! `spec.iprange`; correlation to a provider cluster and network is carried
//! in annotations (see [`crate::annotations`]).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kubefip.k8s.binbash.org",
    version = "v1",
    kind = "FloatingIPRange",
    plural = "floatingipranges",
    shortname = "fiprange"
)]
pub struct FloatingIPRangeSpec {
    /// IPv4 CIDR the range hands addresses out of (e.g. `10.0.0.0/24`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iprange: Option<String>,
}
