//! Annotation keys shared by the operator and the CRDs.

/// FloatingIP: name of the owning guest cluster
pub const CLUSTER_NAME: &str = "clustername";

/// FloatingIP: name of the FloatingIPRange the address is drawn from
pub const FIP_RANGE: &str = "fiprange";

/// FloatingIP: force-refresh of the guest configuration object
pub const UPDATE_CONFIG_MAP: &str = "updateConfigMap";

/// FloatingIPRange: provider (Harvester) cluster the range belongs to
pub const HARVESTER_CLUSTER_NAME: &str = "harvesterClusterName";

/// FloatingIPRange: provider (Harvester) network the range belongs to
pub const HARVESTER_NETWORK_NAME: &str = "harvesterNetworkName";
