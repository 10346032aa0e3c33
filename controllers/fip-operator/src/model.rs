//! Typed records validated from the custom resources.
//!
//! Annotations are an implicit, stringly-typed schema. Everything the
//! operator relies on is checked once here, when an object enters the
//! operator, so the rest of the code never handles empty strings.

use crate::config::parse_bool;
use crds::annotations;
use crds::{FloatingIP, FloatingIPRange};
use ipam::{IpamError, UsableSpan};
use kube::ResourceExt;
use std::fmt;
use std::net::Ipv4Addr;
use thiserror::Error;
use tracing::debug;

/// Validation failures for incoming objects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// Object without `metadata.name` (or namespace, for FloatingIPs)
    #[error("{0} object without name or namespace")]
    MissingIdentity(&'static str),

    /// Range without a usable `spec.iprange`
    #[error("FloatingIPRange {name} has an invalid CIDR: {source}")]
    InvalidCidr {
        name: String,
        #[source]
        source: IpamError,
    },

    /// FloatingIP without `clustername` or `fiprange` annotation
    #[error("FloatingIP {key} is missing the {annotation} annotation")]
    MissingCorrelation { key: FipKey, annotation: &'static str },

    /// FloatingIP whose `spec.ipaddress` is not an IPv4 address
    #[error("FloatingIP {key} has an invalid address {value:?}")]
    InvalidAddress { key: FipKey, value: String },
}

/// Identity of a FloatingIP.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FipKey {
    pub namespace: String,
    pub name: String,
}

impl FipKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for FipKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

fn annotation(map: &std::collections::BTreeMap<String, String>, key: &str) -> Option<String> {
    map.get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// A validated FloatingIPRange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRecord {
    pub name: String,
    /// CIDR as written in the object
    pub cidr: String,
    pub span: UsableSpan,
    pub harvester_cluster: Option<String>,
    pub harvester_network: Option<String>,
}

impl TryFrom<&FloatingIPRange> for RangeRecord {
    type Error = RecordError;

    fn try_from(obj: &FloatingIPRange) -> Result<Self, Self::Error> {
        let name = obj
            .metadata
            .name
            .clone()
            .ok_or(RecordError::MissingIdentity("FloatingIPRange"))?;
        let cidr = obj
            .spec
            .iprange
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        let span = UsableSpan::parse(&cidr).map_err(|source| RecordError::InvalidCidr {
            name: name.clone(),
            source,
        })?;
        let ann = obj.annotations();

        Ok(Self {
            name,
            cidr,
            span,
            harvester_cluster: annotation(ann, annotations::HARVESTER_CLUSTER_NAME),
            harvester_network: annotation(ann, annotations::HARVESTER_NETWORK_NAME),
        })
    }
}

/// A validated FloatingIP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloatingIpRecord {
    pub key: FipKey,
    /// Assigned address; `None` until allocated
    pub address: Option<Ipv4Addr>,
    /// Owning guest cluster
    pub cluster: String,
    /// Source range name
    pub range: String,
    /// Rewrite the guest config object on every sweep
    pub force_refresh: bool,
}

impl FloatingIpRecord {
    /// Owner string handed to the allocator
    pub fn owner(&self) -> String {
        self.key.to_string()
    }
}

impl TryFrom<&FloatingIP> for FloatingIpRecord {
    type Error = RecordError;

    fn try_from(obj: &FloatingIP) -> Result<Self, Self::Error> {
        let (Some(namespace), Some(name)) = (obj.metadata.namespace.clone(), obj.metadata.name.clone()) else {
            return Err(RecordError::MissingIdentity("FloatingIP"));
        };
        let key = FipKey::new(namespace, name);
        let ann = obj.annotations();

        let cluster = annotation(ann, annotations::CLUSTER_NAME).ok_or_else(|| {
            RecordError::MissingCorrelation {
                key: key.clone(),
                annotation: annotations::CLUSTER_NAME,
            }
        })?;
        let range = annotation(ann, annotations::FIP_RANGE).ok_or_else(|| RecordError::MissingCorrelation {
            key: key.clone(),
            annotation: annotations::FIP_RANGE,
        })?;

        let address = match obj.spec.ipaddress.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(raw.parse::<Ipv4Addr>().map_err(|_| RecordError::InvalidAddress {
                key: key.clone(),
                value: raw.to_string(),
            })?),
        };

        let force_refresh = match annotation(ann, annotations::UPDATE_CONFIG_MAP) {
            None => false,
            Some(raw) => parse_bool(&raw).unwrap_or_else(|| {
                debug!("FloatingIP {} has a non-boolean {} annotation: {:?}", key, annotations::UPDATE_CONFIG_MAP, raw);
                false
            }),
        };

        Ok(Self {
            key,
            address,
            cluster,
            range,
            force_refresh,
        })
    }
}
