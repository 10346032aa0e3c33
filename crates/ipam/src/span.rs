//! Usable address bounds of a CIDR block.

use crate::error::IpamError;
use ipnet::Ipv4Net;
use std::fmt;
use std::net::Ipv4Addr;

/// Parsed range with its usable host bounds.
///
/// The network and broadcast addresses are never usable. Prefixes of 31 and
/// 32 bits therefore have no usable addresses at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsableSpan {
    cidr: Ipv4Net,
    bounds: Option<(u32, u32)>,
}

impl UsableSpan {
    /// Parses `cidr` and computes the usable bounds.
    ///
    /// Host bits are masked off, so `10.0.0.7/24` becomes `10.0.0.0/24`.
    pub fn parse(cidr: &str) -> Result<Self, IpamError> {
        let net = cidr.trim().parse::<Ipv4Net>().map_err(|e| IpamError::InvalidCidr {
            cidr: cidr.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_net(net.trunc()))
    }

    /// Builds the span of an already parsed network.
    pub fn from_net(cidr: Ipv4Net) -> Self {
        let bounds = if cidr.prefix_len() >= 31 {
            None
        } else {
            Some((u32::from(cidr.network()) + 1, u32::from(cidr.broadcast()) - 1))
        };
        Self { cidr, bounds }
    }

    /// Normalized network
    pub fn cidr(&self) -> Ipv4Net {
        self.cidr
    }

    /// First usable address, if any
    pub fn first(&self) -> Option<Ipv4Addr> {
        self.bounds.map(|(first, _)| Ipv4Addr::from(first))
    }

    /// Last usable address, if any
    pub fn last(&self) -> Option<Ipv4Addr> {
        self.bounds.map(|(_, last)| Ipv4Addr::from(last))
    }

    /// Number of usable addresses
    pub fn capacity(&self) -> u32 {
        self.bounds.map_or(0, |(first, last)| last - first + 1)
    }

    /// Whether `address` is a usable host address of this span.
    pub fn contains(&self, address: Ipv4Addr) -> bool {
        let raw = u32::from(address);
        self.bounds
            .is_some_and(|(first, last)| (first..=last).contains(&raw))
    }

    pub(crate) fn raw_bounds(&self) -> Option<(u32, u32)> {
        self.bounds
    }
}

impl fmt::Display for UsableSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.first(), self.last()) {
            (Some(first), Some(last)) => write!(f, "{} ({first} - {last})", self.cidr),
            _ => write!(f, "{} (no usable addresses)", self.cidr),
        }
    }
}
