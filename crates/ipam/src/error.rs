//! IPAM errors

use std::net::Ipv4Addr;
use thiserror::Error;

/// Errors returned by [`crate::Allocator`] operations.
///
/// Every error leaves the allocator untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IpamError {
    /// CIDR could not be parsed as an IPv4 network
    #[error("Invalid CIDR {cidr:?}: {reason}")]
    InvalidCidr {
        /// Input as given
        cidr: String,
        /// Parser message
        reason: String,
    },

    /// A range with this name is already registered
    #[error("Range already exists: {0}")]
    RangeAlreadyExists(String),

    /// No range with this name is registered
    #[error("Range not found: {0}")]
    RangeNotFound(String),

    /// Every usable address of the range is held
    #[error("No free addresses left in range {0}")]
    AddressExhausted(String),

    /// Requested address lies outside the usable span
    #[error("Address {address} is outside the usable span of range {range}")]
    AddressOutOfRange {
        /// Range name
        range: String,
        /// Requested address
        address: Ipv4Addr,
    },

    /// Requested address is held by a different owner
    #[error("Address {address} in range {range} is already allocated to {owner}")]
    AddressAlreadyAllocated {
        /// Range name
        range: String,
        /// Requested address
        address: Ipv4Addr,
        /// Current holder
        owner: String,
    },
}
