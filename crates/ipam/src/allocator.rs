//! Per-range address bookkeeping.
//!
//! Each registered range keeps an ordered map of held addresses (stored as
//! `u32` for cheap ordering) to the identity of their owner. Next-free
//! allocation walks that map from the first usable address and returns the
//! lowest gap.

use crate::error::IpamError;
use crate::span::UsableSpan;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use tracing::debug;

#[derive(Debug, Clone)]
struct RangeState {
    span: UsableSpan,
    held: BTreeMap<u32, String>,
}

impl RangeState {
    fn lowest_free(&self) -> Option<u32> {
        let (first, last) = self.span.raw_bounds()?;
        let mut candidate = first;
        for &taken in self.held.range(first..=last).map(|(addr, _)| addr) {
            if taken != candidate {
                break;
            }
            if candidate == last {
                return None;
            }
            candidate += 1;
        }
        Some(candidate)
    }
}

/// Address allocator for a set of named IPv4 ranges.
#[derive(Debug, Clone, Default)]
pub struct Allocator {
    ranges: BTreeMap<String, RangeState>,
}

impl Allocator {
    /// Creates an allocator with no ranges.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a range under `name`.
    ///
    /// Re-registering an existing name fails with
    /// [`IpamError::RangeAlreadyExists`]; replace a range by deregistering it
    /// first.
    pub fn register_range(&mut self, name: &str, cidr: &str) -> Result<UsableSpan, IpamError> {
        if self.ranges.contains_key(name) {
            return Err(IpamError::RangeAlreadyExists(name.to_string()));
        }
        let span = UsableSpan::parse(cidr)?;
        self.ranges.insert(
            name.to_string(),
            RangeState {
                span,
                held: BTreeMap::new(),
            },
        );
        debug!("Registered range {}: {}", name, span);
        Ok(span)
    }

    /// Drops all bookkeeping for `name` and returns how many addresses were
    /// still held.
    pub fn deregister_range(&mut self, name: &str) -> Result<usize, IpamError> {
        let state = self
            .ranges
            .remove(name)
            .ok_or_else(|| IpamError::RangeNotFound(name.to_string()))?;
        debug!("Deregistered range {} ({} addresses held)", name, state.held.len());
        Ok(state.held.len())
    }

    /// Reserves an address of `range` for `owner`.
    ///
    /// Without `requested` the lowest unused address is returned. With it,
    /// exactly that address is reserved. Re-acquiring an address already
    /// held by the same owner succeeds without changing anything.
    pub fn acquire(
        &mut self,
        range: &str,
        owner: &str,
        requested: Option<Ipv4Addr>,
    ) -> Result<Ipv4Addr, IpamError> {
        let state = self
            .ranges
            .get_mut(range)
            .ok_or_else(|| IpamError::RangeNotFound(range.to_string()))?;

        let raw = match requested {
            Some(address) => {
                if !state.span.contains(address) {
                    return Err(IpamError::AddressOutOfRange {
                        range: range.to_string(),
                        address,
                    });
                }
                let raw = u32::from(address);
                if let Some(holder) = state.held.get(&raw) {
                    if holder == owner {
                        return Ok(address);
                    }
                    return Err(IpamError::AddressAlreadyAllocated {
                        range: range.to_string(),
                        address,
                        owner: holder.clone(),
                    });
                }
                raw
            }
            None => state
                .lowest_free()
                .ok_or_else(|| IpamError::AddressExhausted(range.to_string()))?,
        };

        state.held.insert(raw, owner.to_string());
        let address = Ipv4Addr::from(raw);
        debug!("Reserved {} in range {} for {}", address, range, owner);
        Ok(address)
    }

    /// Returns `address` to the free pool of `range`.
    ///
    /// Releasing something that is not held is not an error; the return
    /// value tells whether anything changed.
    pub fn release(&mut self, range: &str, address: Ipv4Addr) -> bool {
        let Some(state) = self.ranges.get_mut(range) else {
            debug!("Release of {} ignored: range {} is not registered", address, range);
            return false;
        };
        match state.held.remove(&u32::from(address)) {
            Some(owner) => {
                debug!("Released {} in range {} (was {})", address, range, owner);
                true
            }
            None => {
                debug!("Release of {} ignored: not held in range {}", address, range);
                false
            }
        }
    }

    /// Whether a range with this name is registered
    pub fn contains_range(&self, name: &str) -> bool {
        self.ranges.contains_key(name)
    }

    /// Names of all registered ranges, in lexical order
    pub fn ranges(&self) -> impl Iterator<Item = &str> {
        self.ranges.keys().map(String::as_str)
    }

    /// Usable span of a registered range
    pub fn span(&self, name: &str) -> Option<UsableSpan> {
        self.ranges.get(name).map(|state| state.span)
    }

    /// Number of usable addresses of a registered range
    pub fn capacity(&self, name: &str) -> Option<u32> {
        self.span(name).map(|span| span.capacity())
    }

    /// Held addresses of a registered range, lowest first
    pub fn allocated(&self, name: &str) -> Vec<Ipv4Addr> {
        self.ranges
            .get(name)
            .map(|state| state.held.keys().copied().map(Ipv4Addr::from).collect())
            .unwrap_or_default()
    }

    /// Current holder of `address` in `range`
    pub fn owner(&self, range: &str, address: Ipv4Addr) -> Option<&str> {
        self.ranges
            .get(range)?
            .held
            .get(&u32::from(address))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_register_twice_fails() {
        let mut ipam = Allocator::new();
        ipam.register_range("r", "10.0.0.0/24").unwrap();
        assert_eq!(
            ipam.register_range("r", "10.1.0.0/24"),
            Err(IpamError::RangeAlreadyExists("r".to_string()))
        );
        // the original registration is untouched
        assert_eq!(ipam.span("r").unwrap().cidr().to_string(), "10.0.0.0/24");
    }

    #[test]
    fn test_invalid_cidr_registers_nothing() {
        let mut ipam = Allocator::new();
        assert!(matches!(
            ipam.register_range("r", "10.0.0.300/24"),
            Err(IpamError::InvalidCidr { .. })
        ));
        assert!(!ipam.contains_range("r"));
    }

    #[test]
    fn test_next_free_fills_lowest_gap() {
        let mut ipam = Allocator::new();
        ipam.register_range("r", "10.0.0.0/29").unwrap();
        for owner in ["a", "b", "c"] {
            ipam.acquire("r", owner, None).unwrap();
        }
        assert!(ipam.release("r", addr("10.0.0.2")));
        assert_eq!(ipam.acquire("r", "d", None).unwrap(), addr("10.0.0.2"));
        assert_eq!(ipam.acquire("r", "e", None).unwrap(), addr("10.0.0.4"));
    }

    #[test]
    fn test_next_free_skips_specific_reservations() {
        let mut ipam = Allocator::new();
        ipam.register_range("r", "10.0.0.0/29").unwrap();
        ipam.acquire("r", "a", Some(addr("10.0.0.1"))).unwrap();
        ipam.acquire("r", "b", Some(addr("10.0.0.3"))).unwrap();
        assert_eq!(ipam.acquire("r", "c", None).unwrap(), addr("10.0.0.2"));
        assert_eq!(ipam.acquire("r", "d", None).unwrap(), addr("10.0.0.4"));
    }

    #[test]
    fn test_specific_address_conflicts() {
        let mut ipam = Allocator::new();
        ipam.register_range("r", "10.0.0.0/24").unwrap();
        ipam.acquire("r", "ns/a", Some(addr("10.0.0.10"))).unwrap();

        let err = ipam.acquire("r", "ns/b", Some(addr("10.0.0.10"))).unwrap_err();
        assert_eq!(
            err,
            IpamError::AddressAlreadyAllocated {
                range: "r".to_string(),
                address: addr("10.0.0.10"),
                owner: "ns/a".to_string(),
            }
        );
        assert_eq!(ipam.owner("r", addr("10.0.0.10")), Some("ns/a"));
    }

    #[test]
    fn test_same_owner_reacquire_is_idempotent() {
        let mut ipam = Allocator::new();
        ipam.register_range("r", "10.0.0.0/24").unwrap();
        ipam.acquire("r", "ns/a", Some(addr("10.0.0.10"))).unwrap();
        assert_eq!(
            ipam.acquire("r", "ns/a", Some(addr("10.0.0.10"))).unwrap(),
            addr("10.0.0.10")
        );
        assert_eq!(ipam.allocated("r").len(), 1);
    }

    #[test]
    fn test_network_and_broadcast_are_out_of_range() {
        let mut ipam = Allocator::new();
        ipam.register_range("r", "10.0.0.0/24").unwrap();
        for a in ["10.0.0.0", "10.0.0.255"] {
            assert!(matches!(
                ipam.acquire("r", "x", Some(addr(a))),
                Err(IpamError::AddressOutOfRange { .. })
            ));
        }
    }

    #[test]
    fn test_unknown_range() {
        let mut ipam = Allocator::new();
        assert_eq!(
            ipam.acquire("missing", "x", None),
            Err(IpamError::RangeNotFound("missing".to_string()))
        );
        assert!(!ipam.release("missing", addr("10.0.0.1")));
        assert_eq!(
            ipam.deregister_range("missing"),
            Err(IpamError::RangeNotFound("missing".to_string()))
        );
    }

    #[test]
    fn test_release_not_held_is_noop() {
        let mut ipam = Allocator::new();
        ipam.register_range("r", "10.0.0.0/24").unwrap();
        assert!(!ipam.release("r", addr("10.0.0.7")));
        assert!(!ipam.release("r", addr("192.168.0.1")));
    }

    #[test]
    fn test_deregister_drops_bookkeeping() {
        let mut ipam = Allocator::new();
        ipam.register_range("r", "10.0.0.0/24").unwrap();
        ipam.acquire("r", "a", None).unwrap();
        ipam.acquire("r", "b", None).unwrap();
        assert_eq!(ipam.deregister_range("r"), Ok(2));
        assert!(ipam.allocated("r").is_empty());

        ipam.register_range("r", "10.0.0.0/24").unwrap();
        assert_eq!(ipam.acquire("r", "c", None).unwrap(), addr("10.0.0.1"));
    }

    #[test]
    fn test_slash_31_is_always_exhausted() {
        let mut ipam = Allocator::new();
        ipam.register_range("p2p", "10.0.0.0/31").unwrap();
        assert_eq!(ipam.capacity("p2p"), Some(0));
        assert_eq!(
            ipam.acquire("p2p", "a", None),
            Err(IpamError::AddressExhausted("p2p".to_string()))
        );
    }

    #[test]
    fn test_ranges_are_independent() {
        let mut ipam = Allocator::new();
        ipam.register_range("b", "10.0.1.0/24").unwrap();
        ipam.register_range("a", "10.0.0.0/24").unwrap();
        ipam.acquire("a", "x", None).unwrap();
        assert_eq!(ipam.acquire("b", "y", None).unwrap(), addr("10.0.1.1"));
        assert_eq!(ipam.ranges().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
