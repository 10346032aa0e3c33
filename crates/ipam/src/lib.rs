//! Floating IP Address Management
//!
//! Tracks which IPv4 addresses of each named range are free or reserved.
//! The allocator is synchronous and owns no locks; callers serialize access
//! (the operator keeps it behind the same mutex as its resource store).
//!
//! # Example
//!
//! ```
//! use ipam::Allocator;
//!
//! let mut ipam = Allocator::new();
//! ipam.register_range("lab", "10.0.0.0/30").unwrap();
//!
//! let first = ipam.acquire("lab", "default/vip-a", None).unwrap();
//! assert_eq!(first.to_string(), "10.0.0.1");
//!
//! assert!(ipam.release("lab", first));
//! ```

pub mod allocator;
pub mod error;
pub mod span;

pub use allocator::Allocator;
pub use error::IpamError;
pub use span::UsableSpan;
