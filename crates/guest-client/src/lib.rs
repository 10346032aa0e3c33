//! Guest Cluster Access
//!
//! Collaborators the floating IP operator uses to reach beyond its own
//! resources:
//!
//! - **Management cluster**: guest cluster registry, provider cluster and
//!   network lookups, per-guest kubeconfig secrets ([`ManagementClient`])
//! - **Guest clusters**: connectivity probe and config maps ([`GuestClient`])
//! - **Chart installer**: helm releases in guest clusters ([`HelmInstaller`])
//!
//! Each is reached through a trait so the operator can be tested with the
//! in-memory mocks enabled by the `test-util` feature.

pub mod error;
pub mod guest;
pub mod helm;
pub mod management;
pub mod models;
#[path = "trait.rs"]
pub mod guest_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use error::GuestError;
pub use guest::GuestClient;
pub use guest_trait::{ChartInstallerTrait, GuestClusterTrait, ManagementClusterTrait};
pub use helm::HelmInstaller;
pub use management::ManagementClient;
pub use models::*;
#[cfg(feature = "test-util")]
pub use mock::{MockChartInstaller, MockGuestCluster, MockManagementCluster, ProbeOutcome};
