//! In-memory collaborators for unit testing
//!
//! These mocks implement the collaborator traits without a management
//! cluster, guest clusters or a helm binary. Every call is recorded so tests
//! can assert which remote steps ran, and failures can be injected per guest
//! cluster.
//!
//! - `management.rs` - cluster registry and kubeconfig store
//! - `guest.rs` - connectivity probe and config maps
//! - `installer.rs` - chart releases

mod guest;
mod installer;
mod management;

pub use guest::{MockGuestCluster, ProbeOutcome};
pub use installer::MockChartInstaller;
pub use management::MockManagementCluster;
