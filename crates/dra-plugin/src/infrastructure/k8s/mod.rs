//! Kubernetes integration module.
//!
//! Holds the NodeAllocationState custom resource that records this node's
//! advertised capacity and claim allocations, and the client used to read and
//! publish it.

pub mod node_allocation_state;
pub mod types;

pub use node_allocation_state::NodeAllocationState;
pub use node_allocation_state::NodeAllocationStateClient;
pub use types::KubernetesError;
