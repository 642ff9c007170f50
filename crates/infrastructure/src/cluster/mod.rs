pub mod coordinator;
pub mod lease;

pub use coordinator::{ClusterCoordinator, InstanceTable};
pub use lease::{LeaseCell, LeaseRecord};
