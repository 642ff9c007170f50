pub mod cluster;
pub mod memory;
pub mod observability;

pub use cluster::{ClusterCoordinator, InstanceTable, LeaseCell};
pub use memory::{InMemoryAlertStore, InMemoryNodeRegistry, InMemoryTaskStore, RequeueOutcome};
pub use observability::{MetricsCollector, StructuredLogger};
