pub mod alert_store;
pub mod node_registry;
pub mod task_store;

pub use alert_store::InMemoryAlertStore;
pub use node_registry::InMemoryNodeRegistry;
pub use task_store::{InMemoryTaskStore, RequeueOutcome};
