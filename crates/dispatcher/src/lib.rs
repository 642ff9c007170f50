pub mod alert_engine;
pub mod dispatcher;
pub mod health;
pub mod lifecycle;
pub mod liveness;
pub mod retry;
pub mod strategies;
pub mod timeout;

pub use alert_engine::AlertEngine;
pub use dispatcher::TaskDispatcher;
pub use health::HealthAggregator;
pub use lifecycle::TaskLifecycleTracker;
pub use liveness::NodeLivenessDetector;
pub use retry::RetryPolicy;
pub use strategies::{BestFitStrategy, RoundRobinStrategy};
pub use timeout::TaskTimeoutSweeper;
