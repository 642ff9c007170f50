use async_trait::async_trait;

use crate::errors::SchedulerResult;
use crate::models::{ClusterInstance, ClusterStatusView};

/// 集群协调服务
///
/// 基于可续期租约的单Leader选举：只有Leader运行调度循环，
/// Follower只提供读服务。
#[async_trait]
pub trait ClusterCoordinatorService: Send + Sync {
    fn instance_id(&self) -> &str;

    async fn is_leader(&self) -> bool;

    async fn instances(&self) -> SchedulerResult<Vec<ClusterInstance>>;

    async fn cluster_status(&self) -> SchedulerResult<ClusterStatusView>;
}
