use async_trait::async_trait;

use crate::errors::SchedulerResult;
use crate::models::{GpuNode, Task};

/// 节点选择策略
///
/// 候选列表已按能力和容量过滤，策略只负责在其中挑选目标节点。
#[async_trait]
pub trait NodeSelectionStrategy: Send + Sync {
    async fn select_node(
        &self,
        task: &Task,
        candidates: &[GpuNode],
    ) -> SchedulerResult<Option<String>>;

    fn name(&self) -> &str;
}
