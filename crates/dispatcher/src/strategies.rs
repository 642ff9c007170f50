use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tracing::debug;

use gpu_scheduler_core::{
    models::{GpuNode, Task},
    traits::NodeSelectionStrategy,
    SchedulerResult,
};

/// 最优匹配策略
///
/// 同一任务有多个候选节点时依次比较：空闲容量多者优先，
/// 失败次数少者优先，心跳更新者优先。
pub struct BestFitStrategy;

/// 轮询策略
pub struct RoundRobinStrategy {
    counter: AtomicUsize,
}

impl BestFitStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BestFitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeSelectionStrategy for BestFitStrategy {
    async fn select_node(
        &self,
        task: &Task,
        candidates: &[GpuNode],
    ) -> SchedulerResult<Option<String>> {
        if candidates.is_empty() {
            debug!("任务 {} 没有候选节点", task.task_id);
            return Ok(None);
        }

        let selected = candidates.iter().max_by(|a, b| {
            a.spare_capacity()
                .cmp(&b.spare_capacity())
                .then_with(|| b.failure_count.cmp(&a.failure_count))
                .then_with(|| a.last_heartbeat.cmp(&b.last_heartbeat))
        });

        if let Some(node) = selected {
            debug!(
                "最优匹配策略选择节点: {} (空闲: {}, 失败次数: {})",
                node.gpu_id,
                node.spare_capacity(),
                node.failure_count
            );
        }
        Ok(selected.map(|n| n.gpu_id.clone()))
    }

    fn name(&self) -> &str {
        "BestFit"
    }
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeSelectionStrategy for RoundRobinStrategy {
    async fn select_node(
        &self,
        task: &Task,
        candidates: &[GpuNode],
    ) -> SchedulerResult<Option<String>> {
        if candidates.is_empty() {
            debug!("任务 {} 没有候选节点", task.task_id);
            return Ok(None);
        }

        let index = self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
        let selected = &candidates[index];
        debug!(
            "轮询策略选择节点: {} (索引: {}/{})",
            selected.gpu_id,
            index,
            candidates.len()
        );
        Ok(Some(selected.gpu_id.clone()))
    }

    fn name(&self) -> &str {
        "RoundRobin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gpu_scheduler_core::models::{
        GpuNodeRegistration, TaskPriority, TaskSubmission,
    };

    fn node(gpu_id: &str, max_tasks: i32, current: i32, failures: i32) -> GpuNode {
        let mut node = GpuNode::new(GpuNodeRegistration {
            gpu_id: gpu_id.to_string(),
            hostname: "h".to_string(),
            vast_ins_id: None,
            ip: "10.0.0.1".to_string(),
            port: 8080,
            supported_task_types: vec![2],
            supported_task_priority: TaskPriority::Normal,
            max_concurrent_tasks: max_tasks,
            version: "1.0.0".to_string(),
            metadata: None,
        });
        node.current_tasks = current;
        node.failure_count = failures;
        node
    }

    fn task() -> Task {
        Task::new(
            TaskSubmission {
                task_type: 2,
                user_id: "u".to_string(),
                app: "a".to_string(),
                priority: 5,
                payload: "{}".to_string(),
                env: None,
                timeout: None,
                max_retries: None,
            },
            1,
            300,
            3,
        )
    }

    #[tokio::test]
    async fn test_best_fit_prefers_most_spare_capacity() {
        let strategy = BestFitStrategy::new();
        let nodes = vec![node("gpu-1", 4, 3, 0), node("gpu-2", 4, 1, 0)];

        let selected = strategy.select_node(&task(), &nodes).await.unwrap();
        assert_eq!(selected.as_deref(), Some("gpu-2"));
    }

    #[tokio::test]
    async fn test_best_fit_breaks_ties_by_failure_count() {
        let strategy = BestFitStrategy::new();
        let nodes = vec![node("gpu-1", 4, 2, 3), node("gpu-2", 4, 2, 1)];

        let selected = strategy.select_node(&task(), &nodes).await.unwrap();
        assert_eq!(selected.as_deref(), Some("gpu-2"));
    }

    #[tokio::test]
    async fn test_best_fit_breaks_ties_by_freshest_heartbeat() {
        let strategy = BestFitStrategy::new();
        let mut stale = node("gpu-1", 4, 2, 1);
        stale.last_heartbeat = Utc::now() - chrono::Duration::seconds(60);
        let fresh = node("gpu-2", 4, 2, 1);

        let selected = strategy
            .select_node(&task(), &[stale, fresh])
            .await
            .unwrap();
        assert_eq!(selected.as_deref(), Some("gpu-2"));
    }

    #[tokio::test]
    async fn test_best_fit_empty_candidates() {
        let strategy = BestFitStrategy::new();
        let selected = strategy.select_node(&task(), &[]).await.unwrap();
        assert!(selected.is_none());
    }

    #[tokio::test]
    async fn test_round_robin_rotates() {
        let strategy = RoundRobinStrategy::new();
        let nodes = vec![node("gpu-1", 4, 0, 0), node("gpu-2", 4, 0, 0)];

        let first = strategy.select_node(&task(), &nodes).await.unwrap();
        let second = strategy.select_node(&task(), &nodes).await.unwrap();
        assert_ne!(first, second);
    }
}
