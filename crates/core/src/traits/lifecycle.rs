use std::collections::HashMap;

use async_trait::async_trait;

use crate::errors::SchedulerResult;
use crate::models::{Task, TaskFilter, TaskProgress, TaskStatusUpdate};

/// 任务生命周期跟踪
///
/// 状态机：QUEUED → PROCESSING → {COMPLETED | FAILED | TIMEOUT}；
/// FAILED/TIMEOUT 在重试预算内回到 QUEUED。所有转换都以任务当前
/// 状态为准做单一权威判定，终态任务只读。
#[async_trait]
pub trait TaskLifecycle: Send + Sync {
    async fn get(&self, task_id: &str) -> SchedulerResult<Task>;

    /// 过滤分页查询，返回（当前页, 总数）
    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<(Vec<Task>, i64)>;

    /// Worker上报的状态更新（幂等）
    async fn report_status(&self, task_id: &str, update: TaskStatusUpdate)
        -> SchedulerResult<Task>;

    /// 更新执行进度，仅PROCESSING期间有效
    async fn report_progress(
        &self,
        task_id: &str,
        progress: f64,
        queue_position: Option<i64>,
    ) -> SchedulerResult<()>;

    async fn get_progress(&self, task_id: &str) -> SchedulerResult<TaskProgress>;

    /// 上报执行结果：PROCESSING → COMPLETED，其他状态返回 InvalidTransition
    async fn report_result(&self, task_id: &str, result: String) -> SchedulerResult<Task>;

    /// 上报执行失败：重试预算内重新入队，否则终态FAILED
    async fn report_failure(&self, task_id: &str, error_message: &str) -> SchedulerResult<Task>;

    /// 取消任务；仅QUEUED/PROCESSING可取消，释放节点容量
    async fn cancel(&self, task_id: &str) -> SchedulerResult<Task>;

    /// 节点离线/故障时，把其上执行中的任务重新放回队列，返回处理数量
    async fn requeue_for_node(&self, gpu_id: &str, reason: &str) -> SchedulerResult<usize>;

    /// 各状态任务数量（监控只读）
    async fn status_counts(&self) -> SchedulerResult<HashMap<String, i64>>;
}
