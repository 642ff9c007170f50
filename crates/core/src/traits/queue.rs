use std::collections::HashMap;

use async_trait::async_trait;

use crate::errors::SchedulerResult;
use crate::models::{Task, TaskPriority, TaskSubmission};

/// 待调度任务队列
///
/// 队内顺序为（优先级升序，入队时间升序），同一优先级严格FIFO。
/// 排队超过老化阈值的任务获得优先级提升，避免低优先级任务饿死。
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// 入队；taskType/priority/payload 缺失或非法时返回 InvalidTask
    async fn enqueue(&self, submission: TaskSubmission) -> SchedulerResult<Task>;

    /// 按节点能力查看可调度任务，返回按优先序排列的前 limit 个
    async fn peek_eligible(
        &self,
        supported_task_types: &[i32],
        node_priority: TaskPriority,
        limit: usize,
    ) -> SchedulerResult<Vec<Task>>;

    /// 原子认领并分配：QUEUED -> PROCESSING，设置 gpu_id 和 started_at。
    /// 任务已被并发认领时返回 AssignmentConflict，保证至多分配一次。
    async fn claim_assign(&self, task_id: &str, gpu_id: &str) -> SchedulerResult<Task>;

    /// 当前排队任务总数
    async fn depth(&self) -> SchedulerResult<i64>;

    /// 按任务类型统计的排队长度
    async fn queue_lengths(&self) -> SchedulerResult<HashMap<String, i64>>;

    /// 预计等待时间（秒）：队列位置 × 历史平均服务时间
    async fn estimate_wait_time(&self, task_id: &str) -> SchedulerResult<i64>;
}
