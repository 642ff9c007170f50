use std::collections::HashMap;

use async_trait::async_trait;

use crate::errors::SchedulerResult;
use crate::models::{GpuNode, GpuNodeRegistration, TaskPriority};

/// GPU节点注册表
///
/// 管理节点的注册、心跳、故障与恢复。容量占用（reserve/release）与
/// 分配在同一串行化区间内完成，保证 current_tasks 不超过上限。
#[async_trait]
pub trait NodeRegistry: Send + Sync {
    /// 注册节点；gpu_id 已存在且为ACTIVE时返回 DuplicateNodeId
    async fn register(&self, registration: GpuNodeRegistration) -> SchedulerResult<GpuNode>;

    /// 更新心跳；OFFLINE节点收到心跳后回到ACTIVE
    async fn heartbeat(&self, gpu_id: &str) -> SchedulerResult<GpuNode>;

    /// 显式标记节点故障
    async fn mark_faulty(&self, gpu_id: &str, reason: &str) -> SchedulerResult<GpuNode>;

    /// 故障恢复；冷却期未过返回 RecoveryTooSoon
    async fn recover(&self, gpu_id: &str) -> SchedulerResult<GpuNode>;

    /// 注销节点；有在途任务时进入排空状态，`force` 立即移除
    async fn unregister(&self, gpu_id: &str, force: bool) -> SchedulerResult<()>;

    async fn get(&self, gpu_id: &str) -> SchedulerResult<GpuNode>;

    async fn list(&self) -> SchedulerResult<Vec<GpuNode>>;

    /// 按任务类型（可选优先级类别）筛选节点
    async fn list_by_task_type(
        &self,
        task_type: i32,
        priority: Option<TaskPriority>,
    ) -> SchedulerResult<Vec<GpuNode>>;

    /// 可参与调度的节点：ACTIVE、非排空、有空闲容量
    async fn list_dispatchable(&self) -> SchedulerResult<Vec<GpuNode>>;

    /// 占用一个容量槽位；无空闲容量时返回 CapacityExhausted
    async fn reserve_slot(&self, gpu_id: &str) -> SchedulerResult<()>;

    /// 释放一个容量槽位（任务完成/失败/取消/重新入队时调用）
    async fn release_slot(&self, gpu_id: &str) -> SchedulerResult<()>;

    /// 记录一次任务失败；达到阈值时节点升级为FAULTY，返回true
    async fn record_task_failure(&self, gpu_id: &str) -> SchedulerResult<bool>;

    /// 存活扫描：心跳超时的ACTIVE节点转为OFFLINE并返回
    async fn sweep_expired(&self, liveness_timeout_seconds: i64) -> SchedulerResult<Vec<GpuNode>>;

    /// 各状态节点数量
    async fn status_counts(&self) -> SchedulerResult<HashMap<String, i64>>;
}
