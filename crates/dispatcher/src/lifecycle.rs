use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use gpu_scheduler_core::{
    config::LifecycleConfig,
    models::{Task, TaskFilter, TaskProgress, TaskStatus, TaskStatusUpdate},
    traits::{NodeRegistry, TaskLifecycle},
    SchedulerError, SchedulerResult,
};
use gpu_scheduler_infrastructure::{
    InMemoryTaskStore, MetricsCollector, RequeueOutcome, StructuredLogger,
};

use crate::retry::RetryPolicy;

/// 任务生命周期跟踪器
///
/// 在任务存储之上协调状态转换与节点容量：结果/失败/取消/超时都在这里
/// 统一落地，保证每次PROCESSING结束恰好释放一个容量槽位。
pub struct TaskLifecycleTracker {
    store: Arc<InMemoryTaskStore>,
    registry: Arc<dyn NodeRegistry>,
    retry_policy: RetryPolicy,
    metrics: Arc<MetricsCollector>,
    config: LifecycleConfig,
}

impl TaskLifecycleTracker {
    pub fn new(
        store: Arc<InMemoryTaskStore>,
        registry: Arc<dyn NodeRegistry>,
        retry_policy: RetryPolicy,
        metrics: Arc<MetricsCollector>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            registry,
            retry_policy,
            metrics,
            config,
        }
    }

    /// 失败/超时的统一处理：重试预算内退避后重新入队，否则落终态。
    /// 释放节点容量并记录节点侧的失败计数。
    async fn handle_failure(
        &self,
        task_id: &str,
        error_message: &str,
        terminal_status: TaskStatus,
        count_node_failure: bool,
    ) -> SchedulerResult<Task> {
        // 预读重试次数用于计算退避；真正的判定在 fail_or_requeue 的锁内完成
        let current = self.store.get(task_id).await?;
        let backoff = self.retry_policy.backoff_for(current.retry_count + 1);
        let not_before = Utc::now()
            + chrono::Duration::from_std(backoff).unwrap_or_else(|_| chrono::Duration::zero());

        let outcome = self
            .store
            .fail_or_requeue(task_id, error_message, terminal_status, Some(not_before))
            .await?;

        if let Some(gpu_id) = outcome.released_gpu() {
            let gpu_id = gpu_id.to_string();
            self.registry.release_slot(&gpu_id).await?;
            if count_node_failure {
                let escalated = self.registry.record_task_failure(&gpu_id).await?;
                if escalated {
                    // 节点升级为FAULTY，其上其余在途任务一并回队
                    self.requeue_for_node(&gpu_id, "node faulted after repeated task failures")
                        .await?;
                }
            }
            self.store.notify_dispatcher();
        }

        let task = match outcome {
            RequeueOutcome::Requeued { task, .. } => {
                self.metrics.record_task_requeued();
                StructuredLogger::log_task_requeued(task_id, task.retry_count, error_message);
                task
            }
            RequeueOutcome::Terminal { task } => {
                match terminal_status {
                    TaskStatus::Timeout => self.metrics.record_task_timeout(),
                    _ => self.metrics.record_task_failed(),
                }
                task
            }
        };
        Ok(task)
    }

    /// 超时扫描入口：把执行超过timeout的任务转入失败/重试路径
    pub async fn force_timeout(&self, task_id: &str) -> SchedulerResult<Task> {
        self.handle_failure(task_id, "task execution timeout", TaskStatus::Timeout, true)
            .await
    }
}

#[async_trait]
impl TaskLifecycle for TaskLifecycleTracker {
    async fn get(&self, task_id: &str) -> SchedulerResult<Task> {
        self.store.get(task_id).await
    }

    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<(Vec<Task>, i64)> {
        self.store.list(filter).await
    }

    async fn report_status(
        &self,
        task_id: &str,
        update: TaskStatusUpdate,
    ) -> SchedulerResult<Task> {
        let status = TaskStatus::parse(&update.status).ok_or_else(|| {
            SchedulerError::Validation(format!("未知的任务状态: {}", update.status))
        })?;

        let current = self.store.get(task_id).await?;
        match status {
            TaskStatus::Processing => {
                // Worker确认执行中：幂等，仅更新进度
                if current.status != TaskStatus::Processing {
                    return Err(SchedulerError::InvalidTransition {
                        id: task_id.to_string(),
                        from: current.status.as_str().to_string(),
                        to: "PROCESSING".to_string(),
                    });
                }
                if let Some(progress) = update.progress {
                    self.store
                        .update_progress(task_id, progress, update.queue_position)
                        .await?;
                }
                Ok(current)
            }
            TaskStatus::Completed => {
                if current.status == TaskStatus::Completed {
                    // 重复上报视为幂等成功
                    return Ok(current);
                }
                self.report_result(task_id, update.message.unwrap_or_default())
                    .await
            }
            TaskStatus::Failed => {
                if current.is_terminal() {
                    return Ok(current);
                }
                self.report_failure(
                    task_id,
                    update.message.as_deref().unwrap_or("reported by worker"),
                )
                .await
            }
            TaskStatus::Timeout => {
                if current.is_terminal() {
                    return Ok(current);
                }
                self.force_timeout(task_id).await
            }
            TaskStatus::Queued => Err(SchedulerError::Validation(
                "Worker不能将任务置回QUEUED".to_string(),
            )),
        }
    }

    async fn report_progress(
        &self,
        task_id: &str,
        progress: f64,
        queue_position: Option<i64>,
    ) -> SchedulerResult<()> {
        self.store
            .update_progress(task_id, progress, queue_position)
            .await
    }

    async fn get_progress(&self, task_id: &str) -> SchedulerResult<TaskProgress> {
        self.store.progress_view(task_id).await
    }

    async fn report_result(&self, task_id: &str, result: String) -> SchedulerResult<Task> {
        let task = self.store.complete(task_id, result).await?;

        if let Some(gpu_id) = task.gpu_id.as_deref() {
            self.registry.release_slot(gpu_id).await?;
            self.store.notify_dispatcher();

            let service_seconds = match (task.started_at, task.completed_at) {
                (Some(s), Some(c)) => (c - s).num_milliseconds() as f64 / 1000.0,
                _ => 0.0,
            };
            self.metrics.record_task_completed(service_seconds);
            StructuredLogger::log_task_completed(task_id, gpu_id, service_seconds);
        }
        Ok(task)
    }

    async fn report_failure(&self, task_id: &str, error_message: &str) -> SchedulerResult<Task> {
        self.handle_failure(task_id, error_message, TaskStatus::Failed, true)
            .await
    }

    async fn cancel(&self, task_id: &str) -> SchedulerResult<Task> {
        let (task, prior) = self.store.cancel(task_id).await?;
        self.metrics.record_task_failed();

        if prior == TaskStatus::Processing {
            if let Some(gpu_id) = task.gpu_id.clone() {
                // 尽力通知节点；无论节点是否确认，宽限期后都释放容量
                info!(
                    "通知节点 {} 取消任务 {} (best-effort)",
                    gpu_id, task_id
                );
                let registry = Arc::clone(&self.registry);
                let store = Arc::clone(&self.store);
                let grace = Duration::from_secs(self.config.cancel_grace_seconds);
                if grace.is_zero() {
                    registry.release_slot(&gpu_id).await?;
                    store.notify_dispatcher();
                } else {
                    tokio::spawn(async move {
                        tokio::time::sleep(grace).await;
                        if let Err(e) = registry.release_slot(&gpu_id).await {
                            warn!("取消任务后释放容量失败: {e}");
                        }
                        store.notify_dispatcher();
                    });
                }
            }
        }
        Ok(task)
    }

    async fn requeue_for_node(&self, gpu_id: &str, reason: &str) -> SchedulerResult<usize> {
        let task_ids = self.store.processing_on_node(gpu_id).await;
        if task_ids.is_empty() {
            return Ok(0);
        }

        StructuredLogger::log_node_offline(gpu_id, task_ids.len());
        let mut handled = 0;
        for task_id in &task_ids {
            // 节点侧失败不计入task_failure_count，离线与故障已单独处理
            match self
                .handle_failure(task_id, reason, TaskStatus::Failed, false)
                .await
            {
                Ok(_) => handled += 1,
                Err(SchedulerError::InvalidTransition { .. }) => {
                    // 任务刚好在扫描与处理之间完成，跳过
                    debug!("任务 {} 已离开PROCESSING，跳过重新入队", task_id);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(handled)
    }

    async fn status_counts(&self) -> SchedulerResult<HashMap<String, i64>> {
        Ok(self.store.status_counts().await)
    }
}
