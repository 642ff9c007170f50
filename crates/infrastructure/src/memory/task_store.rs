use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info};

use gpu_scheduler_core::config::QueueConfig;
use gpu_scheduler_core::errors::{SchedulerError, SchedulerResult};
use gpu_scheduler_core::models::{
    Task, TaskFilter, TaskPriority, TaskProgress, TaskStatus, TaskSubmission,
};
use gpu_scheduler_core::traits::TaskQueue;

/// 没有历史样本时使用的平均服务时间（秒）
const DEFAULT_SERVICE_SECONDS: f64 = 30.0;

/// EMA平滑系数
const SERVICE_EMA_ALPHA: f64 = 0.2;

/// 排队序：优先级升序、入队时间升序、序号升序（同优先级严格FIFO）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct PendingKey {
    priority: i32,
    created_at_ms: i64,
    seq: u64,
}

#[derive(Debug, Clone, Default)]
struct ProgressRecord {
    progress: f64,
    queue_position: i64,
}

#[derive(Debug, Default)]
struct StoreInner {
    tasks: HashMap<String, Task>,
    pending: BTreeMap<PendingKey, String>,
    pending_keys: HashMap<String, PendingKey>,
    progress: HashMap<String, ProgressRecord>,
    ema_service_seconds: f64,
    service_samples: u64,
}

/// 重新入队结果
#[derive(Debug, Clone)]
pub enum RequeueOutcome {
    /// 重试预算内，任务已回到队列；prev_gpu 是转换前占用的节点
    Requeued { task: Task, prev_gpu: Option<String> },
    /// 预算耗尽，任务进入终态
    Terminal { task: Task },
}

impl RequeueOutcome {
    pub fn task(&self) -> &Task {
        match self {
            RequeueOutcome::Requeued { task, .. } | RequeueOutcome::Terminal { task } => task,
        }
    }

    /// 转换前占用的节点（终态任务保留 gpu_id 字段）
    pub fn released_gpu(&self) -> Option<&str> {
        match self {
            RequeueOutcome::Requeued { prev_gpu, .. } => prev_gpu.as_deref(),
            RequeueOutcome::Terminal { task } => task.gpu_id.as_deref(),
        }
    }
}

/// 内存任务存储
///
/// 任务表 + 有序待调度索引保存在同一个 RwLock 内，认领（claim）在单次
/// 写锁区间内完成“检查QUEUED → 移出索引 → 置PROCESSING”，并发认领
/// 同一任务时只有一个成功。入队和容量释放通过 Notify 唤醒调度循环。
#[derive(Debug)]
pub struct InMemoryTaskStore {
    inner: RwLock<StoreInner>,
    notify: Arc<Notify>,
    display_id: AtomicU64,
    seq: AtomicU64,
    config: QueueConfig,
}

impl InMemoryTaskStore {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            notify: Arc::new(Notify::new()),
            display_id: AtomicU64::new(0),
            seq: AtomicU64::new(0),
            config,
        }
    }

    /// 调度循环的唤醒句柄
    pub fn wakeup_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    /// 唤醒调度循环（入队、容量释放时调用）
    pub fn notify_dispatcher(&self) {
        self.notify.notify_one();
    }

    fn pending_key(&self, task: &Task) -> PendingKey {
        PendingKey {
            priority: task.priority,
            created_at_ms: task.created_at.timestamp_millis(),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn validate(&self, submission: &TaskSubmission) -> SchedulerResult<()> {
        if submission.task_type < 0 {
            return Err(SchedulerError::InvalidTask(
                "taskType 必须为非负整数".to_string(),
            ));
        }
        if submission.priority < 0 {
            return Err(SchedulerError::InvalidTask("priority 必须为非负".to_string()));
        }
        if submission.payload.is_empty() {
            return Err(SchedulerError::InvalidTask("payload 不能为空".to_string()));
        }
        if submission.user_id.is_empty() {
            return Err(SchedulerError::InvalidTask("userId 不能为空".to_string()));
        }
        if submission.app.is_empty() {
            return Err(SchedulerError::InvalidTask("app 不能为空".to_string()));
        }
        if let Some(timeout) = submission.timeout {
            if timeout <= 0 {
                return Err(SchedulerError::InvalidTask("timeout 必须为正".to_string()));
            }
        }
        Ok(())
    }

    fn estimate_for_position(inner: &StoreInner, position: i64) -> i64 {
        let ema = if inner.service_samples == 0 {
            DEFAULT_SERVICE_SECONDS
        } else {
            inner.ema_service_seconds
        };
        ((position as f64) * ema).ceil() as i64
    }

    fn queue_position_of(inner: &StoreInner, task_id: &str) -> Option<i64> {
        let key = inner.pending_keys.get(task_id)?;
        let position = inner.pending.range(..key).count() as i64 + 1;
        Some(position)
    }

    fn record_service_time(inner: &mut StoreInner, seconds: f64) {
        if seconds <= 0.0 {
            return;
        }
        if inner.service_samples == 0 {
            inner.ema_service_seconds = seconds;
        } else {
            inner.ema_service_seconds =
                SERVICE_EMA_ALPHA * seconds + (1.0 - SERVICE_EMA_ALPHA) * inner.ema_service_seconds;
        }
        inner.service_samples += 1;
    }

    /// 任务执行失败/超时后的统一处理：预算内重新入队，否则进入终态。
    /// 只接受当前为PROCESSING的任务，保证与结果上报互斥。
    pub async fn fail_or_requeue(
        &self,
        task_id: &str,
        error_message: &str,
        terminal_status: TaskStatus,
        not_before: Option<DateTime<Utc>>,
    ) -> SchedulerResult<RequeueOutcome> {
        let mut inner = self.inner.write().await;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let task = inner
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| SchedulerError::TaskNotFound {
                id: task_id.to_string(),
            })?;

        if task.status != TaskStatus::Processing {
            return Err(SchedulerError::InvalidTransition {
                id: task_id.to_string(),
                from: task.status.as_str().to_string(),
                to: terminal_status.as_str().to_string(),
            });
        }

        let now = Utc::now();
        task.updated_at = now;
        task.error_message = Some(error_message.to_string());

        if task.retry_count < task.max_retries {
            let prev_gpu = task.gpu_id.take();
            task.retry_count += 1;
            task.status = TaskStatus::Queued;
            task.started_at = None;
            task.not_before = not_before;
            let key = PendingKey {
                priority: task.priority,
                created_at_ms: task.created_at.timestamp_millis(),
                seq,
            };
            let task_clone = task.clone();
            inner.pending.insert(key, task_id.to_string());
            inner.pending_keys.insert(task_id.to_string(), key);
            inner.progress.remove(task_id);
            drop(inner);
            self.notify_dispatcher();
            debug!(
                "Task '{}' requeued (retry {}/{}): {}",
                task_id, task_clone.retry_count, task_clone.max_retries, error_message
            );
            Ok(RequeueOutcome::Requeued {
                task: task_clone,
                prev_gpu,
            })
        } else {
            task.status = terminal_status;
            task.completed_at = Some(now);
            let task_clone = task.clone();
            inner.progress.remove(task_id);
            info!(
                "Task '{}' terminal with {} after {} retries: {}",
                task_id,
                terminal_status.as_str(),
                task_clone.retry_count,
                error_message
            );
            Ok(RequeueOutcome::Terminal { task: task_clone })
        }
    }

    /// PROCESSING → COMPLETED，记录结果并更新服务时间EMA
    pub async fn complete(&self, task_id: &str, result: String) -> SchedulerResult<Task> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| SchedulerError::TaskNotFound {
                id: task_id.to_string(),
            })?;

        if task.status != TaskStatus::Processing {
            return Err(SchedulerError::InvalidTransition {
                id: task_id.to_string(),
                from: task.status.as_str().to_string(),
                to: TaskStatus::Completed.as_str().to_string(),
            });
        }

        let now = Utc::now();
        task.status = TaskStatus::Completed;
        task.result = Some(result);
        task.completed_at = Some(now);
        task.updated_at = now;
        task.estimated_wait_time = 0;
        let service_seconds = task
            .started_at
            .map(|s| (now - s).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);
        let task_clone = task.clone();
        inner.progress.remove(task_id);
        Self::record_service_time(&mut inner, service_seconds);
        Ok(task_clone)
    }

    /// 取消任务，返回（取消后的任务, 取消前的状态）
    pub async fn cancel(&self, task_id: &str) -> SchedulerResult<(Task, TaskStatus)> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| SchedulerError::TaskNotFound {
                id: task_id.to_string(),
            })?;

        if !task.is_cancellable() {
            return Err(SchedulerError::InvalidTransition {
                id: task_id.to_string(),
                from: task.status.as_str().to_string(),
                to: "FAILED".to_string(),
            });
        }

        let prior = task.status;
        let now = Utc::now();
        task.status = TaskStatus::Failed;
        task.error_message = Some("cancelled by user".to_string());
        task.completed_at = Some(now);
        task.updated_at = now;
        let task_clone = task.clone();

        if let Some(key) = inner.pending_keys.remove(task_id) {
            inner.pending.remove(&key);
        }
        inner.progress.remove(task_id);
        info!("Task '{}' cancelled (was {})", task_id, prior.as_str());
        Ok((task_clone, prior))
    }

    /// 上报执行进度，仅PROCESSING期间有效
    pub async fn update_progress(
        &self,
        task_id: &str,
        progress: f64,
        queue_position: Option<i64>,
    ) -> SchedulerResult<()> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get(task_id)
            .ok_or_else(|| SchedulerError::TaskNotFound {
                id: task_id.to_string(),
            })?;

        if task.status != TaskStatus::Processing {
            return Err(SchedulerError::InvalidTransition {
                id: task_id.to_string(),
                from: task.status.as_str().to_string(),
                to: "PROCESSING".to_string(),
            });
        }

        let record = inner.progress.entry(task_id.to_string()).or_default();
        record.progress = progress.clamp(0.0, 100.0);
        if let Some(pos) = queue_position {
            record.queue_position = pos;
        }
        Ok(())
    }

    /// 任务进度视图
    pub async fn progress_view(&self, task_id: &str) -> SchedulerResult<TaskProgress> {
        let inner = self.inner.read().await;
        let task = inner
            .tasks
            .get(task_id)
            .ok_or_else(|| SchedulerError::TaskNotFound {
                id: task_id.to_string(),
            })?;

        let now = Utc::now();
        let (progress, queue_position, remaining) = match task.status {
            TaskStatus::Queued => {
                let position = Self::queue_position_of(&inner, task_id).unwrap_or(0);
                (0.0, position, Self::estimate_for_position(&inner, position))
            }
            TaskStatus::Processing => {
                let record = inner.progress.get(task_id).cloned().unwrap_or_default();
                let elapsed = task
                    .started_at
                    .map(|s| (now - s).num_seconds())
                    .unwrap_or(0);
                (
                    record.progress,
                    record.queue_position,
                    (task.timeout - elapsed).max(0),
                )
            }
            TaskStatus::Completed => (100.0, 0, 0),
            _ => (0.0, 0, 0),
        };

        Ok(TaskProgress {
            task_id: task.task_id.clone(),
            status: task.status,
            progress,
            estimated_remaining_time: remaining,
            gpu_id: task.gpu_id.clone(),
            start_time: task.started_at,
            update_time: task.updated_at,
            queue_position,
        })
    }

    pub async fn get(&self, task_id: &str) -> SchedulerResult<Task> {
        let inner = self.inner.read().await;
        let mut task = inner
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| SchedulerError::TaskNotFound {
                id: task_id.to_string(),
            })?;
        if task.status == TaskStatus::Queued {
            let position = Self::queue_position_of(&inner, task_id).unwrap_or(1);
            task.estimated_wait_time = Self::estimate_for_position(&inner, position);
        }
        Ok(task)
    }

    /// 过滤分页查询，返回（当前页, 总数），按display_id倒序
    pub async fn list(&self, filter: &TaskFilter) -> SchedulerResult<(Vec<Task>, i64)> {
        let inner = self.inner.read().await;
        let mut matched: Vec<&Task> = inner
            .tasks
            .values()
            .filter(|t| filter.status.map(|s| t.status == s).unwrap_or(true))
            .filter(|t| filter.task_type.map(|tt| t.task_type == tt).unwrap_or(true))
            .filter(|t| {
                filter
                    .gpu_id
                    .as_ref()
                    .map(|g| t.gpu_id.as_deref() == Some(g.as_str()))
                    .unwrap_or(true)
            })
            .filter(|t| {
                filter
                    .user_id
                    .as_ref()
                    .map(|u| &t.user_id == u)
                    .unwrap_or(true)
            })
            .collect();
        matched.sort_by(|a, b| b.display_id.cmp(&a.display_id));

        let total = matched.len() as i64;
        let page = filter.page.unwrap_or(1).max(1);
        let size = filter.size.unwrap_or(20).clamp(1, 500);
        let start = ((page - 1) * size) as usize;
        let items = matched
            .into_iter()
            .skip(start)
            .take(size as usize)
            .cloned()
            .collect();
        Ok((items, total))
    }

    /// 各状态任务数量
    pub async fn status_counts(&self) -> HashMap<String, i64> {
        let inner = self.inner.read().await;
        let mut counts: HashMap<String, i64> = HashMap::new();
        for status in ["QUEUED", "PROCESSING", "COMPLETED", "FAILED", "TIMEOUT"] {
            counts.insert(status.to_string(), 0);
        }
        for task in inner.tasks.values() {
            *counts.entry(task.status.as_str().to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// 执行超时的PROCESSING任务ID列表
    pub async fn expired_processing(&self, now: DateTime<Utc>) -> Vec<String> {
        let inner = self.inner.read().await;
        inner
            .tasks
            .values()
            .filter(|t| t.is_execution_expired(now))
            .map(|t| t.task_id.clone())
            .collect()
    }

    /// 指定节点上执行中的任务ID列表
    pub async fn processing_on_node(&self, gpu_id: &str) -> Vec<String> {
        let inner = self.inner.read().await;
        inner
            .tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Processing && t.gpu_id.as_deref() == Some(gpu_id)
            })
            .map(|t| t.task_id.clone())
            .collect()
    }

    /// 清理超过保留期的终态任务，返回清理数量
    pub async fn prune_history(&self, retention_seconds: i64) -> usize {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        let stale: Vec<String> = inner
            .tasks
            .values()
            .filter(|t| t.is_terminal())
            .filter(|t| {
                t.completed_at
                    .map(|c| (now - c).num_seconds() > retention_seconds)
                    .unwrap_or(false)
            })
            .map(|t| t.task_id.clone())
            .collect();
        for task_id in &stale {
            inner.tasks.remove(task_id);
            inner.progress.remove(task_id);
        }
        if !stale.is_empty() {
            info!("Pruned {} terminal tasks from history", stale.len());
        }
        stale.len()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskStore {
    async fn enqueue(&self, submission: TaskSubmission) -> SchedulerResult<Task> {
        self.validate(&submission)?;

        let mut inner = self.inner.write().await;
        if self.config.max_queue_size > 0 && inner.pending.len() >= self.config.max_queue_size {
            return Err(SchedulerError::CapacityExhausted);
        }

        let display_id = self.display_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut task = Task::new(
            submission,
            display_id,
            self.config.default_timeout_seconds,
            self.config.default_max_retries,
        );

        let position = inner.pending.len() as i64 + 1;
        task.estimated_wait_time = Self::estimate_for_position(&inner, position);

        let key = self.pending_key(&task);
        inner.pending.insert(key, task.task_id.clone());
        inner.pending_keys.insert(task.task_id.clone(), key);
        inner.tasks.insert(task.task_id.clone(), task.clone());
        drop(inner);

        self.notify_dispatcher();
        debug!(
            "Task '{}' (#{}) enqueued, type {}, priority {}",
            task.task_id, task.display_id, task.task_type, task.priority
        );
        Ok(task)
    }

    async fn peek_eligible(
        &self,
        supported_task_types: &[i32],
        node_priority: TaskPriority,
        limit: usize,
    ) -> SchedulerResult<Vec<Task>> {
        let now = Utc::now();
        let inner = self.inner.read().await;

        let mut candidates: Vec<(i32, i64, u64, &Task)> = Vec::new();
        for (key, task_id) in inner.pending.iter() {
            let task = match inner.tasks.get(task_id) {
                Some(t) => t,
                None => continue,
            };
            if !supported_task_types.contains(&task.task_type) {
                continue;
            }
            if !node_priority.can_serve(task.priority_class(self.config.vip_priority_threshold)) {
                continue;
            }
            if let Some(not_before) = task.not_before {
                if now < not_before {
                    continue;
                }
            }
            // 老化提升：排队超过阈值的任务按更高优先级参与排序
            let age = (now - task.created_at).num_seconds();
            let effective_priority = if age > self.config.aging_threshold_seconds {
                task.priority - self.config.aging_boost
            } else {
                task.priority
            };
            candidates.push((effective_priority, key.created_at_ms, key.seq, task));
        }

        candidates.sort_by(|a, b| (a.0, a.1, a.2).cmp(&(b.0, b.1, b.2)));
        Ok(candidates
            .into_iter()
            .take(limit)
            .map(|(_, _, _, t)| t.clone())
            .collect())
    }

    async fn claim_assign(&self, task_id: &str, gpu_id: &str) -> SchedulerResult<Task> {
        let mut inner = self.inner.write().await;

        let in_pending = inner.pending_keys.contains_key(task_id);
        let task = inner
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| SchedulerError::TaskNotFound {
                id: task_id.to_string(),
            })?;

        if task.status != TaskStatus::Queued || !in_pending {
            // 已被并发的调度轮次认领或已离开队列
            return Err(SchedulerError::AssignmentConflict {
                id: task_id.to_string(),
            });
        }

        let now = Utc::now();
        task.status = TaskStatus::Processing;
        task.gpu_id = Some(gpu_id.to_string());
        task.started_at = Some(now);
        task.updated_at = now;
        task.estimated_wait_time = 0;
        task.not_before = None;
        let task_clone = task.clone();

        if let Some(key) = inner.pending_keys.remove(task_id) {
            inner.pending.remove(&key);
        }
        debug!("Task '{}' assigned to '{}'", task_id, gpu_id);
        Ok(task_clone)
    }

    async fn depth(&self) -> SchedulerResult<i64> {
        let inner = self.inner.read().await;
        Ok(inner.pending.len() as i64)
    }

    async fn queue_lengths(&self) -> SchedulerResult<HashMap<String, i64>> {
        let inner = self.inner.read().await;
        let mut lengths: HashMap<String, i64> = HashMap::new();
        for task_id in inner.pending.values() {
            if let Some(task) = inner.tasks.get(task_id) {
                *lengths.entry(task.task_type.to_string()).or_insert(0) += 1;
            }
        }
        Ok(lengths)
    }

    async fn estimate_wait_time(&self, task_id: &str) -> SchedulerResult<i64> {
        let inner = self.inner.read().await;
        if !inner.tasks.contains_key(task_id) {
            return Err(SchedulerError::TaskNotFound {
                id: task_id.to_string(),
            });
        }
        Ok(match Self::queue_position_of(&inner, task_id) {
            Some(position) => Self::estimate_for_position(&inner, position),
            None => 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InMemoryTaskStore {
        InMemoryTaskStore::new(QueueConfig::default())
    }

    fn submission(task_type: i32, priority: i32) -> TaskSubmission {
        TaskSubmission {
            task_type,
            user_id: "u-1".to_string(),
            app: "demo".to_string(),
            priority,
            payload: "{}".to_string(),
            env: None,
            timeout: None,
            max_retries: None,
        }
    }

    #[tokio::test]
    async fn test_enqueue_rejects_invalid_submission() {
        let store = store();

        let mut bad = submission(2, 5);
        bad.payload = String::new();
        assert!(matches!(
            store.enqueue(bad).await.unwrap_err(),
            SchedulerError::InvalidTask(_)
        ));

        let mut bad = submission(2, 5);
        bad.task_type = -1;
        assert!(store.enqueue(bad).await.is_err());

        let mut bad = submission(2, 5);
        bad.user_id = String::new();
        assert!(store.enqueue(bad).await.is_err());
    }

    #[tokio::test]
    async fn test_display_id_is_sequential() {
        let store = store();
        let t1 = store.enqueue(submission(2, 5)).await.unwrap();
        let t2 = store.enqueue(submission(2, 5)).await.unwrap();
        assert_eq!(t1.display_id + 1, t2.display_id);
    }

    #[tokio::test]
    async fn test_peek_orders_by_priority_then_arrival() {
        let store = store();
        let low = store.enqueue(submission(2, 50)).await.unwrap();
        let high = store.enqueue(submission(2, 10)).await.unwrap();
        let low2 = store.enqueue(submission(2, 50)).await.unwrap();

        let peeked = store
            .peek_eligible(&[2], TaskPriority::Vip, 10)
            .await
            .unwrap();
        let ids: Vec<&str> = peeked.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                high.task_id.as_str(),
                low.task_id.as_str(),
                low2.task_id.as_str()
            ]
        );
    }

    #[tokio::test]
    async fn test_peek_filters_capability_and_class() {
        let store = store();
        store.enqueue(submission(3, 5)).await.unwrap();
        let vip = store.enqueue(submission(2, 0)).await.unwrap();

        // 类型不支持的任务不可见
        let peeked = store
            .peek_eligible(&[2], TaskPriority::Vip, 10)
            .await
            .unwrap();
        assert_eq!(peeked.len(), 1);
        assert_eq!(peeked[0].task_id, vip.task_id);

        // NORMAL节点看不到VIP任务（priority 0 → VIP类别）
        let peeked = store
            .peek_eligible(&[2, 3], TaskPriority::Normal, 10)
            .await
            .unwrap();
        assert!(peeked.iter().all(|t| t.task_id != vip.task_id));
    }

    #[tokio::test]
    async fn test_claim_assign_is_exactly_once() {
        let store = Arc::new(store());
        let task = store.enqueue(submission(2, 5)).await.unwrap();

        // 模拟N个并发调度线程抢同一个任务
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            let task_id = task.task_id.clone();
            handles.push(tokio::spawn(async move {
                store.claim_assign(&task_id, &format!("gpu-{i}")).await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);

        let claimed = store.get(&task.task_id).await.unwrap();
        assert_eq!(claimed.status, TaskStatus::Processing);
        assert!(claimed.gpu_id.is_some());
    }

    #[tokio::test]
    async fn test_requeue_until_retries_exhausted() {
        let mut config = QueueConfig::default();
        config.default_max_retries = 2;
        let store = InMemoryTaskStore::new(config);
        let task = store.enqueue(submission(2, 5)).await.unwrap();

        for attempt in 1..=2u32 {
            store.claim_assign(&task.task_id, "gpu-1").await.unwrap();
            let outcome = store
                .fail_or_requeue(&task.task_id, "worker crashed", TaskStatus::Failed, None)
                .await
                .unwrap();
            match outcome {
                RequeueOutcome::Requeued { task: t, prev_gpu } => {
                    assert_eq!(t.retry_count, attempt);
                    assert_eq!(t.status, TaskStatus::Queued);
                    assert!(t.gpu_id.is_none());
                    assert_eq!(prev_gpu.as_deref(), Some("gpu-1"));
                }
                RequeueOutcome::Terminal { .. } => panic!("预算未耗尽不应进入终态"),
            }
        }

        // 第三次失败后预算耗尽
        store.claim_assign(&task.task_id, "gpu-1").await.unwrap();
        let outcome = store
            .fail_or_requeue(&task.task_id, "worker crashed", TaskStatus::Failed, None)
            .await
            .unwrap();
        match outcome {
            RequeueOutcome::Terminal { task: t } => {
                assert_eq!(t.status, TaskStatus::Failed);
                assert!(t.retry_count <= t.max_retries);
                // 终态保留gpu_id便于追溯
                assert_eq!(t.gpu_id.as_deref(), Some("gpu-1"));
            }
            RequeueOutcome::Requeued { .. } => panic!("预算耗尽必须进入终态"),
        }
    }

    #[tokio::test]
    async fn test_complete_then_timeout_sweep_cannot_double_transition() {
        let store = store();
        let task = store.enqueue(submission(2, 5)).await.unwrap();
        store.claim_assign(&task.task_id, "gpu-1").await.unwrap();
        store.complete(&task.task_id, "ok".to_string()).await.unwrap();

        // 结果已落定后，超时路径必须失败
        let err = store
            .fail_or_requeue(&task.task_id, "timeout", TaskStatus::Timeout, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTransition { .. }));

        let done = store.get(&task.task_id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_complete_requires_processing() {
        let store = store();
        let task = store.enqueue(submission(2, 5)).await.unwrap();
        let err = store
            .complete(&task.task_id, "ok".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_cancel_queued_and_processing_only() {
        let store = store();

        let queued = store.enqueue(submission(2, 5)).await.unwrap();
        let (cancelled, prior) = store.cancel(&queued.task_id).await.unwrap();
        assert_eq!(prior, TaskStatus::Queued);
        assert_eq!(cancelled.status, TaskStatus::Failed);

        let processing = store.enqueue(submission(2, 5)).await.unwrap();
        store
            .claim_assign(&processing.task_id, "gpu-1")
            .await
            .unwrap();
        let (_, prior) = store.cancel(&processing.task_id).await.unwrap();
        assert_eq!(prior, TaskStatus::Processing);

        // 终态任务不可取消
        assert!(store.cancel(&queued.task_id).await.is_err());
    }

    #[tokio::test]
    async fn test_progress_only_while_processing() {
        let store = store();
        let task = store.enqueue(submission(2, 5)).await.unwrap();
        assert!(store.update_progress(&task.task_id, 10.0, None).await.is_err());

        store.claim_assign(&task.task_id, "gpu-1").await.unwrap();
        store
            .update_progress(&task.task_id, 42.0, Some(0))
            .await
            .unwrap();

        let view = store.progress_view(&task.task_id).await.unwrap();
        assert_eq!(view.progress, 42.0);
        assert_eq!(view.status, TaskStatus::Processing);
    }

    #[tokio::test]
    async fn test_queued_progress_reports_queue_position() {
        let store = store();
        let first = store.enqueue(submission(2, 5)).await.unwrap();
        let second = store.enqueue(submission(2, 5)).await.unwrap();

        let view = store.progress_view(&second.task_id).await.unwrap();
        assert_eq!(view.queue_position, 2);
        assert!(view.estimated_remaining_time > 0);

        let view_first = store.progress_view(&first.task_id).await.unwrap();
        assert_eq!(view_first.queue_position, 1);
    }

    #[tokio::test]
    async fn test_estimated_wait_time_positive_while_queued() {
        let store = store();
        let task = store.enqueue(submission(3, 5)).await.unwrap();
        assert!(task.estimated_wait_time > 0);

        let wait = store.estimate_wait_time(&task.task_id).await.unwrap();
        assert!(wait > 0);

        store.claim_assign(&task.task_id, "gpu-1").await.unwrap();
        assert_eq!(store.estimate_wait_time(&task.task_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_aging_promotes_old_low_priority_task() {
        let mut config = QueueConfig::default();
        config.aging_threshold_seconds = 60;
        config.aging_boost = 100;
        let store = InMemoryTaskStore::new(config);

        let old_low = store.enqueue(submission(2, 50)).await.unwrap();
        {
            // 人为做旧
            let mut inner = store.inner.write().await;
            let task = inner.tasks.get_mut(&old_low.task_id).unwrap();
            task.created_at = Utc::now() - chrono::Duration::seconds(300);
        }
        let fresh_high = store.enqueue(submission(2, 10)).await.unwrap();

        let peeked = store
            .peek_eligible(&[2], TaskPriority::Vip, 10)
            .await
            .unwrap();
        assert_eq!(peeked[0].task_id, old_low.task_id);
        assert_eq!(peeked[1].task_id, fresh_high.task_id);
    }

    #[tokio::test]
    async fn test_backoff_hides_task_until_deadline() {
        let store = store();
        let task = store.enqueue(submission(2, 5)).await.unwrap();
        store.claim_assign(&task.task_id, "gpu-1").await.unwrap();
        store
            .fail_or_requeue(
                &task.task_id,
                "node fault",
                TaskStatus::Failed,
                Some(Utc::now() + chrono::Duration::seconds(60)),
            )
            .await
            .unwrap();

        let peeked = store
            .peek_eligible(&[2], TaskPriority::Vip, 10)
            .await
            .unwrap();
        assert!(peeked.is_empty());
    }

    #[tokio::test]
    async fn test_prune_history_removes_old_terminal_tasks() {
        let store = store();
        let task = store.enqueue(submission(2, 5)).await.unwrap();
        store.claim_assign(&task.task_id, "gpu-1").await.unwrap();
        store.complete(&task.task_id, "ok".to_string()).await.unwrap();
        {
            let mut inner = store.inner.write().await;
            inner.tasks.get_mut(&task.task_id).unwrap().completed_at =
                Some(Utc::now() - chrono::Duration::seconds(7200));
        }

        assert_eq!(store.prune_history(3600).await, 1);
        assert!(store.get(&task.task_id).await.is_err());
    }

    #[tokio::test]
    async fn test_queue_lengths_by_task_type() {
        let store = store();
        store.enqueue(submission(1, 5)).await.unwrap();
        store.enqueue(submission(1, 5)).await.unwrap();
        store.enqueue(submission(2, 5)).await.unwrap();

        let lengths = store.queue_lengths().await.unwrap();
        assert_eq!(lengths.get("1"), Some(&2));
        assert_eq!(lengths.get("2"), Some(&1));
        assert_eq!(store.depth().await.unwrap(), 3);
    }
}
