use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use gpu_scheduler_core::{config::LifecycleConfig, SchedulerError, SchedulerResult};
use gpu_scheduler_infrastructure::InMemoryTaskStore;

use crate::lifecycle::TaskLifecycleTracker;

/// 任务超时扫描
///
/// 周期比较 now - started_at 与任务自身timeout，超时任务走统一的
/// 失败/重试路径。任务的状态检查在存储写锁内完成，与结果上报互斥，
/// 同一任务不会既完成又超时。顺带清理超过保留期的终态任务。
pub struct TaskTimeoutSweeper {
    store: Arc<InMemoryTaskStore>,
    tracker: Arc<TaskLifecycleTracker>,
    config: LifecycleConfig,
}

impl TaskTimeoutSweeper {
    pub fn new(
        store: Arc<InMemoryTaskStore>,
        tracker: Arc<TaskLifecycleTracker>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            tracker,
            config,
        }
    }

    /// 执行一次超时扫描，返回处理的任务数
    pub async fn sweep_once(&self) -> SchedulerResult<usize> {
        self.sweep_once_at(Utc::now()).await
    }

    /// 以指定时间点执行超时判定
    pub async fn sweep_once_at(&self, now: chrono::DateTime<Utc>) -> SchedulerResult<usize> {
        let expired = self.store.expired_processing(now).await;
        let mut handled = 0;

        for task_id in &expired {
            match self.tracker.force_timeout(task_id).await {
                Ok(task) => {
                    handled += 1;
                    warn!(
                        "任务 {} 执行超时 (timeout={}s, status={})",
                        task_id,
                        task.timeout,
                        task.status.as_str()
                    );
                }
                Err(SchedulerError::InvalidTransition { .. }) => {
                    // 扫描与结果上报竞争，结果先落定则放弃超时处理
                    debug!("任务 {} 已离开PROCESSING，跳过超时处理", task_id);
                }
                Err(e) => return Err(e),
            }
        }

        self.store
            .prune_history(self.config.history_retention_seconds)
            .await;
        Ok(handled)
    }

    /// 扫描循环
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "任务超时扫描启动: interval={}s",
            self.config.timeout_check_interval_seconds
        );

        let mut interval = tokio::time::interval(Duration::from_secs(
            self.config.timeout_check_interval_seconds,
        ));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!("任务超时扫描失败: {e}");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("任务超时扫描收到关闭信号");
                    break;
                }
            }
        }
    }
}
