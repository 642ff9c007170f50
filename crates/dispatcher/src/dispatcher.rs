use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Notify};
use tracing::{debug, error, info, warn};

use gpu_scheduler_core::{
    config::DispatcherConfig,
    models::GpuNode,
    traits::{ClusterCoordinatorService, NodeRegistry, NodeSelectionStrategy, TaskQueue},
    SchedulerError, SchedulerResult,
};
use gpu_scheduler_infrastructure::{MetricsCollector, StructuredLogger};

/// 任务调度器
///
/// 持续把排队任务匹配到有空闲容量的健康节点。事件唤醒（入队、容量
/// 释放）为主，固定间隔轮询兜底。调度只在Leader实例上运行；认领与
/// 容量占用都是原子操作，并发调度轮次不会重复分配同一任务。
pub struct TaskDispatcher {
    registry: Arc<dyn NodeRegistry>,
    queue: Arc<dyn TaskQueue>,
    coordinator: Arc<dyn ClusterCoordinatorService>,
    strategy: Arc<dyn NodeSelectionStrategy>,
    metrics: Arc<MetricsCollector>,
    config: DispatcherConfig,
    wakeup: Arc<Notify>,
    vip_priority_threshold: i32,
}

impl TaskDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<dyn NodeRegistry>,
        queue: Arc<dyn TaskQueue>,
        coordinator: Arc<dyn ClusterCoordinatorService>,
        strategy: Arc<dyn NodeSelectionStrategy>,
        metrics: Arc<MetricsCollector>,
        config: DispatcherConfig,
        wakeup: Arc<Notify>,
        vip_priority_threshold: i32,
    ) -> Self {
        info!("任务调度器使用策略: {}", strategy.name());
        Self {
            registry,
            queue,
            coordinator,
            strategy,
            metrics,
            config,
            wakeup,
            vip_priority_threshold,
        }
    }

    fn capability_union(nodes: &[GpuNode]) -> Vec<i32> {
        let mut types: Vec<i32> = nodes
            .iter()
            .flat_map(|n| n.supported_task_types.iter().copied())
            .collect();
        types.sort_unstable();
        types.dedup();
        types
    }

    /// 执行一轮调度，返回本轮分配的任务数
    pub async fn dispatch_once(&self) -> SchedulerResult<usize> {
        if !self.coordinator.is_leader().await {
            debug!("非Leader实例，跳过调度");
            return Ok(0);
        }

        let start_time = std::time::Instant::now();
        let mut assigned = 0usize;

        'dispatch: while assigned < self.config.max_dispatch_batch {
            let nodes = self.registry.list_dispatchable().await?;
            if nodes.is_empty() {
                debug!("没有可调度的节点");
                break;
            }

            let types = Self::capability_union(&nodes);
            // VIP视角可以看到所有优先级类别的排队任务，逐任务再做类别匹配
            let candidates_batch = self
                .queue
                .peek_eligible(
                    &types,
                    gpu_scheduler_core::models::TaskPriority::Vip,
                    self.config.max_dispatch_batch,
                )
                .await?;
            if candidates_batch.is_empty() {
                break;
            }

            let mut progressed = false;
            for task in candidates_batch {
                let task_class = task.priority_class(self.vip_priority_threshold);
                let eligible: Vec<GpuNode> = nodes
                    .iter()
                    .filter(|n| n.can_accept(task.task_type, task_class))
                    .cloned()
                    .collect();
                if eligible.is_empty() {
                    // 无可用节点是正常的可重试状态，任务留在队列
                    continue;
                }

                let selected = match self.strategy.select_node(&task, &eligible).await? {
                    Some(gpu_id) => gpu_id,
                    None => continue,
                };

                // 先占容量再认领，输掉认领竞争时归还
                match self.registry.reserve_slot(&selected).await {
                    Ok(()) => {}
                    Err(SchedulerError::CapacityExhausted) => continue,
                    Err(e) => return Err(e),
                }

                match self.queue.claim_assign(&task.task_id, &selected).await {
                    Ok(claimed) => {
                        assigned += 1;
                        progressed = true;
                        self.metrics.record_task_dispatched();
                        StructuredLogger::log_task_dispatched(
                            &claimed.task_id,
                            claimed.display_id,
                            claimed.task_type,
                            &selected,
                        );
                        if assigned >= self.config.max_dispatch_batch {
                            break 'dispatch;
                        }
                        // 节点容量已变化，重新拉取节点快照
                        continue 'dispatch;
                    }
                    Err(SchedulerError::AssignmentConflict { id }) => {
                        warn!("任务 {} 认领竞争失败，归还容量", id);
                        self.registry.release_slot(&selected).await?;
                        continue;
                    }
                    Err(e) => {
                        self.registry.release_slot(&selected).await?;
                        return Err(e);
                    }
                }
            }

            if !progressed {
                break;
            }
        }

        let duration = start_time.elapsed().as_secs_f64();
        self.metrics.record_dispatch_duration(duration);
        if assigned > 0 {
            info!("本轮调度完成，共分配 {} 个任务", assigned);
        }
        Ok(assigned)
    }

    /// 调度循环：事件唤醒 + 兜底轮询，收到关闭信号退出
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "调度循环启动: poll_interval={}s, batch={}",
            self.config.poll_interval_seconds, self.config.max_dispatch_batch
        );

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval_seconds));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.wakeup.notified() => {}
                _ = interval.tick() => {}
                _ = shutdown_rx.recv() => {
                    info!("调度循环收到关闭信号");
                    break;
                }
            }

            match self.dispatch_once().await {
                Ok(assigned) => {
                    // 打满一批说明可能还有积压，立即再来一轮
                    if assigned >= self.config.max_dispatch_batch {
                        self.wakeup.notify_one();
                    }
                }
                Err(e) => {
                    StructuredLogger::log_system_error("dispatcher", "dispatch_once", &e);
                    error!("调度轮次失败: {e}");
                }
            }
        }

        info!("调度循环已停止");
    }
}
