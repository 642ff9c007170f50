use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{error, info};

use async_trait::async_trait;
use gpu_scheduler_core::{
    config::MonitoringConfig,
    models::{AlertLevel, GpuNodeStatus, HealthState},
    traits::{
        AlertService, ClusterCoordinatorService, HealthCheckService, MonitoringCheckService,
        NodeRegistry,
    },
    SchedulerResult,
};
use gpu_scheduler_infrastructure::InMemoryAlertStore;

/// 告警引擎
///
/// 周期评估健康快照和注册表状态，按阈值触发告警。同一 source+title
/// 的ACTIVE告警只保留一条，评估在Leader实例上运行。
pub struct AlertEngine {
    registry: Arc<dyn NodeRegistry>,
    health: Arc<dyn HealthCheckService>,
    alerts: Arc<InMemoryAlertStore>,
    coordinator: Arc<dyn ClusterCoordinatorService>,
    config: MonitoringConfig,
}

impl AlertEngine {
    pub fn new(
        registry: Arc<dyn NodeRegistry>,
        health: Arc<dyn HealthCheckService>,
        alerts: Arc<InMemoryAlertStore>,
        coordinator: Arc<dyn ClusterCoordinatorService>,
        config: MonitoringConfig,
    ) -> Self {
        Self {
            registry,
            health,
            alerts,
            coordinator,
            config,
        }
    }

    /// 执行一轮告警评估，返回新触发的告警数
    pub async fn evaluate_once(&self) -> SchedulerResult<usize> {
        let snapshot = self.health.run_check().await?;
        let mut raised = 0;

        if snapshot.queue_health == HealthState::Unhealthy {
            if self
                .alerts
                .raise(
                    "queue",
                    "任务队列积压",
                    &format!("排队任务持续超过阈值 {}", self.config.queue_backlog_threshold),
                    AlertLevel::Warning,
                )
                .await?
                .is_some()
            {
                raised += 1;
            }
        }

        if snapshot.gpu_health == HealthState::Unhealthy {
            if self
                .alerts
                .raise(
                    "gpu",
                    "GPU资源不足",
                    &format!(
                        "存活节点 {}/{} 低于健康比例",
                        snapshot.active_gpu_count, snapshot.total_gpu_count
                    ),
                    AlertLevel::Critical,
                )
                .await?
                .is_some()
            {
                raised += 1;
            }
        }

        for node in self.registry.list().await? {
            if node.status == GpuNodeStatus::Faulty {
                let message = node
                    .fault_reason
                    .clone()
                    .unwrap_or_else(|| "unknown fault".to_string());
                if self
                    .alerts
                    .raise(&node.gpu_id, "GPU节点故障", &message, AlertLevel::Critical)
                    .await?
                    .is_some()
                {
                    raised += 1;
                }
            }
        }

        self.alerts
            .archive_expired(self.config.alert_retention_seconds)
            .await;
        Ok(raised)
    }

    /// 评估循环，只在Leader上执行
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "告警引擎启动: interval={}s",
            self.config.check_interval_seconds
        );

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.check_interval_seconds));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !self.coordinator.is_leader().await {
                        continue;
                    }
                    match self.evaluate_once().await {
                        Ok(raised) if raised > 0 => {
                            info!("本轮评估触发 {} 条新告警", raised);
                        }
                        Ok(_) => {}
                        Err(e) => error!("告警评估失败: {e}"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("告警引擎收到关闭信号");
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl MonitoringCheckService for AlertEngine {
    async fn trigger_check(&self) -> SchedulerResult<usize> {
        self.evaluate_once().await
    }
}
