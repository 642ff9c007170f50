use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{error, info};

use gpu_scheduler_core::{
    config::RegistryConfig,
    models::GpuNode,
    traits::{NodeRegistry, TaskLifecycle},
    SchedulerResult,
};
use gpu_scheduler_infrastructure::MetricsCollector;

/// 节点存活检测
///
/// 周期扫描注册表：心跳超时的ACTIVE节点转为OFFLINE，其上执行中的
/// 任务带重试计数重新入队。
pub struct NodeLivenessDetector {
    registry: Arc<dyn NodeRegistry>,
    lifecycle: Arc<dyn TaskLifecycle>,
    metrics: Arc<MetricsCollector>,
    config: RegistryConfig,
}

impl NodeLivenessDetector {
    pub fn new(
        registry: Arc<dyn NodeRegistry>,
        lifecycle: Arc<dyn TaskLifecycle>,
        metrics: Arc<MetricsCollector>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            registry,
            lifecycle,
            metrics,
            config,
        }
    }

    /// 执行一次存活扫描，返回本次离线的节点
    pub async fn detect_once(&self) -> SchedulerResult<Vec<GpuNode>> {
        let expired = self
            .registry
            .sweep_expired(self.config.liveness_timeout_seconds)
            .await?;

        for node in &expired {
            self.metrics.record_node_offline();
            let requeued = self
                .lifecycle
                .requeue_for_node(&node.gpu_id, "node heartbeat expired")
                .await?;
            if requeued > 0 {
                info!(
                    "节点 {} 离线，重新入队 {} 个在途任务",
                    node.gpu_id, requeued
                );
            }
        }
        Ok(expired)
    }

    /// 检测循环
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "节点存活检测启动: timeout={}s, interval={}s",
            self.config.liveness_timeout_seconds, self.config.liveness_check_interval_seconds
        );

        let mut interval = tokio::time::interval(Duration::from_secs(
            self.config.liveness_check_interval_seconds,
        ));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.detect_once().await {
                        error!("节点存活扫描失败: {e}");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("节点存活检测收到关闭信号");
                    break;
                }
            }
        }
    }
}
