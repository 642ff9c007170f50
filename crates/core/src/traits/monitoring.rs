use async_trait::async_trait;

use crate::errors::SchedulerResult;
use crate::models::{
    Alert, AlertFilter, AlertLevel, AlertStats, ComponentHealth, HealthSnapshot,
    MonitoringMetrics, MonitoringOverview,
};

/// 健康检查服务：对Registry/Queue/Tracker状态做只读聚合
#[async_trait]
pub trait HealthCheckService: Send + Sync {
    async fn health_snapshot(&self) -> SchedulerResult<HealthSnapshot>;

    async fn component_health(&self, component: &str) -> SchedulerResult<ComponentHealth>;

    async fn metrics_snapshot(&self) -> SchedulerResult<MonitoringMetrics>;

    async fn overview(&self) -> SchedulerResult<MonitoringOverview>;

    /// 手动触发一次健康检查
    async fn run_check(&self) -> SchedulerResult<HealthSnapshot>;
}

/// 手动触发的监控评估入口（POST /monitoring/check）
#[async_trait]
pub trait MonitoringCheckService: Send + Sync {
    /// 执行一轮健康评估与告警检查，返回新触发的告警数
    async fn trigger_check(&self) -> SchedulerResult<usize>;
}

/// 告警服务
#[async_trait]
pub trait AlertService: Send + Sync {
    /// 触发告警；同一 source+title 已有ACTIVE告警时去重，返回None
    async fn raise(
        &self,
        source: &str,
        title: &str,
        message: &str,
        level: AlertLevel,
    ) -> SchedulerResult<Option<Alert>>;

    /// 确认告警；不存在返回NotFound，重复确认返回AlreadyAcknowledged
    async fn acknowledge(&self, alert_id: &str, acknowledged_by: &str) -> SchedulerResult<Alert>;

    async fn list(&self, filter: &AlertFilter) -> SchedulerResult<(Vec<Alert>, i64)>;

    async fn stats(&self) -> SchedulerResult<AlertStats>;
}
