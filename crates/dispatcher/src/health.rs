use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use gpu_scheduler_core::{
    config::MonitoringConfig,
    models::{
        ComponentHealth, HealthSnapshot, HealthState, MonitoringMetrics, MonitoringOverview,
        OverviewMetrics, SystemMetrics,
    },
    traits::{
        ClusterCoordinatorService, HealthCheckService, NodeRegistry, TaskLifecycle, TaskQueue,
    },
    SchedulerError, SchedulerResult,
};
use gpu_scheduler_infrastructure::MetricsCollector;

/// 队列健康滞回状态
///
/// `since` 记录指标越过阈值到另一侧的起始时间，持续超过配置窗口
/// 才真正翻转，避免临界值附近来回抖动。
#[derive(Debug, Default)]
struct QueueHealthState {
    since: Option<DateTime<Utc>>,
    unhealthy: bool,
}

/// 健康与指标聚合
///
/// 对Registry/Queue/Tracker做只读扫描，派生健康状态与各类计数，
/// 不产生任何副作用（Prometheus gauge刷新除外）。
pub struct HealthAggregator {
    registry: Arc<dyn NodeRegistry>,
    queue: Arc<dyn TaskQueue>,
    lifecycle: Arc<dyn TaskLifecycle>,
    coordinator: Arc<dyn ClusterCoordinatorService>,
    metrics: Arc<MetricsCollector>,
    config: MonitoringConfig,
    queue_state: Mutex<QueueHealthState>,
}

impl HealthAggregator {
    pub fn new(
        registry: Arc<dyn NodeRegistry>,
        queue: Arc<dyn TaskQueue>,
        lifecycle: Arc<dyn TaskLifecycle>,
        coordinator: Arc<dyn ClusterCoordinatorService>,
        metrics: Arc<MetricsCollector>,
        config: MonitoringConfig,
    ) -> Self {
        Self {
            registry,
            queue,
            lifecycle,
            coordinator,
            metrics,
            config,
            queue_state: Mutex::new(QueueHealthState::default()),
        }
    }

    fn gpu_health(&self, active: i64, total: i64) -> HealthState {
        if total == 0 {
            return HealthState::Unhealthy;
        }
        if (active as f64) / (total as f64) > self.config.gpu_healthy_ratio {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        }
    }

    async fn queue_health(&self, depth: i64, now: DateTime<Utc>) -> HealthState {
        let mut state = self.queue_state.lock().await;
        let breached = depth > self.config.queue_backlog_threshold;
        let sustained = self.config.queue_backlog_sustained_seconds;

        if state.unhealthy != breached {
            // 指标在阈值另一侧，累计持续时间
            let since = state.since.get_or_insert(now);
            if (now - *since).num_seconds() >= sustained {
                state.unhealthy = breached;
                state.since = None;
                debug!(
                    "queue health flipped to {}",
                    if breached { "UNHEALTHY" } else { "HEALTHY" }
                );
            }
        } else {
            state.since = None;
        }

        if state.unhealthy {
            HealthState::Unhealthy
        } else {
            HealthState::Healthy
        }
    }
}

#[async_trait]
impl HealthCheckService for HealthAggregator {
    async fn health_snapshot(&self) -> SchedulerResult<HealthSnapshot> {
        let now = Utc::now();
        let gpu_counts = self.registry.status_counts().await?;
        let active = gpu_counts.get("ACTIVE").copied().unwrap_or(0);
        let total: i64 = gpu_counts.values().sum();
        let depth = self.queue.depth().await?;

        let gpu_health = self.gpu_health(active, total);
        let queue_health = self.queue_health(depth, now).await;
        let overall = if gpu_health.is_healthy() && queue_health.is_healthy() {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        };

        self.metrics.update_fleet_gauges(active, total, depth);

        Ok(HealthSnapshot {
            overall_health: overall,
            gpu_health,
            queue_health,
            active_gpu_count: active,
            total_gpu_count: total,
            timestamp: now,
        })
    }

    async fn component_health(&self, component: &str) -> SchedulerResult<ComponentHealth> {
        let snapshot = self.health_snapshot().await?;
        let now = Utc::now();
        let (status, message) = match component {
            "gpu" => (
                snapshot.gpu_health,
                Some(format!(
                    "{}/{} nodes active",
                    snapshot.active_gpu_count, snapshot.total_gpu_count
                )),
            ),
            "queue" => {
                let depth = self.queue.depth().await?;
                (snapshot.queue_health, Some(format!("depth {depth}")))
            }
            "cluster" => {
                let status_view = self.coordinator.cluster_status().await?;
                let healthy = !status_view.leader_instance.is_empty();
                (
                    if healthy {
                        HealthState::Healthy
                    } else {
                        HealthState::Unhealthy
                    },
                    Some(format!("leader: {}", status_view.leader_instance)),
                )
            }
            "overall" => (snapshot.overall_health, None),
            other => {
                return Err(SchedulerError::Validation(format!("未知组件: {other}")));
            }
        };

        Ok(ComponentHealth {
            component: component.to_string(),
            status,
            message,
            last_check: now,
        })
    }

    async fn metrics_snapshot(&self) -> SchedulerResult<MonitoringMetrics> {
        Ok(MonitoringMetrics {
            gpu_status_counts: self.registry.status_counts().await?,
            task_status_counts: self.lifecycle.status_counts().await?,
            queue_lengths: self.queue.queue_lengths().await?,
            system_metrics: SystemMetrics::default(),
        })
    }

    async fn overview(&self) -> SchedulerResult<MonitoringOverview> {
        let health_status = self.health_snapshot().await?;
        let task_counts = self.lifecycle.status_counts().await?;
        let queue_length = self.queue.depth().await?;

        let count = |status: &str| task_counts.get(status).copied().unwrap_or(0);
        let metrics = OverviewMetrics {
            active_gpus: health_status.active_gpu_count,
            total_tasks: task_counts.values().sum(),
            queue_length,
            failed_tasks: count("FAILED") + count("TIMEOUT"),
            completed_tasks: count("COMPLETED"),
            processing_tasks: count("PROCESSING"),
            queued_tasks: count("QUEUED"),
        };

        Ok(MonitoringOverview {
            timestamp: Utc::now(),
            instance_id: self.coordinator.instance_id().to_string(),
            is_leader: self.coordinator.is_leader().await,
            health_status,
            metrics,
        })
    }

    async fn run_check(&self) -> SchedulerResult<HealthSnapshot> {
        self.health_snapshot().await
    }
}
