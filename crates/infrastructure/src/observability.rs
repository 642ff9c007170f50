use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{error, info, warn};

use gpu_scheduler_core::errors::SchedulerError;

/// 指标收集器
///
/// 基于 metrics facade，安装Prometheus导出器并注册调度器指标。
/// 导出器是进程级单例，重复创建时降级为仅写指标不提供文本端点。
pub struct MetricsCollector {
    handle: Option<PrometheusHandle>,
}

impl MetricsCollector {
    pub fn new() -> Result<Self, SchedulerError> {
        let handle = match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Prometheus recorder already installed: {e}");
                None
            }
        };

        describe_counter!("scheduler_tasks_submitted_total", "已提交任务总数");
        describe_counter!("scheduler_tasks_dispatched_total", "已分配任务总数");
        describe_counter!("scheduler_tasks_completed_total", "已完成任务总数");
        describe_counter!("scheduler_tasks_failed_total", "失败任务总数");
        describe_counter!("scheduler_tasks_timeout_total", "超时任务总数");
        describe_counter!("scheduler_tasks_requeued_total", "重新入队任务总数");
        describe_counter!("scheduler_nodes_offline_total", "节点离线次数");
        describe_histogram!("scheduler_dispatch_duration_seconds", "单轮调度耗时");
        describe_histogram!("scheduler_task_service_seconds", "任务执行耗时");
        describe_gauge!("scheduler_queue_depth", "当前排队任务数");
        describe_gauge!("scheduler_active_gpus", "当前ACTIVE节点数");
        describe_gauge!("scheduler_total_gpus", "注册节点总数");

        Ok(Self { handle })
    }

    /// Prometheus文本输出
    pub fn render(&self) -> String {
        self.handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }

    pub fn record_task_submitted(&self) {
        counter!("scheduler_tasks_submitted_total").increment(1);
    }

    pub fn record_task_dispatched(&self) {
        counter!("scheduler_tasks_dispatched_total").increment(1);
    }

    pub fn record_task_completed(&self, service_seconds: f64) {
        counter!("scheduler_tasks_completed_total").increment(1);
        histogram!("scheduler_task_service_seconds").record(service_seconds);
    }

    pub fn record_task_failed(&self) {
        counter!("scheduler_tasks_failed_total").increment(1);
    }

    pub fn record_task_timeout(&self) {
        counter!("scheduler_tasks_timeout_total").increment(1);
    }

    pub fn record_task_requeued(&self) {
        counter!("scheduler_tasks_requeued_total").increment(1);
    }

    pub fn record_node_offline(&self) {
        counter!("scheduler_nodes_offline_total").increment(1);
    }

    pub fn record_dispatch_duration(&self, seconds: f64) {
        histogram!("scheduler_dispatch_duration_seconds").record(seconds);
    }

    pub fn update_fleet_gauges(&self, active_gpus: i64, total_gpus: i64, queue_depth: i64) {
        gauge!("scheduler_active_gpus").set(active_gpus as f64);
        gauge!("scheduler_total_gpus").set(total_gpus as f64);
        gauge!("scheduler_queue_depth").set(queue_depth as f64);
    }
}

/// 结构化日志辅助
///
/// 关键业务事件的统一记录入口，保证字段名在各处一致。
pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_task_dispatched(task_id: &str, display_id: u64, task_type: i32, gpu_id: &str) {
        info!(
            task_id = task_id,
            display_id = display_id,
            task_type = task_type,
            gpu_id = gpu_id,
            "task dispatched"
        );
    }

    pub fn log_task_completed(task_id: &str, gpu_id: &str, service_seconds: f64) {
        info!(
            task_id = task_id,
            gpu_id = gpu_id,
            service_seconds = service_seconds,
            "task completed"
        );
    }

    pub fn log_task_requeued(task_id: &str, retry_count: u32, reason: &str) {
        warn!(
            task_id = task_id,
            retry_count = retry_count,
            reason = reason,
            "task requeued"
        );
    }

    pub fn log_node_offline(gpu_id: &str, inflight_tasks: usize) {
        warn!(
            gpu_id = gpu_id,
            inflight_tasks = inflight_tasks,
            "node offline, requeueing in-flight tasks"
        );
    }

    pub fn log_system_error(component: &str, operation: &str, error: &dyn std::fmt::Display) {
        error!(
            component = component,
            operation = operation,
            error = %error,
            "system error"
        );
    }
}
