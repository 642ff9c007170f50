use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use gpu_scheduler_core::traits::{
    AlertService, ClusterCoordinatorService, HealthCheckService, MonitoringCheckService,
    NodeRegistry, TaskLifecycle, TaskQueue,
};
use gpu_scheduler_infrastructure::MetricsCollector;

use crate::auth::{auth_middleware, AuthState};
use crate::handlers::{
    cluster::{cluster_instances, cluster_status},
    gpus::{
        get_gpu, heartbeat, list_gpus, list_gpus_by_task_type, mark_faulty, recover, register_gpu,
        unregister_gpu,
    },
    monitoring::{
        acknowledge_alert, alert_stats, component_health, health, list_alerts, metric_by_key,
        metrics_snapshot, overview, trigger_check, trigger_health_check,
    },
    system::{health_check, prometheus_metrics},
    tasks::{
        cancel_task, create_task, get_task, get_task_progress, get_task_result, list_tasks,
        update_task_result, update_task_status,
    },
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<dyn NodeRegistry>,
    pub queue: Arc<dyn TaskQueue>,
    pub lifecycle: Arc<dyn TaskLifecycle>,
    pub health: Arc<dyn HealthCheckService>,
    pub alerts: Arc<dyn AlertService>,
    pub monitor: Arc<dyn MonitoringCheckService>,
    pub cluster: Arc<dyn ClusterCoordinatorService>,
    pub metrics: Arc<MetricsCollector>,
}

/// 构建完整的API路由
///
/// 业务端点挂在 /api/v2 下并套Bearer认证；/health 与 /metrics
/// 保持开放供探活和抓取。
pub fn create_app(state: AppState, auth: AuthState) -> Router {
    let api = Router::new()
        // GPU节点管理
        .route("/gpus", get(list_gpus))
        .route("/gpus/register", post(register_gpu))
        .route("/gpus/by-task-type/{task_type}", get(list_gpus_by_task_type))
        .route("/gpus/{id}", get(get_gpu).delete(unregister_gpu))
        .route("/gpus/{id}/heartbeat", post(heartbeat))
        .route("/gpus/{id}/fault", post(mark_faulty))
        .route("/gpus/{id}/recover", post(recover))
        // 任务管理
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/{id}", get(get_task))
        .route("/tasks/{id}/progress", get(get_task_progress))
        .route("/tasks/{id}/result", get(get_task_result).post(update_task_result))
        .route("/tasks/{id}/status", post(update_task_status))
        .route("/tasks/{id}/cancel", post(cancel_task))
        // 监控与告警
        .route("/monitoring/overview", get(overview))
        .route("/monitoring/health", get(health))
        .route("/monitoring/health/check", post(trigger_health_check))
        .route("/monitoring/health/{component}", get(component_health))
        .route("/monitoring/metrics", get(metrics_snapshot))
        .route("/monitoring/metrics/{key}", get(metric_by_key))
        .route("/monitoring/check", post(trigger_check))
        .route("/monitoring/alerts", get(list_alerts))
        .route("/monitoring/alerts/stats", get(alert_stats))
        .route("/monitoring/alerts/{id}/acknowledge", post(acknowledge_alert))
        // 集群状态
        .route("/cluster/status", get(cluster_status))
        .route("/cluster/instances", get(cluster_instances))
        .layer(middleware::from_fn_with_state(auth, auth_middleware))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
        .nest("/api/v2", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
