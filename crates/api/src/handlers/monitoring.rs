use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::json;

use gpu_scheduler_core::models::{AlertFilter, AlertLevel, AlertStatus};

use crate::error::{ApiError, ApiResult};
use crate::response::success;
use crate::routes::AppState;

use super::gpus::paginate;

/// 告警列表查询参数
#[derive(Debug, Deserialize)]
pub struct AlertQueryParams {
    pub level: Option<String>,
    pub status: Option<String>,
    pub source: Option<String>,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

/// 请求体可省略，控制台直接POST空body
#[derive(Debug, Deserialize, Default)]
pub struct AcknowledgeRequest {
    #[serde(rename = "acknowledgedBy")]
    pub acknowledged_by: Option<String>,
}

/// 监控概览
pub async fn overview(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    Ok(success(state.health.overview().await?))
}

/// 系统健康状态
pub async fn health(State(state): State<AppState>) -> ApiResult<impl axum::response::IntoResponse> {
    Ok(success(state.health.health_snapshot().await?))
}

/// 指定组件健康状态
pub async fn component_health(
    State(state): State<AppState>,
    Path(component): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    Ok(success(state.health.component_health(&component).await?))
}

/// 监控指标
pub async fn metrics_snapshot(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    Ok(success(state.health.metrics_snapshot().await?))
}

/// 按key获取单项指标
pub async fn metric_by_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let metrics = state.health.metrics_snapshot().await?;
    let value = match key.as_str() {
        "gpu_status_counts" => json!(metrics.gpu_status_counts),
        "task_status_counts" => json!(metrics.task_status_counts),
        "queue_lengths" => json!(metrics.queue_lengths),
        "system_metrics" => json!(metrics.system_metrics),
        other => {
            return Err(ApiError::BadRequest(format!("未知指标: {other}")));
        }
    };
    Ok(success(value))
}

/// 手动触发监控检查（健康评估 + 告警检查）
pub async fn trigger_check(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let raised = state.monitor.trigger_check().await?;
    Ok(success(format!("monitoring check completed, {raised} alerts raised")))
}

/// 手动触发健康检查
pub async fn trigger_health_check(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    Ok(success(state.health.run_check().await?))
}

/// 获取告警列表
pub async fn list_alerts(
    State(state): State<AppState>,
    Query(params): Query<AlertQueryParams>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let level = match params.level.as_deref() {
        Some(value) => Some(AlertLevel::parse(value).ok_or_else(|| {
            ApiError::BadRequest(format!("未知的告警级别: {value}"))
        })?),
        None => None,
    };
    let status = match params.status.as_deref() {
        Some("ACTIVE") => Some(AlertStatus::Active),
        Some("ACKNOWLEDGED") => Some(AlertStatus::Acknowledged),
        Some(other) => {
            return Err(ApiError::BadRequest(format!("未知的告警状态: {other}")));
        }
        None => None,
    };

    let filter = AlertFilter {
        level,
        status,
        source: params.source,
        page: None,
        size: None,
    };
    let (alerts, _total) = state.alerts.list(&filter).await?;
    Ok(success(paginate(alerts, params.page, params.size)))
}

/// 告警统计
pub async fn alert_stats(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    Ok(success(state.alerts.stats().await?))
}

/// 确认告警
pub async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
    body: Bytes,
) -> ApiResult<impl axum::response::IntoResponse> {
    let request: AcknowledgeRequest = if body.is_empty() {
        AcknowledgeRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("请求体格式错误: {e}")))?
    };
    let acknowledged_by = request
        .acknowledged_by
        .unwrap_or_else(|| "operator".to_string());
    let alert = state.alerts.acknowledge(&alert_id, &acknowledged_by).await?;
    Ok(success(alert))
}
