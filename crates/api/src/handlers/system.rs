use axum::extract::State;
use serde_json::json;

use crate::error::ApiResult;
use crate::response::success;
use crate::routes::AppState;

/// 存活探针，不鉴权
pub async fn health_check() -> ApiResult<impl axum::response::IntoResponse> {
    Ok(success(json!({"status": "ok"})))
}

/// Prometheus指标文本
pub async fn prometheus_metrics(State(state): State<AppState>) -> String {
    state.metrics.render()
}
