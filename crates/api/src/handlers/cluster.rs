use axum::extract::State;

use crate::error::ApiResult;
use crate::response::success;
use crate::routes::AppState;

/// 集群状态
pub async fn cluster_status(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    Ok(success(state.cluster.cluster_status().await?))
}

/// 集群实例列表
pub async fn cluster_instances(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    Ok(success(state.cluster.instances().await?))
}
