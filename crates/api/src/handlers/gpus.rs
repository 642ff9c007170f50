use axum::extract::{Path, Query, State};
use serde::Deserialize;

use gpu_scheduler_core::models::{GpuNodeRegistration, GpuNodeStatus, TaskPriority};

use crate::error::{ApiError, ApiResult};
use crate::response::{created, success};
use crate::routes::AppState;

/// GPU列表查询参数
#[derive(Debug, Deserialize)]
pub struct GpuQueryParams {
    pub status: Option<String>,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct PriorityParam {
    pub priority: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FaultParams {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UnregisterParams {
    #[serde(default)]
    pub force: bool,
}

fn parse_status(value: &str) -> ApiResult<GpuNodeStatus> {
    match value {
        "ACTIVE" => Ok(GpuNodeStatus::Active),
        "OFFLINE" => Ok(GpuNodeStatus::Offline),
        "FAULTY" => Ok(GpuNodeStatus::Faulty),
        other => Err(ApiError::BadRequest(format!("未知的节点状态: {other}"))),
    }
}

fn parse_priority(value: &str) -> ApiResult<TaskPriority> {
    match value {
        "VIP" => Ok(TaskPriority::Vip),
        "NORMAL" => Ok(TaskPriority::Normal),
        other => Err(ApiError::BadRequest(format!("未知的优先级类别: {other}"))),
    }
}

/// 控制台侧做客户端分页，page/size 缺省时返回全量列表
pub(crate) fn paginate<T>(items: Vec<T>, page: Option<i64>, size: Option<i64>) -> Vec<T> {
    match (page, size) {
        (_, None) => items,
        (page, Some(size)) => {
            let page = page.unwrap_or(1).max(1);
            let size = size.clamp(1, 500);
            items
                .into_iter()
                .skip(((page - 1) * size) as usize)
                .take(size as usize)
                .collect()
        }
    }
}

/// 获取GPU节点列表
pub async fn list_gpus(
    State(state): State<AppState>,
    Query(params): Query<GpuQueryParams>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let mut nodes = state.registry.list().await?;
    if let Some(status) = params.status.as_deref() {
        let status = parse_status(status)?;
        nodes.retain(|n| n.status == status);
    }
    Ok(success(paginate(nodes, params.page, params.size)))
}

/// 获取单个GPU节点
pub async fn get_gpu(
    State(state): State<AppState>,
    Path(gpu_id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let node = state.registry.get(&gpu_id).await?;
    Ok(success(node))
}

/// 按任务类型（可选优先级类别）筛选GPU节点
pub async fn list_gpus_by_task_type(
    State(state): State<AppState>,
    Path(task_type): Path<i32>,
    Query(params): Query<PriorityParam>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let priority = params
        .priority
        .as_deref()
        .map(parse_priority)
        .transpose()?;
    let nodes = state.registry.list_by_task_type(task_type, priority).await?;
    Ok(success(nodes))
}

/// 注册GPU节点
pub async fn register_gpu(
    State(state): State<AppState>,
    axum::Json(registration): axum::Json<GpuNodeRegistration>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let node = state.registry.register(registration).await?;
    Ok(created(node))
}

/// GPU心跳上报
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(gpu_id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    state.registry.heartbeat(&gpu_id).await?;
    Ok(success("heartbeat accepted"))
}

/// 标记GPU节点故障，其上在途任务重新入队
pub async fn mark_faulty(
    State(state): State<AppState>,
    Path(gpu_id): Path<String>,
    Query(params): Query<FaultParams>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let reason = params
        .reason
        .filter(|r| !r.is_empty())
        .ok_or_else(|| ApiError::BadRequest("缺少 reason 参数".to_string()))?;

    state.registry.mark_faulty(&gpu_id, &reason).await?;
    let requeued = state
        .lifecycle
        .requeue_for_node(&gpu_id, &format!("node marked faulty: {reason}"))
        .await?;
    Ok(success(format!("node faulted, {requeued} tasks requeued")))
}

/// 恢复故障GPU节点
pub async fn recover(
    State(state): State<AppState>,
    Path(gpu_id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    state.registry.recover(&gpu_id).await?;
    Ok(success("node recovered"))
}

/// 注销GPU节点；有在途任务时进入排空，force=true 立即移除并重入队
pub async fn unregister_gpu(
    State(state): State<AppState>,
    Path(gpu_id): Path<String>,
    Query(params): Query<UnregisterParams>,
) -> ApiResult<impl axum::response::IntoResponse> {
    if params.force {
        state
            .lifecycle
            .requeue_for_node(&gpu_id, "node unregistered")
            .await?;
    }
    state.registry.unregister(&gpu_id, params.force).await?;
    Ok(success("node unregistered"))
}
