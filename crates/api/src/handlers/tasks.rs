use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use gpu_scheduler_core::models::{
    TaskFilter, TaskResultUpdate, TaskStatus, TaskStatusUpdate, TaskSubmission, TaskSubmitResult,
};

use crate::error::{ApiError, ApiResult};
use crate::response::{created, success};
use crate::routes::AppState;

/// 任务列表查询参数
#[derive(Debug, Deserialize)]
pub struct TaskQueryParams {
    pub status: Option<String>,
    #[serde(rename = "taskType")]
    pub task_type: Option<i32>,
    #[serde(rename = "gpuId")]
    pub gpu_id: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

impl TaskQueryParams {
    fn into_filter(self) -> ApiResult<TaskFilter> {
        let status = match self.status.as_deref() {
            Some(value) => Some(TaskStatus::parse(value).ok_or_else(|| {
                ApiError::BadRequest(format!("未知的任务状态: {value}"))
            })?),
            None => None,
        };
        Ok(TaskFilter {
            status,
            task_type: self.task_type,
            gpu_id: self.gpu_id,
            user_id: self.user_id,
            page: self.page,
            size: self.size,
        })
    }
}

/// 获取任务列表
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<TaskQueryParams>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let filter = params.into_filter()?;
    let (tasks, _total) = state.lifecycle.list(&filter).await?;
    Ok(success(tasks))
}

/// 提交任务
pub async fn create_task(
    State(state): State<AppState>,
    Json(submission): Json<TaskSubmission>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let task = state.queue.enqueue(submission).await?;
    Ok(created(TaskSubmitResult {
        task_id: task.task_id,
        display_id: task.display_id,
        status: task.status,
        estimated_wait_time: task.estimated_wait_time,
    }))
}

/// 获取任务详情
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let task = state.lifecycle.get(&task_id).await?;
    Ok(success(task))
}

/// 获取任务进度
pub async fn get_task_progress(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let progress = state.lifecycle.get_progress(&task_id).await?;
    Ok(success(progress))
}

/// 获取任务结果
pub async fn get_task_result(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let task = state.lifecycle.get(&task_id).await?;
    Ok(success(json!({
        "taskId": task.task_id,
        "status": task.status,
        "result": task.result,
        "errorMessage": task.error_message,
    })))
}

/// Worker上报任务状态
pub async fn update_task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(update): Json<TaskStatusUpdate>,
) -> ApiResult<impl axum::response::IntoResponse> {
    state.lifecycle.report_status(&task_id, update).await?;
    Ok(success("status accepted"))
}

/// Worker上报任务结果
pub async fn update_task_result(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(update): Json<TaskResultUpdate>,
) -> ApiResult<impl axum::response::IntoResponse> {
    state.lifecycle.report_result(&task_id, update.result).await?;
    Ok(success("result accepted"))
}

/// 取消任务
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let task = state.lifecycle.cancel(&task_id).await?;
    Ok(success(task))
}
