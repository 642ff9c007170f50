use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use gpu_scheduler_core::SchedulerError;

use crate::auth::AuthError;
use crate::response::ApiResponse;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("调度器错误: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("认证错误: {0}")]
    Authentication(#[from] AuthError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Scheduler(e) => match e {
                SchedulerError::TaskNotFound { .. }
                | SchedulerError::NodeNotFound { .. }
                | SchedulerError::AlertNotFound { .. } => StatusCode::NOT_FOUND,
                SchedulerError::DuplicateNodeId { .. }
                | SchedulerError::AlreadyAcknowledged { .. }
                | SchedulerError::AssignmentConflict { .. }
                | SchedulerError::InvalidTransition { .. }
                | SchedulerError::RecoveryTooSoon { .. } => StatusCode::CONFLICT,
                SchedulerError::InvalidTask(_) | SchedulerError::Validation(_) => {
                    StatusCode::BAD_REQUEST
                }
                SchedulerError::CapacityExhausted | SchedulerError::NotLeader => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                SchedulerError::TaskTimeout { .. } => StatusCode::REQUEST_TIMEOUT,
                SchedulerError::Serialization(_)
                | SchedulerError::Configuration(_)
                | SchedulerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Authentication(e) => e.status(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ApiResponse::error(status, self.to_string());
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
