use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::gpu_node::TaskPriority;

/// 任务定义
///
/// 表示用户提交的一次推理/计算请求，由调度器分配到唯一的GPU节点执行。
/// `priority` 数值越小优先级越高；`display_id` 是面向用户的短序号。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: String,
    pub display_id: u64,
    pub task_type: i32,
    pub status: TaskStatus,
    pub user_id: String,
    pub app: String,
    pub priority: i32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub gpu_id: Option<String>,
    pub payload: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// 执行超时（秒）
    pub timeout: i64,
    /// 预计等待时间（秒），入队和查询时计算
    pub estimated_wait_time: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub env: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    /// 退避期内不参与调度
    #[serde(skip)]
    pub not_before: Option<DateTime<Utc>>,
}

/// 任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[serde(rename = "QUEUED")]
    Queued,
    #[serde(rename = "PROCESSING")]
    Processing,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "TIMEOUT")]
    Timeout,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Timeout => "TIMEOUT",
        }
    }

    /// 终态任务不可再变更（只读）
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Timeout
        )
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(TaskStatus::Queued),
            "PROCESSING" => Some(TaskStatus::Processing),
            "COMPLETED" => Some(TaskStatus::Completed),
            "FAILED" => Some(TaskStatus::Failed),
            "TIMEOUT" => Some(TaskStatus::Timeout),
            _ => None,
        }
    }
}

/// 任务提交请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSubmission {
    pub task_type: i32,
    pub user_id: String,
    pub app: String,
    pub priority: i32,
    pub payload: String,
    #[serde(default)]
    pub env: Option<String>,
    #[serde(default)]
    pub timeout: Option<i64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

/// 任务提交响应
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSubmitResult {
    pub task_id: String,
    pub display_id: u64,
    pub status: TaskStatus,
    pub estimated_wait_time: i64,
}

/// Worker上报的任务状态更新
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusUpdate {
    pub status: String,
    #[serde(default)]
    pub gpu_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub queue_position: Option<i64>,
}

/// 任务结果上报
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResultUpdate {
    pub result: String,
}

/// 任务进度视图
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: f64,
    pub estimated_remaining_time: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub gpu_id: Option<String>,
    #[serde(
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub update_time: DateTime<Utc>,
    pub queue_position: i64,
}

/// 任务查询过滤器
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<i32>,
    pub gpu_id: Option<String>,
    pub user_id: Option<String>,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

impl Task {
    /// 根据提交请求创建排队中的新任务
    pub fn new(
        submission: TaskSubmission,
        display_id: u64,
        default_timeout: i64,
        default_max_retries: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id: Uuid::new_v4().to_string(),
            display_id,
            task_type: submission.task_type,
            status: TaskStatus::Queued,
            user_id: submission.user_id,
            app: submission.app,
            priority: submission.priority,
            gpu_id: None,
            payload: submission.payload,
            result: None,
            error_message: None,
            retry_count: 0,
            max_retries: submission.max_retries.unwrap_or(default_max_retries),
            timeout: submission.timeout.unwrap_or(default_timeout),
            estimated_wait_time: 0,
            env: submission.env,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            not_before: None,
        }
    }

    /// 任务的优先级类别：priority 不超过阈值即视为VIP
    pub fn priority_class(&self, vip_threshold: i32) -> TaskPriority {
        if self.priority <= vip_threshold {
            TaskPriority::Vip
        } else {
            TaskPriority::Normal
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 仅排队中或执行中的任务可以取消
    pub fn is_cancellable(&self) -> bool {
        matches!(self.status, TaskStatus::Queued | TaskStatus::Processing)
    }

    /// 重试预算是否已用尽
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// 执行是否已超过超时时间
    pub fn is_execution_expired(&self, now: DateTime<Utc>) -> bool {
        match (self.status, self.started_at) {
            (TaskStatus::Processing, Some(started)) => {
                (now - started).num_seconds() > self.timeout
            }
            _ => false,
        }
    }
}
