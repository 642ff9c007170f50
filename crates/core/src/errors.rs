use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("GPU节点未找到: {id}")]
    NodeNotFound { id: String },

    #[error("告警未找到: {id}")]
    AlertNotFound { id: String },

    #[error("GPU节点重复注册: {id}")]
    DuplicateNodeId { id: String },

    #[error("告警已被确认: {id}")]
    AlreadyAcknowledged { id: String },

    #[error("任务分配冲突: {id}")]
    AssignmentConflict { id: String },

    #[error("无效的状态转换: 任务 {id} 不能从 {from} 转换到 {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    #[error("节点恢复过早: {id}, 冷却期还剩 {remaining_seconds} 秒")]
    RecoveryTooSoon { id: String, remaining_seconds: i64 },

    #[error("没有可用的节点容量")]
    CapacityExhausted,

    #[error("任务执行超时: {id}")]
    TaskTimeout { id: String },

    #[error("当前实例不是Leader，无法执行调度操作")]
    NotLeader,

    #[error("无效的任务参数: {0}")]
    InvalidTask(String),

    #[error("请求参数验证失败: {0}")]
    Validation(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for SchedulerError {
    fn from(e: serde_json::Error) -> Self {
        SchedulerError::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
