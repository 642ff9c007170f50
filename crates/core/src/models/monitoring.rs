use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 健康状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HealthState {
    #[serde(rename = "HEALTHY")]
    Healthy,
    #[serde(rename = "UNHEALTHY")]
    Unhealthy,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl HealthState {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthState::Healthy)
    }
}

/// 系统健康快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub overall_health: HealthState,
    pub gpu_health: HealthState,
    pub queue_health: HealthState,
    pub active_gpu_count: i64,
    pub total_gpu_count: i64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// 单个组件的健康状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component: String,
    pub status: HealthState,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_check: DateTime<Utc>,
}

/// 系统资源指标（进程视角的占位指标）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub disk_usage: f64,
}

/// 监控指标快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringMetrics {
    /// 各状态GPU数量
    pub gpu_status_counts: HashMap<String, i64>,
    /// 各状态任务数量
    pub task_status_counts: HashMap<String, i64>,
    /// 各任务类型的排队长度
    pub queue_lengths: HashMap<String, i64>,
    pub system_metrics: SystemMetrics,
}

/// 概览页聚合指标
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverviewMetrics {
    pub active_gpus: i64,
    pub total_tasks: i64,
    pub queue_length: i64,
    pub failed_tasks: i64,
    pub completed_tasks: i64,
    pub processing_tasks: i64,
    pub queued_tasks: i64,
}

/// 监控概览
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringOverview {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub instance_id: String,
    pub is_leader: bool,
    pub health_status: HealthSnapshot,
    pub metrics: OverviewMetrics,
}
