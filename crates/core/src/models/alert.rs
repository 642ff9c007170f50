use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 运维告警
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub title: String,
    pub message: String,
    pub level: AlertLevel,
    pub status: AlertStatus,
    /// 触发告警的组件或节点
    pub source: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub acknowledged_by: Option<String>,
}

/// 告警级别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AlertLevel {
    #[serde(rename = "CRITICAL")]
    Critical,
    #[serde(rename = "WARNING")]
    Warning,
    #[serde(rename = "INFO")]
    Info,
}

impl AlertLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CRITICAL" => Some(AlertLevel::Critical),
            "WARNING" => Some(AlertLevel::Warning),
            "INFO" => Some(AlertLevel::Info),
            _ => None,
        }
    }
}

/// 告警状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AlertStatus {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "ACKNOWLEDGED")]
    Acknowledged,
}

/// 告警统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertStats {
    pub total_alerts: i64,
    pub critical_alerts: i64,
    pub warning_alerts: i64,
    pub info_alerts: i64,
    pub acknowledged_alerts: i64,
    pub active_alerts: i64,
}

/// 告警查询过滤器
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub level: Option<AlertLevel>,
    pub status: Option<AlertStatus>,
    pub source: Option<String>,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

impl Alert {
    pub fn is_active(&self) -> bool {
        matches!(self.status, AlertStatus::Active)
    }
}
