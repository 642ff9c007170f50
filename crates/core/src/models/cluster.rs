use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 集群实例信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterInstance {
    pub instance_id: String,
    pub status: InstanceStatus,
    pub role: InstanceRole,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_heartbeat: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
}

/// 实例状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InstanceStatus {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "INACTIVE")]
    Inactive,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

/// 实例角色，ACTIVE实例中同一时刻只有一个LEADER
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InstanceRole {
    #[serde(rename = "LEADER")]
    Leader,
    #[serde(rename = "FOLLOWER")]
    Follower,
}

/// 集群状态视图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStatusView {
    pub cluster_id: String,
    pub leader_instance: String,
    pub total_instances: i64,
    pub active_instances: i64,
    pub instances: Vec<ClusterInstance>,
}
