use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// GPU节点信息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuNode {
    pub gpu_id: String,
    pub hostname: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub vast_ins_id: Option<String>,
    pub ip: String,
    pub port: u16,
    pub supported_task_types: Vec<i32>,
    pub supported_task_priority: TaskPriority,
    pub status: GpuNodeStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_heartbeat: DateTime<Utc>,
    pub failure_count: i32,
    pub task_failure_count: i32,
    pub version: String,
    pub current_tasks: i32,
    pub max_concurrent_tasks: i32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<NodeMetadata>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub registered_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fault_reason: Option<String>,
    #[serde(
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub faulted_at: Option<DateTime<Utc>>,
    /// 注销排空中：不再接收新任务，在途任务完成后移除
    #[serde(default)]
    pub draining: bool,
}

/// GPU节点状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GpuNodeStatus {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "OFFLINE")]
    Offline,
    #[serde(rename = "FAULTY")]
    Faulty,
}

impl GpuNodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GpuNodeStatus::Active => "ACTIVE",
            GpuNodeStatus::Offline => "OFFLINE",
            GpuNodeStatus::Faulty => "FAULTY",
        }
    }
}

/// 任务优先级类别
///
/// VIP节点同时服务VIP和NORMAL任务，NORMAL节点只服务NORMAL任务。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskPriority {
    #[serde(rename = "VIP")]
    Vip,
    #[serde(rename = "NORMAL")]
    Normal,
}

impl TaskPriority {
    /// 判断节点声明的优先级类别能否服务指定类别的任务
    pub fn can_serve(&self, task_class: TaskPriority) -> bool {
        match self {
            TaskPriority::Vip => true,
            TaskPriority::Normal => task_class == TaskPriority::Normal,
        }
    }
}

/// GPU硬件元信息
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub gpu_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub memory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cuda_version: Option<String>,
}

/// GPU节点注册请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuNodeRegistration {
    pub gpu_id: String,
    pub hostname: String,
    #[serde(default)]
    pub vast_ins_id: Option<String>,
    pub ip: String,
    pub port: u16,
    pub supported_task_types: Vec<i32>,
    pub supported_task_priority: TaskPriority,
    pub max_concurrent_tasks: i32,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub metadata: Option<NodeMetadata>,
}

fn default_version() -> String {
    "unknown".to_string()
}

impl GpuNode {
    /// 根据注册请求创建新节点
    pub fn new(registration: GpuNodeRegistration) -> Self {
        let now = Utc::now();
        Self {
            gpu_id: registration.gpu_id,
            hostname: registration.hostname,
            vast_ins_id: registration.vast_ins_id,
            ip: registration.ip,
            port: registration.port,
            supported_task_types: registration.supported_task_types,
            supported_task_priority: registration.supported_task_priority,
            status: GpuNodeStatus::Active,
            last_heartbeat: now,
            failure_count: 0,
            task_failure_count: 0,
            version: registration.version,
            current_tasks: 0,
            max_concurrent_tasks: registration.max_concurrent_tasks,
            metadata: registration.metadata,
            registered_at: now,
            fault_reason: None,
            faulted_at: None,
            draining: false,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, GpuNodeStatus::Active)
    }

    /// 检查节点是否还有空闲容量
    pub fn has_capacity(&self) -> bool {
        self.current_tasks < self.max_concurrent_tasks
    }

    pub fn spare_capacity(&self) -> i32 {
        (self.max_concurrent_tasks - self.current_tasks).max(0)
    }

    /// 检查节点能否承接指定类型和优先级类别的任务
    pub fn can_accept(&self, task_type: i32, task_class: TaskPriority) -> bool {
        self.is_active()
            && !self.draining
            && self.has_capacity()
            && self.supported_task_types.contains(&task_type)
            && self.supported_task_priority.can_serve(task_class)
    }

    /// 检查节点能力是否覆盖任务（不考虑容量，用于判断队列中任务是否可被服务）
    pub fn supports(&self, task_type: i32, task_class: TaskPriority) -> bool {
        self.supported_task_types.contains(&task_type)
            && self.supported_task_priority.can_serve(task_class)
    }

    pub fn load_percentage(&self) -> f64 {
        if self.max_concurrent_tasks == 0 {
            0.0
        } else {
            (self.current_tasks as f64 / self.max_concurrent_tasks as f64) * 100.0
        }
    }

    /// 检查心跳是否超时
    pub fn is_heartbeat_expired(&self, timeout_seconds: i64, now: DateTime<Utc>) -> bool {
        (now - self.last_heartbeat).num_seconds() > timeout_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration() -> GpuNodeRegistration {
        GpuNodeRegistration {
            gpu_id: "gpu-001".to_string(),
            hostname: "node-1".to_string(),
            vast_ins_id: None,
            ip: "10.0.0.1".to_string(),
            port: 8080,
            supported_task_types: vec![1, 2],
            supported_task_priority: TaskPriority::Normal,
            max_concurrent_tasks: 2,
            version: "1.0.0".to_string(),
            metadata: None,
        }
    }

    #[test]
    fn test_new_node_defaults() {
        let node = GpuNode::new(registration());
        assert_eq!(node.status, GpuNodeStatus::Active);
        assert_eq!(node.current_tasks, 0);
        assert_eq!(node.failure_count, 0);
        assert!(!node.draining);
    }

    #[test]
    fn test_can_accept_respects_type_and_capacity() {
        let mut node = GpuNode::new(registration());
        assert!(node.can_accept(2, TaskPriority::Normal));
        assert!(!node.can_accept(3, TaskPriority::Normal));
        // NORMAL节点不能承接VIP任务
        assert!(!node.can_accept(2, TaskPriority::Vip));

        node.current_tasks = 2;
        assert!(!node.can_accept(2, TaskPriority::Normal));
    }

    #[test]
    fn test_vip_node_serves_both_classes() {
        let mut reg = registration();
        reg.supported_task_priority = TaskPriority::Vip;
        let node = GpuNode::new(reg);
        assert!(node.can_accept(1, TaskPriority::Vip));
        assert!(node.can_accept(1, TaskPriority::Normal));
    }

    #[test]
    fn test_heartbeat_expiry() {
        let mut node = GpuNode::new(registration());
        let now = Utc::now();
        node.last_heartbeat = now - chrono::Duration::seconds(120);
        assert!(node.is_heartbeat_expired(90, now));
        assert!(!node.is_heartbeat_expired(180, now));
    }

    #[test]
    fn test_wire_format_uses_camel_case_and_millis() {
        let node = GpuNode::new(registration());
        let json = serde_json::to_value(&node).unwrap();
        assert!(json.get("gpuId").is_some());
        assert!(json.get("supportedTaskTypes").is_some());
        assert_eq!(json["status"], "ACTIVE");
        assert!(json["lastHeartbeat"].is_i64());
    }
}
