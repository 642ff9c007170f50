use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use gpu_scheduler_core::config::RegistryConfig;
use gpu_scheduler_core::errors::{SchedulerError, SchedulerResult};
use gpu_scheduler_core::models::{GpuNode, GpuNodeRegistration, GpuNodeStatus, TaskPriority};
use gpu_scheduler_core::traits::NodeRegistry;

/// 内存GPU节点注册表
///
/// 所有节点状态保存在单个 RwLock<HashMap> 内。容量占用（reserve/release）
/// 与状态变更在同一把写锁下完成，保证 current_tasks 不会超额。
#[derive(Debug)]
pub struct InMemoryNodeRegistry {
    nodes: RwLock<HashMap<String, GpuNode>>,
    config: RegistryConfig,
}

impl InMemoryNodeRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            config,
        }
    }
}

#[async_trait]
impl NodeRegistry for InMemoryNodeRegistry {
    async fn register(&self, registration: GpuNodeRegistration) -> SchedulerResult<GpuNode> {
        if registration.gpu_id.is_empty() {
            return Err(SchedulerError::Validation("gpuId 不能为空".to_string()));
        }
        if registration.max_concurrent_tasks <= 0 {
            return Err(SchedulerError::Validation(
                "maxConcurrentTasks 必须为正".to_string(),
            ));
        }
        if registration.supported_task_types.is_empty() {
            return Err(SchedulerError::Validation(
                "supportedTaskTypes 不能为空".to_string(),
            ));
        }

        let mut nodes = self.nodes.write().await;
        if let Some(existing) = nodes.get(&registration.gpu_id) {
            if existing.status == GpuNodeStatus::Active {
                return Err(SchedulerError::DuplicateNodeId {
                    id: registration.gpu_id,
                });
            }
        }

        let node = GpuNode::new(registration);
        info!("Registered GPU node '{}' ({})", node.gpu_id, node.hostname);
        nodes.insert(node.gpu_id.clone(), node.clone());
        Ok(node)
    }

    async fn heartbeat(&self, gpu_id: &str) -> SchedulerResult<GpuNode> {
        let mut nodes = self.nodes.write().await;
        let node = nodes.get_mut(gpu_id).ok_or_else(|| {
            SchedulerError::NodeNotFound {
                id: gpu_id.to_string(),
            }
        })?;

        node.last_heartbeat = Utc::now();
        // OFFLINE节点收到心跳即恢复；FAULTY必须显式recover
        if node.status == GpuNodeStatus::Offline {
            info!("GPU node '{}' back online after heartbeat", gpu_id);
            node.status = GpuNodeStatus::Active;
        }
        Ok(node.clone())
    }

    async fn mark_faulty(&self, gpu_id: &str, reason: &str) -> SchedulerResult<GpuNode> {
        let mut nodes = self.nodes.write().await;
        let node = nodes.get_mut(gpu_id).ok_or_else(|| {
            SchedulerError::NodeNotFound {
                id: gpu_id.to_string(),
            }
        })?;

        warn!("Marking GPU node '{}' faulty: {}", gpu_id, reason);
        node.status = GpuNodeStatus::Faulty;
        node.failure_count += 1;
        node.fault_reason = Some(reason.to_string());
        node.faulted_at = Some(Utc::now());
        Ok(node.clone())
    }

    async fn recover(&self, gpu_id: &str) -> SchedulerResult<GpuNode> {
        let mut nodes = self.nodes.write().await;
        let node = nodes.get_mut(gpu_id).ok_or_else(|| {
            SchedulerError::NodeNotFound {
                id: gpu_id.to_string(),
            }
        })?;

        if node.status != GpuNodeStatus::Faulty {
            return Err(SchedulerError::Validation(format!(
                "节点 {} 当前状态为 {}，无需恢复",
                gpu_id,
                node.status.as_str()
            )));
        }

        if let Some(faulted_at) = node.faulted_at {
            let elapsed = (Utc::now() - faulted_at).num_seconds();
            let remaining = self.config.recovery_cooldown_seconds - elapsed;
            if remaining > 0 {
                return Err(SchedulerError::RecoveryTooSoon {
                    id: gpu_id.to_string(),
                    remaining_seconds: remaining,
                });
            }
        }

        info!("GPU node '{}' recovered", gpu_id);
        node.status = GpuNodeStatus::Active;
        node.fault_reason = None;
        node.faulted_at = None;
        node.task_failure_count = 0;
        node.last_heartbeat = Utc::now();
        Ok(node.clone())
    }

    async fn unregister(&self, gpu_id: &str, force: bool) -> SchedulerResult<()> {
        let mut nodes = self.nodes.write().await;
        let node = nodes.get_mut(gpu_id).ok_or_else(|| {
            SchedulerError::NodeNotFound {
                id: gpu_id.to_string(),
            }
        })?;

        if node.current_tasks > 0 && !force {
            // 优雅排空：不再接收新任务，在途任务结束后移除
            info!(
                "GPU node '{}' draining ({} tasks in flight)",
                gpu_id, node.current_tasks
            );
            node.draining = true;
            return Ok(());
        }

        nodes.remove(gpu_id);
        info!("Unregistered GPU node '{}'", gpu_id);
        Ok(())
    }

    async fn get(&self, gpu_id: &str) -> SchedulerResult<GpuNode> {
        let nodes = self.nodes.read().await;
        nodes
            .get(gpu_id)
            .cloned()
            .ok_or_else(|| SchedulerError::NodeNotFound {
                id: gpu_id.to_string(),
            })
    }

    async fn list(&self) -> SchedulerResult<Vec<GpuNode>> {
        let nodes = self.nodes.read().await;
        let mut list: Vec<GpuNode> = nodes.values().cloned().collect();
        list.sort_by(|a, b| a.gpu_id.cmp(&b.gpu_id));
        Ok(list)
    }

    async fn list_by_task_type(
        &self,
        task_type: i32,
        priority: Option<TaskPriority>,
    ) -> SchedulerResult<Vec<GpuNode>> {
        let nodes = self.nodes.read().await;
        let mut list: Vec<GpuNode> = nodes
            .values()
            .filter(|n| n.supported_task_types.contains(&task_type))
            .filter(|n| match priority {
                Some(class) => n.supported_task_priority.can_serve(class),
                None => true,
            })
            .cloned()
            .collect();
        list.sort_by(|a, b| a.gpu_id.cmp(&b.gpu_id));
        Ok(list)
    }

    async fn list_dispatchable(&self) -> SchedulerResult<Vec<GpuNode>> {
        let nodes = self.nodes.read().await;
        Ok(nodes
            .values()
            .filter(|n| n.is_active() && !n.draining && n.has_capacity())
            .cloned()
            .collect())
    }

    async fn reserve_slot(&self, gpu_id: &str) -> SchedulerResult<()> {
        let mut nodes = self.nodes.write().await;
        let node = nodes.get_mut(gpu_id).ok_or_else(|| {
            SchedulerError::NodeNotFound {
                id: gpu_id.to_string(),
            }
        })?;

        if !node.is_active() || node.draining {
            return Err(SchedulerError::CapacityExhausted);
        }
        if node.current_tasks >= node.max_concurrent_tasks {
            return Err(SchedulerError::CapacityExhausted);
        }
        node.current_tasks += 1;
        debug!(
            "Reserved slot on '{}' ({}/{})",
            gpu_id, node.current_tasks, node.max_concurrent_tasks
        );
        Ok(())
    }

    async fn release_slot(&self, gpu_id: &str) -> SchedulerResult<()> {
        let mut nodes = self.nodes.write().await;
        let node = match nodes.get_mut(gpu_id) {
            Some(node) => node,
            // 节点可能已被移除（强制注销），释放变为no-op
            None => return Ok(()),
        };

        node.current_tasks = (node.current_tasks - 1).max(0);
        debug!(
            "Released slot on '{}' ({}/{})",
            gpu_id, node.current_tasks, node.max_concurrent_tasks
        );

        if node.draining && node.current_tasks == 0 {
            info!("Draining GPU node '{}' removed", gpu_id);
            nodes.remove(gpu_id);
        }
        Ok(())
    }

    async fn record_task_failure(&self, gpu_id: &str) -> SchedulerResult<bool> {
        let mut nodes = self.nodes.write().await;
        let node = match nodes.get_mut(gpu_id) {
            Some(node) => node,
            None => return Ok(false),
        };

        node.task_failure_count += 1;
        if node.status == GpuNodeStatus::Active
            && node.task_failure_count >= self.config.task_failure_threshold
        {
            warn!(
                "GPU node '{}' reached task failure threshold ({}), marking faulty",
                gpu_id, node.task_failure_count
            );
            node.status = GpuNodeStatus::Faulty;
            node.failure_count += 1;
            node.fault_reason = Some("repeated task failures".to_string());
            node.faulted_at = Some(Utc::now());
            return Ok(true);
        }
        Ok(false)
    }

    async fn sweep_expired(&self, liveness_timeout_seconds: i64) -> SchedulerResult<Vec<GpuNode>> {
        let now = Utc::now();
        let mut nodes = self.nodes.write().await;
        let mut expired = Vec::new();

        for node in nodes.values_mut() {
            if node.status == GpuNodeStatus::Active
                && node.is_heartbeat_expired(liveness_timeout_seconds, now)
            {
                warn!(
                    "GPU node '{}' heartbeat expired ({}s), marking offline",
                    node.gpu_id, liveness_timeout_seconds
                );
                node.status = GpuNodeStatus::Offline;
                node.failure_count += 1;
                expired.push(node.clone());
            }
        }
        Ok(expired)
    }

    async fn status_counts(&self) -> SchedulerResult<HashMap<String, i64>> {
        let nodes = self.nodes.read().await;
        let mut counts: HashMap<String, i64> = HashMap::new();
        for status in ["ACTIVE", "OFFLINE", "FAULTY"] {
            counts.insert(status.to_string(), 0);
        }
        for node in nodes.values() {
            *counts.entry(node.status.as_str().to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
