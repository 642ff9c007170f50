use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use gpu_scheduler_core::config::ClusterConfig;
use gpu_scheduler_core::errors::SchedulerResult;
use gpu_scheduler_core::models::{
    ClusterInstance, ClusterStatusView, InstanceRole, InstanceStatus,
};
use gpu_scheduler_core::traits::ClusterCoordinatorService;

use super::lease::LeaseCell;

/// 集群实例表，部署内所有实例共享
pub type InstanceTable = RwLock<HashMap<String, ClusterInstance>>;

/// 集群协调器
///
/// 每个调度实例持有一个协调器，围绕共享的 LeaseCell 竞选Leader。
/// 心跳循环负责：续期/抢占租约、刷新实例表、标记失联实例。
/// 只有Leader运行调度与监控循环，Follower只提供读服务。
pub struct ClusterCoordinator {
    instance_id: String,
    cluster_id: String,
    config: ClusterConfig,
    lease: Arc<LeaseCell>,
    instances: Arc<InstanceTable>,
    start_time: DateTime<Utc>,
}

impl ClusterCoordinator {
    pub fn new(
        config: ClusterConfig,
        instance_id: String,
        lease: Arc<LeaseCell>,
        instances: Arc<InstanceTable>,
    ) -> Self {
        Self {
            instance_id,
            cluster_id: config.cluster_id.clone(),
            config,
            lease,
            instances,
            start_time: Utc::now(),
        }
    }

    /// 执行一次心跳：刷新自身记录并尝试续期/获取租约
    pub async fn heartbeat_once(&self) -> bool {
        let now = Utc::now();
        let acquired = self
            .lease
            .try_acquire(&self.instance_id, self.config.lease_timeout_seconds)
            .await
            .is_some();

        let leader_id = self.lease.current().await.map(|r| r.holder);

        let mut instances = self.instances.write().await;
        let entry = instances
            .entry(self.instance_id.clone())
            .or_insert_with(|| ClusterInstance {
                instance_id: self.instance_id.clone(),
                status: InstanceStatus::Active,
                role: InstanceRole::Follower,
                last_heartbeat: now,
                start_time: self.start_time,
            });
        entry.status = InstanceStatus::Active;
        entry.last_heartbeat = now;
        entry.role = if acquired {
            InstanceRole::Leader
        } else {
            InstanceRole::Follower
        };

        // 其他实例：心跳超时标记为INACTIVE，角色按租约持有者修正
        for instance in instances.values_mut() {
            if instance.instance_id == self.instance_id {
                continue;
            }
            let stale = (now - instance.last_heartbeat).num_seconds()
                > self.config.lease_timeout_seconds;
            if stale && instance.status == InstanceStatus::Active {
                warn!("Cluster instance '{}' went inactive", instance.instance_id);
                instance.status = InstanceStatus::Inactive;
            }
            instance.role = if Some(&instance.instance_id) == leader_id.as_ref() {
                InstanceRole::Leader
            } else {
                InstanceRole::Follower
            };
        }

        acquired
    }

    /// 心跳循环，收到关闭信号后释放租约并下线
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "集群协调器启动: instance={}, lease_timeout={}s",
            self.instance_id, self.config.lease_timeout_seconds
        );

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.heartbeat_interval_seconds));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let was_leader = self.is_leader().await;
                    let is_leader = self.heartbeat_once().await;
                    if is_leader && !was_leader {
                        info!("实例 {} 当选为Leader", self.instance_id);
                    } else if !is_leader && was_leader {
                        warn!("实例 {} 失去Leader身份", self.instance_id);
                    }
                    if !is_leader {
                        // 抖动打散多个竞选者的抢占时机
                        let jitter = rand::rng().random_range(0..200u64);
                        tokio::time::sleep(Duration::from_millis(jitter)).await;
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("集群协调器收到关闭信号");
                    break;
                }
            }
        }

        self.lease.release(&self.instance_id).await;
        let mut instances = self.instances.write().await;
        if let Some(entry) = instances.get_mut(&self.instance_id) {
            entry.status = InstanceStatus::Inactive;
            entry.role = InstanceRole::Follower;
        }
        info!("集群协调器已停止: {}", self.instance_id);
    }
}

#[async_trait]
impl ClusterCoordinatorService for ClusterCoordinator {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    async fn is_leader(&self) -> bool {
        // 以租约单元为唯一事实来源，避免本地缓存与租约失效脱节
        self.lease
            .held_by(&self.instance_id, self.config.lease_timeout_seconds)
            .await
    }

    async fn instances(&self) -> SchedulerResult<Vec<ClusterInstance>> {
        let instances = self.instances.read().await;
        let mut list: Vec<ClusterInstance> = instances.values().cloned().collect();
        list.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        Ok(list)
    }

    async fn cluster_status(&self) -> SchedulerResult<ClusterStatusView> {
        let leader_instance = self
            .lease
            .current()
            .await
            .map(|r| r.holder)
            .unwrap_or_default();
        let instances = self.instances().await?;
        let active_instances = instances
            .iter()
            .filter(|i| i.status == InstanceStatus::Active)
            .count() as i64;

        debug!(
            "Cluster status: {} instances, leader '{}'",
            instances.len(),
            leader_instance
        );
        Ok(ClusterStatusView {
            cluster_id: self.cluster_id.clone(),
            leader_instance,
            total_instances: instances.len() as i64,
            active_instances,
            instances,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClusterConfig {
        ClusterConfig {
            cluster_id: "test-cluster".to_string(),
            instance_id: String::new(),
            heartbeat_interval_seconds: 1,
            lease_timeout_seconds: 15,
        }
    }

    fn coordinator(
        id: &str,
        lease: &Arc<LeaseCell>,
        instances: &Arc<InstanceTable>,
    ) -> ClusterCoordinator {
        ClusterCoordinator::new(
            config(),
            id.to_string(),
            Arc::clone(lease),
            Arc::clone(instances),
        )
    }

    #[tokio::test]
    async fn test_exactly_one_leader_among_instances() {
        let lease = Arc::new(LeaseCell::new());
        let instances: Arc<InstanceTable> = Arc::new(RwLock::new(HashMap::new()));

        let a = coordinator("inst-a", &lease, &instances);
        let b = coordinator("inst-b", &lease, &instances);
        let c = coordinator("inst-c", &lease, &instances);

        a.heartbeat_once().await;
        b.heartbeat_once().await;
        c.heartbeat_once().await;

        let leaders = [
            a.is_leader().await,
            b.is_leader().await,
            c.is_leader().await,
        ]
        .iter()
        .filter(|l| **l)
        .count();
        assert_eq!(leaders, 1);

        let status = a.cluster_status().await.unwrap();
        assert_eq!(status.leader_instance, "inst-a");
        assert_eq!(status.total_instances, 3);
        let leader_roles = status
            .instances
            .iter()
            .filter(|i| i.role == InstanceRole::Leader)
            .count();
        assert_eq!(leader_roles, 1);
    }

    #[tokio::test]
    async fn test_follower_takes_over_after_lease_expiry() {
        let lease = Arc::new(LeaseCell::new());
        let instances: Arc<InstanceTable> = Arc::new(RwLock::new(HashMap::new()));

        let a = coordinator("inst-a", &lease, &instances);
        let b = coordinator("inst-b", &lease, &instances);

        a.heartbeat_once().await;
        b.heartbeat_once().await;
        assert!(a.is_leader().await);
        assert!(!b.is_leader().await);

        // Leader停机释放租约
        lease.release("inst-a").await;

        b.heartbeat_once().await;
        assert!(b.is_leader().await);
        assert!(!a.is_leader().await);
    }

    #[tokio::test]
    async fn test_stale_instances_marked_inactive() {
        let lease = Arc::new(LeaseCell::new());
        let instances: Arc<InstanceTable> = Arc::new(RwLock::new(HashMap::new()));

        let a = coordinator("inst-a", &lease, &instances);
        let b = coordinator("inst-b", &lease, &instances);
        a.heartbeat_once().await;
        b.heartbeat_once().await;

        {
            let mut table = instances.write().await;
            table.get_mut("inst-b").unwrap().last_heartbeat =
                Utc::now() - chrono::Duration::seconds(120);
        }

        a.heartbeat_once().await;
        let status = a.cluster_status().await.unwrap();
        assert_eq!(status.active_instances, 1);
        let b_view = status
            .instances
            .iter()
            .find(|i| i.instance_id == "inst-b")
            .unwrap();
        assert_eq!(b_view.status, InstanceStatus::Inactive);
    }
}
