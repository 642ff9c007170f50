use serde::{Deserialize, Serialize};

use crate::errors::{SchedulerError, SchedulerResult};

/// 应用配置
///
/// 启动时从TOML文件加载，环境变量（前缀 `GPU_SCHEDULER`，分隔符 `__`）
/// 可覆盖任意字段。配置在构造后显式注入各组件，不使用全局可变状态。
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
}

/// HTTP服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9200,
        }
    }
}

/// 认证配置：静态Bearer Token列表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub enabled: bool,
    pub api_tokens: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_tokens: Vec::new(),
        }
    }
}

/// 调度器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    pub enabled: bool,
    /// 事件唤醒之外的兜底轮询间隔（秒）
    pub poll_interval_seconds: u64,
    /// 单轮调度最多分配的任务数
    pub max_dispatch_batch: usize,
    /// 调度失败退避基数（秒）
    pub base_backoff_seconds: u64,
    /// 退避上限（秒）
    pub max_backoff_seconds: u64,
    /// 节点选择策略: best_fit / round_robin
    pub strategy: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_seconds: 5,
            max_dispatch_batch: 32,
            base_backoff_seconds: 2,
            max_backoff_seconds: 300,
            strategy: "best_fit".to_string(),
        }
    }
}

/// 节点注册表配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// 心跳存活超时（秒）
    pub liveness_timeout_seconds: i64,
    /// 存活扫描间隔（秒）
    pub liveness_check_interval_seconds: u64,
    /// 故障恢复冷却期（秒）
    pub recovery_cooldown_seconds: i64,
    /// 单节点连续任务失败达到该值升级为FAULTY
    pub task_failure_threshold: i32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            liveness_timeout_seconds: 90,
            liveness_check_interval_seconds: 30,
            recovery_cooldown_seconds: 300,
            task_failure_threshold: 5,
        }
    }
}

/// 任务队列配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// priority 不超过该阈值的任务视为VIP
    pub vip_priority_threshold: i32,
    /// 排队超过该时长（秒）的任务获得老化提升
    pub aging_threshold_seconds: i64,
    /// 老化提升的优先级步长
    pub aging_boost: i32,
    /// 默认执行超时（秒）
    pub default_timeout_seconds: i64,
    /// 默认最大重试次数
    pub default_max_retries: u32,
    /// 队列容量上限，0为不限制
    pub max_queue_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            vip_priority_threshold: 0,
            aging_threshold_seconds: 600,
            aging_boost: 10,
            default_timeout_seconds: 600,
            default_max_retries: 3,
            max_queue_size: 10000,
        }
    }
}

/// 生命周期跟踪配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// 超时扫描间隔（秒）
    pub timeout_check_interval_seconds: u64,
    /// 终态任务保留时长（秒）
    pub history_retention_seconds: i64,
    /// 取消PROCESSING任务时等待节点确认的宽限期（秒）
    pub cancel_grace_seconds: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            timeout_check_interval_seconds: 10,
            history_retention_seconds: 86400,
            cancel_grace_seconds: 5,
        }
    }
}

/// 监控与告警配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// 监控评估间隔（秒）
    pub check_interval_seconds: u64,
    /// active/total 超过该比例视为GPU健康
    pub gpu_healthy_ratio: f64,
    /// 队列积压阈值
    pub queue_backlog_threshold: i64,
    /// 积压持续超过该时长（秒）才判定为不健康（滞回）
    pub queue_backlog_sustained_seconds: i64,
    /// 已确认告警归档时长（秒）
    pub alert_retention_seconds: i64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 15,
            gpu_healthy_ratio: 0.5,
            queue_backlog_threshold: 100,
            queue_backlog_sustained_seconds: 60,
            alert_retention_seconds: 7 * 86400,
        }
    }
}

/// 集群协调配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub cluster_id: String,
    /// 实例ID，空则使用主机名
    pub instance_id: String,
    /// 实例心跳/租约续期间隔（秒）
    pub heartbeat_interval_seconds: u64,
    /// 租约超时（秒），超时后其他实例可抢占
    pub lease_timeout_seconds: i64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            cluster_id: "gpu-scheduler".to_string(),
            instance_id: String::new(),
            heartbeat_interval_seconds: 5,
            lease_timeout_seconds: 15,
        }
    }
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    pub fn load(path: Option<&str>) -> SchedulerResult<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("GPU_SCHEDULER")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: AppConfig = builder
            .build()
            .map_err(|e| SchedulerError::Configuration(format!("加载配置失败: {e}")))?
            .try_deserialize()
            .map_err(|e| SchedulerError::Configuration(format!("解析配置失败: {e}")))?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// 校验配置取值范围
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.server.port == 0 {
            return Err(SchedulerError::Configuration(
                "server.port 不能为0".to_string(),
            ));
        }
        if self.registry.liveness_timeout_seconds <= 0 {
            return Err(SchedulerError::Configuration(
                "registry.liveness_timeout_seconds 必须为正".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.monitoring.gpu_healthy_ratio) {
            return Err(SchedulerError::Configuration(
                "monitoring.gpu_healthy_ratio 必须在 [0, 1] 区间".to_string(),
            ));
        }
        if self.cluster.lease_timeout_seconds
            <= self.cluster.heartbeat_interval_seconds as i64
        {
            return Err(SchedulerError::Configuration(
                "cluster.lease_timeout_seconds 必须大于心跳间隔".to_string(),
            ));
        }
        if self.dispatcher.base_backoff_seconds == 0 {
            return Err(SchedulerError::Configuration(
                "dispatcher.base_backoff_seconds 必须为正".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.server.port, 9200);
        assert!(cfg.dispatcher.enabled);
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
[server]
host = "127.0.0.1"
port = 9300

[registry]
liveness_timeout_seconds = 120
liveness_check_interval_seconds = 30
recovery_cooldown_seconds = 60
task_failure_threshold = 3

[auth]
enabled = false
api_tokens = []
"#
        )
        .unwrap();

        let cfg = AppConfig::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(cfg.server.port, 9300);
        assert_eq!(cfg.registry.liveness_timeout_seconds, 120);
        assert!(!cfg.auth.enabled);
        // 未出现的段落使用默认值
        assert_eq!(cfg.queue.default_max_retries, 3);
    }

    #[test]
    fn test_validate_rejects_bad_ratio() {
        let mut cfg = AppConfig::default();
        cfg.monitoring.gpu_healthy_ratio = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_short_lease() {
        let mut cfg = AppConfig::default();
        cfg.cluster.lease_timeout_seconds = 3;
        cfg.cluster.heartbeat_interval_seconds = 5;
        assert!(cfg.validate().is_err());
    }
}
