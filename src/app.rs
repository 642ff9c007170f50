use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, sync::broadcast, sync::RwLock};
use tracing::{error, info};

use gpu_scheduler_api::{create_app, AppState, AuthState};
use gpu_scheduler_core::traits::{
    AlertService, ClusterCoordinatorService, HealthCheckService, MonitoringCheckService,
    NodeRegistry, NodeSelectionStrategy, TaskLifecycle, TaskQueue,
};
use gpu_scheduler_core::AppConfig;
use gpu_scheduler_dispatcher::{
    AlertEngine, BestFitStrategy, HealthAggregator, NodeLivenessDetector, RetryPolicy,
    RoundRobinStrategy, TaskDispatcher, TaskLifecycleTracker, TaskTimeoutSweeper,
};
use gpu_scheduler_infrastructure::{
    ClusterCoordinator, InMemoryAlertStore, InMemoryNodeRegistry, InMemoryTaskStore, LeaseCell,
    MetricsCollector,
};

/// 应用运行模式
#[derive(Debug, Clone)]
pub enum AppMode {
    /// 仅运行调度循环和后台扫描
    Dispatcher,
    /// 仅运行API服务器
    Api,
    /// 运行所有组件
    All,
}

/// 主应用程序
///
/// 负责构建全部服务并按运行模式拉起后台循环与API服务器。
/// 集群协调器在所有模式下运行，调度/扫描/告警循环只在Leader上生效。
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    instance_id: String,
    registry: Arc<InMemoryNodeRegistry>,
    store: Arc<InMemoryTaskStore>,
    alerts: Arc<InMemoryAlertStore>,
    coordinator: Arc<ClusterCoordinator>,
    tracker: Arc<TaskLifecycleTracker>,
    health: Arc<HealthAggregator>,
    alert_engine: Arc<AlertEngine>,
    dispatcher: Arc<TaskDispatcher>,
    liveness: Arc<NodeLivenessDetector>,
    timeout_sweeper: Arc<TaskTimeoutSweeper>,
    metrics: Arc<MetricsCollector>,
}

impl Application {
    /// 创建新的应用实例
    pub async fn new(config: AppConfig, mode: AppMode, instance_id: String) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}，实例: {}", mode, instance_id);

        let metrics = Arc::new(MetricsCollector::new().context("创建指标收集器失败")?);

        let registry = Arc::new(InMemoryNodeRegistry::new(config.registry.clone()));
        let store = Arc::new(InMemoryTaskStore::new(config.queue.clone()));
        let alerts = Arc::new(InMemoryAlertStore::new());

        let coordinator = Arc::new(ClusterCoordinator::new(
            config.cluster.clone(),
            instance_id.clone(),
            Arc::new(LeaseCell::new()),
            Arc::new(RwLock::new(HashMap::new())),
        ));
        // 启动前先抢一次租约，单实例部署立即可调度
        coordinator.heartbeat_once().await;

        let retry_policy = RetryPolicy::new(
            config.dispatcher.base_backoff_seconds,
            config.dispatcher.max_backoff_seconds,
        );
        let tracker = Arc::new(TaskLifecycleTracker::new(
            Arc::clone(&store),
            registry.clone() as Arc<dyn NodeRegistry>,
            retry_policy,
            Arc::clone(&metrics),
            config.lifecycle.clone(),
        ));

        let health = Arc::new(HealthAggregator::new(
            registry.clone() as Arc<dyn NodeRegistry>,
            store.clone() as Arc<dyn TaskQueue>,
            tracker.clone() as Arc<dyn TaskLifecycle>,
            coordinator.clone() as Arc<dyn ClusterCoordinatorService>,
            Arc::clone(&metrics),
            config.monitoring.clone(),
        ));

        let alert_engine = Arc::new(AlertEngine::new(
            registry.clone() as Arc<dyn NodeRegistry>,
            health.clone() as Arc<dyn HealthCheckService>,
            Arc::clone(&alerts),
            coordinator.clone() as Arc<dyn ClusterCoordinatorService>,
            config.monitoring.clone(),
        ));

        let strategy: Arc<dyn NodeSelectionStrategy> = match config.dispatcher.strategy.as_str() {
            "best_fit" => Arc::new(BestFitStrategy::new()),
            "round_robin" => Arc::new(RoundRobinStrategy::new()),
            other => anyhow::bail!("不支持的调度策略: {other}"),
        };

        let dispatcher = Arc::new(TaskDispatcher::new(
            registry.clone() as Arc<dyn NodeRegistry>,
            store.clone() as Arc<dyn TaskQueue>,
            coordinator.clone() as Arc<dyn ClusterCoordinatorService>,
            strategy,
            Arc::clone(&metrics),
            config.dispatcher.clone(),
            store.wakeup_handle(),
            config.queue.vip_priority_threshold,
        ));

        let liveness = Arc::new(NodeLivenessDetector::new(
            registry.clone() as Arc<dyn NodeRegistry>,
            tracker.clone() as Arc<dyn TaskLifecycle>,
            Arc::clone(&metrics),
            config.registry.clone(),
        ));

        let timeout_sweeper = Arc::new(TaskTimeoutSweeper::new(
            Arc::clone(&store),
            Arc::clone(&tracker),
            config.lifecycle.clone(),
        ));

        Ok(Self {
            config,
            mode,
            instance_id,
            registry,
            store,
            alerts,
            coordinator,
            tracker,
            health,
            alert_engine,
            dispatcher,
            liveness,
            timeout_sweeper,
            metrics,
        })
    }

    fn app_state(&self) -> AppState {
        AppState {
            registry: self.registry.clone() as Arc<dyn NodeRegistry>,
            queue: self.store.clone() as Arc<dyn TaskQueue>,
            lifecycle: self.tracker.clone() as Arc<dyn TaskLifecycle>,
            health: self.health.clone() as Arc<dyn HealthCheckService>,
            alerts: self.alerts.clone() as Arc<dyn AlertService>,
            monitor: self.alert_engine.clone() as Arc<dyn MonitoringCheckService>,
            cluster: self.coordinator.clone() as Arc<dyn ClusterCoordinatorService>,
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// 启动调度侧后台循环
    fn spawn_background_loops(
        &self,
        shutdown_rx: &broadcast::Receiver<()>,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        let dispatcher = Arc::clone(&self.dispatcher);
        let rx = shutdown_rx.resubscribe();
        handles.push(tokio::spawn(async move { dispatcher.run(rx).await }));

        let liveness = Arc::clone(&self.liveness);
        let rx = shutdown_rx.resubscribe();
        handles.push(tokio::spawn(async move { liveness.run(rx).await }));

        let timeout_sweeper = Arc::clone(&self.timeout_sweeper);
        let rx = shutdown_rx.resubscribe();
        handles.push(tokio::spawn(async move { timeout_sweeper.run(rx).await }));

        let alert_engine = Arc::clone(&self.alert_engine);
        let rx = shutdown_rx.resubscribe();
        handles.push(tokio::spawn(async move { alert_engine.run(rx).await }));

        handles
    }

    /// 运行API服务器，直到收到关闭信号
    async fn run_api_server(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let state = self.app_state();
        let auth = AuthState::new(
            self.config.auth.enabled,
            self.config.auth.api_tokens.clone(),
        );
        let app = create_app(state, auth);

        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("绑定监听地址失败: {addr}"))?;
        info!("API服务器监听: {addr}");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
            .context("API服务器运行失败")?;

        info!("API服务器已停止");
        Ok(())
    }

    /// 运行应用程序
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);

        // 集群协调器在所有模式下运行
        let coordinator = Arc::clone(&self.coordinator);
        let rx = shutdown_rx.resubscribe();
        let coordinator_handle = tokio::spawn(async move { coordinator.run(rx).await });

        match self.mode {
            AppMode::Dispatcher => {
                let handles = self.spawn_background_loops(&shutdown_rx);
                let mut rx = shutdown_rx.resubscribe();
                let _ = rx.recv().await;
                info!("Dispatcher收到关闭信号");
                for handle in handles {
                    let _ = handle.await;
                }
            }
            AppMode::Api => {
                self.run_api_server(shutdown_rx.resubscribe()).await?;
            }
            AppMode::All => {
                let handles = self.spawn_background_loops(&shutdown_rx);
                if let Err(e) = self.run_api_server(shutdown_rx.resubscribe()).await {
                    error!("API服务器异常退出: {e}");
                }
                for handle in handles {
                    let _ = handle.await;
                }
            }
        }

        let _ = coordinator_handle.await;
        info!("实例 {} 已停止", self.instance_id);
        Ok(())
    }
}
