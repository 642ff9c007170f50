//! REST接口集成测试：真实HTTP服务器 + 内存服务栈，校验控制台依赖的
//! 响应包装、认证行为和完整任务流。

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::RwLock;

use gpu_scheduler_api::{create_app, AppState, AuthState};
use gpu_scheduler_core::config::{
    ClusterConfig, DispatcherConfig, LifecycleConfig, MonitoringConfig, QueueConfig,
    RegistryConfig,
};
use gpu_scheduler_core::traits::{
    AlertService, ClusterCoordinatorService, HealthCheckService, MonitoringCheckService,
    NodeRegistry, TaskLifecycle, TaskQueue,
};
use gpu_scheduler_dispatcher::{
    AlertEngine, BestFitStrategy, HealthAggregator, RetryPolicy, TaskDispatcher,
    TaskLifecycleTracker,
};
use gpu_scheduler_infrastructure::{
    ClusterCoordinator, InMemoryAlertStore, InMemoryNodeRegistry, InMemoryTaskStore, LeaseCell,
    MetricsCollector,
};

const TEST_TOKEN: &str = "test-token";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i32,
    message: String,
    data: Option<T>,
}

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    dispatcher: Arc<TaskDispatcher>,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> (reqwest::StatusCode, Envelope<T>) {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(TEST_TOKEN)
            .send()
            .await
            .unwrap();
        let status = response.status();
        let envelope = response.json().await.unwrap();
        (status, envelope)
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<Value>,
    ) -> (reqwest::StatusCode, Envelope<T>) {
        let mut request = self.client.post(self.url(path)).bearer_auth(TEST_TOKEN);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.unwrap();
        let status = response.status();
        let envelope = response.json().await.unwrap();
        (status, envelope)
    }
}

async fn server() -> TestServer {
    let metrics = Arc::new(MetricsCollector::new().unwrap());
    let registry = Arc::new(InMemoryNodeRegistry::new(RegistryConfig::default()));
    let store = Arc::new(InMemoryTaskStore::new(QueueConfig::default()));
    let alerts = Arc::new(InMemoryAlertStore::new());

    let coordinator = Arc::new(ClusterCoordinator::new(
        ClusterConfig::default(),
        "inst-api-test".to_string(),
        Arc::new(LeaseCell::new()),
        Arc::new(RwLock::new(HashMap::new())),
    ));
    coordinator.heartbeat_once().await;

    let tracker = Arc::new(TaskLifecycleTracker::new(
        Arc::clone(&store),
        registry.clone() as Arc<dyn NodeRegistry>,
        RetryPolicy::new(1, 60),
        Arc::clone(&metrics),
        LifecycleConfig {
            cancel_grace_seconds: 0,
            ..LifecycleConfig::default()
        },
    ));

    let monitoring = MonitoringConfig {
        queue_backlog_sustained_seconds: 0,
        ..MonitoringConfig::default()
    };
    let health = Arc::new(HealthAggregator::new(
        registry.clone() as Arc<dyn NodeRegistry>,
        store.clone() as Arc<dyn TaskQueue>,
        tracker.clone() as Arc<dyn TaskLifecycle>,
        coordinator.clone() as Arc<dyn ClusterCoordinatorService>,
        Arc::clone(&metrics),
        monitoring.clone(),
    ));
    let alert_engine = Arc::new(AlertEngine::new(
        registry.clone() as Arc<dyn NodeRegistry>,
        health.clone() as Arc<dyn HealthCheckService>,
        Arc::clone(&alerts),
        coordinator.clone() as Arc<dyn ClusterCoordinatorService>,
        monitoring,
    ));
    let dispatcher = Arc::new(TaskDispatcher::new(
        registry.clone() as Arc<dyn NodeRegistry>,
        store.clone() as Arc<dyn TaskQueue>,
        coordinator.clone() as Arc<dyn ClusterCoordinatorService>,
        Arc::new(BestFitStrategy::new()),
        Arc::clone(&metrics),
        DispatcherConfig::default(),
        store.wakeup_handle(),
        0,
    ));

    let state = AppState {
        registry: registry as Arc<dyn NodeRegistry>,
        queue: store as Arc<dyn TaskQueue>,
        lifecycle: tracker as Arc<dyn TaskLifecycle>,
        health: health as Arc<dyn HealthCheckService>,
        alerts: alerts as Arc<dyn AlertService>,
        monitor: alert_engine as Arc<dyn MonitoringCheckService>,
        cluster: coordinator as Arc<dyn ClusterCoordinatorService>,
        metrics,
    };
    let auth = AuthState::new(true, vec![TEST_TOKEN.to_string()]);
    let app = create_app(state, auth);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base_url: format!("http://{addr}"),
        client: reqwest::Client::new(),
        dispatcher,
    }
}

fn gpu_registration(gpu_id: &str) -> Value {
    json!({
        "gpuId": gpu_id,
        "hostname": "node-1",
        "ip": "10.0.0.1",
        "port": 8080,
        "supportedTaskTypes": [2],
        "supportedTaskPriority": "NORMAL",
        "maxConcurrentTasks": 1,
        "version": "1.0.0"
    })
}

fn task_submission() -> Value {
    json!({
        "taskType": 2,
        "userId": "user-1",
        "app": "demo-app",
        "priority": 5,
        "payload": "{\"prompt\":\"hello\"}"
    })
}

#[tokio::test]
async fn test_health_probe_is_open_but_api_requires_token() {
    let server = server().await;

    // 探活不需要token
    let response = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    // 业务端点缺少token被拒
    let response = server
        .client
        .get(server.url("/api/v2/gpus"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    let envelope: Envelope<Value> = response.json().await.unwrap();
    assert_eq!(envelope.code, 401);
    assert!(envelope.data.is_none());

    // 错误token同样被拒
    let response = server
        .client
        .get(server.url("/api/v2/gpus"))
        .bearer_auth("wrong-token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_gpu_register_and_duplicate_conflict() {
    let server = server().await;

    let (status, envelope) = server
        .post_json::<Value>("/api/v2/gpus/register", Some(gpu_registration("gpu-001")))
        .await;
    assert_eq!(status, reqwest::StatusCode::CREATED);
    assert_eq!(envelope.code, 0);
    let node = envelope.data.unwrap();
    assert_eq!(node["gpuId"], "gpu-001");
    assert_eq!(node["status"], "ACTIVE");

    let (status, envelope) = server
        .post_json::<Value>("/api/v2/gpus/register", Some(gpu_registration("gpu-001")))
        .await;
    assert_eq!(status, reqwest::StatusCode::CONFLICT);
    assert_eq!(envelope.code, 409);
    assert!(envelope.message.contains("gpu-001"));
}

#[tokio::test]
async fn test_full_task_flow_over_http() {
    let server = server().await;
    server
        .post_json::<Value>("/api/v2/gpus/register", Some(gpu_registration("gpu-001")))
        .await;

    // 提交任务
    let (status, envelope) = server
        .post_json::<Value>("/api/v2/tasks", Some(task_submission()))
        .await;
    assert_eq!(status, reqwest::StatusCode::CREATED);
    let submit = envelope.data.unwrap();
    let task_id = submit["taskId"].as_str().unwrap().to_string();
    assert_eq!(submit["displayId"], 1);
    assert_eq!(submit["status"], "QUEUED");
    assert!(submit["estimatedWaitTime"].as_i64().unwrap() > 0);

    // 调度一轮
    assert_eq!(server.dispatcher.dispatch_once().await.unwrap(), 1);

    let (_, envelope) = server
        .get_json::<Value>(&format!("/api/v2/tasks/{task_id}"))
        .await;
    let task = envelope.data.unwrap();
    assert_eq!(task["status"], "PROCESSING");
    assert_eq!(task["gpuId"], "gpu-001");

    // Worker上报进度
    let (status, _) = server
        .post_json::<Value>(
            &format!("/api/v2/tasks/{task_id}/status"),
            Some(json!({"status": "PROCESSING", "gpuId": "gpu-001", "progress": 40.0})),
        )
        .await;
    assert_eq!(status, reqwest::StatusCode::OK);

    let (_, envelope) = server
        .get_json::<Value>(&format!("/api/v2/tasks/{task_id}/progress"))
        .await;
    let progress = envelope.data.unwrap();
    assert_eq!(progress["progress"], 40.0);
    assert_eq!(progress["status"], "PROCESSING");

    // Worker上报结果
    let (status, _) = server
        .post_json::<Value>(
            &format!("/api/v2/tasks/{task_id}/result"),
            Some(json!({"result": "{\"output\":\"done\"}"})),
        )
        .await;
    assert_eq!(status, reqwest::StatusCode::OK);

    let (_, envelope) = server
        .get_json::<Value>(&format!("/api/v2/tasks/{task_id}/result"))
        .await;
    let result = envelope.data.unwrap();
    assert_eq!(result["status"], "COMPLETED");
    assert_eq!(result["result"], "{\"output\":\"done\"}");

    // 容量已释放
    let (_, envelope) = server.get_json::<Vec<Value>>("/api/v2/gpus").await;
    let gpus = envelope.data.unwrap();
    assert_eq!(gpus.len(), 1);
    assert_eq!(gpus[0]["currentTasks"], 0);
}

#[tokio::test]
async fn test_task_list_filters_and_unknown_status() {
    let server = server().await;
    server
        .post_json::<Value>("/api/v2/tasks", Some(task_submission()))
        .await;

    let (_, envelope) = server
        .get_json::<Vec<Value>>("/api/v2/tasks?status=QUEUED")
        .await;
    assert_eq!(envelope.data.unwrap().len(), 1);

    let (_, envelope) = server
        .get_json::<Vec<Value>>("/api/v2/tasks?status=COMPLETED")
        .await;
    assert_eq!(envelope.data.unwrap().len(), 0);

    let response = server
        .client
        .get(server.url("/api/v2/tasks?status=BOGUS"))
        .bearer_auth(TEST_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_task_not_found_envelope() {
    let server = server().await;
    let response = server
        .client
        .get(server.url("/api/v2/tasks/missing-task"))
        .bearer_auth(TEST_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    let envelope: Envelope<Value> = response.json().await.unwrap();
    assert_eq!(envelope.code, 404);
    assert!(envelope.data.is_none());
    assert!(envelope.message.contains("missing-task"));
}

#[tokio::test]
async fn test_monitoring_and_cluster_endpoints() {
    let server = server().await;
    server
        .post_json::<Value>("/api/v2/gpus/register", Some(gpu_registration("gpu-001")))
        .await;

    let (_, envelope) = server.get_json::<Value>("/api/v2/monitoring/overview").await;
    let overview = envelope.data.unwrap();
    assert_eq!(overview["instance_id"], "inst-api-test");
    assert_eq!(overview["is_leader"], true);
    assert!(overview["health_status"]["total_gpu_count"].as_i64().unwrap() >= 1);

    let (_, envelope) = server.get_json::<Value>("/api/v2/monitoring/health").await;
    let health = envelope.data.unwrap();
    assert_eq!(health["gpu_health"], "HEALTHY");

    let (_, envelope) = server
        .get_json::<Value>("/api/v2/monitoring/health/gpu")
        .await;
    assert_eq!(envelope.data.unwrap()["status"], "HEALTHY");

    let (_, envelope) = server.get_json::<Value>("/api/v2/monitoring/metrics").await;
    let metrics = envelope.data.unwrap();
    assert_eq!(metrics["gpu_status_counts"]["ACTIVE"], 1);

    let (status, _) = server
        .post_json::<Value>("/api/v2/monitoring/check", None)
        .await;
    assert_eq!(status, reqwest::StatusCode::OK);

    let (_, envelope) = server.get_json::<Value>("/api/v2/cluster/status").await;
    let cluster = envelope.data.unwrap();
    assert_eq!(cluster["leader_instance"], "inst-api-test");
    assert_eq!(cluster["active_instances"], 1);

    let (_, envelope) = server.get_json::<Vec<Value>>("/api/v2/cluster/instances").await;
    assert_eq!(envelope.data.unwrap().len(), 1);
}

#[tokio::test]
async fn test_alert_acknowledge_flow_and_conflict() {
    let server = server().await;

    // 没有注册任何节点，触发检查会产生GPU资源告警
    let (_, envelope) = server
        .post_json::<String>("/api/v2/monitoring/check", None)
        .await;
    assert!(envelope.data.unwrap().contains("1 alerts raised"));

    let (_, envelope) = server
        .get_json::<Vec<Value>>("/api/v2/monitoring/alerts?status=ACTIVE")
        .await;
    let alerts = envelope.data.unwrap();
    assert_eq!(alerts.len(), 1);
    let alert_id = alerts[0]["id"].as_str().unwrap().to_string();

    let (status, envelope) = server
        .post_json::<Value>(
            &format!("/api/v2/monitoring/alerts/{alert_id}/acknowledge"),
            Some(json!({"acknowledgedBy": "operator"})),
        )
        .await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(envelope.data.unwrap()["status"], "ACKNOWLEDGED");

    // 重复确认返回409
    let (status, envelope) = server
        .post_json::<Value>(
            &format!("/api/v2/monitoring/alerts/{alert_id}/acknowledge"),
            Some(json!({"acknowledgedBy": "operator2"})),
        )
        .await;
    assert_eq!(status, reqwest::StatusCode::CONFLICT);
    assert_eq!(envelope.code, 409);

    let (_, envelope) = server
        .get_json::<Value>("/api/v2/monitoring/alerts/stats")
        .await;
    let stats = envelope.data.unwrap();
    assert_eq!(stats["total_alerts"], 1);
    assert_eq!(stats["acknowledged_alerts"], 1);
    assert_eq!(stats["active_alerts"], 0);
}

#[tokio::test]
async fn test_gpu_fault_recover_cycle_over_http() {
    let server = server().await;
    server
        .post_json::<Value>("/api/v2/gpus/register", Some(gpu_registration("gpu-001")))
        .await;

    // fault缺少reason参数是400
    let (status, _) = server
        .post_json::<Value>("/api/v2/gpus/gpu-001/fault", None)
        .await;
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);

    let (status, _) = server
        .post_json::<Value>("/api/v2/gpus/gpu-001/fault?reason=oom", None)
        .await;
    assert_eq!(status, reqwest::StatusCode::OK);

    let (_, envelope) = server.get_json::<Value>("/api/v2/gpus/gpu-001").await;
    assert_eq!(envelope.data.unwrap()["status"], "FAULTY");

    // 冷却期内恢复被拒
    let (status, envelope) = server
        .post_json::<Value>("/api/v2/gpus/gpu-001/recover", None)
        .await;
    assert_eq!(status, reqwest::StatusCode::CONFLICT);
    assert_eq!(envelope.code, 409);
}
