use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use gpu_scheduler_core::errors::{SchedulerError, SchedulerResult};
use gpu_scheduler_core::models::{Alert, AlertFilter, AlertLevel, AlertStats, AlertStatus};
use gpu_scheduler_core::traits::AlertService;

/// 内存告警存储
///
/// 告警只追加不删除；已确认的告警超过保留期后归档（移出活跃列表）。
/// 同一 source+title 的ACTIVE告警只保留一条。
#[derive(Debug, Default)]
pub struct InMemoryAlertStore {
    alerts: RwLock<Vec<Alert>>,
    archived: RwLock<Vec<Alert>>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 将超过保留期的已确认告警移入归档，返回归档数量
    pub async fn archive_expired(&self, retention_seconds: i64) -> usize {
        let now = Utc::now();
        let mut alerts = self.alerts.write().await;
        let mut archived = self.archived.write().await;

        let mut moved = 0;
        alerts.retain(|alert| {
            let expired = alert.status == AlertStatus::Acknowledged
                && alert
                    .acknowledged_at
                    .map(|at| (now - at).num_seconds() > retention_seconds)
                    .unwrap_or(false);
            if expired {
                archived.push(alert.clone());
                moved += 1;
            }
            !expired
        });

        if moved > 0 {
            info!("Archived {} acknowledged alerts", moved);
        }
        moved
    }
}

#[async_trait]
impl AlertService for InMemoryAlertStore {
    async fn raise(
        &self,
        source: &str,
        title: &str,
        message: &str,
        level: AlertLevel,
    ) -> SchedulerResult<Option<Alert>> {
        let mut alerts = self.alerts.write().await;

        // 去重：同源同标题的ACTIVE告警存在时不重复触发
        let duplicate = alerts
            .iter()
            .any(|a| a.is_active() && a.source == source && a.title == title);
        if duplicate {
            return Ok(None);
        }

        let alert = Alert {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            message: message.to_string(),
            level,
            status: AlertStatus::Active,
            source: source.to_string(),
            timestamp: Utc::now(),
            acknowledged_at: None,
            acknowledged_by: None,
        };
        info!(
            "Alert raised [{}] {} - {}",
            alert.source, alert.title, alert.message
        );
        alerts.push(alert.clone());
        Ok(Some(alert))
    }

    async fn acknowledge(&self, alert_id: &str, acknowledged_by: &str) -> SchedulerResult<Alert> {
        let mut alerts = self.alerts.write().await;
        let alert = alerts
            .iter_mut()
            .find(|a| a.id == alert_id)
            .ok_or_else(|| SchedulerError::AlertNotFound {
                id: alert_id.to_string(),
            })?;

        if alert.status == AlertStatus::Acknowledged {
            return Err(SchedulerError::AlreadyAcknowledged {
                id: alert_id.to_string(),
            });
        }

        alert.status = AlertStatus::Acknowledged;
        alert.acknowledged_at = Some(Utc::now());
        alert.acknowledged_by = Some(acknowledged_by.to_string());
        Ok(alert.clone())
    }

    async fn list(&self, filter: &AlertFilter) -> SchedulerResult<(Vec<Alert>, i64)> {
        let alerts = self.alerts.read().await;
        let mut matched: Vec<&Alert> = alerts
            .iter()
            .filter(|a| filter.level.map(|l| a.level == l).unwrap_or(true))
            .filter(|a| filter.status.map(|s| a.status == s).unwrap_or(true))
            .filter(|a| {
                filter
                    .source
                    .as_ref()
                    .map(|s| &a.source == s)
                    .unwrap_or(true)
            })
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let total = matched.len() as i64;
        let page = filter.page.unwrap_or(1).max(1);
        let size = filter.size.unwrap_or(20).clamp(1, 500);
        let start = ((page - 1) * size) as usize;
        let items = matched
            .into_iter()
            .skip(start)
            .take(size as usize)
            .cloned()
            .collect();
        Ok((items, total))
    }

    async fn stats(&self) -> SchedulerResult<AlertStats> {
        let alerts = self.alerts.read().await;
        let mut stats = AlertStats::default();
        for alert in alerts.iter() {
            stats.total_alerts += 1;
            match alert.level {
                AlertLevel::Critical => stats.critical_alerts += 1,
                AlertLevel::Warning => stats.warning_alerts += 1,
                AlertLevel::Info => stats.info_alerts += 1,
            }
            match alert.status {
                AlertStatus::Active => stats.active_alerts += 1,
                AlertStatus::Acknowledged => stats.acknowledged_alerts += 1,
            }
        }
        Ok(stats)
    }
}
