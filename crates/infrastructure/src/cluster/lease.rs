use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::info;

/// Leader租约记录
#[derive(Debug, Clone)]
pub struct LeaseRecord {
    pub holder: String,
    /// 单调递增的任期号，每次易主加一
    pub term: u64,
    pub renewed_at: DateTime<Utc>,
}

/// 共享租约单元
///
/// 部署内所有调度实例围绕同一个租约单元竞选Leader。获取与续期都是
/// 单个互斥区间内的比较并交换，保证同一时刻至多一个持有者。
#[derive(Debug, Default)]
pub struct LeaseCell {
    record: Mutex<Option<LeaseRecord>>,
}

impl LeaseCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// 尝试获取租约
    ///
    /// 无持有者、自己已是持有者、或持有者租约过期时成功；
    /// 易主时任期加一。失败返回None。
    pub async fn try_acquire(
        &self,
        instance_id: &str,
        lease_timeout_seconds: i64,
    ) -> Option<LeaseRecord> {
        let now = Utc::now();
        let mut record = self.record.lock().await;

        match record.as_mut() {
            None => {
                let acquired = LeaseRecord {
                    holder: instance_id.to_string(),
                    term: 1,
                    renewed_at: now,
                };
                info!("Instance '{}' acquired leader lease (term 1)", instance_id);
                *record = Some(acquired.clone());
                Some(acquired)
            }
            Some(current) if current.holder == instance_id => {
                current.renewed_at = now;
                Some(current.clone())
            }
            Some(current) => {
                let stale = (now - current.renewed_at).num_seconds() > lease_timeout_seconds;
                if !stale {
                    return None;
                }
                let term = current.term + 1;
                info!(
                    "Instance '{}' took over leader lease from '{}' (term {})",
                    instance_id, current.holder, term
                );
                *current = LeaseRecord {
                    holder: instance_id.to_string(),
                    term,
                    renewed_at: now,
                };
                Some(current.clone())
            }
        }
    }

    /// 续期，仅当前持有者可成功
    pub async fn renew(&self, instance_id: &str) -> bool {
        let mut record = self.record.lock().await;
        match record.as_mut() {
            Some(current) if current.holder == instance_id => {
                current.renewed_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// 主动释放（优雅停机时调用）
    pub async fn release(&self, instance_id: &str) {
        let mut record = self.record.lock().await;
        if let Some(current) = record.as_ref() {
            if current.holder == instance_id {
                info!("Instance '{}' released leader lease", instance_id);
                *record = None;
            }
        }
    }

    pub async fn current(&self) -> Option<LeaseRecord> {
        self.record.lock().await.clone()
    }

    /// 判断指定实例当前是否持有未过期的租约
    pub async fn held_by(&self, instance_id: &str, lease_timeout_seconds: i64) -> bool {
        let now = Utc::now();
        match self.record.lock().await.as_ref() {
            Some(record) => {
                record.holder == instance_id
                    && (now - record.renewed_at).num_seconds() <= lease_timeout_seconds
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_acquire_wins() {
        let cell = LeaseCell::new();
        assert!(cell.try_acquire("a", 15).await.is_some());
        assert!(cell.try_acquire("b", 15).await.is_none());
        assert!(cell.held_by("a", 15).await);
        assert!(!cell.held_by("b", 15).await);
    }

    #[tokio::test]
    async fn test_holder_reacquire_keeps_term() {
        let cell = LeaseCell::new();
        let first = cell.try_acquire("a", 15).await.unwrap();
        let again = cell.try_acquire("a", 15).await.unwrap();
        assert_eq!(first.term, again.term);
    }

    #[tokio::test]
    async fn test_takeover_after_expiry_bumps_term() {
        let cell = LeaseCell::new();
        cell.try_acquire("a", 15).await.unwrap();
        {
            // 人为使租约过期
            let mut record = cell.record.lock().await;
            record.as_mut().unwrap().renewed_at = Utc::now() - chrono::Duration::seconds(60);
        }

        let taken = cell.try_acquire("b", 15).await.unwrap();
        assert_eq!(taken.holder, "b");
        assert_eq!(taken.term, 2);
        assert!(!cell.held_by("a", 15).await);
    }

    #[tokio::test]
    async fn test_renew_only_by_holder() {
        let cell = LeaseCell::new();
        cell.try_acquire("a", 15).await.unwrap();
        assert!(cell.renew("a").await);
        assert!(!cell.renew("b").await);
    }

    #[tokio::test]
    async fn test_release_clears_lease() {
        let cell = LeaseCell::new();
        cell.try_acquire("a", 15).await.unwrap();
        cell.release("a").await;
        assert!(cell.current().await.is_none());

        // 释放后其他实例立即可获取
        let next = cell.try_acquire("b", 15).await.unwrap();
        assert_eq!(next.holder, "b");
    }

    #[tokio::test]
    async fn test_concurrent_acquire_has_single_winner() {
        let cell = std::sync::Arc::new(LeaseCell::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let cell = std::sync::Arc::clone(&cell);
            handles.push(tokio::spawn(async move {
                cell.try_acquire(&format!("inst-{i}"), 15).await.is_some()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
