use std::time::Duration;

use rand::Rng;

/// 调度失败重试退避策略
///
/// 第n次重试等待 base * 2^(n-1) 秒，封顶max，并附加最多20%的随机
/// 抖动避免批量任务同时回到队列。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(base_backoff_seconds: u64, max_backoff_seconds: u64) -> Self {
        Self {
            base_backoff: Duration::from_secs(base_backoff_seconds.max(1)),
            max_backoff: Duration::from_secs(max_backoff_seconds.max(1)),
        }
    }

    /// 第 retry_count 次重试的退避时长
    pub fn backoff_for(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(16);
        let backoff = self
            .base_backoff
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_backoff);

        let jitter_ms = (backoff.as_millis() as u64) / 5;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        backoff + jitter
    }
}
