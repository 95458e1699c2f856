//! 超时与指数退避重试

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// 单次调用上限，防止指数退避无限放大
const MAX_BACKOFF_MS: u64 = 30_000;

/// 重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 总尝试次数（含首次）
    pub max_attempts: u32,
    /// 首次重试前的等待时间，之后每次翻倍
    pub base_delay_ms: u64,
    /// 单次尝试的超时时间
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, timeout_seconds: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            timeout: Duration::from_secs(timeout_seconds),
        }
    }

    /// 第 `attempt` 次失败后的等待时间
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(MAX_BACKOFF_MS))
    }
}

/// 重试结束后仍然失败
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last: E,
    /// 是否因为不可重试的错误提前结束
    pub fatal: bool,
}

/// 通用重试逻辑，每次尝试都带超时保护
///
/// `is_retryable` 返回 false 的错误立即返回，不再重试；
/// 超时由 `on_timeout` 转换为调用方的错误类型后按可重试处理。
pub async fn retry_with_backoff<T, E, F, Fut, R, O>(
    label: &str,
    policy: &RetryPolicy,
    is_retryable: R,
    on_timeout: O,
    mut operation: F,
) -> Result<T, Exhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    O: Fn() -> E,
    E: Display,
{
    let mut attempt = 0;

    loop {
        attempt += 1;
        let outcome = match tokio::time::timeout(policy.timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout()),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retryable(&err) {
                    return Err(Exhausted {
                        attempts: attempt,
                        last: err,
                        fatal: true,
                    });
                }
                if attempt >= policy.max_attempts {
                    tracing::warn!(
                        "❌ {} 失败，已尝试 {} 次: {}",
                        label,
                        attempt,
                        err
                    );
                    return Err(Exhausted {
                        attempts: attempt,
                        last: err,
                        fatal: false,
                    });
                }
                let delay = policy.backoff_delay(attempt);
                tracing::warn!(
                    "⚠️ {} 出错，{}ms 后重试 (第 {} / {} 次尝试): {}",
                    label,
                    delay.as_millis(),
                    attempt,
                    policy.max_attempts,
                    err
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(5, 100, 10);
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(30), Duration::from_millis(MAX_BACKOFF_MS));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<u32, Exhausted<String>> = retry_with_backoff(
            "test",
            &fast_policy(3),
            |_| true,
            || "timeout".to_string(),
            move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err(format!("boom {}", n)) } else { Ok(n) }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), Exhausted<String>> = retry_with_backoff(
            "test",
            &fast_policy(5),
            |_| false,
            || "timeout".to_string(),
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("rejected".to_string())
            },
        )
        .await;

        let exhausted = result.unwrap_err();
        assert!(exhausted.fatal);
        assert_eq!(exhausted.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_attempt() {
        let result: Result<(), Exhausted<String>> = retry_with_backoff(
            "test",
            &RetryPolicy {
                max_attempts: 2,
                base_delay_ms: 1,
                timeout: Duration::from_millis(10),
            },
            |_| true,
            || "timed out".to_string(),
            || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;

        let exhausted = result.unwrap_err();
        assert!(!exhausted.fatal);
        assert_eq!(exhausted.attempts, 2);
        assert_eq!(exhausted.last, "timed out");
    }
}
