//! 외부 호출 타임아웃 + 재시도
//!
//! 임베딩/생성 호출마다 타임아웃을 걸고, 일시적 실패만 지수 백오프로 재시도합니다.

use std::future::Future;
use std::time::Duration;

use crate::error::{RagError, Result};

/// 재시도 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 호출 1회 타임아웃
    pub timeout: Duration,
    /// 총 시도 횟수 (최소 1)
    pub max_attempts: u32,
    /// 첫 재시도 전 대기, 이후 2배씩 증가
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(timeout: Duration, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            timeout,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// 재시도 없이 한 번만
    pub fn once(timeout: Duration) -> Self {
        Self::new(timeout, 1, Duration::ZERO)
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// `op`를 정책에 따라 실행
    ///
    /// 타임아웃은 `on_timeout`으로 만든 일시적 에러로 바뀌어 재시도 대상이 됩니다.
    pub async fn run<T, F, Fut>(
        &self,
        what: &str,
        on_timeout: impl Fn(String) -> RagError,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(on_timeout(format!(
                    "{} timed out after {:?}",
                    what, self.timeout
                ))),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < self.max_attempts => {
                    let backoff = self.backoff_for(attempt);
                    tracing::warn!(
                        "{} failed, retrying in {:?} (attempt {}/{}): {}",
                        what,
                        backoff,
                        attempt + 1,
                        self.max_attempts,
                        e
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(200), max_attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = policy(3)
            .run("embed", RagError::embedding_transient, || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(RagError::embedding_transient("reset"))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = policy(3)
            .run("embed", RagError::embedding_transient, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RagError::embedding("malformed"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = policy(2)
            .run("generate", RagError::generation_transient, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RagError::generation_transient("503"))
            })
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, RagError::GenerationUnavailable { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_is_retryable_error() {
        let result: Result<()> = RetryPolicy::once(Duration::from_millis(10))
            .run("generate", RagError::generation_transient, || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_backoff_doubles() {
        let p = RetryPolicy::new(Duration::from_secs(1), 4, Duration::from_millis(100));
        assert_eq!(p.backoff_for(0), Duration::from_millis(100));
        assert_eq!(p.backoff_for(2), Duration::from_millis(400));
        assert_eq!(RetryPolicy::new(Duration::from_secs(1), 0, Duration::ZERO).max_attempts, 1);
    }
}
