//! 重试执行器：指数退避 + 抖动
//!
//! 包裹一次异步操作（通常是 LLM 调用），按错误类别决定重试或立即失败。
//! 延迟 = min(base * 2^(attempt-1) + jitter(0..1s), max)。
//! 可选 observer 在每次 sleep 前收到 (attempt, delay, class)，仅用于进度上报，不影响重试决策。

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;

use crate::llm::LlmError;

/// 错误类别：由状态码或消息文本归类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    RateLimit,
    Timeout,
    ServiceUnavailable,
    Internal,
    ConnectionReset,
    Unknown,
}

/// 归类规则：先看状态码（429 / 503 / >=500），再看消息文本子串，否则 Unknown
pub fn classify(status: Option<u16>, message: &str) -> ErrorClass {
    match status {
        Some(429) => return ErrorClass::RateLimit,
        Some(503) => return ErrorClass::ServiceUnavailable,
        Some(code) if code >= 500 => return ErrorClass::Internal,
        _ => {}
    }
    let lower = message.to_lowercase();
    if lower.contains("rate limit") {
        ErrorClass::RateLimit
    } else if lower.contains("timeout") || lower.contains("timed out") {
        ErrorClass::Timeout
    } else if lower.contains("connection reset") || lower.contains("econnreset") {
        ErrorClass::ConnectionReset
    } else {
        ErrorClass::Unknown
    }
}

/// 重试参数：次数、基础/最大延迟、可重试类别集合
#[derive(Debug, Clone)]
pub struct RetryOptions {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retryable: HashSet<ErrorClass>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            retryable: [
                ErrorClass::RateLimit,
                ErrorClass::Timeout,
                ErrorClass::ServiceUnavailable,
                ErrorClass::Internal,
                ErrorClass::ConnectionReset,
            ]
            .into_iter()
            .collect(),
        }
    }
}

/// 重试进度回调：(attempt, 即将 sleep 的时长, 错误类别)
pub type RetryObserver<'a> = &'a (dyn Fn(u32, Duration, ErrorClass) + Send + Sync);

/// 重试失败：不可重试错误立即透传；重试耗尽时包裹最后一个底层错误
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("max retries exceeded after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: LlmError },

    #[error(transparent)]
    Fatal(LlmError),
}

/// 将可能的抖动 sleep 记录到日志的默认 observer
pub fn log_observer(attempt: u32, delay: Duration, class: ErrorClass) {
    tracing::warn!(
        "retryable error ({:?}), attempt {} failed, sleeping {:?}",
        class,
        attempt,
        delay
    );
}

/// 执行 op，按 options 重试
pub async fn with_retry<T, F, Fut>(
    mut op: F,
    options: &RetryOptions,
    observer: Option<RetryObserver<'_>>,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let max_attempts = options.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let class = classify(err.status, &err.message);
        if !options.retryable.contains(&class) {
            return Err(RetryError::Fatal(err));
        }
        if attempt >= max_attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: err,
            });
        }

        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=1_000));
        let backoff = options.base_delay * 2u32.saturating_pow(attempt - 1);
        let delay = (backoff + jitter).min(options.max_delay);
        if let Some(cb) = observer {
            cb(attempt, delay, class);
        }
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_options(max_attempts: u32) -> RetryOptions {
        RetryOptions {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..RetryOptions::default()
        }
    }

    #[test]
    fn test_classify_by_status() {
        assert_eq!(classify(Some(429), "whatever"), ErrorClass::RateLimit);
        assert_eq!(classify(Some(503), ""), ErrorClass::ServiceUnavailable);
        assert_eq!(classify(Some(500), ""), ErrorClass::Internal);
        assert_eq!(classify(Some(502), ""), ErrorClass::Internal);
        assert_eq!(classify(Some(400), "bad request"), ErrorClass::Unknown);
    }

    #[test]
    fn test_classify_by_message() {
        assert_eq!(classify(None, "Rate limit exceeded"), ErrorClass::RateLimit);
        assert_eq!(classify(None, "request timed out"), ErrorClass::Timeout);
        assert_eq!(
            classify(None, "connection reset by peer"),
            ErrorClass::ConnectionReset
        );
        assert_eq!(classify(None, "invalid api key"), ErrorClass::Unknown);
    }

    #[tokio::test]
    async fn test_retry_bounded() {
        let count = AtomicU32::new(0);
        let result: Result<(), RetryError> = with_retry(
            || async {
                count.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::with_status(429, "rate limit"))
            },
            &fast_options(3),
            None,
        )
        .await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(matches!(
            result,
            Err(RetryError::Exhausted { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_retry_short_circuit_on_fatal() {
        let count = AtomicU32::new(0);
        let result: Result<(), RetryError> = with_retry(
            || async {
                count.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::with_status(401, "invalid api key"))
            },
            &fast_options(3),
            None,
        )
        .await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::Fatal(_))));
    }

    #[tokio::test]
    async fn test_retry_recovers_after_transient() {
        let count = AtomicU32::new(0);
        let result = with_retry(
            || async {
                if count.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(LlmError::new("timeout"))
                } else {
                    Ok("ok".to_string())
                }
            },
            &fast_options(5),
            None,
        )
        .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_observer_sees_every_sleep() {
        use std::sync::Mutex;
        let seen: Mutex<Vec<(u32, ErrorClass)>> = Mutex::new(Vec::new());
        let observer = |attempt: u32, _delay: Duration, class: ErrorClass| {
            seen.lock().unwrap().push((attempt, class));
        };
        let _: Result<(), RetryError> = with_retry(
            || async { Err(LlmError::with_status(503, "unavailable")) },
            &fast_options(3),
            Some(&observer),
        )
        .await;
        let seen = seen.lock().unwrap();
        // 3 次尝试 => 2 次 sleep
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (1, ErrorClass::ServiceUnavailable));
        assert_eq!(seen[1], (2, ErrorClass::ServiceUnavailable));
    }
}
