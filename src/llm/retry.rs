//! 重试策略：首次请求 + 至多 max_retries 次重试，第 n 次重试前等待 n × base_delay
//!
//! 取消令牌同时作用于进行中的请求与退避等待，被放弃的请求不必等满超时。

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::llm::{CompletionRequest, LlmClient, LlmError};

/// 线性退避重试配置
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// 第 retry 次重试（从 1 开始）前的等待时长
    pub fn backoff(&self, retry: u32) -> Duration {
        self.base_delay * retry
    }
}

/// 带重试与取消的补全；返回最后一次错误
pub async fn complete_with_retry(
    client: &dyn LlmClient,
    request: &CompletionRequest,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<String, LlmError> {
    let mut retry = 0u32;
    loop {
        let attempt = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            r = client.complete(request) => r,
        };

        match attempt {
            Ok(text) => return Ok(text),
            Err(err) if err.is_retryable() && retry < policy.max_retries => {
                retry += 1;
                let delay = policy.backoff(retry);
                tracing::warn!(
                    model = %client.model(),
                    attempt = retry,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "LLM call failed, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => {
                tracing::warn!(model = %client.model(), error = %err, "LLM call failed");
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Message, MockLlmClient};

    fn request() -> CompletionRequest {
        CompletionRequest::new(vec![Message::user("ping")], 5)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let mock = MockLlmClient::new()
            .then_err(LlmError::Transport("down".into()))
            .then_ok("pong");
        let policy = RetryPolicy::new(2, Duration::from_millis(100));
        let started = tokio::time::Instant::now();

        let out = complete_with_retry(&mock, &request(), &policy, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(out, "pong");
        assert_eq!(mock.calls(), 2);
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_linear_backoff_and_exhaustion() {
        let mock = MockLlmClient::unreachable();
        let policy = RetryPolicy::new(2, Duration::from_millis(100));
        let started = tokio::time::Instant::now();

        let err = complete_with_retry(&mock, &request(), &policy, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::Transport(_)));
        assert_eq!(mock.calls(), 3);
        // 100ms + 200ms
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let mock = MockLlmClient::new().then_err(LlmError::MissingApiKey);
        let policy = RetryPolicy::new(2, Duration::from_millis(100));

        let err = complete_with_retry(&mock, &request(), &policy, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err, LlmError::MissingApiKey);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_during_backoff() {
        let mock = MockLlmClient::unreachable();
        let policy = RetryPolicy::new(5, Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = complete_with_retry(&mock, &request(), &policy, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, LlmError::Cancelled);
    }
}
