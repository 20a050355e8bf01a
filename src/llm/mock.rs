//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 回复来源依次为：按关键词匹配的规则 → 脚本队列 → 兜底回复（默认回显最后一条 User 消息）。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{CompletionRequest, LlmClient, LlmError};

/// 兜底策略
#[derive(Debug, Clone)]
enum Fallback {
    Echo,
    Fixed(Result<String, LlmError>),
}

/// 可编排的 Mock 客户端
#[derive(Debug)]
pub struct MockLlmClient {
    rules: Vec<(String, String)>,
    queue: Mutex<VecDeque<Result<String, LlmError>>>,
    fallback: Fallback,
    calls: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            queue: Mutex::new(VecDeque::new()),
            fallback: Fallback::Echo,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 所有调用都以传输错误失败（模拟端点不可达 / 未配置密钥的离线模式）
    pub fn unreachable() -> Self {
        Self::new().fallback_err(LlmError::Transport("endpoint unreachable".into()))
    }

    /// 队列末尾追加一次成功回复
    pub fn then_ok(self, text: impl Into<String>) -> Self {
        self.lock_queue().push_back(Ok(text.into()));
        self
    }

    /// 队列末尾追加一次失败
    pub fn then_err(self, err: LlmError) -> Self {
        self.lock_queue().push_back(Err(err));
        self
    }

    /// 最后一条 User 消息包含 needle 时固定回复 text（优先于队列）
    pub fn when(mut self, needle: impl Into<String>, text: impl Into<String>) -> Self {
        self.rules.push((needle.into(), text.into()));
        self
    }

    pub fn fallback_ok(mut self, text: impl Into<String>) -> Self {
        self.fallback = Fallback::Fixed(Ok(text.into()));
        self
    }

    pub fn fallback_err(mut self, err: LlmError) -> Self {
        self.fallback = Fallback::Fixed(Err(err));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 已收到的请求副本（按调用顺序）
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, LlmError>>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        let last_user = request.last_user_content();
        if let Some((_, text)) = self.rules.iter().find(|(needle, _)| last_user.contains(needle.as_str())) {
            return Ok(text.clone());
        }

        if let Some(next) = self.lock_queue().pop_front() {
            return next;
        }

        match &self.fallback {
            Fallback::Echo => Ok(format!("Echo from Mock: {}", last_user)),
            Fallback::Fixed(result) => result.clone(),
        }
    }

    fn model(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;

    #[tokio::test]
    async fn test_rules_take_precedence_over_queue() {
        let mock = MockLlmClient::new().when("weather", "CHAT").then_ok("SEARCH");
        let weather = CompletionRequest::new(vec![Message::user("how is the weather")], 10);
        let other = CompletionRequest::new(vec![Message::user("find rust docs")], 10);

        assert_eq!(mock.complete(&weather).await.unwrap(), "CHAT");
        assert_eq!(mock.complete(&other).await.unwrap(), "SEARCH");
        assert_eq!(mock.complete(&other).await.unwrap(), "Echo from Mock: find rust docs");
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn test_unreachable_always_fails() {
        let mock = MockLlmClient::unreachable();
        let req = CompletionRequest::new(vec![Message::user("hi")], 10);
        assert!(matches!(mock.complete(&req).await, Err(LlmError::Transport(_))));
        assert!(matches!(mock.complete(&req).await, Err(LlmError::Transport(_))));
    }
}
