//! LLM 客户端抽象
//!
//! 核心只依赖「补全请求 → 单段文本」这一契约：OpenAI 兼容客户端与 Mock 都实现 LlmClient。

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::llm::Message;

/// 补全请求：模型名由客户端持有，其余参数逐次指定
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>, max_tokens: u32) -> Self {
        Self {
            messages,
            max_tokens,
            temperature: 0.1,
            top_p: 0.9,
        }
    }

    pub fn with_sampling(mut self, temperature: f32, top_p: f32) -> Self {
        self.temperature = temperature;
        self.top_p = top_p;
        self
    }

    /// 最后一条 User 消息（Mock 按它选择脚本回复）
    pub fn last_user_content(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, crate::llm::Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

/// 模型调用错误；is_retryable 决定是否进入线性退避重试
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("API key not configured")]
    MissingApiKey,

    #[error("Request timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Empty response from model")]
    EmptyResponse,

    #[error("Request cancelled")]
    Cancelled,
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Timeout | LlmError::Transport(_) => true,
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            LlmError::MissingApiKey | LlmError::EmptyResponse | LlmError::Cancelled => false,
        }
    }
}

/// LLM 客户端 trait：非流式补全，返回首个候选的文本
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;

    /// 模型标识（用于日志与诊断）
    fn model(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LlmError::Timeout.is_retryable());
        assert!(LlmError::Transport("reset".into()).is_retryable());
        assert!(LlmError::Api { status: 503, message: String::new() }.is_retryable());
        assert!(LlmError::Api { status: 429, message: String::new() }.is_retryable());
        assert!(!LlmError::Api { status: 401, message: String::new() }.is_retryable());
        assert!(!LlmError::MissingApiKey.is_retryable());
        assert!(!LlmError::Cancelled.is_retryable());
    }

    #[test]
    fn test_last_user_content() {
        let req = CompletionRequest::new(
            vec![Message::system("sys"), Message::user("first"), Message::user("second")],
            10,
        );
        assert_eq!(req.last_user_content(), "second");
    }
}
