//! LLM 层：补全契约、OpenAI 兼容实现、重试策略与 Mock

pub mod message;
pub mod mock;
pub mod openai;
pub mod retry;
pub mod traits;

pub use message::{Message, Role};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use retry::{complete_with_retry, RetryPolicy};
pub use traits::{CompletionRequest, LlmClient, LlmError};
