//! 错误分类
//!
//! 本子系统内的任何错误都不会终止进程：每条失败路径最终降级为结构化的用户可见回复，并计入统计。

use serde::Serialize;
use thiserror::Error;

use crate::llm::LlmError;

/// 意图识别 → 技能匹配 → 执行 流水线中可能出现的错误
#[derive(Error, Debug, Clone)]
pub enum BrainError {
    /// 重试耗尽仍无法访问模型端点；触发本地关键词降级分类
    #[error("Classifier unavailable: {0}")]
    ClassifierUnavailable(LlmError),

    /// 模型返回了意料之外的内容；降级为 Unknown 或空匹配
    #[error("Parse error: {0}")]
    ParseError(String),

    /// 生成代码命中黑名单，未执行
    #[error("Unsafe code rejected ({category}): {pattern}")]
    UnsafeCode {
        category: &'static str,
        pattern: String,
    },

    #[error("Sandbox runtime error: {0}")]
    SandboxRuntime(String),

    #[error("Sandbox timed out after {0} ms")]
    SandboxTimeout(u64),

    #[error("No skill found for intent: {0}")]
    SkillNotFound(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),
}

/// 诊断信息中使用的错误类别（稳定的 snake_case 名称）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ClassifierUnavailable,
    ParseError,
    UnsafeCode,
    SandboxRuntime,
    SandboxTimeout,
    SkillNotFound,
    SkillFailed,
    Cancelled,
    Config,
}

impl BrainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BrainError::ClassifierUnavailable(_) => ErrorKind::ClassifierUnavailable,
            BrainError::ParseError(_) => ErrorKind::ParseError,
            BrainError::UnsafeCode { .. } => ErrorKind::UnsafeCode,
            BrainError::SandboxRuntime(_) => ErrorKind::SandboxRuntime,
            BrainError::SandboxTimeout(_) => ErrorKind::SandboxTimeout,
            BrainError::SkillNotFound(_) => ErrorKind::SkillNotFound,
            BrainError::Cancelled => ErrorKind::Cancelled,
            BrainError::Config(_) => ErrorKind::Config,
        }
    }
}

impl From<LlmError> for BrainError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Cancelled => BrainError::Cancelled,
            other => BrainError::ClassifierUnavailable(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_cancel_maps_to_cancelled() {
        let err: BrainError = LlmError::Cancelled.into();
        assert!(matches!(err, BrainError::Cancelled));
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_transport_maps_to_unavailable() {
        let err: BrainError = LlmError::Transport("connection refused".into()).into();
        assert_eq!(err.kind(), ErrorKind::ClassifierUnavailable);
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_unsafe_code_message() {
        let err = BrainError::UnsafeCode {
            category: "filesystem",
            pattern: "open(".into(),
        };
        assert!(err.to_string().contains("filesystem"));
        assert_eq!(err.kind(), ErrorKind::UnsafeCode);
    }
}
