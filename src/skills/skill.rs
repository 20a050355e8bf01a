//! 技能契约
//!
//! 所有技能实现 Skill trait（name / description / priority / can_handle / handle），
//! 由 SkillRegistry 按名注册、按优先级挑选；handle 的失败以 SkillError 返回，由注册表统一转为 ExecutionResult。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Serialize, Serializer};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::core::{BrainError, ErrorKind};
use crate::intent::Classification;

/// 优先级：Low < Normal < High < Critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// 技能描述（注册表对外暴露的只读视图）
#[derive(Debug, Clone, Serialize)]
pub struct SkillDescriptor {
    pub name: String,
    pub description: String,
    pub priority: Priority,
    pub enabled: bool,
    /// 自注册以来被调用的次数
    pub usage_count: u64,
}

/// 一次调用的上下文
#[derive(Debug, Clone, Default)]
pub struct SkillContext {
    /// 当前已注册技能（help 技能用来列出能力）
    pub available_skills: Vec<SkillDescriptor>,
    /// 请求被放弃时触发；长耗时技能应尊重它
    pub cancel: CancellationToken,
}

impl SkillContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_skills(mut self, skills: Vec<SkillDescriptor>) -> Self {
        self.available_skills = skills;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// 技能成功时的产出
#[derive(Debug, Clone, PartialEq)]
pub struct SkillOutput {
    pub text: String,
    /// 附加的结构化数据（如搜索链接、配置快照）
    pub data: Option<serde_json::Value>,
}

impl SkillOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// 技能内部失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SkillError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not allowed: {0}")]
    NotAllowed(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,
}

/// 技能 trait：名称唯一、描述供匹配器理解、优先级决定多个候选时谁执行
#[async_trait]
pub trait Skill: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn priority(&self) -> Priority {
        Priority::Normal
    }

    /// 纯判断，无副作用
    fn can_handle(&self, classification: &Classification) -> bool;

    async fn handle(
        &self,
        classification: &Classification,
        context: &SkillContext,
    ) -> Result<SkillOutput, SkillError>;
}

/// 一次分派（技能 / 沙箱 / 直接回答）的结果
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// 成功时的输出
    pub output: Option<String>,
    /// 失败时的错误描述，与 output 互斥
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    /// 技能名，或 "sandbox" / "direct-answer"
    pub executor: String,
    /// 同样接受该意图、但未被调用的技能
    pub alternatives: Vec<String>,
    pub data: Option<serde_json::Value>,
}

pub const DIRECT_ANSWER: &str = "direct-answer";
pub const SANDBOX: &str = "sandbox";

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl ExecutionResult {
    pub fn success(executor: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
            error_kind: None,
            elapsed: Duration::ZERO,
            executor: executor.into(),
            alternatives: Vec::new(),
            data: None,
        }
    }

    pub fn failure(executor: impl Into<String>, kind: ErrorKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            error_kind: Some(kind),
            elapsed: Duration::ZERO,
            executor: executor.into(),
            alternatives: Vec::new(),
            data: None,
        }
    }

    pub fn from_error(executor: impl Into<String>, err: &BrainError) -> Self {
        Self::failure(executor, err.kind(), err.to_string())
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn with_alternatives(mut self, alternatives: Vec<String>) -> Self {
        self.alternatives = alternatives;
        self
    }

    pub fn with_data(mut self, data: Option<serde_json::Value>) -> Self {
        self.data = data;
        self
    }

    /// 面向用户的文本：成功取输出，失败取错误描述
    pub fn text(&self) -> &str {
        self.output
            .as_deref()
            .or(self.error.as_deref())
            .unwrap_or_default()
    }

    /// 是否产出了可用的输出（成功且非空）
    pub fn is_usable(&self) -> bool {
        self.success && self.output.as_deref().is_some_and(|o| !o.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::Critical);
    }

    #[test]
    fn test_result_output_and_error_exclusive() {
        let ok = ExecutionResult::success("chat", "hi");
        assert!(ok.error.is_none());
        assert_eq!(ok.text(), "hi");

        let failed = ExecutionResult::failure("search", ErrorKind::SkillFailed, "empty query");
        assert!(failed.output.is_none());
        assert_eq!(failed.text(), "empty query");
        assert!(!failed.is_usable());
    }

    #[test]
    fn test_blank_output_not_usable() {
        assert!(!ExecutionResult::success(SANDBOX, "  \n").is_usable());
        assert!(ExecutionResult::success(SANDBOX, "42").is_usable());
    }

    #[test]
    fn test_serializes_elapsed_as_millis() {
        let r = ExecutionResult::success("help", "x").with_elapsed(Duration::from_millis(1500));
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["elapsed_ms"], 1500);
        assert_eq!(v["executor"], "help");
    }
}
