//! Brain Agent - 类脑意图识别与技能调度
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、编排流水线、会话监管、统计
//! - **intent**: 意图标签、关键词表、LRU/TTL 缓存、分类器
//! - **llm**: 补全契约、OpenAI 兼容客户端、重试策略、Mock
//! - **sandbox**: 黑名单筛查、代码生成、片段解释器、执行器
//! - **skills**: 技能契约、注册表、匹配器、内置技能
//! - **observability**: 日志初始化

pub mod config;
pub mod core;
pub mod intent;
pub mod llm;
pub mod observability;
pub mod sandbox;
pub mod skills;

pub use crate::core::{BrainError, Command, Orchestrator, ProcessOutcome};
