//! 技能系统
//!
//! 技能（Skill）是带名称与优先级的处理器：can_handle 判断是否接受某个意图分类，handle 产出回复。
//! SkillRegistry 持有全部技能并负责挑选与执行；SkillMatcher 通过一次模型调用把话语映射到具体技能名。

pub mod builtin;
mod matcher;
mod registry;
mod skill;

pub use builtin::register_builtin_skills;
pub use matcher::{MatchOutcome, SkillMatcher, NONE_SENTINEL};
pub use registry::{RegistryStats, SkillRegistry, SkillUsage, DEFAULT_DURATION_WINDOW};
pub use skill::{
    ExecutionResult, Priority, Skill, SkillContext, SkillDescriptor, SkillError, SkillOutput,
    DIRECT_ANSWER, SANDBOX,
};
