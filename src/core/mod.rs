//! 核心编排层：错误分类、会话监管（取消）、统计、主控流水线

pub mod error;
pub mod orchestrator;
pub mod session_supervisor;
pub mod stats;

pub use error::{BrainError, ErrorKind};
pub use orchestrator::{Command, Orchestrator, ProcessOutcome};
pub use session_supervisor::SessionSupervisor;
pub use stats::{OrchestratorStats, ResponsePath};
