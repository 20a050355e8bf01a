//! 受限沙箱：黑名单筛查 + 代码生成 + 片段解释执行

pub mod executor;
pub mod interpreter;
pub mod screen;
pub mod synthesizer;

pub use executor::SandboxExecutor;
pub use interpreter::{InterpError, Limits, RunOutput};
pub use screen::screen;
pub use synthesizer::{extract_code, CodeSynthesizer};
