//! 沙箱执行器
//!
//! 先静态筛查，再在阻塞线程池里解释执行。解释器每步检查截止时间与取消标志，
//! 外层另有 `tokio::time::timeout` 兜底；超时或取消时置位标志，让解释线程尽快退出。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::SandboxSection;
use crate::core::BrainError;
use crate::skills::{ExecutionResult, SANDBOX};

use super::interpreter::{self, InterpError, Limits, RunOutput};
use super::screen::screen;

/// 外层超时相对解释器截止时间的余量
const JOIN_GRACE: Duration = Duration::from_millis(250);

const TRUNCATION_NOTICE: &str = "\n... [output truncated]";

pub struct SandboxExecutor {
    timeout: Duration,
    max_steps: u64,
    max_output_chars: usize,
}

impl SandboxExecutor {
    pub fn new(timeout: Duration, max_steps: u64, max_output_chars: usize) -> Self {
        Self {
            timeout,
            max_steps,
            max_output_chars,
        }
    }

    pub fn from_config(cfg: &SandboxSection) -> Self {
        Self::new(
            Duration::from_millis(cfg.timeout_ms),
            cfg.max_steps,
            cfg.max_output_chars,
        )
    }

    /// 执行片段；任何失败都折算为失败的 `ExecutionResult`
    pub async fn execute(&self, snippet: &str, cancel: &CancellationToken) -> ExecutionResult {
        let start = Instant::now();
        let result = self.run(snippet, cancel).await;

        let (ok, outcome) = match &result {
            Ok(_) => (true, "ok"),
            Err(BrainError::UnsafeCode { .. }) => (false, "rejected"),
            Err(BrainError::SandboxTimeout(_)) => (false, "timeout"),
            Err(BrainError::Cancelled) => (false, "cancelled"),
            Err(_) => (false, "error"),
        };
        let elapsed = start.elapsed();
        let audit = serde_json::json!({
            "event": "sandbox_audit",
            "executor": SANDBOX,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": elapsed.as_millis() as u64,
            "snippet_lines": snippet.lines().count(),
        });
        tracing::info!(audit = %audit.to_string(), "sandbox");

        match result {
            Ok(out) => {
                let data = serde_json::json!({ "steps": out.steps, "truncated": out.truncated });
                let mut text = out.stdout.trim().to_string();
                if out.truncated {
                    text.push_str(TRUNCATION_NOTICE);
                }
                ExecutionResult::success(SANDBOX, text)
                    .with_elapsed(elapsed)
                    .with_data(Some(data))
            }
            Err(err) => ExecutionResult::from_error(SANDBOX, &err).with_elapsed(elapsed),
        }
    }

    async fn run(&self, snippet: &str, cancel: &CancellationToken) -> Result<RunOutput, BrainError> {
        if let Err(err) = screen(snippet) {
            tracing::warn!(error = %err, "Sandbox rejected snippet");
            return Err(err);
        }
        if cancel.is_cancelled() {
            return Err(BrainError::Cancelled);
        }

        let flag = Arc::new(AtomicBool::new(false));
        let limits = Limits::new(self.max_steps, self.timeout, self.max_output_chars)
            .with_cancel_flag(flag.clone());
        let source = snippet.to_string();
        let handle = tokio::task::spawn_blocking(move || interpreter::run(&source, limits));

        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                flag.store(true, Ordering::Relaxed);
                return Err(BrainError::Cancelled);
            }
            joined = tokio::time::timeout(self.timeout + JOIN_GRACE, handle) => joined,
        };

        match joined {
            Err(_) => {
                flag.store(true, Ordering::Relaxed);
                Err(BrainError::SandboxTimeout(self.timeout_ms()))
            }
            Ok(Err(join_err)) => Err(BrainError::SandboxRuntime(format!(
                "interpreter crashed: {join_err}"
            ))),
            Ok(Ok(Ok(out))) => Ok(out),
            Ok(Ok(Err(err))) => Err(self.map_error(err)),
        }
    }

    fn map_error(&self, err: InterpError) -> BrainError {
        match err {
            InterpError::Deadline => BrainError::SandboxTimeout(self.timeout_ms()),
            InterpError::Cancelled => BrainError::Cancelled,
            other => BrainError::SandboxRuntime(other.to_string()),
        }
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;

    fn executor() -> SandboxExecutor {
        SandboxExecutor::new(Duration::from_secs(2), 200_000, 8000)
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let result = executor()
            .execute("import math\nprint(math.sqrt(16))\nprint('done')", &CancellationToken::new())
            .await;
        assert!(result.success);
        assert_eq!(result.output.as_deref(), Some("4.0\ndone"));
        assert_eq!(result.executor, SANDBOX);
        assert!(result.is_usable());
    }

    #[tokio::test]
    async fn test_unsafe_snippet_never_runs() {
        let result = executor()
            .execute("print('before')\nopen('/tmp/x', 'w')", &CancellationToken::new())
            .await;
        assert!(!result.success);
        assert!(result.output.is_none());
        assert_eq!(result.error_kind, Some(ErrorKind::UnsafeCode));
    }

    #[tokio::test]
    async fn test_runtime_error_is_captured() {
        let result = executor()
            .execute("x = 1 / 0", &CancellationToken::new())
            .await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::SandboxRuntime));
        assert!(result.text().contains("ZeroDivisionError"));
    }

    #[tokio::test]
    async fn test_cyclic_comparison_is_a_failed_result() {
        for cmp in ["a == b", "a < b"] {
            let snippet = format!("a = []\na.append(a)\nb = []\nb.append(b)\nprint({cmp})");
            let result = executor().execute(&snippet, &CancellationToken::new()).await;
            assert!(!result.success, "{cmp}");
            assert_eq!(result.error_kind, Some(ErrorKind::SandboxRuntime));
            assert!(result.text().contains("RecursionError"), "{}", result.text());
        }
    }

    #[tokio::test]
    async fn test_unknown_module_is_runtime_error() {
        let result = executor()
            .execute("import random\nprint(random.random())", &CancellationToken::new())
            .await;
        assert_eq!(result.error_kind, Some(ErrorKind::SandboxRuntime));
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out() {
        let exec = SandboxExecutor::new(Duration::from_millis(100), u64::MAX, 8000);
        let result = exec
            .execute("while True:\n    pass", &CancellationToken::new())
            .await;
        assert_eq!(result.error_kind, Some(ErrorKind::SandboxTimeout));
    }

    #[tokio::test]
    async fn test_step_budget() {
        let exec = SandboxExecutor::new(Duration::from_secs(5), 1000, 8000);
        let result = exec
            .execute("n = 0\nwhile True:\n    n += 1", &CancellationToken::new())
            .await;
        assert_eq!(result.error_kind, Some(ErrorKind::SandboxRuntime));
        assert!(result.text().contains("step budget"));
    }

    #[tokio::test]
    async fn test_output_truncated() {
        let exec = SandboxExecutor::new(Duration::from_secs(2), 200_000, 10);
        let result = exec
            .execute("for i in range(100):\n    print(i)", &CancellationToken::new())
            .await;
        assert!(result.success);
        assert!(result.text().ends_with("[output truncated]"));
        assert_eq!(result.data.as_ref().unwrap()["truncated"], true);
    }

    #[tokio::test]
    async fn test_cancelled() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let exec = SandboxExecutor::new(Duration::from_secs(30), u64::MAX, 8000);
        let started = Instant::now();
        let result = exec.execute("while True:\n    pass", &cancel).await;
        assert_eq!(result.error_kind, Some(ErrorKind::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
