//! 编排器统计：计数只增不减，显式 clear 时归零

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::core::ErrorKind;
use crate::intent::ClassifierStats;
use crate::skills::{ExecutionResult, RegistryStats};

/// 一次请求最终走的路径
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponsePath {
    /// 匹配结果为 none，直接回答
    DirectAnswer,
    /// 生成代码并在沙箱中执行
    Sandbox,
    /// 由注册表挑选技能执行（匹配器不可用，或沙箱路径未产出可用结果）
    Registry,
    /// 分类或匹配阶段即被取消
    Aborted,
}

#[derive(Debug, Default)]
pub(crate) struct PipelineCounters {
    total_requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    cancelled: AtomicU64,
    direct_answers: AtomicU64,
    sandbox_runs: AtomicU64,
    sandbox_successes: AtomicU64,
    sandbox_rejections: AtomicU64,
    registry_fallbacks: AtomicU64,
    total_processing_ms: AtomicU64,
}

impl PipelineCounters {
    pub(crate) fn record_sandbox(&self, result: &ExecutionResult) {
        self.sandbox_runs.fetch_add(1, Ordering::Relaxed);
        if result.is_usable() {
            self.sandbox_successes.fetch_add(1, Ordering::Relaxed);
        }
        if result.error_kind == Some(ErrorKind::UnsafeCode) {
            self.sandbox_rejections.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_request(&self, path: ResponsePath, result: &ExecutionResult, elapsed: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_processing_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        if result.success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        if result.error_kind == Some(ErrorKind::Cancelled) {
            self.cancelled.fetch_add(1, Ordering::Relaxed);
        }
        match path {
            ResponsePath::DirectAnswer => {
                self.direct_answers.fetch_add(1, Ordering::Relaxed);
            }
            ResponsePath::Registry => {
                self.registry_fallbacks.fetch_add(1, Ordering::Relaxed);
            }
            ResponsePath::Sandbox | ResponsePath::Aborted => {}
        }
    }

    pub(crate) fn reset(&self) {
        for counter in [
            &self.total_requests,
            &self.successes,
            &self.failures,
            &self.cancelled,
            &self.direct_answers,
            &self.sandbox_runs,
            &self.sandbox_successes,
            &self.sandbox_rejections,
            &self.registry_fallbacks,
            &self.total_processing_ms,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self, classifier: ClassifierStats, registry: RegistryStats) -> OrchestratorStats {
        let total = self.total_requests.load(Ordering::Relaxed);
        let successes = self.successes.load(Ordering::Relaxed);
        let ratio = |n: u64| if total == 0 { 0.0 } else { n as f64 / total as f64 };
        OrchestratorStats {
            total_requests: total,
            successes,
            failures: self.failures.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            direct_answers: self.direct_answers.load(Ordering::Relaxed),
            sandbox_runs: self.sandbox_runs.load(Ordering::Relaxed),
            sandbox_successes: self.sandbox_successes.load(Ordering::Relaxed),
            sandbox_rejections: self.sandbox_rejections.load(Ordering::Relaxed),
            registry_fallbacks: self.registry_fallbacks.load(Ordering::Relaxed),
            success_rate: ratio(successes),
            average_processing_ms: ratio(self.total_processing_ms.load(Ordering::Relaxed)),
            classifier,
            registry,
        }
    }
}

/// 可序列化的统计快照，内含分类器与注册表的快照
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStats {
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub cancelled: u64,
    pub direct_answers: u64,
    pub sandbox_runs: u64,
    pub sandbox_successes: u64,
    pub sandbox_rejections: u64,
    pub registry_fallbacks: u64,
    pub success_rate: f64,
    pub average_processing_ms: f64,
    pub classifier: ClassifierStats,
    pub registry: RegistryStats,
}
