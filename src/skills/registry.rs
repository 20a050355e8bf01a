//! 技能注册表
//!
//! 按名称存储 Arc<dyn Skill>，同名重复注册会替换旧条目（记录 warn，统计清零，不合并状态）。
//! find_candidates 过滤已启用且 can_handle 的技能，按优先级降序、注册顺序升序排列；
//! execute 负责计时、计数、滚动时长窗口与 panic 捕获，每次调用输出一条 JSON 审计日志。

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::core::{BrainError, ErrorKind};
use crate::intent::Classification;

use super::{ExecutionResult, Skill, SkillContext, SkillDescriptor, SkillError};

pub const DEFAULT_DURATION_WINDOW: usize = 1000;

struct Entry {
    skill: Arc<dyn Skill>,
    enabled: bool,
    /// 注册序号，优先级相同时的稳定排序依据
    seq: u64,
}

#[derive(Default)]
struct Entries {
    by_name: HashMap<String, Entry>,
    next_seq: u64,
}

/// 单个技能的调用计数
#[derive(Debug, Clone, Default, Serialize)]
pub struct SkillUsage {
    pub invocations: u64,
    pub successes: u64,
    pub failures: u64,
}

struct Counters {
    total: u64,
    successful: u64,
    failed: u64,
    per_skill: HashMap<String, SkillUsage>,
    durations: VecDeque<Duration>,
    window: usize,
}

impl Counters {
    fn new(window: usize) -> Self {
        Self {
            total: 0,
            successful: 0,
            failed: 0,
            per_skill: HashMap::new(),
            durations: VecDeque::with_capacity(window.min(DEFAULT_DURATION_WINDOW)),
            window: window.max(1),
        }
    }

    fn record(&mut self, name: &str, success: bool, elapsed: Duration) {
        self.total += 1;
        let usage = self.per_skill.entry(name.to_string()).or_default();
        usage.invocations += 1;
        if success {
            self.successful += 1;
            usage.successes += 1;
        } else {
            self.failed += 1;
            usage.failures += 1;
        }
        if self.durations.len() >= self.window {
            self.durations.pop_front();
        }
        self.durations.push_back(elapsed);
    }
}

/// 注册表统计快照
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub success_rate: f64,
    pub average_duration_ms: f64,
    pub most_used_skill: Option<String>,
    pub registered_skills: usize,
    pub enabled_skills: usize,
    pub per_skill: BTreeMap<String, SkillUsage>,
}

/// 技能注册表：启动时构造一次，以 Arc 注入编排器与测试
pub struct SkillRegistry {
    entries: RwLock<Entries>,
    counters: Mutex<Counters>,
}

impl Default for SkillRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::with_duration_window(DEFAULT_DURATION_WINDOW)
    }

    /// window：参与平均时长计算的最近调用数上限
    pub fn with_duration_window(window: usize) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            counters: Mutex::new(Counters::new(window)),
        }
    }

    pub async fn register(&self, skill: impl Skill + 'static) -> Result<(), BrainError> {
        self.register_arc(Arc::new(skill)).await
    }

    /// 名称不能为空；重名时替换旧条目
    pub async fn register_arc(&self, skill: Arc<dyn Skill>) -> Result<(), BrainError> {
        let name = skill.name().trim().to_string();
        if name.is_empty() {
            return Err(BrainError::Config("skill name must not be empty".into()));
        }

        let replaced = {
            let mut entries = self.entries.write().await;
            let seq = entries.next_seq;
            entries.next_seq += 1;
            entries
                .by_name
                .insert(
                    name.clone(),
                    Entry {
                        skill: Arc::clone(&skill),
                        enabled: true,
                        seq,
                    },
                )
                .is_some()
        };

        if replaced {
            self.counters.lock().await.per_skill.remove(&name);
            tracing::warn!(skill = %name, "Duplicate skill name, replacing previous registration");
        } else {
            tracing::info!(skill = %name, priority = %skill.priority(), "Skill registered");
        }
        Ok(())
    }

    pub async fn unregister(&self, name: &str) -> bool {
        let removed = self.entries.write().await.by_name.remove(name).is_some();
        if removed {
            self.counters.lock().await.per_skill.remove(name);
            tracing::info!(skill = %name, "Skill unregistered");
        }
        removed
    }

    pub async fn enable(&self, name: &str) -> bool {
        self.set_enabled(name, true).await
    }

    pub async fn disable(&self, name: &str) -> bool {
        self.set_enabled(name, false).await
    }

    async fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        match self.entries.write().await.by_name.get_mut(name) {
            Some(entry) => {
                entry.enabled = enabled;
                tracing::info!(skill = %name, enabled, "Skill toggled");
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Skill>> {
        self.entries
            .read()
            .await
            .by_name
            .get(name)
            .map(|e| Arc::clone(&e.skill))
    }

    pub async fn is_enabled(&self, name: &str) -> bool {
        self.entries
            .read()
            .await
            .by_name
            .get(name)
            .is_some_and(|e| e.enabled)
    }

    /// 全部技能描述：优先级降序，其次注册顺序
    pub async fn list(&self) -> Vec<SkillDescriptor> {
        let entries = self.entries.read().await;
        let counters = self.counters.lock().await;
        let mut sorted: Vec<&Entry> = entries.by_name.values().collect();
        sorted.sort_by(|a, b| {
            b.skill
                .priority()
                .cmp(&a.skill.priority())
                .then(a.seq.cmp(&b.seq))
        });
        sorted
            .into_iter()
            .map(|e| SkillDescriptor {
                name: e.skill.name().trim().to_string(),
                description: e.skill.description().to_string(),
                priority: e.skill.priority(),
                enabled: e.enabled,
                usage_count: counters
                    .per_skill
                    .get(e.skill.name().trim())
                    .map_or(0, |u| u.invocations),
            })
            .collect()
    }

    pub async fn enabled_descriptors(&self) -> Vec<SkillDescriptor> {
        self.list().await.into_iter().filter(|d| d.enabled).collect()
    }

    /// 已启用且接受该分类的技能，按优先级降序、注册顺序升序
    pub async fn find_candidates(&self, classification: &Classification) -> Vec<Arc<dyn Skill>> {
        let entries = self.entries.read().await;
        let mut matched: Vec<&Entry> = entries
            .by_name
            .values()
            .filter(|e| e.enabled && e.skill.can_handle(classification))
            .collect();
        matched.sort_by(|a, b| {
            b.skill
                .priority()
                .cmp(&a.skill.priority())
                .then(a.seq.cmp(&b.seq))
        });
        matched.into_iter().map(|e| Arc::clone(&e.skill)).collect()
    }

    /// 只执行排在首位的候选，其余记为未尝试的备选
    pub async fn execute_intent(
        &self,
        classification: &Classification,
        context: &SkillContext,
    ) -> ExecutionResult {
        let candidates = self.find_candidates(classification).await;
        let Some((winner, rest)) = candidates.split_first() else {
            let err = BrainError::SkillNotFound(classification.label.to_string());
            tracing::warn!(error = %err, "No candidate skill");
            return ExecutionResult::from_error("registry", &err);
        };

        let alternatives: Vec<String> = rest.iter().map(|s| s.name().to_string()).collect();
        if !alternatives.is_empty() {
            tracing::debug!(
                winner = %winner.name(),
                alternatives = ?alternatives,
                "Multiple candidate skills"
            );
        }
        self.execute(winner, classification, context)
            .await
            .with_alternatives(alternatives)
    }

    /// 调用单个技能：计时、计数、捕获 panic 与取消，失败一律转为 ExecutionResult
    pub async fn execute(
        &self,
        skill: &Arc<dyn Skill>,
        classification: &Classification,
        context: &SkillContext,
    ) -> ExecutionResult {
        let name = skill.name().trim().to_string();
        let start = Instant::now();

        let handled = tokio::select! {
            _ = context.cancel.cancelled() => Ok(Err(SkillError::Cancelled)),
            r = AssertUnwindSafe(skill.handle(classification, context)).catch_unwind() => r,
        };

        let (result, outcome) = match handled {
            Ok(Ok(output)) => (
                ExecutionResult::success(&name, output.text).with_data(output.data),
                "ok",
            ),
            Ok(Err(SkillError::Cancelled)) => (
                ExecutionResult::from_error(&name, &BrainError::Cancelled),
                "cancelled",
            ),
            Ok(Err(e)) => (
                ExecutionResult::failure(&name, ErrorKind::SkillFailed, e.to_string()),
                "error",
            ),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(skill = %name, panic = %message, "Skill panicked");
                (
                    ExecutionResult::failure(
                        &name,
                        ErrorKind::SkillFailed,
                        format!("skill panicked: {message}"),
                    ),
                    "panic",
                )
            }
        };

        let elapsed = start.elapsed();
        self.counters.lock().await.record(&name, result.success, elapsed);

        let audit = serde_json::json!({
            "event": "skill_audit",
            "executor": name,
            "ok": result.success,
            "outcome": outcome,
            "duration_ms": elapsed.as_millis() as u64,
            "label": classification.label,
        });
        tracing::info!(audit = %audit.to_string(), "skill");

        result.with_elapsed(elapsed)
    }

    pub async fn stats(&self) -> RegistryStats {
        let (registered, enabled) = {
            let entries = self.entries.read().await;
            (
                entries.by_name.len(),
                entries.by_name.values().filter(|e| e.enabled).count(),
            )
        };
        let counters = self.counters.lock().await;

        let average_duration_ms = if counters.durations.is_empty() {
            0.0
        } else {
            let sum: Duration = counters.durations.iter().sum();
            sum.as_secs_f64() * 1000.0 / counters.durations.len() as f64
        };
        let most_used_skill = counters
            .per_skill
            .iter()
            .filter(|(_, u)| u.invocations > 0)
            .max_by(|a, b| a.1.invocations.cmp(&b.1.invocations).then(b.0.cmp(a.0)))
            .map(|(name, _)| name.clone());

        RegistryStats {
            total_executions: counters.total,
            successful_executions: counters.successful,
            failed_executions: counters.failed,
            success_rate: if counters.total > 0 {
                counters.successful as f64 / counters.total as f64
            } else {
                0.0
            },
            average_duration_ms,
            most_used_skill,
            registered_skills: registered,
            enabled_skills: enabled,
            per_skill: counters
                .per_skill
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// 当前滚动窗口中的时长样本数
    pub async fn duration_samples(&self) -> usize {
        self.counters.lock().await.durations.len()
    }

    pub async fn clear_stats(&self) {
        let mut counters = self.counters.lock().await;
        let window = counters.window;
        *counters = Counters::new(window);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::intent::IntentLabel;
    use crate::skills::{Priority, SkillOutput};

    /// 记录调用次数的测试技能
    struct StubSkill {
        name: &'static str,
        priority: Priority,
        label: IntentLabel,
        reply: &'static str,
        calls: Arc<AtomicUsize>,
    }

    impl StubSkill {
        fn new(name: &'static str, priority: Priority, label: IntentLabel) -> Self {
            Self {
                name,
                priority,
                label,
                reply: name,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl Skill for StubSkill {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "stub skill"
        }
        fn priority(&self) -> Priority {
            self.priority
        }
        fn can_handle(&self, c: &Classification) -> bool {
            c.label == self.label
        }
        async fn handle(&self, _: &Classification, _: &SkillContext) -> Result<SkillOutput, SkillError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                "fail" => Err(SkillError::Execution("boom".into())),
                "panic" => panic!("stub skill exploded"),
                reply => Ok(SkillOutput::text(reply)),
            }
        }
    }

    fn chat() -> Classification {
        Classification::new(IntentLabel::Chat, 0.8, "hello")
    }

    #[tokio::test]
    async fn test_priority_dispatch_runs_only_winner() {
        let registry = SkillRegistry::new();
        let low = StubSkill::new("low", Priority::Low, IntentLabel::Chat);
        let high = StubSkill::new("high", Priority::High, IntentLabel::Chat);
        let (low_calls, high_calls) = (low.calls.clone(), high.calls.clone());
        registry.register(low).await.unwrap();
        registry.register(high).await.unwrap();

        let result = registry.execute_intent(&chat(), &SkillContext::new()).await;
        assert!(result.success);
        assert_eq!(result.executor, "high");
        assert_eq!(result.alternatives, vec!["low".to_string()]);
        assert_eq!(high_calls.load(Ordering::SeqCst), 1);
        assert_eq!(low_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ties_keep_registration_order() {
        let registry = SkillRegistry::new();
        for name in ["a", "b", "c"] {
            registry
                .register(StubSkill::new(name, Priority::Normal, IntentLabel::Chat))
                .await
                .unwrap();
        }
        let names: Vec<String> = registry
            .find_candidates(&chat())
            .await
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_disabled_skill_is_not_a_candidate() {
        let registry = SkillRegistry::new();
        registry
            .register(StubSkill::new("only", Priority::High, IntentLabel::Chat))
            .await
            .unwrap();
        assert!(registry.disable("only").await);
        assert!(!registry.disable("ghost").await);

        let result = registry.execute_intent(&chat(), &SkillContext::new()).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::SkillNotFound));

        assert!(registry.enable("only").await);
        assert!(registry.execute_intent(&chat(), &SkillContext::new()).await.success);
    }

    #[tokio::test]
    async fn test_duplicate_replaces_and_resets_stats() {
        let registry = SkillRegistry::new();
        registry
            .register(StubSkill::new("dup", Priority::High, IntentLabel::Chat))
            .await
            .unwrap();
        registry.execute_intent(&chat(), &SkillContext::new()).await;

        let mut second = StubSkill::new("dup", Priority::Low, IntentLabel::Chat);
        second.reply = "second";
        registry.register(second).await.unwrap();

        let listed = registry.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].priority, Priority::Low);
        assert_eq!(listed[0].usage_count, 0);

        let result = registry.execute_intent(&chat(), &SkillContext::new()).await;
        assert_eq!(result.output.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let registry = SkillRegistry::new();
        let err = registry
            .register(StubSkill::new("  ", Priority::Low, IntentLabel::Chat))
            .await
            .unwrap_err();
        assert!(matches!(err, BrainError::Config(_)));
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_failure_and_panic_become_results() {
        let registry = SkillRegistry::new();
        let mut failing = StubSkill::new("failing", Priority::High, IntentLabel::Chat);
        failing.reply = "fail";
        let mut panicking = StubSkill::new("panicking", Priority::High, IntentLabel::Help);
        panicking.reply = "panic";
        registry.register(failing).await.unwrap();
        registry.register(panicking).await.unwrap();

        let r = registry.execute_intent(&chat(), &SkillContext::new()).await;
        assert!(!r.success);
        assert!(r.text().contains("boom"));

        let help = Classification::new(IntentLabel::Help, 0.5, "help");
        let r = registry.execute_intent(&help, &SkillContext::new()).await;
        assert!(!r.success);
        assert!(r.text().contains("stub skill exploded"));

        let stats = registry.stats().await;
        assert_eq!(stats.total_executions, 2);
        assert_eq!(stats.failed_executions, 2);
        assert_eq!(stats.per_skill["panicking"].failures, 1);
    }

    #[tokio::test]
    async fn test_duration_window_is_bounded() {
        let registry = SkillRegistry::with_duration_window(3);
        registry
            .register(StubSkill::new("p", Priority::Normal, IntentLabel::Chat))
            .await
            .unwrap();
        for _ in 0..5 {
            registry.execute_intent(&chat(), &SkillContext::new()).await;
        }
        assert_eq!(registry.duration_samples().await, 3);
        let stats = registry.stats().await;
        assert_eq!(stats.total_executions, 5);
        assert_eq!(stats.most_used_skill.as_deref(), Some("p"));
        assert_eq!(stats.success_rate, 1.0);

        registry.clear_stats().await;
        assert_eq!(registry.stats().await.total_executions, 0);
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = SkillRegistry::new();
        registry
            .register(StubSkill::new("gone", Priority::Normal, IntentLabel::Chat))
            .await
            .unwrap();
        assert!(registry.unregister("gone").await);
        assert!(!registry.unregister("gone").await);
        assert!(registry.get("gone").await.is_none());
    }
}
