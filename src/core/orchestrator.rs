//! 编排器：一次请求的 分类 → 匹配 → 生成 / 执行 → 回退 全流程
//!
//! 匹配结果为 none 时直接回答；匹配到技能时生成代码并在沙箱执行，沙箱路径没有产出可用结果
//! （生成失败、筛查拒绝、运行错误、空输出）或匹配器不可用时，回退到注册表挑选技能。
//! 每条路径都计入统计。`spawn_worker` 在后台任务中消费命令，每个 Submit 单独起任务，调用方从不阻塞。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::core::stats::{OrchestratorStats, PipelineCounters, ResponsePath};
use crate::core::{BrainError, ErrorKind, SessionSupervisor};
use crate::intent::{Classification, Classifier, ClassifierSettings, IntentLabel};
use crate::llm::{LlmClient, LlmError};
use crate::sandbox::{CodeSynthesizer, SandboxExecutor};
use crate::skills::builtin::{chat, SettingsBackedClient};
use crate::skills::{
    register_builtin_skills, ExecutionResult, MatchOutcome, SkillContext, SkillMatcher,
    SkillRegistry, DIRECT_ANSWER,
};

/// 发往后台 worker 的命令
#[derive(Debug, Clone)]
pub enum Command {
    /// 提交一句话语
    Submit(String),
    /// 取消所有进行中的请求
    Cancel,
    /// 清空分类缓存
    ClearCache,
    /// 结束 worker（进行中的请求随之取消）
    Quit,
}

/// 一次请求的最终回复与诊断信息
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub request_id: Uuid,
    pub utterance: String,
    pub response: String,
    pub success: bool,
    pub path: ResponsePath,
    /// 分类阶段即被取消时为 None
    pub classification: Option<Classification>,
    pub matched_skill: Option<String>,
    /// 沙箱路径放弃的原因（走注册表回退时）
    pub fallback_reason: Option<String>,
    pub execution: ExecutionResult,
    pub elapsed_ms: u64,
}

impl ProcessOutcome {
    pub fn label(&self) -> IntentLabel {
        self.classification
            .as_ref()
            .map_or(IntentLabel::Unknown, |c| c.label)
    }

    pub fn confidence(&self) -> f32 {
        self.classification.as_ref().map_or(0.0, |c| c.confidence)
    }

    pub fn alternatives(&self) -> &[String] {
        &self.execution.alternatives
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.execution.error_kind
    }
}

/// 流水线内部的中间结果
struct Trace {
    classification: Option<Classification>,
    matched_skill: Option<String>,
    path: ResponsePath,
    fallback_reason: Option<String>,
    execution: ExecutionResult,
}

impl Trace {
    fn aborted(classification: Option<Classification>, err: &BrainError) -> Self {
        Self {
            classification,
            matched_skill: None,
            path: ResponsePath::Aborted,
            fallback_reason: None,
            execution: ExecutionResult::from_error("orchestrator", err),
        }
    }
}

pub struct Orchestrator {
    classifier: Classifier,
    matcher: SkillMatcher,
    synthesizer: CodeSynthesizer,
    sandbox: SandboxExecutor,
    registry: Arc<SkillRegistry>,
    counters: PipelineCounters,
    direct_turn: AtomicUsize,
}

impl Orchestrator {
    pub fn new(
        classifier: Classifier,
        matcher: SkillMatcher,
        synthesizer: CodeSynthesizer,
        sandbox: SandboxExecutor,
        registry: Arc<SkillRegistry>,
    ) -> Self {
        Self {
            classifier,
            matcher,
            synthesizer,
            sandbox,
            registry,
            counters: PipelineCounters::default(),
            direct_turn: AtomicUsize::new(0),
        }
    }

    /// 三个模型调用共用同一个客户端
    pub fn from_config(llm: Arc<dyn LlmClient>, registry: Arc<SkillRegistry>, cfg: &AppConfig) -> Self {
        Self::new(
            Classifier::new(Arc::clone(&llm), ClassifierSettings::from_config(cfg)),
            SkillMatcher::from_config(Arc::clone(&llm), cfg),
            CodeSynthesizer::from_config(llm, cfg),
            SandboxExecutor::from_config(&cfg.sandbox),
            registry,
        )
    }

    /// 按配置创建注册表并注册全部内置技能；LLM 客户端跟随配置技能的设置存储
    pub async fn bootstrap(cfg: &AppConfig) -> Result<Self, BrainError> {
        let registry = Arc::new(SkillRegistry::with_duration_window(cfg.skills.duration_window));
        let settings = register_builtin_skills(&registry, cfg).await?;
        let current = settings.snapshot().await;
        match current.api_key {
            Some(_) => tracing::info!(
                model = %current.model,
                base_url = %current.base_url,
                "Using OpenAI-compatible LLM"
            ),
            None => tracing::warn!(
                "No API key set, running offline with local keyword classification until one is configured"
            ),
        }
        let llm: Arc<dyn LlmClient> = Arc::new(SettingsBackedClient::new(settings));
        Ok(Self::from_config(llm, registry, cfg))
    }

    pub fn registry(&self) -> &Arc<SkillRegistry> {
        &self.registry
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// 处理一句话语（不可取消）
    pub async fn process(&self, utterance: &str) -> ProcessOutcome {
        self.process_with_cancel(utterance, &CancellationToken::new())
            .await
    }

    pub async fn process_with_cancel(&self, utterance: &str, cancel: &CancellationToken) -> ProcessOutcome {
        let start = Instant::now();
        let request_id = Uuid::new_v4();
        let trace = self.run_pipeline(utterance, cancel).await;
        let elapsed = start.elapsed();
        self.counters
            .record_request(trace.path, &trace.execution, elapsed);

        tracing::info!(
            request_id = %request_id,
            label = %trace.classification.as_ref().map_or(IntentLabel::Unknown, |c| c.label),
            path = ?trace.path,
            executor = %trace.execution.executor,
            success = trace.execution.success,
            elapsed_ms = elapsed.as_millis() as u64,
            "Request processed"
        );

        ProcessOutcome {
            request_id,
            utterance: utterance.to_string(),
            response: trace.execution.text().to_string(),
            success: trace.execution.success,
            path: trace.path,
            classification: trace.classification,
            matched_skill: trace.matched_skill,
            fallback_reason: trace.fallback_reason,
            execution: trace.execution,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    async fn run_pipeline(&self, utterance: &str, cancel: &CancellationToken) -> Trace {
        let classification = match self.classifier.classify_cancellable(utterance, cancel).await {
            Ok(c) => c,
            Err(err) => return Trace::aborted(None, &err),
        };

        let skills = self.registry.enabled_descriptors().await;
        let outcome = match self
            .matcher
            .match_skill(utterance, classification.label, &skills, cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => return Trace::aborted(Some(classification), &err),
        };

        let skill = match outcome {
            MatchOutcome::NoSkill => {
                let turn = self.direct_turn.fetch_add(1, Ordering::Relaxed);
                let text = direct_answer(&classification, turn);
                return Trace {
                    classification: Some(classification),
                    matched_skill: None,
                    path: ResponsePath::DirectAnswer,
                    fallback_reason: None,
                    execution: ExecutionResult::success(DIRECT_ANSWER, text),
                };
            }
            MatchOutcome::Unavailable(err) => {
                let reason = format!("skill matcher unavailable: {err}");
                return self.fallback(classification, None, reason, cancel).await;
            }
            MatchOutcome::Skill(skill) => skill,
        };

        let snippet = match self.synthesizer.synthesize(utterance, &skill, cancel).await {
            Ok(snippet) => snippet,
            Err(LlmError::Cancelled) => {
                let mut trace = Trace::aborted(Some(classification), &BrainError::Cancelled);
                trace.matched_skill = Some(skill);
                return trace;
            }
            Err(err) => {
                let reason = format!("code synthesis failed: {err}");
                return self.fallback(classification, Some(skill), reason, cancel).await;
            }
        };

        let result = self.sandbox.execute(&snippet, cancel).await;
        self.counters.record_sandbox(&result);
        if result.is_usable() || result.error_kind == Some(ErrorKind::Cancelled) {
            return Trace {
                classification: Some(classification),
                matched_skill: Some(skill),
                path: ResponsePath::Sandbox,
                fallback_reason: None,
                execution: result,
            };
        }

        let reason = match &result.error {
            Some(err) => err.clone(),
            None => "sandbox produced no output".to_string(),
        };
        self.fallback(classification, Some(skill), reason, cancel).await
    }

    async fn fallback(
        &self,
        classification: Classification,
        matched_skill: Option<String>,
        reason: String,
        cancel: &CancellationToken,
    ) -> Trace {
        tracing::info!(reason = %reason, label = %classification.label, "Falling back to skill registry");
        let context = SkillContext::new()
            .with_skills(self.registry.list().await)
            .with_cancel(cancel.clone());
        let execution = self.registry.execute_intent(&classification, &context).await;
        Trace {
            classification: Some(classification),
            matched_skill,
            path: ResponsePath::Registry,
            fallback_reason: Some(reason),
            execution,
        }
    }

    pub async fn stats(&self) -> OrchestratorStats {
        let classifier = self.classifier.stats().await;
        let registry = self.registry.stats().await;
        self.counters.snapshot(classifier, registry)
    }

    pub async fn clear_cache(&self) {
        self.classifier.clear_cache().await;
    }

    /// 编排器与注册表计数归零
    pub async fn clear_stats(&self) {
        self.counters.reset();
        self.registry.clear_stats().await;
    }

    /// 启动后台 worker：返回命令发送端与结果接收端
    pub fn spawn_worker(
        self: &Arc<Self>,
    ) -> (
        mpsc::UnboundedSender<Command>,
        mpsc::UnboundedReceiver<ProcessOutcome>,
    ) {
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<ProcessOutcome>();
        let orchestrator = Arc::clone(self);

        tokio::spawn(async move {
            let supervisor = SessionSupervisor::new();
            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    Command::Submit(utterance) => {
                        let token = supervisor.request_token();
                        let orchestrator = Arc::clone(&orchestrator);
                        let out_tx = out_tx.clone();
                        tokio::spawn(async move {
                            let outcome = orchestrator.process_with_cancel(&utterance, &token).await;
                            let _ = out_tx.send(outcome);
                        });
                    }
                    Command::Cancel => {
                        supervisor.cancel_in_flight();
                        tracing::info!("In-flight requests cancelled");
                    }
                    Command::ClearCache => orchestrator.clear_cache().await,
                    Command::Quit => break,
                }
            }
            supervisor.shutdown();
            tracing::debug!("Worker stopped");
        });

        (cmd_tx, out_rx)
    }
}

/// 不需要技能时的回答：聊天按模板回复，其余给出固定说明
fn direct_answer(classification: &Classification, turn: usize) -> String {
    if classification.label == IntentLabel::Chat {
        return chat::reply_for(&classification.utterance, turn);
    }
    if chat::is_chinese(&classification.utterance) {
        "我理解你的请求，但暂时无法提供具体帮助。".to_string()
    } else {
        "I understand your request, but I can't help with that yet.".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::llm::{MockLlmClient, RetryPolicy};
    use crate::skills::builtin::{ChatSkill, SystemSkill};

    fn retry() -> RetryPolicy {
        RetryPolicy::new(2, Duration::from_millis(1))
    }

    async fn orchestrator(mock: MockLlmClient, sandbox: SandboxExecutor) -> Orchestrator {
        let llm: Arc<dyn LlmClient> = Arc::new(mock);
        let registry = Arc::new(SkillRegistry::new());
        registry.register(ChatSkill::new()).await.unwrap();
        registry
            .register(SystemSkill::from_config(&AppConfig::default().skills))
            .await
            .unwrap();
        let settings = ClassifierSettings {
            retry: retry(),
            ..ClassifierSettings::default()
        };
        Orchestrator::new(
            Classifier::new(Arc::clone(&llm), settings),
            SkillMatcher::new(Arc::clone(&llm), 20, retry()),
            CodeSynthesizer::new(llm, 200, retry()),
            sandbox,
            registry,
        )
    }

    fn sandbox() -> SandboxExecutor {
        SandboxExecutor::new(Duration::from_secs(2), 200_000, 8000)
    }

    #[tokio::test]
    async fn test_direct_answer_for_chat() {
        let mock = MockLlmClient::new()
            .when("User input:", "CHAT")
            .when("User message:", "NONE");
        let orch = orchestrator(mock, sandbox()).await;

        let outcome = orch.process("hello").await;
        assert!(outcome.success);
        assert_eq!(outcome.path, ResponsePath::DirectAnswer);
        assert_eq!(outcome.label(), IntentLabel::Chat);
        assert_eq!(outcome.execution.executor, DIRECT_ANSWER);
        assert!(outcome.response.starts_with("Hello"));

        let stats = orch.stats().await;
        assert_eq!(stats.direct_answers, 1);
        assert_eq!(stats.sandbox_runs, 0);
        assert_eq!(stats.registry.total_executions, 0);
    }

    #[tokio::test]
    async fn test_sandbox_path() {
        let mock = MockLlmClient::new()
            .when("User input:", "SYSTEM")
            .when("User message:", "system")
            .when("Generate the Python code", "```python\nprint(6 * 7)\n```");
        let orch = orchestrator(mock, sandbox()).await;

        let outcome = orch.process("what is six times seven").await;
        assert!(outcome.success);
        assert_eq!(outcome.path, ResponsePath::Sandbox);
        assert_eq!(outcome.response, "42");
        assert_eq!(outcome.matched_skill.as_deref(), Some("system"));
        assert_eq!(orch.stats().await.sandbox_successes, 1);
    }

    #[tokio::test]
    async fn test_unsafe_snippet_falls_back_to_registry() {
        let mock = MockLlmClient::new()
            .when("User input:", "SYSTEM")
            .when("User message:", "system")
            .when("Generate the Python code", "```python\nimport os\nprint(os.getcwd())\n```");
        let orch = orchestrator(mock, sandbox()).await;

        let outcome = orch.process("what time is it").await;
        assert_eq!(outcome.path, ResponsePath::Registry);
        assert_eq!(outcome.execution.executor, "system");
        assert!(outcome.fallback_reason.unwrap().contains("Unsafe code"));

        let stats = orch.stats().await;
        assert_eq!(stats.sandbox_rejections, 1);
        assert_eq!(stats.registry_fallbacks, 1);
    }

    #[tokio::test]
    async fn test_offline_uses_degraded_classification_and_registry() {
        let orch = orchestrator(MockLlmClient::unreachable(), sandbox()).await;

        let outcome = orch.process("hello there").await;
        let classification = outcome.classification.clone().unwrap();
        assert!(classification.degraded);
        assert_eq!(classification.label, IntentLabel::Chat);
        assert_eq!(outcome.path, ResponsePath::Registry);
        assert_eq!(outcome.execution.executor, "chat");
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn test_no_skill_found_is_structured_failure() {
        let mock = MockLlmClient::new()
            .when("User input:", "MEDITATION")
            .when("User message:", "system")
            .when("Generate the Python code", "```python\nx = 1\n```");
        let orch = orchestrator(mock, sandbox()).await;

        let outcome = orch.process("start a meditation").await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind(), Some(ErrorKind::SkillNotFound));
        assert_eq!(outcome.fallback_reason.as_deref(), Some("sandbox produced no output"));
        assert_eq!(orch.stats().await.failures, 1);
    }

    #[tokio::test]
    async fn test_cancelled_request() {
        let orch = orchestrator(MockLlmClient::new().fallback_ok("CHAT"), sandbox()).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = orch.process_with_cancel("hello", &cancel).await;
        assert!(!outcome.success);
        assert_eq!(outcome.path, ResponsePath::Aborted);
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Cancelled));
        assert_eq!(orch.stats().await.cancelled, 1);
    }

    #[tokio::test]
    async fn test_worker_cancel_and_submit() {
        let mock = MockLlmClient::new()
            .when("User input:", "SYSTEM")
            .when("User message:", "system")
            .when("Generate the Python code", "```python\nwhile True:\n    pass\n```");
        let slow = SandboxExecutor::new(Duration::from_secs(30), u64::MAX, 8000);
        let orch = Arc::new(orchestrator(mock, slow).await);
        let (cmd_tx, mut out_rx) = orch.spawn_worker();

        cmd_tx.send(Command::Submit("spin forever".into())).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        cmd_tx.send(Command::Cancel).unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), out_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Cancelled));

        cmd_tx.send(Command::Quit).unwrap();
        drop(cmd_tx);
        assert!(out_rx.recv().await.is_none());
    }
}
