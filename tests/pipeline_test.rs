//! 流水线集成测试：通过公开 API 驱动 分类 → 匹配 → 沙箱 / 注册表

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use brain_agent::config::AppConfig;
use brain_agent::core::{ErrorKind, Orchestrator, ResponsePath};
use brain_agent::intent::{Classification, Classifier, ClassifierSettings, IntentLabel};
use brain_agent::llm::{LlmClient, MockLlmClient, RetryPolicy};
use brain_agent::sandbox::{CodeSynthesizer, SandboxExecutor};
use brain_agent::skills::{
    register_builtin_skills, Priority, Skill, SkillContext, SkillError, SkillMatcher, SkillOutput,
    SkillRegistry,
};

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(2, Duration::from_millis(1))
}

fn settings() -> ClassifierSettings {
    ClassifierSettings {
        retry: fast_retry(),
        ..ClassifierSettings::default()
    }
}

fn build(mock: MockLlmClient, registry: Arc<SkillRegistry>) -> (Orchestrator, Arc<MockLlmClient>) {
    let mock = Arc::new(mock);
    let llm: Arc<dyn LlmClient> = mock.clone();
    let orchestrator = Orchestrator::new(
        Classifier::new(Arc::clone(&llm), settings()),
        SkillMatcher::new(Arc::clone(&llm), 20, fast_retry()),
        CodeSynthesizer::new(llm, 200, fast_retry()),
        SandboxExecutor::new(Duration::from_secs(2), 200_000, 8000),
        registry,
    );
    (orchestrator, mock)
}

async fn builtin_registry() -> Arc<SkillRegistry> {
    let registry = Arc::new(SkillRegistry::new());
    register_builtin_skills(&registry, &AppConfig::default())
        .await
        .unwrap();
    registry
}

/// 接受 Search 的测试技能，记录被调用次数
struct StubSkill {
    name: &'static str,
    priority: Priority,
    reply: &'static str,
    calls: Arc<AtomicUsize>,
}

impl StubSkill {
    fn new(name: &'static str, priority: Priority, reply: &'static str) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let skill = Self {
            name,
            priority,
            reply,
            calls: Arc::clone(&calls),
        };
        (skill, calls)
    }
}

#[async_trait]
impl Skill for StubSkill {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "stub search skill"
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn can_handle(&self, classification: &Classification) -> bool {
        classification.label == IntentLabel::Search
    }

    async fn handle(
        &self,
        _classification: &Classification,
        _context: &SkillContext,
    ) -> Result<SkillOutput, SkillError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SkillOutput::text(self.reply))
    }
}

fn search_classification() -> Classification {
    Classification::new(IntentLabel::Search, 0.8, "search for rust")
}

#[tokio::test]
async fn test_search_scenario_strips_leading_verb() {
    let classifier = Classifier::new(Arc::new(MockLlmClient::new().fallback_ok("SEARCH")), settings());
    let c = classifier.classify("search for python tutorials").await;
    assert_eq!(c.label, IntentLabel::Search);
    assert!(c.confidence >= 0.8);
    assert_eq!(c.parameter.as_deref(), Some("python tutorials"));
    assert!(!c.degraded);
}

#[tokio::test]
async fn test_repeat_classification_hits_cache() {
    let mock = Arc::new(MockLlmClient::new().fallback_ok("SEARCH"));
    let classifier = Classifier::new(mock.clone(), settings());

    let first = classifier.classify("search for python tutorials").await;
    assert_eq!(classifier.stats().await.cache_hits, 0);
    let second = classifier.classify("  search for   python tutorials ").await;
    let third = classifier.classify("search for python tutorials").await;

    assert_eq!(first, second);
    assert_eq!(second, third);
    assert_eq!(classifier.stats().await.cache_hits, 2);
    assert_eq!(mock.calls(), 1);

    // 大小写不同视为不同话语
    let shouted = classifier.classify("Search for Python tutorials").await;
    assert_eq!(shouted.parameter.as_deref(), Some("Python tutorials"));
    assert_eq!(classifier.stats().await.cache_hits, 2);
    assert_eq!(mock.calls(), 2);
}

#[tokio::test]
async fn test_classifier_outage_degrades_to_keywords() {
    let mock = Arc::new(MockLlmClient::unreachable());
    let classifier = Classifier::new(mock.clone(), settings());

    let c = classifier.classify("search for rust crates").await;
    assert!(c.degraded);
    assert_eq!(c.label, IntentLabel::Search);
    assert!(c.confidence < 0.8);
    // 首次请求 + 2 次重试
    assert_eq!(mock.calls(), 3);
    assert_eq!(classifier.stats().await.degraded, 1);
}

#[tokio::test]
async fn test_higher_priority_skill_wins_and_lower_is_only_alternative() {
    let registry = SkillRegistry::new();
    let (low, low_calls) = StubSkill::new("low", Priority::Low, "from low");
    let (high, high_calls) = StubSkill::new("high", Priority::High, "from high");
    registry.register(low).await.unwrap();
    registry.register(high).await.unwrap();

    for _ in 0..3 {
        let result = registry
            .execute_intent(&search_classification(), &SkillContext::new())
            .await;
        assert_eq!(result.executor, "high");
        assert_eq!(result.output.as_deref(), Some("from high"));
        assert_eq!(result.alternatives, vec!["low".to_string()]);
    }
    assert_eq!(high_calls.load(Ordering::SeqCst), 3);
    assert_eq!(low_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_duplicate_registration_replaces_previous_skill() {
    let registry = SkillRegistry::new();
    let (first, first_calls) = StubSkill::new("stub", Priority::Normal, "first");
    let (second, second_calls) = StubSkill::new("stub", Priority::Normal, "second");
    registry.register(first).await.unwrap();
    registry.register(second).await.unwrap();

    let candidates = registry.find_candidates(&search_classification()).await;
    assert_eq!(candidates.len(), 1);

    let result = registry
        .execute_intent(&search_classification(), &SkillContext::new())
        .await;
    assert_eq!(result.output.as_deref(), Some("second"));
    assert!(result.alternatives.is_empty());
    assert_eq!(first_calls.load(Ordering::SeqCst), 0);
    assert_eq!(second_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_chat_scenario_answers_directly() {
    let mock = MockLlmClient::new()
        .when("User input:", "CHAT")
        .when("User message:", "NONE");
    let (orchestrator, mock) = build(mock, builtin_registry().await);

    let outcome = orchestrator.process("hello").await;
    assert!(outcome.success);
    assert_eq!(outcome.label(), IntentLabel::Chat);
    assert_eq!(outcome.path, ResponsePath::DirectAnswer);
    assert!(outcome.matched_skill.is_none());
    assert!(!outcome.response.is_empty());

    // 分类 + 匹配，没有代码生成
    assert_eq!(mock.calls(), 2);
    let stats = orchestrator.stats().await;
    assert_eq!(stats.sandbox_runs, 0);
    assert_eq!(stats.registry.total_executions, 0);
}

#[tokio::test]
async fn test_unsafe_snippet_is_rejected_before_running() {
    let mock = MockLlmClient::new()
        .when("User input:", "SEARCH")
        .when("User message:", "search")
        .when(
            "Generate the Python code",
            "```python\nprint('side effect')\nf = open('/tmp/brain-agent-out', 'w')\n```",
        );
    let (orchestrator, _) = build(mock, builtin_registry().await);

    let outcome = orchestrator.process("search for rust").await;
    let reason = outcome.fallback_reason.clone().unwrap();
    assert!(reason.contains("filesystem"), "reason: {reason}");
    assert_ne!(outcome.path, ResponsePath::Sandbox);
    assert!(!outcome.response.contains("side effect"));

    let stats = orchestrator.stats().await;
    assert_eq!(stats.sandbox_rejections, 1);
    assert_eq!(stats.sandbox_successes, 0);
}

#[tokio::test]
async fn test_sandbox_result_is_returned() {
    let snippet = "```python\nimport math\nnums = [math.factorial(n) for n in range(1, 6)]\nprint(sum(nums))\n```";
    let mock = MockLlmClient::new()
        .when("User input:", "UNKNOWN")
        .when("User message:", "system")
        .when("Generate the Python code", snippet);
    let (orchestrator, _) = build(mock, builtin_registry().await);

    let outcome = orchestrator
        .process("add up the factorials of one to five")
        .await;
    assert!(outcome.success);
    assert_eq!(outcome.path, ResponsePath::Sandbox);
    assert_eq!(outcome.response, "153");
}

#[tokio::test]
async fn test_unanswerable_request_is_structured_failure() {
    let mock = MockLlmClient::new()
        .when("User input:", "UNKNOWN")
        .when("User message:", "system")
        .when("Generate the Python code", "```python\nraise_error()\n```");
    let (orchestrator, _) = build(mock, builtin_registry().await);

    let outcome = orchestrator.process("qwerty asdf").await;
    assert!(!outcome.success);
    assert_eq!(outcome.path, ResponsePath::Registry);
    assert_eq!(outcome.error_kind(), Some(ErrorKind::SkillNotFound));
    assert!(outcome.fallback_reason.unwrap().contains("NameError"));

    let stats = orchestrator.stats().await;
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.failures, 1);
}

#[tokio::test]
async fn test_case_variant_requests_reach_skill_with_their_own_text() {
    let registry = Arc::new(SkillRegistry::new());
    let store = register_builtin_skills(&registry, &AppConfig::default())
        .await
        .unwrap();
    let mock = MockLlmClient::new()
        .when("User input:", "CONFIG")
        .when("User message:", "config")
        .when("Generate the Python code", "```python\npass\n```");
    let (orchestrator, _) = build(mock, registry);

    let upper = "sk-AAAAAAAAAAAAAAAAAAAA";
    let lower = "sk-aaaaaaaaaaaaaaaaaaaa";
    let first = orchestrator.process(&format!("set api key to {upper}")).await;
    assert!(first.response.contains("***AAAA"), "{}", first.response);

    let second = orchestrator.process(&format!("set api key to {lower}")).await;
    assert!(second.success);
    assert_eq!(second.path, ResponsePath::Registry);
    assert!(second.response.contains("***aaaa"), "{}", second.response);

    let stored = store.snapshot().await.api_key.unwrap();
    assert_eq!(stored.expose(), lower);
    assert_eq!(orchestrator.classifier().stats().await.cache_hits, 0);
}
