//! 技能匹配器
//!
//! 在意图分类之后再做一次独立的模型调用：给出已启用技能的名称与一句话描述、用户话语与意图标签，
//! 要求模型只回答一个技能名或 NONE。回答按名称（不区分大小写）校验，不在集合内一律视为 NONE。
//! 结果不缓存：注册表随时可能变化。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::BrainError;
use crate::intent::IntentLabel;
use crate::llm::{complete_with_retry, CompletionRequest, LlmClient, LlmError, Message, RetryPolicy};

use super::SkillDescriptor;

/// 模型表示"不需要技能"时的回答
pub const NONE_SENTINEL: &str = "none";

/// 匹配结果
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// 已注册、已启用技能的规范名称
    Skill(String),
    /// 模型回答 NONE，或回答无法识别
    NoSkill,
    /// 模型调用失败（重试耗尽或不可重试的错误）
    Unavailable(LlmError),
}

/// 技能匹配器：短 token 预算、低温
pub struct SkillMatcher {
    llm: Arc<dyn LlmClient>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    retry: RetryPolicy,
}

impl SkillMatcher {
    pub fn new(llm: Arc<dyn LlmClient>, max_tokens: u32, retry: RetryPolicy) -> Self {
        Self {
            llm,
            max_tokens,
            temperature: 0.1,
            top_p: 0.9,
            retry,
        }
    }

    pub fn from_config(llm: Arc<dyn LlmClient>, cfg: &AppConfig) -> Self {
        Self {
            llm,
            max_tokens: cfg.matcher.max_tokens,
            temperature: cfg.llm.temperature,
            top_p: cfg.llm.top_p,
            retry: RetryPolicy::new(cfg.llm.max_retries, cfg.llm.retry_base_delay()),
        }
    }

    /// 在给定技能中挑选一个；只有取消会返回 Err
    pub async fn match_skill(
        &self,
        utterance: &str,
        label: IntentLabel,
        skills: &[SkillDescriptor],
        cancel: &CancellationToken,
    ) -> Result<MatchOutcome, BrainError> {
        let enabled: Vec<&SkillDescriptor> = skills.iter().filter(|s| s.enabled).collect();
        if enabled.is_empty() {
            return Ok(MatchOutcome::NoSkill);
        }

        let request = CompletionRequest::new(
            vec![
                Message::system(build_prompt(&enabled)),
                Message::user(format!(
                    "User message: {utterance}\nIntent type: {}\n\nSkill:",
                    label.model_token()
                )),
            ],
            self.max_tokens,
        )
        .with_sampling(self.temperature, self.top_p);

        let raw = match complete_with_retry(self.llm.as_ref(), &request, &self.retry, cancel).await {
            Ok(raw) => raw,
            Err(LlmError::Cancelled) => return Err(BrainError::Cancelled),
            Err(err) => {
                tracing::warn!(error = %err, "Skill matcher unavailable");
                return Ok(MatchOutcome::Unavailable(err));
            }
        };

        let outcome = parse_reply(&raw, &enabled);
        tracing::debug!(reply = %raw.trim(), outcome = ?outcome, "Skill match");
        Ok(outcome)
    }
}

fn build_prompt(skills: &[&SkillDescriptor]) -> String {
    let listing: Vec<String> = skills
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {} - {}", i + 1, s.name, s.description))
        .collect();
    format!(
        "You are a skill matcher. Given the user's message, its intent type and the available skills, \
         choose the single most suitable skill to handle the request.\n\n\
         Available skills:\n{}\n\n\
         Reply with ONLY the skill name. If no skill is needed (plain conversation that can be \
         answered directly), reply NONE.",
        listing.join("\n")
    )
}

/// 取首行首个词，去掉引号与标点后按名称匹配
fn parse_reply(raw: &str, skills: &[&SkillDescriptor]) -> MatchOutcome {
    let token = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.split_whitespace().next())
        .unwrap_or_default()
        .trim_matches(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'));

    if token.is_empty() || token.eq_ignore_ascii_case(NONE_SENTINEL) {
        return MatchOutcome::NoSkill;
    }

    match skills.iter().find(|s| s.name.eq_ignore_ascii_case(token)) {
        Some(s) => MatchOutcome::Skill(s.name.clone()),
        None => {
            let err = BrainError::ParseError(format!("unknown skill in matcher reply: {token:?}"));
            tracing::warn!(error = %err, "Treating as none");
            MatchOutcome::NoSkill
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::llm::MockLlmClient;
    use crate::skills::Priority;

    fn descriptor(name: &str, enabled: bool) -> SkillDescriptor {
        SkillDescriptor {
            name: name.to_string(),
            description: format!("{name} skill"),
            priority: Priority::Normal,
            enabled,
            usage_count: 0,
        }
    }

    fn skills() -> Vec<SkillDescriptor> {
        vec![
            descriptor("system", true),
            descriptor("search", true),
            descriptor("meditation", false),
        ]
    }

    fn matcher(mock: Arc<MockLlmClient>) -> SkillMatcher {
        SkillMatcher::new(mock, 20, RetryPolicy::new(2, Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn test_case_insensitive_match_returns_canonical_name() {
        let mock = Arc::new(MockLlmClient::new().then_ok("  System\n"));
        let outcome = matcher(mock.clone())
            .match_skill("what time is it", IntentLabel::System, &skills(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, MatchOutcome::Skill("system".into()));

        let req = &mock.requests()[0];
        assert_eq!(req.max_tokens, 20);
        let prompt = &req.messages[0].content;
        assert!(prompt.contains("system - system skill"));
        assert!(!prompt.contains("meditation"));
    }

    #[tokio::test]
    async fn test_none_and_unknown_replies() {
        let mock = Arc::new(MockLlmClient::new().then_ok("NONE").then_ok("meditation").then_ok("weather_skill"));
        let m = matcher(mock);
        let cancel = CancellationToken::new();
        for _ in 0..3 {
            let outcome = m
                .match_skill("hello", IntentLabel::Chat, &skills(), &cancel)
                .await
                .unwrap();
            // 已禁用或未注册的技能名同样视为 NONE
            assert_eq!(outcome, MatchOutcome::NoSkill);
        }
    }

    #[tokio::test]
    async fn test_unavailable_model() {
        let mock = Arc::new(MockLlmClient::unreachable());
        let outcome = matcher(mock.clone())
            .match_skill("hello", IntentLabel::Chat, &skills(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, MatchOutcome::Unavailable(LlmError::Transport(_))));
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn test_no_enabled_skills_skips_model() {
        let mock = Arc::new(MockLlmClient::new());
        let outcome = matcher(mock.clone())
            .match_skill("hello", IntentLabel::Chat, &[descriptor("x", false)], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, MatchOutcome::NoSkill);
        assert_eq!(mock.calls(), 0);
    }

    #[test]
    fn test_parse_reply_strips_punctuation() {
        let s = skills();
        let refs: Vec<&SkillDescriptor> = s.iter().collect();
        assert_eq!(parse_reply("`search`.", &refs), MatchOutcome::Skill("search".into()));
        assert_eq!(parse_reply("", &refs), MatchOutcome::NoSkill);
    }
}
