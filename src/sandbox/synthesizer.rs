//! 代码生成：第三次模型调用，产出只依赖 math / datetime / time、只通过 print 输出的短片段

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::llm::{complete_with_retry, CompletionRequest, LlmClient, LlmError, Message, RetryPolicy};

const SYSTEM_PROMPT: &str = "You are a code generator. Write a short Python snippet that fulfils the user's request.\n\n\
Rules:\n\
1. Only the math, datetime and time modules may be imported.\n\
2. Keep it short: a handful of lines.\n\
3. No file, process, network or user-input access.\n\
4. Report the result with print().\n\
5. The code must run as-is, without a main guard or command-line arguments.\n\
6. Return ONLY the code, inside a single ```python fenced block.\n\n\
Examples:\n\
User request: what time is it\n\
```python\n\
import time\n\
print(time.strftime('%H:%M:%S', time.localtime()))\n\
```\n\n\
User request: today's date\n\
```python\n\
from datetime import datetime\n\
print(datetime.now().strftime('%Y-%m-%d'))\n\
```";

static RE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").unwrap()
});

/// 代码生成器
pub struct CodeSynthesizer {
    llm: Arc<dyn LlmClient>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    retry: RetryPolicy,
}

impl CodeSynthesizer {
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
            max_tokens: cfg.matcher.synthesizer_max_tokens,
            temperature: cfg.llm.temperature,
            top_p: cfg.llm.top_p,
            retry: RetryPolicy::new(cfg.llm.max_retries, cfg.llm.retry_base_delay()),
        }
    }

    /// 为匹配到的技能生成片段；回答里没有代码时返回 `EmptyResponse`
    pub async fn synthesize(
        &self,
        utterance: &str,
        skill: &str,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        let request = CompletionRequest::new(
            vec![
                Message::system(SYSTEM_PROMPT),
                Message::user(format!(
                    "User request: {utterance}\nSkill: {skill}\n\nGenerate the Python code:"
                )),
            ],
            self.max_tokens,
        )
        .with_sampling(self.temperature, self.top_p);

        let raw = complete_with_retry(self.llm.as_ref(), &request, &self.retry, cancel).await?;
        let code = extract_code(&raw);
        if code.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        tracing::debug!(skill = %skill, lines = code.lines().count(), "Synthesized snippet");
        Ok(code)
    }
}

/// 取第一个围栏代码块；没有围栏时原样使用回答
pub fn extract_code(raw: &str) -> String {
    match RE_FENCE.captures(raw).and_then(|c| c.get(1)) {
        Some(body) => body.as_str().trim().to_string(),
        None => raw.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::llm::MockLlmClient;

    fn synthesizer(mock: Arc<MockLlmClient>) -> CodeSynthesizer {
        CodeSynthesizer::new(mock, 200, RetryPolicy::new(2, Duration::from_millis(1)))
    }

    #[test]
    fn test_extract_fenced_block() {
        let raw = "Here you go:\n```python\nimport math\nprint(math.pi)\n```\nEnjoy.";
        assert_eq!(extract_code(raw), "import math\nprint(math.pi)");
    }

    #[test]
    fn test_extract_untagged_fence_and_fallback() {
        assert_eq!(extract_code("```\nprint(1)\n```"), "print(1)");
        assert_eq!(extract_code("  print(2)\n"), "print(2)");
    }

    #[test]
    fn test_extract_takes_first_block() {
        let raw = "```py\nprint('a')\n```\n```python\nprint('b')\n```";
        assert_eq!(extract_code(raw), "print('a')");
    }

    #[tokio::test]
    async fn test_synthesize_builds_request() {
        let mock = Arc::new(MockLlmClient::new().then_ok("```python\nprint(42)\n```"));
        let code = synthesizer(mock.clone())
            .synthesize("what is six times seven", "calculator", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(code, "print(42)");

        let req = &mock.requests()[0];
        assert_eq!(req.max_tokens, 200);
        assert!(req.messages[1].content.contains("what is six times seven"));
        assert!(req.messages[1].content.contains("Skill: calculator"));
    }

    #[tokio::test]
    async fn test_empty_fence_is_empty_response() {
        let mock = Arc::new(MockLlmClient::new().then_ok("```python\n```"));
        let err = synthesizer(mock)
            .synthesize("anything", "system", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse));
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let mock = Arc::new(MockLlmClient::new().fallback_ok("print(1)"));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = synthesizer(mock)
            .synthesize("anything", "system", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Cancelled));
    }
}
