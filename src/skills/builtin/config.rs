//! 配置技能：在内存中的设置存储上设置密钥 / 基础 URL、查看、重置
//!
//! 设置不落盘；查看时密钥只显示末 4 位。模型调用经 [`SettingsBackedClient`] 读取同一份存储，
//! 修改在下一次请求时生效。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::config::{ApiKey, AppConfig, LlmSection};
use crate::intent::keywords::contains_keyword;
use crate::llm::{CompletionRequest, LlmClient, LlmError, OpenAiClient};
use crate::intent::{Classification, IntentLabel};
use crate::skills::{Priority, Skill, SkillContext, SkillError, SkillOutput};

static API_KEY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(sk-[A-Za-z0-9_\-]{16,})",
        r"(?i)api[_ ]?key\s*(?:[:=：]|is|to|为|是)?\s*([A-Za-z0-9_\-]{8,})",
        r"密钥\s*(?:[:=：]|为|是)?\s*([A-Za-z0-9_\-]{8,})",
        r"\b([A-Za-z0-9]{32,})\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static URL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://[^\s，。,;'\x22]+").unwrap());

/// 可在运行期修改的连接设置
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_key: Option<ApiKey>,
    pub base_url: String,
    pub model: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
}

impl Settings {
    fn from_llm(llm: &LlmSection) -> Self {
        Self {
            api_key: llm.resolve_api_key(),
            base_url: llm.base_url.clone(),
            model: llm.model.clone(),
            request_timeout_secs: llm.request_timeout_secs,
            max_retries: llm.max_retries,
        }
    }
}

/// 展示用视图（密钥已遮蔽）
#[derive(Debug, Serialize)]
struct SettingsView<'a> {
    api_key: String,
    base_url: &'a str,
    model: &'a str,
    request_timeout_secs: u64,
    max_retries: u32,
}

/// 设置存储：保留一份默认值用于重置
pub struct SettingsStore {
    defaults: Settings,
    current: RwLock<Settings>,
}

impl SettingsStore {
    pub fn from_config(cfg: &AppConfig) -> Self {
        let settings = Settings::from_llm(&cfg.llm);
        Self {
            defaults: Settings {
                api_key: None,
                ..settings.clone()
            },
            current: RwLock::new(settings),
        }
    }

    pub async fn snapshot(&self) -> Settings {
        self.current.read().await.clone()
    }

    pub async fn set_api_key(&self, key: ApiKey) {
        self.current.write().await.api_key = Some(key);
    }

    pub async fn set_base_url(&self, url: String) {
        self.current.write().await.base_url = url;
    }

    pub async fn reset(&self) {
        *self.current.write().await = self.defaults.clone();
    }

    /// TOML 形式的当前设置
    pub async fn render(&self) -> Result<String, SkillError> {
        let s = self.current.read().await;
        let view = SettingsView {
            api_key: s
                .api_key
                .as_ref()
                .map_or_else(|| "(unset)".to_string(), ApiKey::masked),
            base_url: &s.base_url,
            model: &s.model,
            request_timeout_secs: s.request_timeout_secs,
            max_retries: s.max_retries,
        };
        toml::to_string(&view).map_err(|e| SkillError::Execution(format!("render settings: {e}")))
    }
}

/// 跟随设置存储的 LLM 客户端：每次请求读取当前设置，密钥或端点变化时重建底层 OpenAiClient。
/// 未设置密钥时所有调用返回 `MissingApiKey`，分类器随之走本地降级。
pub struct SettingsBackedClient {
    store: Arc<SettingsStore>,
    model: String,
    active: Mutex<Option<(Settings, Arc<OpenAiClient>)>>,
}

impl SettingsBackedClient {
    pub fn new(store: Arc<SettingsStore>) -> Self {
        let model = store.defaults.model.clone();
        Self {
            store,
            model,
            active: Mutex::new(None),
        }
    }

    async fn client(&self) -> Result<Arc<OpenAiClient>, LlmError> {
        let settings = self.store.snapshot().await;
        let Some(key) = settings.api_key.clone() else {
            return Err(LlmError::MissingApiKey);
        };

        let mut active = self.active.lock().await;
        if let Some((built_from, client)) = &*active {
            if *built_from == settings {
                return Ok(Arc::clone(client));
            }
        }
        tracing::info!(
            model = %settings.model,
            base_url = %settings.base_url,
            "Building LLM client from current settings"
        );
        let client = Arc::new(OpenAiClient::new(
            &settings.base_url,
            &settings.model,
            &key,
            Duration::from_secs(settings.request_timeout_secs),
        ));
        *active = Some((settings, Arc::clone(&client)));
        Ok(client)
    }
}

#[async_trait]
impl LlmClient for SettingsBackedClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        self.client().await?.complete(request).await
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    ApiKey,
    BaseUrl,
    Show,
    Reset,
    General,
}

fn operation(utterance: &str) -> Operation {
    let lower = utterance.to_lowercase();
    let any = |words: &[&str]| words.iter().any(|w| contains_keyword(&lower, w));
    if any(&["api_key", "apikey", "api key", "密钥"]) {
        Operation::ApiKey
    } else if any(&["base_url", "baseurl", "base url", "基础url", "地址"]) {
        Operation::BaseUrl
    } else if any(&["查看", "显示", "show", "list", "view"]) {
        Operation::Show
    } else if any(&["重置", "恢复", "reset", "restore"]) {
        Operation::Reset
    } else {
        Operation::General
    }
}

fn extract_api_key(utterance: &str) -> Option<String> {
    API_KEY_PATTERNS
        .iter()
        .find_map(|re| re.captures(utterance))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn extract_base_url(utterance: &str) -> Option<String> {
    URL_PATTERN
        .find(utterance)
        .map(|m| m.as_str().trim_end_matches(['.', '/']).to_string())
}

pub struct ConfigSkill {
    store: Arc<SettingsStore>,
}

impl ConfigSkill {
    pub fn new(store: Arc<SettingsStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<SettingsStore> {
        Arc::clone(&self.store)
    }
}

#[async_trait]
impl Skill for ConfigSkill {
    fn name(&self) -> &str {
        "config"
    }

    fn description(&self) -> &str {
        "Settings: set the API key or base URL, show current settings, reset to defaults"
    }

    fn priority(&self) -> Priority {
        Priority::High
    }

    fn can_handle(&self, classification: &Classification) -> bool {
        classification.label == IntentLabel::Config
    }

    async fn handle(
        &self,
        classification: &Classification,
        _context: &SkillContext,
    ) -> Result<SkillOutput, SkillError> {
        let utterance = &classification.utterance;
        match operation(utterance) {
            Operation::ApiKey => {
                let key = extract_api_key(utterance).ok_or_else(|| {
                    SkillError::InvalidInput("no valid API key found in the message".into())
                })?;
                let key = ApiKey::new(key);
                let masked = key.masked();
                self.store.set_api_key(key).await;
                tracing::info!(api_key = %masked, "API key updated");
                Ok(SkillOutput::text(format!("API key updated ({masked}).")))
            }
            Operation::BaseUrl => {
                let url = extract_base_url(utterance).ok_or_else(|| {
                    SkillError::InvalidInput("no valid URL found in the message".into())
                })?;
                self.store.set_base_url(url.clone()).await;
                tracing::info!(base_url = %url, "Base URL updated");
                Ok(SkillOutput::text(format!("Base URL updated to {url}.")))
            }
            Operation::Show => {
                let rendered = self.store.render().await?;
                Ok(SkillOutput::text(format!("Current settings:\n{rendered}")))
            }
            Operation::Reset => {
                self.store.reset().await;
                tracing::info!("Settings reset to defaults");
                Ok(SkillOutput::text("Settings reset to defaults."))
            }
            Operation::General => Ok(SkillOutput::text(
                "Config is ready. Available operations:\n\
                 - set API key: \"set api key to sk-...\"\n\
                 - set base URL: \"set base_url to https://...\"\n\
                 - show settings: \"show config\"\n\
                 - reset settings: \"reset config\"",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skill() -> ConfigSkill {
        ConfigSkill::new(Arc::new(SettingsStore::from_config(&AppConfig::default())))
    }

    fn config(utterance: &str) -> Classification {
        Classification::new(IntentLabel::Config, 0.8, utterance)
    }

    #[test]
    fn test_extract_api_key() {
        assert_eq!(
            extract_api_key("set api key to sk-abcdefghijklmnop1234").as_deref(),
            Some("sk-abcdefghijklmnop1234")
        );
        assert_eq!(extract_api_key("密钥：abcd1234efgh").as_deref(), Some("abcd1234efgh"));
        assert_eq!(extract_api_key("set the api key"), None);
    }

    #[test]
    fn test_extract_base_url() {
        assert_eq!(
            extract_base_url("set base_url to https://api.example.com/v1/.").as_deref(),
            Some("https://api.example.com/v1")
        );
    }

    #[tokio::test]
    async fn test_set_show_reset() {
        let skill = skill();
        let store = skill.store();

        let out = skill
            .handle(&config("set api key to sk-abcdefghijklmnop1234"), &SkillContext::new())
            .await
            .unwrap();
        assert!(out.text.contains("***1234"));
        assert!(!out.text.contains("abcdefghijklmnop"));

        skill
            .handle(&config("set base_url to https://api.example.com"), &SkillContext::new())
            .await
            .unwrap();
        assert_eq!(store.snapshot().await.base_url, "https://api.example.com");

        let shown = skill
            .handle(&config("show config"), &SkillContext::new())
            .await
            .unwrap();
        assert!(shown.text.contains("api_key = \"***1234\""));
        assert!(shown.text.contains("https://api.example.com"));

        skill
            .handle(&config("reset config"), &SkillContext::new())
            .await
            .unwrap();
        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.api_key, None);
        assert_eq!(snapshot.base_url, AppConfig::default().llm.base_url);
    }

    #[tokio::test]
    async fn test_client_follows_store_updates() {
        let skill = skill();
        let store = skill.store();
        store.reset().await;
        let client = SettingsBackedClient::new(Arc::clone(&store));
        let request = CompletionRequest::new(vec![crate::llm::Message::user("hi")], 10);

        let err = client.complete(&request).await.unwrap_err();
        assert_eq!(err, LlmError::MissingApiKey);

        skill
            .handle(&config("set api key to sk-abcdefghijklmnop1234"), &SkillContext::new())
            .await
            .unwrap();
        let first = client.client().await.unwrap();
        let again = client.client().await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        skill
            .handle(&config("set base_url to https://llm.example.com/v1"), &SkillContext::new())
            .await
            .unwrap();
        let rebuilt = client.client().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &rebuilt));

        skill
            .handle(&config("reset config"), &SkillContext::new())
            .await
            .unwrap();
        assert!(matches!(client.client().await, Err(LlmError::MissingApiKey)));
    }

    #[tokio::test]
    async fn test_missing_key_is_invalid_input() {
        let err = skill()
            .handle(&config("please update my api key"), &SkillContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SkillError::InvalidInput(_)));
    }
}
