//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BRAIN__*` 覆盖（双下划线表示嵌套，如 `BRAIN__LLM__MODEL=xxx`）。
//! API Key 额外从 `DOUBAO_API_KEY` / `OPENAI_API_KEY` 读取，只在内存中持有，永不写日志。

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub classifier: ClassifierSection,
    #[serde(default)]
    pub matcher: MatcherSection,
    #[serde(default)]
    pub sandbox: SandboxSection,
    #[serde(default)]
    pub skills: SkillsSection,
}

/// [app] 段：应用名
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// 不会出现在 Debug / 日志中的密钥
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// 仅保留末 4 位，用于展示
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() > 4 {
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("***{tail}")
        } else {
            "***".to_string()
        }
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("ApiKey(<unset>)")
        } else {
            f.write_str("ApiKey(***)")
        }
    }
}

/// [llm] 段：模型端点、密钥、超时与重试
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<ApiKey>,
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// 首次请求之外最多重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 线性退避基数（毫秒），第 n 次重试前等待 n × base
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
}

fn default_model() -> String {
    "doubao-1-5-lite-32k-250115".to_string()
}

fn default_base_url() -> String {
    "https://ark.cn-beijing.volces.com/api/v3".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_temperature() -> f32 {
    0.1
}

fn default_top_p() -> f32 {
    0.9
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            api_key: None,
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            temperature: default_temperature(),
            top_p: default_top_p(),
        }
    }
}

impl LlmSection {
    /// 配置文件中的密钥优先，其次 DOUBAO_API_KEY，最后 OPENAI_API_KEY
    pub fn resolve_api_key(&self) -> Option<ApiKey> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| {
                ["DOUBAO_API_KEY", "OPENAI_API_KEY"]
                    .into_iter()
                    .find_map(|var| std::env::var(var).ok())
                    .map(ApiKey::new)
                    .filter(|k| !k.is_empty())
            })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

/// [classifier] 段：缓存容量、TTL、输出长度
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierSection {
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_classifier_max_tokens")]
    pub max_tokens: u32,
}

fn default_cache_capacity() -> usize {
    100
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_classifier_max_tokens() -> u32 {
    10
}

impl Default for ClassifierSection {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            cache_ttl_secs: default_cache_ttl_secs(),
            max_tokens: default_classifier_max_tokens(),
        }
    }
}

/// [matcher] 段：技能匹配与代码生成的输出长度
#[derive(Debug, Clone, Deserialize)]
pub struct MatcherSection {
    #[serde(default = "default_matcher_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_synthesizer_max_tokens")]
    pub synthesizer_max_tokens: u32,
}

fn default_matcher_max_tokens() -> u32 {
    20
}

fn default_synthesizer_max_tokens() -> u32 {
    200
}

impl Default for MatcherSection {
    fn default() -> Self {
        Self {
            max_tokens: default_matcher_max_tokens(),
            synthesizer_max_tokens: default_synthesizer_max_tokens(),
        }
    }
}

/// [sandbox] 段：执行超时、步数预算、输出上限
#[derive(Debug, Clone, Deserialize)]
pub struct SandboxSection {
    #[serde(default = "default_sandbox_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
}

fn default_sandbox_timeout_ms() -> u64 {
    3000
}

fn default_max_steps() -> u64 {
    200_000
}

fn default_max_output_chars() -> usize {
    8000
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_sandbox_timeout_ms(),
            max_steps: default_max_steps(),
            max_output_chars: default_max_output_chars(),
        }
    }
}

/// [skills] 段：统计窗口、system 技能的命令白名单
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SkillsSection {
    #[serde(default = "default_duration_window")]
    pub duration_window: usize,
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_duration_window() -> usize {
    1000
}

fn default_allowed_commands() -> Vec<String> {
    vec![
        "date".into(),
        "whoami".into(),
        "pwd".into(),
        "ls".into(),
        "df".into(),
        "free".into(),
        "uname".into(),
        "uptime".into(),
    ]
}

fn default_command_timeout_secs() -> u64 {
    10
}

impl Default for SkillsSection {
    fn default() -> Self {
        Self {
            duration_window: default_duration_window(),
            allowed_commands: default_allowed_commands(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 BRAIN__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BRAIN__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BRAIN")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.classifier.cache_capacity, 100);
        assert_eq!(cfg.classifier.cache_ttl_secs, 300);
        assert_eq!(cfg.llm.max_retries, 2);
        assert_eq!(cfg.llm.request_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.skills.duration_window, 1000);
        assert!(cfg.sandbox.timeout_ms < cfg.llm.request_timeout_secs * 1000);
    }

    #[test]
    fn test_load_explicit_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[classifier]\ncache_capacity = 7\n\n[sandbox]\nmax_steps = 42\n\n[llm]\nmodel = \"test-model\""
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.classifier.cache_capacity, 7);
        assert_eq!(cfg.classifier.cache_ttl_secs, 300);
        assert_eq!(cfg.sandbox.max_steps, 42);
        assert_eq!(cfg.llm.model, "test-model");
    }

    #[test]
    fn test_api_key_never_printed() {
        let key = ApiKey::new("sk-abcdefghijklmnop");
        let printed = format!("{:?}", key);
        assert!(!printed.contains("abcdef"));
        assert_eq!(key.masked(), "***mnop");
        assert_eq!(ApiKey::new("abc").masked(), "***");
    }
}
