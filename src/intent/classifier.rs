//! 意图分类器
//!
//! 流程：压缩空白（保留大小写）+ SHA256 作为缓存键 → 命中直接返回 → 未命中调用模型（低温、≤10 token、线性退避重试）
//! → 解析标签、关键词加成置信度、Search 提取查询词 → 写回缓存。
//! 模型完全不可用时不向上抛错，改用本地关键词降级分类（degraded = true，置信度固定较低）。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::BrainError;
use crate::llm::{complete_with_retry, CompletionRequest, LlmClient, LlmError, Message, RetryPolicy};

use super::keywords::{collapse_whitespace, extract_search_query, has_keyword, heuristic_label};
use super::{Classification, ClassificationCache, IntentLabel};

/// 模型分类的基础置信度
pub const BASE_CONFIDENCE: f32 = 0.5;
/// 话语包含该标签关键词时的加成
pub const KEYWORD_BONUS: f32 = 0.3;
/// 降级（纯关键词）分类的固定置信度
pub const DEGRADED_CONFIDENCE: f32 = 0.3;

const INTENT_PROMPT: &str = r#"You are an intent classifier for a desktop assistant. Classify the user's input into exactly one intent type.

Intent types:
1. SEARCH - looking for information (搜索、查找、如何、什么是、最新、新闻, search, find, how to, what is)
2. CHAT - greetings, small talk, emotions (你好、谢谢、再见, hello, thanks, bye)
3. CONFIG - changing settings, API key, base_url (配置、设置、密钥, config, settings)
4. HELP - asking how to use the assistant (帮助、说明、怎么用、功能, help, guide)
5. MEDITATION - meditation or memory encoding, A2B / B2C (冥想、编码、记忆, meditation)
6. SYSTEM - date/time, system information, running commands (今天几号、现在时间、系统信息、执行, what time, system info)
7. UNKNOWN - none of the above

Reply with the intent type only (SEARCH/CHAT/CONFIG/HELP/MEDITATION/SYSTEM/UNKNOWN), nothing else."#;

/// 分类器参数（来自 [llm] 与 [classifier] 段）
#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub retry: RetryPolicy,
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl ClassifierSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            max_tokens: cfg.classifier.max_tokens,
            temperature: cfg.llm.temperature,
            top_p: cfg.llm.top_p,
            retry: RetryPolicy::new(cfg.llm.max_retries, cfg.llm.retry_base_delay()),
            cache_capacity: cfg.classifier.cache_capacity,
            cache_ttl: Duration::from_secs(cfg.classifier.cache_ttl_secs),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    model_calls: AtomicU64,
    successful_recognitions: AtomicU64,
    parse_errors: AtomicU64,
    degraded: AtomicU64,
    api_errors: AtomicU64,
}

/// 分类器统计快照
#[derive(Debug, Clone, Serialize)]
pub struct ClassifierStats {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub model_calls: u64,
    pub successful_recognitions: u64,
    pub parse_errors: u64,
    pub degraded: u64,
    pub api_errors: u64,
    pub cache_hit_rate: f64,
    pub cache_size: usize,
    pub cache_capacity: usize,
}

/// 意图分类器：缓存优先，其次模型，最后本地降级
pub struct Classifier {
    llm: Arc<dyn LlmClient>,
    cache: Mutex<ClassificationCache>,
    settings: ClassifierSettings,
    counters: Counters,
}

impl Classifier {
    pub fn new(llm: Arc<dyn LlmClient>, settings: ClassifierSettings) -> Self {
        let cache = ClassificationCache::new(settings.cache_capacity, settings.cache_ttl);
        Self {
            llm,
            cache: Mutex::new(cache),
            settings,
            counters: Counters::default(),
        }
    }

    /// 分类，不会失败（不可取消）
    pub async fn classify(&self, utterance: &str) -> Classification {
        match self.classify_cancellable(utterance, &CancellationToken::new()).await {
            Ok(c) => c,
            // 未被取消的令牌不会走到这里
            Err(_) => Self::fallback(utterance),
        }
    }

    /// 分类；唯一的错误是请求被取消
    pub async fn classify_cancellable(
        &self,
        utterance: &str,
        cancel: &CancellationToken,
    ) -> Result<Classification, BrainError> {
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        // 同一缓存键下的话语文本完全一致，技能读到的总是本次请求的原文
        let normalized = collapse_whitespace(utterance);
        let utterance = normalized.as_str();
        if utterance.is_empty() {
            tracing::warn!("Empty utterance, classified as unknown");
            return Ok(Classification::new(IntentLabel::Unknown, 0.0, ""));
        }

        let key = cache_key(utterance);
        if let Some(hit) = self.cache.lock().await.get(&key) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(label = %hit.label, "Classification cache hit");
            return Ok(hit);
        }
        tracing::debug!("Classification cache miss");

        let raw = match self.call_model(utterance, cancel).await {
            Ok(raw) => raw,
            Err(LlmError::Cancelled) => return Err(BrainError::Cancelled),
            Err(err) => {
                self.counters.api_errors.fetch_add(1, Ordering::Relaxed);
                self.counters.degraded.fetch_add(1, Ordering::Relaxed);
                let unavailable = BrainError::ClassifierUnavailable(err);
                let fallback = Self::fallback(utterance);
                tracing::warn!(
                    error = %unavailable,
                    label = %fallback.label,
                    "Falling back to keyword classification"
                );
                return Ok(fallback);
            }
        };

        let classification = self.interpret(utterance, &raw);
        self.counters
            .successful_recognitions
            .fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            label = %classification.label,
            confidence = classification.confidence,
            "Intent recognized"
        );

        self.cache.lock().await.put(key, classification.clone());
        Ok(classification)
    }

    /// 纯关键词降级分类：不调用模型，固定较低置信度，degraded = true
    pub fn fallback(utterance: &str) -> Classification {
        let label = heuristic_label(utterance);
        let parameter = (label == IntentLabel::Search).then(|| extract_search_query(utterance));
        Classification::new(label, DEGRADED_CONFIDENCE, utterance.trim())
            .with_parameter(parameter)
            .degraded()
    }

    /// 根据模型输出构造分类结果
    fn interpret(&self, utterance: &str, raw: &str) -> Classification {
        let label = match IntentLabel::parse_model_output(raw) {
            Some(label) => label,
            None => {
                self.counters.parse_errors.fetch_add(1, Ordering::Relaxed);
                let err = BrainError::ParseError(format!("unrecognized intent output: {raw:?}"));
                tracing::warn!(error = %err, "Mapping to unknown");
                IntentLabel::Unknown
            }
        };

        let mut confidence = BASE_CONFIDENCE;
        if has_keyword(label, utterance) {
            confidence = (confidence + KEYWORD_BONUS).min(1.0);
        }

        let parameter = (label == IntentLabel::Search).then(|| extract_search_query(utterance));
        Classification::new(label, confidence, utterance).with_parameter(parameter)
    }

    async fn call_model(&self, utterance: &str, cancel: &CancellationToken) -> Result<String, LlmError> {
        self.counters.model_calls.fetch_add(1, Ordering::Relaxed);
        let request = CompletionRequest::new(
            vec![
                Message::system(INTENT_PROMPT),
                Message::user(format!("User input: {utterance}\n\nIntent type:")),
            ],
            self.settings.max_tokens,
        )
        .with_sampling(self.settings.temperature, self.settings.top_p);

        complete_with_retry(self.llm.as_ref(), &request, &self.settings.retry, cancel).await
    }

    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
        tracing::info!("Classification cache cleared");
    }

    pub async fn stats(&self) -> ClassifierStats {
        let cache = self.cache.lock().await;
        let total = self.counters.total_requests.load(Ordering::Relaxed);
        let hits = self.counters.cache_hits.load(Ordering::Relaxed);
        ClassifierStats {
            total_requests: total,
            cache_hits: hits,
            model_calls: self.counters.model_calls.load(Ordering::Relaxed),
            successful_recognitions: self
                .counters
                .successful_recognitions
                .load(Ordering::Relaxed),
            parse_errors: self.counters.parse_errors.load(Ordering::Relaxed),
            degraded: self.counters.degraded.load(Ordering::Relaxed),
            api_errors: self.counters.api_errors.load(Ordering::Relaxed),
            cache_hit_rate: if total > 0 { hits as f64 / total as f64 } else { 0.0 },
            cache_size: cache.len(),
            cache_capacity: cache.capacity(),
        }
    }
}

/// 规范化话语的稳定哈希
pub fn cache_key(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"intent:");
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}
