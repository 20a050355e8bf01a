//! 意图标签与分类结果

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 固定的意图标签集合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentLabel {
    /// 信息获取
    Search,
    /// 问候、闲聊、情感表达
    Chat,
    /// 参数与密钥设置
    Config,
    /// 使用说明
    Help,
    /// 冥想与记忆编码
    Meditation,
    /// 时间、系统信息、命令
    System,
    Unknown,
}

impl IntentLabel {
    pub const ALL: [IntentLabel; 7] = [
        IntentLabel::Search,
        IntentLabel::Chat,
        IntentLabel::Config,
        IntentLabel::Help,
        IntentLabel::Meditation,
        IntentLabel::System,
        IntentLabel::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentLabel::Search => "search",
            IntentLabel::Chat => "chat",
            IntentLabel::Config => "config",
            IntentLabel::Help => "help",
            IntentLabel::Meditation => "meditation",
            IntentLabel::System => "system",
            IntentLabel::Unknown => "unknown",
        }
    }

    /// 提示词中要求模型输出的大写形式
    pub fn model_token(&self) -> &'static str {
        match self {
            IntentLabel::Search => "SEARCH",
            IntentLabel::Chat => "CHAT",
            IntentLabel::Config => "CONFIG",
            IntentLabel::Help => "HELP",
            IntentLabel::Meditation => "MEDITATION",
            IntentLabel::System => "SYSTEM",
            IntentLabel::Unknown => "UNKNOWN",
        }
    }

    /// 解析模型输出：先整体精确匹配，再取最早出现的标签子串（均不区分大小写）；无法识别返回 None
    pub fn parse_model_output(raw: &str) -> Option<IntentLabel> {
        let upper = raw
            .trim()
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_uppercase();
        if upper.is_empty() {
            return None;
        }

        if let Some(label) = Self::ALL.iter().find(|l| l.model_token() == upper) {
            return Some(*label);
        }

        Self::ALL
            .iter()
            .filter_map(|l| upper.find(l.model_token()).map(|pos| (pos, *l)))
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, l)| l)
    }
}

impl fmt::Display for IntentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次分类的结果；创建后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: IntentLabel,
    /// 启发式分数 [0, 1]，并非校准概率
    pub confidence: f32,
    /// 提取出的参数（目前仅 Search 的查询词）
    pub parameter: Option<String>,
    pub utterance: String,
    pub timestamp: DateTime<Utc>,
    /// 模型不可用时的本地关键词降级结果
    pub degraded: bool,
}

impl Classification {
    pub fn new(label: IntentLabel, confidence: f32, utterance: impl Into<String>) -> Self {
        Self {
            label,
            confidence: confidence.clamp(0.0, 1.0),
            parameter: None,
            utterance: utterance.into(),
            timestamp: Utc::now(),
            degraded: false,
        }
    }

    pub fn with_parameter(mut self, parameter: Option<String>) -> Self {
        self.parameter = parameter;
        self
    }

    pub fn degraded(mut self) -> Self {
        self.degraded = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exact_and_case_insensitive() {
        assert_eq!(IntentLabel::parse_model_output("SEARCH"), Some(IntentLabel::Search));
        assert_eq!(IntentLabel::parse_model_output("  chat\n"), Some(IntentLabel::Chat));
        assert_eq!(IntentLabel::parse_model_output("\"System\"."), Some(IntentLabel::System));
    }

    #[test]
    fn test_parse_substring_prefers_earliest() {
        assert_eq!(
            IntentLabel::parse_model_output("Intent: HELP (not CONFIG)"),
            Some(IntentLabel::Help)
        );
        assert_eq!(IntentLabel::parse_model_output("意图类型：meditation"), Some(IntentLabel::Meditation));
    }

    #[test]
    fn test_parse_unrecognized() {
        assert_eq!(IntentLabel::parse_model_output("banana"), None);
        assert_eq!(IntentLabel::parse_model_output("   "), None);
    }

    #[test]
    fn test_confidence_clamped() {
        assert_eq!(Classification::new(IntentLabel::Chat, 1.7, "hi").confidence, 1.0);
        assert_eq!(Classification::new(IntentLabel::Chat, -0.2, "hi").confidence, 0.0);
    }
}
