//! 关键词表：置信度加成、模型不可用时的本地降级分类、搜索查询提取
//!
//! 英文关键词按词边界匹配（避免 "hi" 命中 "this"），中文关键词按子串匹配。

use super::IntentLabel;

pub const SEARCH_KEYWORDS: &[&str] = &[
    "搜索", "查找", "帮我找", "找", "如何", "怎么", "什么是", "最新", "新闻",
    "search", "find", "look up", "look for", "google", "how to", "what is", "latest", "news",
];

pub const CHAT_KEYWORDS: &[&str] = &[
    "你好", "谢谢", "再见", "拜拜", "早上好", "晚上好", "嗨",
    "hello", "hi", "hey", "thanks", "thank you", "bye", "goodbye", "good morning",
    "good evening",
];

pub const CONFIG_KEYWORDS: &[&str] = &[
    "配置", "设置", "密钥", "api", "base_url", "api_key", "api key", "config", "configure",
    "settings", "setup",
];

pub const HELP_KEYWORDS: &[&str] = &[
    "帮助", "说明", "怎么用", "功能", "指南", "help", "usage", "guide", "manual",
    "what can you do",
];

pub const MEDITATION_KEYWORDS: &[&str] = &[
    "冥想", "编码", "记忆", "a2b", "b2c", "meditation", "meditate", "breathing", "encoding",
];

pub const SYSTEM_KEYWORDS: &[&str] = &[
    "今天几号", "现在时间", "几点", "日期", "时间", "系统信息", "系统版本", "操作系统", "执行",
    "运行", "命令", "what time", "time is it", "date", "today", "system info", "os version",
    "run command", "execute",
];

/// 搜索动词前缀（取最长匹配）
pub const SEARCH_PREFIXES: &[&str] = &[
    "帮我搜索", "帮我查找", "帮我找", "搜索", "查找", "找", "如何", "怎么", "什么是",
    "please search for", "search the web for", "search for", "search", "help me find",
    "look up", "look for", "find me", "find", "google", "how to", "what is",
];

/// 本地降级分类时的检查顺序：更具体的标签优先（"怎么用" 应归 Help 而非 Search）
const HEURISTIC_ORDER: [IntentLabel; 6] = [
    IntentLabel::Config,
    IntentLabel::Help,
    IntentLabel::Meditation,
    IntentLabel::System,
    IntentLabel::Search,
    IntentLabel::Chat,
];

pub fn keywords_for(label: IntentLabel) -> &'static [&'static str] {
    match label {
        IntentLabel::Search => SEARCH_KEYWORDS,
        IntentLabel::Chat => CHAT_KEYWORDS,
        IntentLabel::Config => CONFIG_KEYWORDS,
        IntentLabel::Help => HELP_KEYWORDS,
        IntentLabel::Meditation => MEDITATION_KEYWORDS,
        IntentLabel::System => SYSTEM_KEYWORDS,
        IntentLabel::Unknown => &[],
    }
}

/// 去首尾空白并压缩连续空白，保留大小写
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// text 须已小写；ASCII 关键词要求两侧不是字母数字
pub fn contains_keyword(text: &str, keyword: &str) -> bool {
    if !keyword.is_ascii() {
        return text.contains(keyword);
    }
    text.match_indices(keyword).any(|(start, _)| {
        let before_ok = text[..start].chars().next_back().map_or(true, |c| !is_word_char(c));
        let after_ok = text[start + keyword.len()..]
            .chars()
            .next()
            .map_or(true, |c| !is_word_char(c));
        before_ok && after_ok
    })
}

/// 该标签的关键词是否出现在话语中
pub fn has_keyword(label: IntentLabel, utterance: &str) -> bool {
    let lower = utterance.to_lowercase();
    keywords_for(label).iter().any(|k| contains_keyword(&lower, k))
}

/// 纯关键词分类（不调用模型）；无命中返回 Unknown
pub fn heuristic_label(utterance: &str) -> IntentLabel {
    let lower = utterance.to_lowercase();
    HEURISTIC_ORDER
        .into_iter()
        .find(|label| keywords_for(*label).iter().any(|k| contains_keyword(&lower, k)))
        .unwrap_or(IntentLabel::Unknown)
}

/// 去掉最长的搜索动词前缀；去掉后为空则返回原话语
pub fn extract_search_query(utterance: &str) -> String {
    let trimmed = utterance.trim();
    let matched = SEARCH_PREFIXES
        .iter()
        .filter(|p| starts_with_prefix(trimmed, p))
        .max_by_key(|p| p.len());

    let query = match matched {
        Some(prefix) => trimmed[prefix.len()..]
            .trim()
            .trim_start_matches(|c: char| c == ':' || c == '：' || c == ',' || c == '，')
            .trim(),
        None => trimmed,
    };

    if query.is_empty() {
        trimmed.to_string()
    } else {
        query.to_string()
    }
}

fn starts_with_prefix(text: &str, prefix: &str) -> bool {
    let Some(head) = text.get(..prefix.len()) else {
        return false;
    };
    if !head.eq_ignore_ascii_case(prefix) {
        return false;
    }
    if prefix.is_ascii() {
        // "finding" 不应被当作 "find" + "ing"
        text[prefix.len()..].chars().next().map_or(true, |c| !is_word_char(c))
    } else {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_boundaries() {
        assert!(contains_keyword("hi there", "hi"));
        assert!(!contains_keyword("this is it", "hi"));
        assert!(contains_keyword("please help!", "help"));
        assert!(contains_keyword("帮我搜索一下", "搜索"));
    }

    #[test]
    fn test_extract_longest_prefix() {
        assert_eq!(extract_search_query("search for python tutorials"), "python tutorials");
        assert_eq!(extract_search_query("Search python"), "python");
        assert_eq!(extract_search_query("帮我找 Rust 教程"), "Rust 教程");
        assert_eq!(extract_search_query("findings about bees"), "findings about bees");
        assert_eq!(extract_search_query("search"), "search");
    }

    #[test]
    fn test_heuristic_order() {
        assert_eq!(heuristic_label("怎么用这个功能"), IntentLabel::Help);
        assert_eq!(heuristic_label("search for rust"), IntentLabel::Search);
        assert_eq!(heuristic_label("hello"), IntentLabel::Chat);
        assert_eq!(heuristic_label("set the api key"), IntentLabel::Config);
        assert_eq!(heuristic_label("what time is it"), IntentLabel::System);
        assert_eq!(heuristic_label("zxqv"), IntentLabel::Unknown);
    }

    #[test]
    fn test_collapse_whitespace_keeps_case() {
        assert_eq!(collapse_whitespace("  Hello   World \n"), "Hello World");
    }
}
