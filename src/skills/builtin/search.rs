//! 搜索技能：清理查询词，生成可直接打开的搜索链接（不抓取网页）

use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;

use crate::intent::keywords::{contains_keyword, extract_search_query, SEARCH_KEYWORDS};
use crate::intent::{Classification, IntentLabel};
use crate::skills::{Priority, Skill, SkillContext, SkillError, SkillOutput};

/// (来源名, 查询端点, 查询参数名)
const ENGINES: &[(&str, &str, &str)] = &[
    ("Bing", "https://www.bing.com/search", "q"),
    ("DuckDuckGo", "https://duckduckgo.com/", "q"),
    ("Baidu", "https://www.baidu.com/s", "wd"),
];

#[derive(Debug, Clone, Serialize)]
pub struct SearchLink {
    pub source: String,
    pub url: String,
}

pub struct SearchSkill {
    max_results: usize,
}

impl Default for SearchSkill {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchSkill {
    pub fn new() -> Self {
        Self {
            max_results: ENGINES.len(),
        }
    }

    pub fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = max.clamp(1, ENGINES.len());
        self
    }

    /// 优先使用分类器提取的参数，否则从原话语中去掉搜索动词
    pub fn clean_query(classification: &Classification) -> String {
        let raw = match classification.parameter.as_deref() {
            Some(p) if !p.trim().is_empty() => p.to_string(),
            _ => {
                let stripped = extract_search_query(&classification.utterance);
                // 只剩下动词本身时视为空查询
                let lower = stripped.to_lowercase();
                if SEARCH_KEYWORDS.iter().any(|k| lower == *k)
                    || lower.trim_matches(|c: char| !c.is_alphanumeric()).is_empty()
                {
                    String::new()
                } else {
                    stripped
                }
            }
        };
        raw.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn links(&self, query: &str) -> Result<Vec<SearchLink>, SkillError> {
        ENGINES
            .iter()
            .take(self.max_results)
            .map(|(source, endpoint, param)| {
                Url::parse_with_params(endpoint, &[(*param, query)])
                    .map(|url| SearchLink {
                        source: source.to_string(),
                        url: url.to_string(),
                    })
                    .map_err(|e| SkillError::Execution(format!("invalid search url: {e}")))
            })
            .collect()
    }
}

#[async_trait]
impl Skill for SearchSkill {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Finds information: builds web search links for a cleaned query (e.g. \"search for rust tutorials\")"
    }

    fn priority(&self) -> Priority {
        Priority::High
    }

    fn can_handle(&self, classification: &Classification) -> bool {
        classification.label == IntentLabel::Search
    }

    async fn handle(
        &self,
        classification: &Classification,
        _context: &SkillContext,
    ) -> Result<SkillOutput, SkillError> {
        let query = Self::clean_query(classification);
        if query.is_empty() {
            return Err(SkillError::InvalidInput(
                "search query is empty, please say what to search for".into(),
            ));
        }

        let links = self.links(&query)?;
        let mut text = format!("Search results for \"{query}\":");
        for (i, link) in links.iter().enumerate() {
            text.push_str(&format!("\n{}. {}: {}", i + 1, link.source, link.url));
        }
        if contains_keyword(&classification.utterance.to_lowercase(), "latest")
            || classification.utterance.contains("最新")
        {
            text.push_str("\n(Tip: sort by date on the result page for the newest items.)");
        }

        Ok(SkillOutput::text(text).with_data(serde_json::json!({
            "query": query,
            "results": links,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search(utterance: &str, parameter: Option<&str>) -> Classification {
        Classification::new(IntentLabel::Search, 0.8, utterance)
            .with_parameter(parameter.map(str::to_string))
    }

    #[tokio::test]
    async fn test_links_are_url_encoded() {
        let skill = SearchSkill::new();
        let out = skill
            .handle(
                &search("search for python tutorials", Some("python tutorials")),
                &SkillContext::new(),
            )
            .await
            .unwrap();
        assert!(out.text.contains("\"python tutorials\""));
        assert!(out.text.contains("https://www.bing.com/search?q=python+tutorials"));
        let data = out.data.unwrap();
        assert_eq!(data["query"], "python tutorials");
        assert_eq!(data["results"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_falls_back_to_utterance() {
        let skill = SearchSkill::new().with_max_results(1);
        let out = skill
            .handle(&search("帮我找 Rust 教程", None), &SkillContext::new())
            .await
            .unwrap();
        assert!(out.text.contains("Rust 教程"));
        assert_eq!(out.data.unwrap()["results"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_query_fails() {
        let err = SearchSkill::new()
            .handle(&search("search", None), &SkillContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SkillError::InvalidInput(_)));
    }

    #[test]
    fn test_only_accepts_search() {
        let skill = SearchSkill::new();
        assert!(skill.can_handle(&search("find x", None)));
        assert!(!skill.can_handle(&Classification::new(IntentLabel::Chat, 0.5, "hi")));
    }
}
