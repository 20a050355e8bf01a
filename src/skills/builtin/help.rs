//! 帮助技能：按主题给出使用说明；skills 主题列出上下文中的已注册技能

use async_trait::async_trait;
use serde::Serialize;

use crate::intent::keywords::contains_keyword;
use crate::intent::{Classification, IntentLabel};
use crate::skills::{Priority, Skill, SkillContext, SkillError, SkillOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Search,
    Chat,
    Config,
    Meditation,
    System,
    Skills,
    General,
}

const TOPIC_CUES: &[(Topic, &[&str])] = &[
    (Topic::Search, &["搜索", "查找", "search", "find"]),
    (Topic::Chat, &["聊天", "对话", "chat", "conversation"]),
    (Topic::Config, &["配置", "设置", "config", "settings"]),
    (Topic::Meditation, &["冥想", "编码", "meditation", "encoding"]),
    (Topic::System, &["系统", "时间", "命令", "system", "time", "command"]),
    (Topic::Skills, &["技能", "插件", "功能", "skill", "skills", "plugin", "what can you do"]),
];

pub fn topic(utterance: &str) -> Topic {
    let lower = utterance.to_lowercase();
    TOPIC_CUES
        .iter()
        .find(|(_, cues)| cues.iter().any(|c| contains_keyword(&lower, c)))
        .map_or(Topic::General, |(t, _)| *t)
}

fn topic_text(topic: Topic) -> &'static str {
    match topic {
        Topic::Search => {
            "Search help:\n\
             - \"search <keywords>\" / \"搜索 <关键词>\"\n\
             - \"how to <question>\" / \"如何 <问题>\"\n\
             - \"latest <topic>\" / \"最新 <主题>\"\n\
             Tip: specific keywords give better links."
        }
        Topic::Chat => {
            "Chat help:\n\
             - greetings: \"hello\", \"你好\"\n\
             - goodbyes and thanks: \"bye\", \"谢谢\"\n\
             - feelings: \"I'm happy today\", \"有点难过\""
        }
        Topic::Config => {
            "Config help:\n\
             - \"set api key to sk-...\"\n\
             - \"set base_url to https://...\"\n\
             - \"show config\" / \"reset config\""
        }
        Topic::Meditation => {
            "Meditation help:\n\
             - \"start meditation\" for a guided breathing session\n\
             - \"A2B encoding\" / \"B2C encoding\" / \"auto encoding\" run the memory pipeline when it is available"
        }
        Topic::System => {
            "System help:\n\
             - \"what time is it\" / \"今天几号\"\n\
             - \"system info\"\n\
             - \"run command <name>\" (allow-listed commands only)"
        }
        Topic::Skills => "Registered skills:",
        Topic::General => {
            "I can search, chat, change settings, guide a meditation and answer time / system questions.\n\
             Ask \"help search\", \"help config\", \"help system\" or \"what skills do you have\" for details."
        }
    }
}

#[derive(Default)]
pub struct HelpSkill;

impl HelpSkill {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Skill for HelpSkill {
    fn name(&self) -> &str {
        "help"
    }

    fn description(&self) -> &str {
        "Usage help by topic, including the list of available skills"
    }

    fn priority(&self) -> Priority {
        Priority::Normal
    }

    fn can_handle(&self, classification: &Classification) -> bool {
        classification.label == IntentLabel::Help
    }

    async fn handle(
        &self,
        classification: &Classification,
        context: &SkillContext,
    ) -> Result<SkillOutput, SkillError> {
        let topic = topic(&classification.utterance);
        let mut text = topic_text(topic).to_string();

        if topic == Topic::Skills {
            if context.available_skills.is_empty() {
                text.push_str("\n(none)");
            }
            for s in &context.available_skills {
                let state = if s.enabled { "" } else { " [disabled]" };
                text.push_str(&format!(
                    "\n- {} ({}){}: {}",
                    s.name, s.priority, state, s.description
                ));
            }
        }

        Ok(SkillOutput::text(text).with_data(serde_json::json!({ "topic": topic })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::SkillDescriptor;

    #[test]
    fn test_topic_detection() {
        assert_eq!(topic("how do I search"), Topic::Search);
        assert_eq!(topic("怎么设置密钥"), Topic::Config);
        assert_eq!(topic("what can you do"), Topic::Skills);
        assert_eq!(topic("help"), Topic::General);
    }

    #[tokio::test]
    async fn test_skills_topic_lists_context() {
        let ctx = SkillContext::new().with_skills(vec![SkillDescriptor {
            name: "search".into(),
            description: "finds things".into(),
            priority: Priority::High,
            enabled: true,
            usage_count: 3,
        }]);
        let c = Classification::new(IntentLabel::Help, 0.8, "which skills are there");
        let out = HelpSkill::new().handle(&c, &ctx).await.unwrap();
        assert!(out.text.contains("- search (high): finds things"));
    }
}
