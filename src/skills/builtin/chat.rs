//! 聊天技能：问候、告别、感谢、情绪回应与闲聊
//!
//! 按话语线索判断消息类型，从固定模板中轮换选取回复；话语含中文时用中文模板。
//! reply_for 同时被编排器用于"无需技能"的直接回答。

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::Serialize;

use crate::intent::keywords::contains_keyword;
use crate::intent::{Classification, IntentLabel};
use crate::skills::{Priority, Skill, SkillContext, SkillError, SkillOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Greeting,
    Goodbye,
    Thanks,
    Happy,
    Sad,
    Angry,
    Casual,
}

/// 检查顺序即判定优先级
const CUES: &[(MessageKind, &[&str])] = &[
    (
        MessageKind::Greeting,
        &["你好", "嗨", "早上好", "下午好", "晚上好", "hello", "hi", "hey", "good morning", "good evening"],
    ),
    (MessageKind::Goodbye, &["再见", "拜拜", "晚安", "goodbye", "bye", "good night", "see you"]),
    (MessageKind::Thanks, &["谢谢", "感谢", "thank", "thanks", "thank you"]),
    (MessageKind::Happy, &["开心", "高兴", "快乐", "happy", "glad", "😊", "😄"]),
    (MessageKind::Sad, &["难过", "伤心", "悲伤", "sad", "upset", "😢", "😭"]),
    (MessageKind::Angry, &["生气", "愤怒", "angry", "mad", "😠", "😡"]),
];

pub fn analyze(utterance: &str) -> MessageKind {
    let lower = utterance.to_lowercase();
    CUES.iter()
        .find(|(_, cues)| cues.iter().any(|c| contains_keyword(&lower, c)))
        .map_or(MessageKind::Casual, |(kind, _)| *kind)
}

pub fn is_chinese(text: &str) -> bool {
    text.chars().any(|c| ('\u{4e00}'..='\u{9fff}').contains(&c))
}

fn templates(kind: MessageKind, chinese: bool) -> &'static [&'static str] {
    match (kind, chinese) {
        (MessageKind::Greeting, true) => &[
            "你好！😊 很高兴见到你！",
            "嗨！👋 今天过得怎么样？",
            "你好呀！✨ 有什么我可以帮你的吗？",
        ],
        (MessageKind::Greeting, false) => &[
            "Hello! 😊 Nice to see you!",
            "Hi there! 👋 How is your day going?",
            "Hey! ✨ What can I do for you?",
        ],
        (MessageKind::Goodbye, true) => &["再见！👋 期待下次聊天！", "拜拜！😊 记得保持好心情哦！"],
        (MessageKind::Goodbye, false) => &["Goodbye! 👋 Talk to you soon!", "Bye! 😊 Have a great day!"],
        (MessageKind::Thanks, true) => &["不客气！😊 很高兴能帮到你！", "应该的！✨ 有需要随时找我！"],
        (MessageKind::Thanks, false) => &["You're welcome! 😊", "Anytime! ✨ Glad I could help."],
        (MessageKind::Happy, true) => &["看到你开心我也很开心！😄", "太棒了！继续保持好心情！✨"],
        (MessageKind::Happy, false) => &["That's great to hear! 😄", "Love the good mood! ✨"],
        (MessageKind::Sad, true) => &["别难过，一切都会好起来的！🤗", "我在这里陪着你，想聊聊吗？💕"],
        (MessageKind::Sad, false) => &["Sorry to hear that, it will get better. 🤗", "I'm here if you want to talk. 💕"],
        (MessageKind::Angry, true) => &["冷静一下，深呼吸！😌", "我理解你的感受，需要聊聊吗？🤗"],
        (MessageKind::Angry, false) => &["Take a deep breath. 😌", "I understand, want to talk it through? 🤗"],
        (MessageKind::Casual, true) => &["嗯嗯，我在听！😊", "很有趣呢！继续说说看！✨", "我明白你的意思！👍"],
        (MessageKind::Casual, false) => &["I'm listening! 😊", "Interesting, tell me more! ✨", "I see what you mean! 👍"],
    }
}

/// 第 turn 次回复（同一类型按 turn 轮换）
pub fn reply_for(utterance: &str, turn: usize) -> String {
    let options = templates(analyze(utterance), is_chinese(utterance));
    options[turn % options.len()].to_string()
}

#[derive(Default)]
pub struct ChatSkill {
    turn: AtomicUsize,
}

impl ChatSkill {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Skill for ChatSkill {
    fn name(&self) -> &str {
        "chat"
    }

    fn description(&self) -> &str {
        "Small talk: greetings, goodbyes, thanks and emotional replies"
    }

    fn priority(&self) -> Priority {
        Priority::Normal
    }

    fn can_handle(&self, classification: &Classification) -> bool {
        classification.label == IntentLabel::Chat
    }

    async fn handle(
        &self,
        classification: &Classification,
        _context: &SkillContext,
    ) -> Result<SkillOutput, SkillError> {
        let turn = self.turn.fetch_add(1, Ordering::Relaxed);
        let kind = analyze(&classification.utterance);
        Ok(SkillOutput::text(reply_for(&classification.utterance, turn))
            .with_data(serde_json::json!({ "message_kind": kind })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze() {
        assert_eq!(analyze("hello"), MessageKind::Greeting);
        assert_eq!(analyze("谢谢你的帮助"), MessageKind::Thanks);
        assert_eq!(analyze("I am so sad today"), MessageKind::Sad);
        assert_eq!(analyze("this weather"), MessageKind::Casual);
    }

    #[test]
    fn test_reply_language_follows_utterance() {
        assert!(reply_for("hello", 0).starts_with("Hello"));
        assert!(reply_for("你好", 0).starts_with("你好"));
    }

    #[tokio::test]
    async fn test_replies_rotate() {
        let skill = ChatSkill::new();
        let c = Classification::new(IntentLabel::Chat, 0.8, "hello");
        let first = skill.handle(&c, &SkillContext::new()).await.unwrap();
        let second = skill.handle(&c, &SkillContext::new()).await.unwrap();
        assert_ne!(first.text, second.text);
        assert_eq!(first.data.unwrap()["message_kind"], "greeting");
    }
}
