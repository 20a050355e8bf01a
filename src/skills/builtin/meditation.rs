//! 冥想技能：引导式呼吸练习；A2B / B2C / 自动 / 手动记忆编码交给外部编码流水线
//!
//! 编码流水线本身（对话记录 → 摘要 → 系统提示）不在本 crate 内，未接入时编码请求返回失败。

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::intent::keywords::contains_keyword;
use crate::intent::{Classification, IntentLabel};
use crate::skills::{Priority, Skill, SkillContext, SkillError, SkillOutput};

/// 记忆编码阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EncodingStage {
    /// 原始对话 → 短期记忆
    A2B,
    /// 短期记忆 → 长期记忆
    B2C,
    Auto,
    Manual,
}

impl std::fmt::Display for EncodingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EncodingStage::A2B => "A2B",
            EncodingStage::B2C => "B2C",
            EncodingStage::Auto => "auto",
            EncodingStage::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// 外部记忆编码流水线
#[async_trait]
pub trait EncodingPipeline: Send + Sync {
    async fn run(&self, stage: EncodingStage) -> Result<String, SkillError>;
}

static MINUTES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d{1,3})\s*(?:min|minutes|分钟)").unwrap());

const DEFAULT_MINUTES: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    Encode(EncodingStage),
    Session,
}

fn request(utterance: &str) -> Request {
    let lower = utterance.to_lowercase();
    let any = |words: &[&str]| words.iter().any(|w| contains_keyword(&lower, w));
    if any(&["a2b"]) {
        Request::Encode(EncodingStage::A2B)
    } else if any(&["b2c"]) {
        Request::Encode(EncodingStage::B2C)
    } else if any(&["自动编码", "auto encoding", "auto-encoding", "auto encode"]) {
        Request::Encode(EncodingStage::Auto)
    } else if any(&["手动编码", "manual encoding", "manual encode"]) {
        Request::Encode(EncodingStage::Manual)
    } else {
        Request::Session
    }
}

fn session_minutes(utterance: &str) -> u32 {
    MINUTES
        .captures(utterance)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|m| (1..=120).contains(m))
        .unwrap_or(DEFAULT_MINUTES)
}

fn session_text(minutes: u32) -> String {
    format!(
        "Meditation session started ({minutes} minutes). 🧘\n\
         1. Sit comfortably and close your eyes.\n\
         2. Breathe in through your nose for 4 seconds.\n\
         3. Hold for 7 seconds.\n\
         4. Breathe out slowly for 8 seconds.\n\
         5. Repeat, and gently bring your attention back whenever it wanders."
    )
}

#[derive(Default)]
pub struct MeditationSkill {
    pipeline: Option<Arc<dyn EncodingPipeline>>,
}

impl MeditationSkill {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pipeline(mut self, pipeline: Arc<dyn EncodingPipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }
}

#[async_trait]
impl Skill for MeditationSkill {
    fn name(&self) -> &str {
        "meditation"
    }

    fn description(&self) -> &str {
        "Guided breathing meditation and A2B / B2C memory encoding"
    }

    fn priority(&self) -> Priority {
        Priority::High
    }

    fn can_handle(&self, classification: &Classification) -> bool {
        classification.label == IntentLabel::Meditation
    }

    async fn handle(
        &self,
        classification: &Classification,
        _context: &SkillContext,
    ) -> Result<SkillOutput, SkillError> {
        match request(&classification.utterance) {
            Request::Session => {
                let minutes = session_minutes(&classification.utterance);
                Ok(SkillOutput::text(session_text(minutes))
                    .with_data(serde_json::json!({ "type": "session", "minutes": minutes })))
            }
            Request::Encode(stage) => {
                let pipeline = self.pipeline.as_ref().ok_or_else(|| {
                    SkillError::Unavailable(format!("memory encoding pipeline not configured ({stage})"))
                })?;
                tracing::info!(stage = %stage, "Running memory encoding");
                let output = pipeline.run(stage).await?;
                Ok(SkillOutput::text(format!("{stage} encoding finished.\n{output}"))
                    .with_data(serde_json::json!({ "type": "encoding", "stage": stage })))
            }
        }
    }
}
