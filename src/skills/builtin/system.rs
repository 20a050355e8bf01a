//! 系统技能：日期时间、平台信息、白名单命令
//!
//! 命令只取首词与白名单比对，参数中不允许出现 shell 元字符；不经过 shell 直接 spawn，带超时，
//! 超时或请求取消时子进程随 future 一起被 kill。

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Local, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;

use crate::config::SkillsSection;
use crate::intent::keywords::contains_keyword;
use crate::intent::{Classification, IntentLabel};
use crate::skills::{Priority, Skill, SkillContext, SkillError, SkillOutput};

/// 不论意图标签，出现即视为时间查询
const TIME_CUES: &[&str] = &[
    "今天几号", "现在几号", "今天日期", "现在日期", "现在时间", "几点", "星期几", "周几",
    "what time", "time is it", "what's the date", "what is the date", "what day is it",
    "today's date", "current time",
];

const SYSINFO_CUES: &[&str] = &[
    "系统信息", "系统版本", "操作系统", "平台信息", "system info", "system information",
    "os version", "operating system", "platform info",
];

const COMMAND_CUES: &[&str] = &["执行", "运行", "命令", "run", "execute", "command", "cmd", "shell"];

const FORBIDDEN_CHARS: &[char] = &[';', '|', '&', '>', '<', '`', '$', '(', ')', '\\', '\n'];

const MAX_OUTPUT_CHARS: usize = 4000;

static COMMAND_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:执行|运行|run|execute)\s*(?:the\s+)?(?:command\s*|命令\s*)?[:：]?\s*([A-Za-z][\w\-]*)(.*)$").unwrap()
});

fn has_cue(utterance: &str, cues: &[&str]) -> bool {
    let lower = utterance.to_lowercase();
    cues.iter().any(|c| contains_keyword(&lower, c))
}

fn weekday_name(day: Weekday, chinese: bool) -> &'static str {
    match (day, chinese) {
        (Weekday::Mon, true) => "星期一",
        (Weekday::Tue, true) => "星期二",
        (Weekday::Wed, true) => "星期三",
        (Weekday::Thu, true) => "星期四",
        (Weekday::Fri, true) => "星期五",
        (Weekday::Sat, true) => "星期六",
        (Weekday::Sun, true) => "星期日",
        (Weekday::Mon, false) => "Monday",
        (Weekday::Tue, false) => "Tuesday",
        (Weekday::Wed, false) => "Wednesday",
        (Weekday::Thu, false) => "Thursday",
        (Weekday::Fri, false) => "Friday",
        (Weekday::Sat, false) => "Saturday",
        (Weekday::Sun, false) => "Sunday",
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}\n...[truncated]", s.chars().take(max).collect::<String>())
    } else {
        s.to_string()
    }
}

pub struct SystemSkill {
    allowed_commands: HashSet<String>,
    timeout: Duration,
}

impl SystemSkill {
    pub fn new(allowed_commands: Vec<String>, timeout: Duration) -> Self {
        Self {
            allowed_commands: allowed_commands
                .into_iter()
                .map(|c| c.trim().to_lowercase())
                .filter(|c| !c.is_empty())
                .collect(),
            timeout,
        }
    }

    pub fn from_config(section: &SkillsSection) -> Self {
        Self::new(
            section.allowed_commands.clone(),
            Duration::from_secs(section.command_timeout_secs),
        )
    }

    fn time_answer(utterance: &str) -> SkillOutput {
        let now = Local::now();
        let chinese = utterance.chars().any(|c| ('\u{4e00}'..='\u{9fff}').contains(&c));
        let weekday = weekday_name(now.weekday(), chinese);
        let date = now.format("%Y-%m-%d").to_string();
        let time = now.format("%H:%M:%S").to_string();
        let text = if chinese {
            format!("📅 今天是 {date} {weekday}\n🕐 现在时间是 {time}")
        } else {
            format!("📅 Today is {weekday}, {date}\n🕐 The time is {time}")
        };
        SkillOutput::text(text).with_data(serde_json::json!({
            "date": date,
            "time": time,
            "weekday": weekday,
            "timestamp": now.timestamp(),
        }))
    }

    fn sysinfo_answer() -> SkillOutput {
        let host = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        let text = format!(
            "💻 System info:\n• OS: {} ({})\n• Architecture: {}\n• Hostname: {}\n• Assistant version: {}",
            std::env::consts::OS,
            std::env::consts::FAMILY,
            std::env::consts::ARCH,
            host,
            env!("CARGO_PKG_VERSION"),
        );
        SkillOutput::text(text).with_data(serde_json::json!({
            "os": std::env::consts::OS,
            "family": std::env::consts::FAMILY,
            "arch": std::env::consts::ARCH,
            "hostname": host,
        }))
    }

    /// 解析 "run <cmd> [args]"：返回命令名与参数
    fn parse_command(&self, utterance: &str) -> Result<(String, Vec<String>), SkillError> {
        let caps = COMMAND_PATTERN
            .captures(utterance.trim())
            .ok_or_else(|| SkillError::InvalidInput("no command found in the message".into()))?;
        let name = caps
            .get(1)
            .map(|m| m.as_str().to_lowercase())
            .unwrap_or_default();
        let rest = caps.get(2).map_or("", |m| m.as_str());

        if !self.allowed_commands.contains(&name) {
            return Err(SkillError::NotAllowed(format!("command '{name}' is not in the allow-list")));
        }
        if let Some(c) = rest.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
            return Err(SkillError::NotAllowed(format!("forbidden character {c:?} in arguments")));
        }
        let args = rest.split_whitespace().map(str::to_string).collect();
        Ok((name, args))
    }

    async fn run_command(&self, name: &str, args: &[String]) -> Result<SkillOutput, SkillError> {
        tracing::info!(command = %name, args = ?args, "system skill execute");

        let mut cmd = Command::new(name);
        cmd.args(args).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| SkillError::Timeout(format!("command timed out after {}s", self.timeout.as_secs())))?
            .map_err(|e| SkillError::Execution(format!("failed to start '{name}': {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(SkillError::Execution(format!(
                "'{name}' exited with {}: {}",
                output.status,
                truncate(stderr.trim(), MAX_OUTPUT_CHARS)
            )));
        }

        Ok(SkillOutput::text(format!(
            "✅ {name}:\n{}",
            truncate(stdout.trim_end(), MAX_OUTPUT_CHARS)
        ))
        .with_data(serde_json::json!({
            "command": name,
            "args": args,
            "exit_code": output.status.code(),
        })))
    }

    fn status_answer(&self) -> SkillOutput {
        let mut commands: Vec<&str> = self.allowed_commands.iter().map(String::as_str).collect();
        commands.sort_unstable();
        SkillOutput::text(format!(
            "System skill is ready: date/time, system info, and commands ({}).",
            commands.join(", ")
        ))
    }
}

#[async_trait]
impl Skill for SystemSkill {
    fn name(&self) -> &str {
        "system"
    }

    fn description(&self) -> &str {
        "Date and time, system information, and running allow-listed commands"
    }

    fn priority(&self) -> Priority {
        Priority::High
    }

    fn can_handle(&self, classification: &Classification) -> bool {
        classification.label == IntentLabel::System
            || has_cue(&classification.utterance, TIME_CUES)
            || has_cue(&classification.utterance, SYSINFO_CUES)
    }

    async fn handle(
        &self,
        classification: &Classification,
        _context: &SkillContext,
    ) -> Result<SkillOutput, SkillError> {
        let utterance = classification.utterance.as_str();
        if COMMAND_PATTERN.is_match(utterance) && has_cue(utterance, COMMAND_CUES)
        {
            let (name, args) = self.parse_command(utterance)?;
            return self.run_command(&name, &args).await;
        }
        if has_cue(utterance, SYSINFO_CUES) {
            return Ok(Self::sysinfo_answer());
        }
        if has_cue(utterance, TIME_CUES)
            || has_cue(utterance, &["date", "time", "today", "日期", "时间", "今天"])
        {
            return Ok(Self::time_answer(utterance));
        }
        Ok(self.status_answer())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skill() -> SystemSkill {
        SystemSkill::from_config(&SkillsSection::default())
    }

    fn system(utterance: &str) -> Classification {
        Classification::new(IntentLabel::System, 0.8, utterance)
    }

    #[test]
    fn test_can_handle_time_cue_under_other_label() {
        let s = skill();
        assert!(s.can_handle(&Classification::new(IntentLabel::Chat, 0.5, "what time is it")));
        assert!(s.can_handle(&Classification::new(IntentLabel::Unknown, 0.5, "今天几号")));
        assert!(!s.can_handle(&Classification::new(IntentLabel::Chat, 0.5, "how are you today")));
    }

    #[test]
    fn test_parse_command_allow_list() {
        let s = skill();
        assert_eq!(
            s.parse_command("run command uname -a").unwrap(),
            ("uname".to_string(), vec!["-a".to_string()])
        );
        assert!(matches!(s.parse_command("run rm -rf /"), Err(SkillError::NotAllowed(_))));
        assert!(matches!(s.parse_command("执行 ls; cat /etc/passwd"), Err(SkillError::NotAllowed(_))));
        assert!(matches!(s.parse_command("run"), Err(SkillError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_time_answer() {
        let out = skill()
            .handle(&system("what time is it"), &SkillContext::new())
            .await
            .unwrap();
        assert!(out.text.contains("The time is"));
        let data = out.data.unwrap();
        assert!(data["timestamp"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_sysinfo_answer() {
        let out = skill()
            .handle(&system("show system info"), &SkillContext::new())
            .await
            .unwrap();
        assert!(out.text.contains(std::env::consts::OS));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_allowed_command() {
        let out = skill()
            .handle(&system("run command pwd"), &SkillContext::new())
            .await
            .unwrap();
        assert!(out.text.starts_with("✅ pwd:"));
    }

    #[tokio::test]
    async fn test_rejects_disallowed_command() {
        let err = skill()
            .handle(&system("execute shutdown now"), &SkillContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SkillError::NotAllowed(_)));
    }
}
