//! Brain Agent 控制台
//!
//! 入口：初始化日志、加载配置、创建编排器与后台 worker，然后逐行读取标准输入。
//! 普通输入提交给 worker；以 / 开头的是控制台命令。Ctrl+C 取消进行中的请求。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use brain_agent::config::{load_config, AppConfig};
use brain_agent::core::{Command, Orchestrator, ProcessOutcome};
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "Commands: /stats  /skills  /clear  /cancel  /help  /quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    brain_agent::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let orchestrator = Arc::new(
        Orchestrator::bootstrap(&cfg)
            .await
            .context("Failed to create orchestrator")?,
    );
    let (cmd_tx, mut outcomes) = orchestrator.spawn_worker();

    println!("Brain Agent ready. {HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                let input = line.trim();
                match input {
                    "" => {}
                    "/quit" | "/exit" => break,
                    "/help" => println!("{HELP}"),
                    "/stats" => {
                        let stats = orchestrator.stats().await;
                        println!("{}", serde_json::to_string_pretty(&stats)?);
                    }
                    "/skills" => {
                        for skill in orchestrator.registry().list().await {
                            let state = if skill.enabled { "on " } else { "off" };
                            let priority = skill.priority.to_string();
                            println!(
                                "[{state}] {:<12} {:<8} used {:>3}x  {}",
                                skill.name, priority, skill.usage_count, skill.description
                            );
                        }
                    }
                    "/clear" => {
                        cmd_tx.send(Command::ClearCache).context("Worker stopped")?;
                        println!("Classification cache cleared.");
                    }
                    "/cancel" => cmd_tx.send(Command::Cancel).context("Worker stopped")?,
                    other if other.starts_with('/') => println!("Unknown command. {HELP}"),
                    utterance => cmd_tx
                        .send(Command::Submit(utterance.to_string()))
                        .context("Worker stopped")?,
                }
            }
            Some(outcome) = outcomes.recv() => print_outcome(&outcome),
            _ = tokio::signal::ctrl_c() => {
                cmd_tx.send(Command::Cancel).context("Worker stopped")?;
                println!("(cancelled)");
            }
        }
    }

    let _ = cmd_tx.send(Command::Quit);
    drop(cmd_tx);
    while let Some(outcome) = outcomes.recv().await {
        print_outcome(&outcome);
    }
    Ok(())
}

fn print_outcome(outcome: &ProcessOutcome) {
    println!("{}", outcome.response);
    let skill = outcome.matched_skill.as_deref().unwrap_or("none");
    let mut diag = format!(
        "  [{} {:.2} | skill={} | via {} | {} | {} ms]",
        outcome.label(),
        outcome.confidence(),
        skill,
        outcome.execution.executor,
        if outcome.success { "ok" } else { "failed" },
        outcome.elapsed_ms,
    );
    if !outcome.alternatives().is_empty() {
        diag.push_str(&format!(" alternatives: {}", outcome.alternatives().join(", ")));
    }
    println!("{diag}");
}
