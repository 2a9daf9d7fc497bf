//! ICONNET Agent 命令行入口
//!
//! 从标准输入逐行读取问题，每行作为一轮对话交给 Agent，回答打印到标准输出。
//! 用法：`iconnet-agent [--config <path>] [--thread <id>] [-v]`
//! - `/thread <id>` 切换会话线程
//! - `/exit` 退出
//! - 轮次进行中按 Ctrl-C 取消当前轮（不保存）

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use iconnet_agent::config::{load_config, AppConfig};
use iconnet_agent::core::RecoveryEngine;
use iconnet_agent::react::TurnEvent;
use iconnet_agent::{observability, Agent};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "iconnet-agent")]
#[command(version, about = "ICONNET asset assistant: one stdin line per turn")]
struct Args {
    /// Extra config file layered over config/default.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Thread id to start on (default: [app].thread_id)
    #[arg(short, long)]
    thread: Option<String>,

    /// Print tool calls, observations and reflection verdicts to stderr
    #[arg(short, long)]
    verbose: bool,
}

/// 过程事件打印到 stderr
fn print_event(ev: &TurnEvent) {
    match ev {
        TurnEvent::ToolCall { tool, args, .. } => eprintln!("  -> {tool} {args}"),
        TurnEvent::Observation { tool, preview, is_error, .. } => {
            let mark = if *is_error { "!" } else { "<-" };
            eprintln!("  {mark} {tool}: {preview}");
        }
        TurnEvent::Reflection { verdict } => eprintln!("  [reflect] {}", verdict.critique),
        TurnEvent::Retry { retry_count, suggested_tool } => eprintln!(
            "  [retry {retry_count}] suggested: {}",
            suggested_tool.as_deref().unwrap_or("-")
        ),
        TurnEvent::AnswerOnlyMode { tool_rounds } => {
            eprintln!("  [answer-only after {tool_rounds} tool rounds]")
        }
        _ => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let args = Args::parse();

    let cfg = load_config(args.config).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    let mut thread_id = args.thread.unwrap_or_else(|| cfg.app.thread_id.clone());
    let agent = Agent::from_config(cfg).context("Failed to create agent")?;
    let recovery = RecoveryEngine::new();

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<TurnEvent>();
    let verbose = args.verbose;
    tokio::spawn(async move {
        while let Some(ev) = event_rx.recv().await {
            if verbose {
                print_event(&ev);
            }
        }
    });

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprintln!("ICONNET Agent siap. Thread: {thread_id}. Ketik /exit untuk keluar.");

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/exit" {
            break;
        }
        if let Some(id) = line.strip_prefix("/thread ") {
            thread_id = id.trim().to_string();
            eprintln!("Thread: {thread_id}");
            continue;
        }

        let token = CancellationToken::new();
        let run = agent.run_turn_with(&thread_id, line, token.clone(), Some(&event_tx));
        tokio::pin!(run);
        let result = tokio::select! {
            r = &mut run => r,
            _ = tokio::signal::ctrl_c() => {
                token.cancel();
                run.await
            }
        };

        let answer = match result {
            Ok(outcome) => outcome.answer,
            Err(e) => {
                tracing::error!(error = %e, "turn failed");
                recovery.user_message(&e)
            }
        };
        stdout.write_all(format!("{answer}\n").as_bytes()).await?;
        stdout.flush().await?;
    }

    let (prompt, completion, total) = agent.token_usage();
    tracing::info!(prompt, completion, total, "token usage");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn flags_parse() {
        let args = Args::parse_from(["iconnet-agent", "-c", "cfg.toml", "--thread", "user/42", "-v"]);
        assert_eq!(args.config, Some(PathBuf::from("cfg.toml")));
        assert_eq!(args.thread.as_deref(), Some("user/42"));
        assert!(args.verbose);

        let args = Args::parse_from(["iconnet-agent"]);
        assert!(args.config.is_none() && args.thread.is_none() && !args.verbose);
        assert!(Args::try_parse_from(["iconnet-agent", "--bogus"]).is_err());
    }
}
