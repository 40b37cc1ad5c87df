use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use claude_telegram_agent::executor::{ClaudeExecutor, Executor};
use claude_telegram_agent::session::{ManagerConfig, SessionManager};
use claude_telegram_agent::telegram::{Bot, TelegramApi};
use claude_telegram_agent::Config;

#[derive(Parser, Debug)]
#[command(
    name = "claude-telegram-agent",
    version,
    about = "Telegram bridge for long-lived Claude Code agent subprocesses"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    log::info!("loading configuration from {}", cli.config.display());
    let cfg = Config::load(&cli.config)
        .await
        .with_context(|| format!("load configuration {}", cli.config.display()))?;

    let cancel = CancellationToken::new();

    let model = cfg.claude.model.clone();
    let binary = cfg.claude.binary.clone();
    let sessions = Arc::new(SessionManager::new(
        ManagerConfig::from_config(&cfg),
        Arc::new(move || -> Arc<dyn Executor> {
            match &binary {
                Some(path) => Arc::new(ClaudeExecutor::with_binary(model.clone(), path.clone())),
                None => Arc::new(ClaudeExecutor::new(model.clone())),
            }
        }),
        cancel.child_token(),
    ));

    let bot = Bot::new(
        Arc::new(TelegramApi::new(cfg.telegram.bot_token.clone())),
        Arc::clone(&sessions),
        &cfg.telegram.allowed_user_ids,
        cfg.session.edit_interval(),
    );

    log::info!(
        "bridge ready (model {}, {} allowed user(s))",
        cfg.claude.model,
        cfg.telegram.allowed_user_ids.len()
    );

    // The poll loop gets its own token: cancelling it must not cascade
    // into the executor scopes before the graceful stop below has run.
    let poll_cancel = cancel.child_token();
    let poll = {
        let bot = bot.clone();
        let poll_cancel = poll_cancel.clone();
        tokio::spawn(async move { bot.run(poll_cancel).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("wait for shutdown signal")?;
    log::info!("received ctrl-c, shutting down");

    // Stop accepting updates, then stop every agent subprocess.
    // shutdown() closes each child's stdin and waits out the grace
    // period before cancelling the manager scope itself.
    poll_cancel.cancel();
    let _ = poll.await;
    sessions.shutdown().await;

    log::info!("shutdown complete");
    Ok(())
}
