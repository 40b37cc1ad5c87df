//! # Telegram bridge for Claude Code agents
//!
//! A long-running service that connects Telegram chats to per-chat
//! Claude Code CLI subprocesses. Each chat gets its own persistent
//! agent session; replies stream back as a live-edited message.
//!
//! ## Architecture
//!
//! - [`executor`]: the subprocess bridge. One reader task per process
//!   multiplexes the agent's stream-json stdout into bounded per-turn
//!   event channels.
//! - [`session`]: the chat-id → session map with per-chat
//!   serialization, dead-executor recovery, optional inactivity
//!   expiry, and orderly shutdown.
//! - [`telegram`]: the platform adapter, response assembler, and
//!   MarkdownV2 escape transform.
//! - [`config`]: YAML configuration with environment expansion.
//! - [`error`]: error types and handling.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use claude_telegram_agent::executor::{ClaudeExecutor, Executor};
//! use claude_telegram_agent::session::{ManagerConfig, SessionManager};
//! use claude_telegram_agent::telegram::{Bot, TelegramApi};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(cfg: claude_telegram_agent::config::Config) {
//! let cancel = CancellationToken::new();
//! let model = cfg.claude.model.clone();
//! let sessions = Arc::new(SessionManager::new(
//!     ManagerConfig::from_config(&cfg),
//!     Arc::new(move || Arc::new(ClaudeExecutor::new(model.clone())) as Arc<dyn Executor>),
//!     cancel.child_token(),
//! ));
//! let bot = Bot::new(
//!     Arc::new(TelegramApi::new(cfg.telegram.bot_token.clone())),
//!     sessions,
//!     &cfg.telegram.allowed_user_ids,
//!     cfg.session.edit_interval(),
//! );
//! bot.run(cancel.clone()).await;
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod executor;
pub mod session;
pub mod telegram;

pub use config::Config;
pub use error::{Error, Result};
pub use executor::{ClaudeExecutor, Event, Executor, ExecutorFactory, MockExecutor};
pub use session::{ManagerConfig, SessionManager, StatusInfo};
pub use telegram::{Bot, BotApi, TelegramApi};

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
