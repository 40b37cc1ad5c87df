//! Executor abstraction: the bridge between a chat session and one
//! long-lived agent subprocess.
//!
//! An [`Executor`] wraps a single child process. The session manager only
//! ever talks to this trait, so the agent kind behind a chat is swappable
//! (Claude Code in production, [`mock::MockExecutor`] in tests).

pub mod claude;
pub mod mock;
pub mod protocol;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

pub use claude::ClaudeExecutor;
pub use mock::MockExecutor;

/// Capacity of a per-turn event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A unit of streamed output from an executor.
#[derive(Debug)]
pub enum Event {
    /// Partial text content.
    Text(String),
    /// Response complete; carries the authoritative final text.
    Done(String),
    /// The turn failed or was cancelled.
    Error(Error),
}

/// Receiving end of a per-turn event stream. Closes when the turn is
/// complete (after a [`Event::Done`] or [`Event::Error`]) or when the
/// subprocess exits.
pub type EventReceiver = mpsc::Receiver<Event>;

/// Executor-agnostic context the session manager builds from the
/// configured identity and memory files. Each executor projects this
/// into whatever artifact its underlying agent expects.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    /// Identity document for the agent.
    pub identity: String,
    /// Shared-memory briefing.
    pub briefing: String,
    /// Recent conversation history, when supplied by external tooling.
    pub history: String,
}

impl SessionContext {
    /// True when the context carries no material at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identity.is_empty() && self.briefing.is_empty() && self.history.is_empty()
    }

    /// Combine the non-empty parts into a single prompt-ready document.
    #[must_use]
    pub fn render(&self) -> String {
        [&self.identity, &self.briefing, &self.history]
            .iter()
            .filter(|part| !part.is_empty())
            .map(|part| part.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Interface any CLI-based agent must implement.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Human-readable identifier ("claude", "mock", ...).
    fn name(&self) -> &'static str;

    /// Whether the underlying process is still running.
    fn alive(&self) -> bool;

    /// Spawn the underlying process in the given working directory.
    ///
    /// # Errors
    /// Fails if the executor is already running or the process cannot
    /// be spawned.
    async fn start(
        &self,
        cancel: CancellationToken,
        work_dir: &Path,
        context: SessionContext,
    ) -> Result<()>;

    /// Write a user message and return a channel of streaming events.
    /// The channel closes when the response is complete.
    ///
    /// Concurrent `send`s on the same executor are not supported; the
    /// session manager's per-chat lock enforces exclusivity.
    ///
    /// # Errors
    /// Fails if the executor is not running or the stdin write fails.
    async fn send(&self, cancel: CancellationToken, message: &str) -> Result<EventReceiver>;

    /// Gracefully shut down the process. Idempotent.
    ///
    /// # Errors
    /// Fails only on unexpected wait errors; a dead process is a no-op.
    async fn stop(&self) -> Result<()>;
}

/// Factory producing a fresh executor for a new session.
pub type ExecutorFactory = Arc<dyn Fn() -> Arc<dyn Executor> + Send + Sync>;
