//! Session state: the binding of one chat to one running executor.

pub mod manager;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::executor::Executor;

pub use manager::{ManagerConfig, SessionManager};

/// An active executor process bound to a Telegram chat.
///
/// The `turn_lock` serializes sends for this chat: it is held from the
/// moment the manager commits to this session until the executor has
/// handed back an event channel. Draining the channel happens outside
/// the lock, so later messages queue behind the current turn when they
/// try to obtain their own channel.
pub struct Session {
    pub(crate) chat_id: i64,
    pub(crate) workspace: PathBuf,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) turn_lock: Mutex<()>,
    pub(crate) last_activity: Mutex<Instant>,
}

/// Snapshot of a chat's session state, as reported by `/status`.
#[derive(Debug, Clone, Default)]
pub struct StatusInfo {
    /// Whether a session is currently mapped for the chat.
    pub exists: bool,
    /// Workspace directory of the session, if any.
    pub workspace: Option<PathBuf>,
    /// Creation timestamp of the session, if any.
    pub created_at: Option<DateTime<Utc>>,
}
