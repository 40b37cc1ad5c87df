//! Session manager: maps Telegram chat IDs to active executor sessions
//! and manages their lifecycle (creation, reuse, death recovery,
//! inactivity expiry, shutdown).

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::executor::{EventReceiver, ExecutorFactory, SessionContext};

use super::{Session, StatusInfo};

/// Manager settings, resolved from the configuration file.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Directory under which every workspace lives.
    pub base_path: PathBuf,
    /// Workspace subdirectory used when no chat-map entry matches.
    pub default_workspace: String,
    /// Mapping from `@username` / username / title / decimal chat id to
    /// a workspace subdirectory.
    pub chat_map: HashMap<String, String>,
    /// Remove sessions after this long without a send. `None` disables
    /// expiry.
    pub inactivity_timeout: Option<Duration>,
    /// Optional identity document injected into new sessions.
    pub identity_path: Option<PathBuf>,
    /// Optional shared-memory document injected into new sessions.
    pub memory_path: Option<PathBuf>,
}

impl ManagerConfig {
    /// Build manager settings from the loaded configuration.
    #[must_use]
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            base_path: PathBuf::from(&cfg.workspaces.base_path),
            default_workspace: cfg.workspaces.default.clone(),
            chat_map: cfg.workspaces.chat_map.clone(),
            inactivity_timeout: cfg.session.inactivity_timeout(),
            identity_path: cfg.memory.identity_path.clone(),
            memory_path: cfg.memory.memory_path.clone(),
        }
    }
}

/// Maps chat IDs to active executor sessions.
///
/// The map lock is held only for lookups and inserts, never across a
/// send into a child process. Per-chat serialization is the session's
/// own `turn_lock`.
pub struct SessionManager {
    config: ManagerConfig,
    factory: ExecutorFactory,
    cancel: CancellationToken,
    sessions: Arc<Mutex<HashMap<i64, Arc<Session>>>>,
}

impl SessionManager {
    /// Create a session manager. `cancel` is the service scope: every
    /// executor is started under a child of it, and expiry timers end
    /// when it is cancelled.
    #[must_use]
    pub fn new(config: ManagerConfig, factory: ExecutorFactory, cancel: CancellationToken) -> Self {
        Self {
            config,
            factory,
            cancel,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Route a message to the session for the given chat, creating or
    /// replacing one as needed, and return the turn's event channel.
    ///
    /// `username` and `title` feed workspace resolution and may be empty.
    ///
    /// # Errors
    /// Fails when a fresh executor cannot start, when the stdin write
    /// fails, or when a replacement executor dies immediately.
    pub async fn send(
        &self,
        cancel: CancellationToken,
        chat_id: i64,
        username: &str,
        title: &str,
        message: &str,
    ) -> Result<EventReceiver> {
        // A dead executor is recovered at most once per call.
        for _ in 0..2 {
            let session = self.get_or_create(chat_id, username, title).await?;
            let turn = session.turn_lock.lock().await;

            if session.executor.alive() {
                let events = session.executor.send(cancel.clone(), message).await?;
                *session.last_activity.lock().await = Instant::now();
                drop(turn);
                return Ok(events);
            }

            drop(turn);
            log::warn!("executor for chat {chat_id} died, replacing");
            self.remove(chat_id).await;
        }

        Err(Error::session(format!(
            "replacement executor for chat {chat_id} died immediately"
        )))
    }

    /// Stop and remove any active session for the chat. The next message
    /// starts a fresh one. Idempotent.
    pub async fn reset(&self, chat_id: i64) {
        self.remove(chat_id).await;
    }

    /// Report the current session state for a chat.
    pub async fn status(&self, chat_id: i64) -> StatusInfo {
        let sessions = self.sessions.lock().await;
        match sessions.get(&chat_id) {
            Some(session) => StatusInfo {
                exists: true,
                workspace: Some(session.workspace.clone()),
                created_at: Some(session.created_at),
            },
            None => StatusInfo::default(),
        }
    }

    /// Stop every active session and clear the map. Blocks up to the
    /// per-executor shutdown grace for each session, then cancels the
    /// service scope so background timers terminate.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut map = self.sessions.lock().await;
            map.drain().map(|(_, session)| session).collect()
        };

        for session in sessions {
            log::info!("stopping session (chat {})", session.chat_id);
            if let Err(e) = session.executor.stop().await {
                log::warn!("stop executor for chat {}: {e}", session.chat_id);
            }
        }

        self.cancel.cancel();
    }

    /// Look up the session for a chat, creating and starting one when
    /// absent. Holding the map lock across `start` is fine: start is
    /// non-blocking beyond pipe and process setup.
    async fn get_or_create(
        &self,
        chat_id: i64,
        username: &str,
        title: &str,
    ) -> Result<Arc<Session>> {
        if let Some(session) = self.sessions.lock().await.get(&chat_id) {
            return Ok(Arc::clone(session));
        }

        // Workspace setup and context loading are filesystem work; do
        // them before taking the map lock.
        let workspace = self.resolve_workspace(chat_id, username, title)?;
        tokio::fs::create_dir_all(&workspace)
            .await
            .map_err(|e| Error::workspace(format!("create {}: {e}", workspace.display())))?;
        let context = self.load_context().await;

        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(&chat_id) {
            // Another task created the session while we prepared.
            return Ok(Arc::clone(session));
        }

        let executor = (self.factory)();
        executor
            .start(self.cancel.child_token(), &workspace, context)
            .await
            .map_err(|e| Error::session(format!("start executor for chat {chat_id}: {e}")))?;

        let session = Arc::new(Session {
            chat_id,
            workspace: workspace.clone(),
            executor,
            created_at: Utc::now(),
            turn_lock: Mutex::new(()),
            last_activity: Mutex::new(Instant::now()),
        });
        sessions.insert(chat_id, Arc::clone(&session));

        if let Some(timeout) = self.config.inactivity_timeout {
            self.spawn_expiry(Arc::clone(&session), timeout);
        }

        log::info!(
            "session created (chat {chat_id}, workspace {}, executor {})",
            workspace.display(),
            session.executor.name()
        );
        Ok(session)
    }

    async fn remove(&self, chat_id: i64) {
        let session = { self.sessions.lock().await.remove(&chat_id) };
        if let Some(session) = session {
            if let Err(e) = session.executor.stop().await {
                log::warn!("stop executor for chat {chat_id}: {e}");
            }
            log::info!("session removed (chat {chat_id})");
        }
    }

    /// Per-session inactivity timer. A successful send pushes the
    /// deadline forward; firing removes the session through the same
    /// path as an explicit reset, tolerating a concurrent one.
    fn spawn_expiry(&self, session: Arc<Session>, timeout: Duration) {
        let sessions = Arc::clone(&self.sessions);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                let deadline = *session.last_activity.lock().await + timeout;
                tokio::select! {
                    () = tokio::time::sleep_until(deadline) => {
                        if Instant::now() < *session.last_activity.lock().await + timeout {
                            // Touched while we slept.
                            continue;
                        }
                        let removed = {
                            let mut map = sessions.lock().await;
                            match map.get(&session.chat_id) {
                                Some(current) if Arc::ptr_eq(current, &session) => {
                                    map.remove(&session.chat_id);
                                    true
                                }
                                // Concurrently reset or already replaced.
                                _ => false,
                            }
                        };
                        if removed {
                            let _ = session.executor.stop().await;
                            log::info!("session expired (chat {})", session.chat_id);
                        }
                        return;
                    }
                    () = cancel.cancelled() => return,
                }
            }
        });
    }

    /// Map a chat to its workspace directory. Resolution order:
    /// 1. `@username` (chat-map key with or without the `@`)
    /// 2. chat title
    /// 3. decimal chat id
    /// 4. the configured default workspace
    ///
    /// # Errors
    /// Rejects any mapped name whose path would escape the base
    /// directory.
    fn resolve_workspace(&self, chat_id: i64, username: &str, title: &str) -> Result<PathBuf> {
        let name = self.lookup_workspace_name(chat_id, username, title);

        for component in Path::new(name).components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(Error::workspace(format!(
                        "mapped workspace {name:?} escapes the base directory"
                    )))
                }
            }
        }

        Ok(self.config.base_path.join(name))
    }

    fn lookup_workspace_name(&self, chat_id: i64, username: &str, title: &str) -> &str {
        if !username.is_empty() {
            let uname = username.trim_start_matches('@');
            if let Some(name) = self.config.chat_map.get(format!("@{uname}").as_str()) {
                return name;
            }
            if let Some(name) = self.config.chat_map.get(uname) {
                return name;
            }
        }
        if !title.is_empty() {
            if let Some(name) = self.config.chat_map.get(title) {
                return name;
            }
        }
        if let Some(name) = self.config.chat_map.get(chat_id.to_string().as_str()) {
            return name;
        }
        &self.config.default_workspace
    }

    /// Read the identity and shared-memory documents into the session
    /// context. Missing files are silently skipped; neither is
    /// required.
    async fn load_context(&self) -> SessionContext {
        let mut context = SessionContext::default();

        if let Some(path) = &self.config.identity_path {
            if let Ok(text) = tokio::fs::read_to_string(path).await {
                let text = text.trim();
                if !text.is_empty() {
                    context.identity = text.to_string();
                }
            }
        }
        if let Some(path) = &self.config.memory_path {
            if let Ok(text) = tokio::fs::read_to_string(path).await {
                let text = text.trim();
                if !text.is_empty() {
                    context.briefing = format!("---\n\n## Shared Memory\n\n{text}");
                }
            }
        }

        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{Executor, MockExecutor};

    fn manager_with_map(map: &[(&str, &str)]) -> SessionManager {
        let config = ManagerConfig {
            base_path: PathBuf::from("/srv/workspaces"),
            default_workspace: "home".to_string(),
            chat_map: map
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            inactivity_timeout: None,
            identity_path: None,
            memory_path: None,
        };
        SessionManager::new(
            config,
            Arc::new(|| Arc::new(MockExecutor::new()) as Arc<dyn Executor>),
            CancellationToken::new(),
        )
    }

    #[test]
    fn workspace_username_beats_title_and_id() {
        let mgr = manager_with_map(&[
            ("@alice", "alice-ws"),
            ("My Team", "team-ws"),
            ("1000", "id-ws"),
        ]);
        let path = mgr.resolve_workspace(1000, "alice", "My Team").unwrap();
        assert_eq!(path, PathBuf::from("/srv/workspaces/alice-ws"));
    }

    #[test]
    fn workspace_username_matches_without_at_key() {
        let mgr = manager_with_map(&[("bob", "bob-ws")]);
        let path = mgr.resolve_workspace(1, "@bob", "").unwrap();
        assert_eq!(path, PathBuf::from("/srv/workspaces/bob-ws"));
    }

    #[test]
    fn workspace_title_beats_id() {
        let mgr = manager_with_map(&[("My Team", "team-ws"), ("1000", "id-ws")]);
        let path = mgr.resolve_workspace(1000, "", "My Team").unwrap();
        assert_eq!(path, PathBuf::from("/srv/workspaces/team-ws"));
    }

    #[test]
    fn workspace_falls_back_to_chat_id_then_default() {
        let mgr = manager_with_map(&[("1000", "id-ws")]);
        assert_eq!(
            mgr.resolve_workspace(1000, "", "").unwrap(),
            PathBuf::from("/srv/workspaces/id-ws")
        );
        assert_eq!(
            mgr.resolve_workspace(9999, "", "").unwrap(),
            PathBuf::from("/srv/workspaces/home")
        );
    }

    #[test]
    fn workspace_rejects_parent_traversal() {
        let mgr = manager_with_map(&[("500", "../../etc")]);
        let err = mgr.resolve_workspace(500, "", "").unwrap_err();
        assert!(matches!(err, Error::Workspace(_)));
    }

    #[test]
    fn workspace_rejects_absolute_mapping() {
        let mgr = manager_with_map(&[("500", "/etc/passwd")]);
        let err = mgr.resolve_workspace(500, "", "").unwrap_err();
        assert!(matches!(err, Error::Workspace(_)));
    }

    #[test]
    fn workspace_allows_nested_subdirectory() {
        let mgr = manager_with_map(&[("500", "teams/zette")]);
        let path = mgr.resolve_workspace(500, "", "").unwrap();
        assert_eq!(path, PathBuf::from("/srv/workspaces/teams/zette"));
    }
}
