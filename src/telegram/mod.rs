//! Telegram adapter: receives inbound messages, authorizes them, and
//! routes them to the session manager, streaming replies back through
//! the response assembler.

pub mod api;
pub mod markdown;
pub mod stream;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::session::SessionManager;

pub use api::{BotApi, Chat, IncomingMessage, ParseMode, TelegramApi, Update, User};

/// Server-side long-poll timeout.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Pause before retrying after a failed poll.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(2);

/// The bot: long-poll loop plus message routing.
pub struct Bot<A> {
    api: Arc<A>,
    sessions: Arc<SessionManager>,
    allowed: Arc<HashSet<i64>>,
    edit_interval: Duration,
}

impl<A> Clone for Bot<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            sessions: Arc::clone(&self.sessions),
            allowed: Arc::clone(&self.allowed),
            edit_interval: self.edit_interval,
        }
    }
}

impl<A: BotApi + 'static> Bot<A> {
    /// Create a bot wired to the given API client and session manager.
    #[must_use]
    pub fn new(
        api: Arc<A>,
        sessions: Arc<SessionManager>,
        allowed_user_ids: &[i64],
        edit_interval: Duration,
    ) -> Self {
        Self {
            api,
            sessions,
            allowed: Arc::new(allowed_user_ids.iter().copied().collect()),
            edit_interval,
        }
    }

    /// Long-poll for updates until `cancel` fires. Each accepted update
    /// is handled on its own task so chats proceed independently.
    pub async fn run(&self, cancel: CancellationToken) {
        log::info!("telegram bot starting long poll");
        let mut offset = 0_i64;

        loop {
            let updates = tokio::select! {
                () = cancel.cancelled() => return,
                result = self.api.get_updates(offset, POLL_TIMEOUT_SECS) => result,
            };

            match updates {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        let _ = self.dispatch(cancel.clone(), update);
                    }
                }
                Err(e) => {
                    log::error!("telegram polling failed: {e}");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                }
            }
        }
    }

    /// Authorize and route one update. Unauthorized senders are dropped
    /// without any reply; non-text messages are ignored.
    fn dispatch(
        &self,
        cancel: CancellationToken,
        update: Update,
    ) -> Option<tokio::task::JoinHandle<()>> {
        let message = update.message?;
        let from = message.from.as_ref()?;

        if !self.allowed.contains(&from.id) {
            log::warn!("unauthorized message from user {}", from.id);
            return None;
        }

        let text = message.text.clone().filter(|text| !text.is_empty())?;

        let bot = self.clone();
        Some(tokio::spawn(async move {
            if text.starts_with("/new") {
                bot.handle_new(message.chat.id).await;
            } else if text.starts_with("/status") {
                bot.handle_status(message.chat.id).await;
            } else {
                bot.handle_message(cancel, &message, &text).await;
            }
        }))
    }

    async fn handle_message(
        &self,
        cancel: CancellationToken,
        message: &IncomingMessage,
        text: &str,
    ) {
        let chat = &message.chat;
        if let Err(e) = self.api.send_typing(chat.id).await {
            log::debug!("send typing failed for chat {}: {e}", chat.id);
        }

        let username = chat.username.as_deref().unwrap_or("");
        let title = chat.title.as_deref().unwrap_or("");

        match self
            .sessions
            .send(cancel.clone(), chat.id, username, title, text)
            .await
        {
            Ok(events) => {
                stream::stream_response(
                    self.api.as_ref(),
                    &cancel,
                    chat.id,
                    events,
                    self.edit_interval,
                )
                .await;
            }
            Err(e) => {
                log::error!("session send failed for chat {}: {e}", chat.id);
                let _ = self
                    .api
                    .send_message(chat.id, "Something went wrong. Please try again.", None)
                    .await;
            }
        }
    }

    /// `/new`: clear the active session so the next message starts a
    /// fresh conversation.
    async fn handle_new(&self, chat_id: i64) {
        self.sessions.reset(chat_id).await;
        let _ = self
            .api
            .send_message(chat_id, "Session cleared. Starting fresh.", None)
            .await;
    }

    /// `/status`: report the active session's age and workspace.
    async fn handle_status(&self, chat_id: i64) {
        let info = self.sessions.status(chat_id).await;

        let text = match (info.created_at, info.workspace) {
            (Some(created), Some(workspace)) => {
                let age = Utc::now().signed_duration_since(created);
                format!(
                    "Active since {} ({} ago)\nWorkspace: {}",
                    created.format("%H:%M"),
                    format_age(age),
                    workspace.display()
                )
            }
            _ => "No active session. Send a message to start one.".to_string(),
        };

        let _ = self.api.send_message(chat_id, &text, None).await;
    }
}

/// Human-readable age string: "2h 5m", "5m 3s", "45s".
fn format_age(age: chrono::Duration) -> String {
    let secs = age.num_seconds().max(0);
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
