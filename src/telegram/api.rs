//! Telegram Bot API boundary.
//!
//! [`BotApi`] is the narrow interface the adapter and assembler program
//! against; [`TelegramApi`] is the production implementation speaking
//! the HTTP Bot API with long polling.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Parse mode tag for outbound messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Telegram MarkdownV2.
    MarkdownV2,
}

impl ParseMode {
    /// Wire value of the parse mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MarkdownV2 => "MarkdownV2",
        }
    }
}

/// One long-poll update.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    /// Monotonic update identifier, used as the next poll offset.
    pub update_id: i64,
    /// The message payload, absent for non-message updates.
    #[serde(default)]
    pub message: Option<IncomingMessage>,
}

/// An inbound chat message.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    /// Platform message identifier.
    pub message_id: i64,
    /// Text content; absent for stickers, photos, and other non-text
    /// messages.
    #[serde(default)]
    pub text: Option<String>,
    /// Sender, absent for channel posts.
    #[serde(default)]
    pub from: Option<User>,
    /// The chat the message arrived on.
    pub chat: Chat,
}

/// A Telegram user.
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    /// Stable user identifier, matched against the allow-list.
    pub id: i64,
}

/// A Telegram chat.
#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    /// Stable chat identifier.
    pub id: i64,
    /// Public username without the `@`, when the chat has one.
    #[serde(default)]
    pub username: Option<String>,
    /// Display title for groups and channels.
    #[serde(default)]
    pub title: Option<String>,
}

/// The messaging-platform operations the bridge needs. Test doubles
/// implement this to observe outbound traffic.
#[async_trait]
pub trait BotApi: Send + Sync {
    /// Long-poll for updates after `offset`, waiting up to
    /// `timeout_secs` server-side.
    async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>>;

    /// Post a new message and return its message id.
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        parse_mode: Option<ParseMode>,
    ) -> Result<i64>;

    /// Edit a previously posted message in place.
    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        parse_mode: Option<ParseMode>,
    ) -> Result<()>;

    /// Emit a "typing" chat action.
    async fn send_typing(&self, chat_id: i64) -> Result<()>;
}

/// Production Bot API client.
pub struct TelegramApi {
    token: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: serde::Deserialize<'de>"))]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct GetUpdatesRequest {
    offset: i64,
    timeout: u64,
    allowed_updates: &'static [&'static str],
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct EditMessageRequest<'a> {
    chat_id: i64,
    message_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct ChatActionRequest {
    chat_id: i64,
    action: &'static str,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

impl TelegramApi {
    /// Create a client for the given bot token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{}", self.token, method)
    }

    /// POST one Bot API method and unwrap the enveloped result. API
    /// failures carry the server's description.
    async fn call<T, B>(&self, method: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + Sync,
    {
        let response = self
            .client
            .post(self.url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| Error::telegram(format!("{method} request failed: {e}")))?;

        let envelope: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| Error::telegram(format!("{method} decode failed: {e}")))?;

        if !envelope.ok {
            let description = envelope
                .description
                .unwrap_or_else(|| "returned not ok".to_string());
            return Err(Error::telegram(format!("{method}: {description}")));
        }

        envelope
            .result
            .ok_or_else(|| Error::telegram(format!("{method}: missing result")))
    }
}

#[async_trait]
impl BotApi for TelegramApi {
    async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            &GetUpdatesRequest {
                offset,
                timeout: timeout_secs,
                allowed_updates: &["message"],
            },
        )
        .await
    }

    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        parse_mode: Option<ParseMode>,
    ) -> Result<i64> {
        let sent: SentMessage = self
            .call(
                "sendMessage",
                &SendMessageRequest {
                    chat_id,
                    text,
                    parse_mode: parse_mode.map(ParseMode::as_str),
                },
            )
            .await?;
        Ok(sent.message_id)
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        parse_mode: Option<ParseMode>,
    ) -> Result<()> {
        let _: serde_json::Value = self
            .call(
                "editMessageText",
                &EditMessageRequest {
                    chat_id,
                    message_id,
                    text,
                    parse_mode: parse_mode.map(ParseMode::as_str),
                },
            )
            .await?;
        Ok(())
    }

    async fn send_typing(&self, chat_id: i64) -> Result<()> {
        let _: serde_json::Value = self
            .call(
                "sendChatAction",
                &ChatActionRequest {
                    chat_id,
                    action: "typing",
                },
            )
            .await?;
        Ok(())
    }
}
