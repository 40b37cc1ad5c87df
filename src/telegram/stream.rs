//! Streaming response assembler.
//!
//! Drains a turn's event channel into one Telegram message, edited in
//! place on a fixed cadence. Intermediate edits are plain text; the
//! final edit renders through the MarkdownV2 transform. Responses that
//! would overflow the platform's message ceiling are split into fresh
//! posts.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::executor::{Event, EventReceiver};

use super::api::{BotApi, ParseMode};
use super::markdown;

/// Telegram's message size ceiling, in runes.
const MAX_MESSAGE_RUNES: usize = 4096;

/// Shown when a turn fails before producing any output.
const ERROR_FALLBACK: &str = "An error occurred while processing your message.";

/// Drain `events` into a live-updated message on `chat_id`, editing at
/// most once per `edit_interval`. Returns when the turn completes, the
/// channel closes, or `cancel` fires.
pub async fn stream_response<A: BotApi + ?Sized>(
    api: &A,
    cancel: &CancellationToken,
    chat_id: i64,
    mut events: EventReceiver,
    edit_interval: Duration,
) {
    let mut message = MessageState {
        api,
        chat_id,
        buffer: String::new(),
        last_sent: String::new(),
        message_id: None,
    };
    let mut ticker = tokio::time::interval_at(Instant::now() + edit_interval, edit_interval);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(Event::Text(text)) => {
                    // If appending would overflow, close out the current
                    // message and start a fresh one.
                    if rune_count(&message.buffer) + rune_count(&text) > MAX_MESSAGE_RUNES {
                        message.flush(true).await;
                        message.buffer.clear();
                        message.last_sent.clear();
                        message.message_id = None;
                    }
                    message.buffer.push_str(&text);
                }
                Some(Event::Done(text)) => {
                    // The final text is authoritative when present.
                    if !text.is_empty() {
                        message.buffer = text;
                    }
                    message.flush(true).await;
                    return;
                }
                Some(Event::Error(err)) => {
                    log::error!("executor error for chat {chat_id}: {err}");
                    if message.buffer.is_empty() {
                        message.buffer.push_str(ERROR_FALLBACK);
                    }
                    message.flush(false).await;
                    return;
                }
                None => {
                    // Unexpected close counts as end-of-turn.
                    message.flush(true).await;
                    return;
                }
            },
            _ = ticker.tick() => message.flush(false).await,
            () = cancel.cancelled() => return,
        }
    }
}

struct MessageState<'a, A: BotApi + ?Sized> {
    api: &'a A,
    chat_id: i64,
    buffer: String,
    last_sent: String,
    message_id: Option<i64>,
}

impl<A: BotApi + ?Sized> MessageState<'_, A> {
    /// Post or edit the platform message to match the buffer. A no-op
    /// when the buffer is empty or the rendered text is unchanged.
    async fn flush(&mut self, final_edit: bool) {
        if self.buffer.is_empty() {
            return;
        }

        let (text, parse_mode) = if final_edit {
            (
                markdown::format_markdown_v2(&self.buffer),
                Some(ParseMode::MarkdownV2),
            )
        } else {
            (self.buffer.clone(), None)
        };

        if text == self.last_sent {
            return;
        }

        let text = clamp_message(text);

        match self.message_id {
            None => match self.api.send_message(self.chat_id, &text, parse_mode).await {
                Ok(id) => {
                    self.message_id = Some(id);
                    self.last_sent = text;
                }
                Err(e) => {
                    log::error!("send message failed for chat {}: {e}", self.chat_id);
                }
            },
            Some(id) => {
                match self
                    .api
                    .edit_message(self.chat_id, id, &text, parse_mode)
                    .await
                {
                    Ok(()) => self.last_sent = text,
                    // Rate-limit skew on edits is expected.
                    Err(e) => log::debug!("edit message failed for chat {}: {e}", self.chat_id),
                }
            }
        }
    }
}

fn rune_count(s: &str) -> usize {
    s.chars().count()
}

/// Truncate to the message ceiling, reserving three runes for an
/// ellipsis when truncation occurs.
fn clamp_message(text: String) -> String {
    if rune_count(&text) <= MAX_MESSAGE_RUNES {
        return text;
    }
    let mut out: String = text.chars().take(MAX_MESSAGE_RUNES - 3).collect();
    out.push_str("...");
    out
}
