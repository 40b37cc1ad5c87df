//! Wire types for the Claude Code stream-json protocol.
//!
//! One JSON object per line in both directions. Outbound lines carry user
//! turns; inbound lines are classified by their top-level `type` field.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Outbound user turn, serialized as a single NDJSON line.
#[derive(Debug, Serialize)]
struct UserTurn<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    message: UserMessage<'a>,
}

#[derive(Debug, Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Serialize a user message to its stream-json line, newline included.
///
/// # Errors
/// Returns an error if serialization fails.
pub fn encode_user_turn(text: &str) -> Result<String> {
    let turn = UserTurn {
        kind: "user",
        message: UserMessage {
            role: "user",
            content: text,
        },
    };
    let mut line = serde_json::to_string(&turn)?;
    line.push('\n');
    Ok(line)
}

/// One decoded line of subprocess stdout.
#[derive(Debug, Deserialize)]
struct StreamLine {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    message: Option<serde_json::Value>,
    #[serde(default)]
    result: Option<serde_json::Value>,
}

/// What the reader should do with one stdout line.
#[derive(Debug, PartialEq, Eq)]
pub enum LineAction {
    /// `system`/`init` line carrying the agent-assigned session id.
    SessionInit(String),
    /// Incremental assistant text.
    Text(String),
    /// End of turn with the final text (possibly empty).
    Done(String),
    /// Unknown type, parse failure, or a line with nothing to emit.
    Ignore,
}

/// Classify a single NDJSON line from the agent's stdout.
///
/// Parse errors never propagate; malformed lines are logged and ignored
/// so a single bad line cannot take down the reader.
pub fn parse_line(line: &str) -> LineAction {
    let msg: StreamLine = match serde_json::from_str(line) {
        Ok(msg) => msg,
        Err(err) => {
            log::warn!("unparseable stream-json line: {err}");
            return LineAction::Ignore;
        }
    };

    match msg.kind.as_str() {
        "system" => {
            if msg.subtype.as_deref() == Some("init") {
                if let Some(id) = msg.session_id.filter(|id| !id.is_empty()) {
                    return LineAction::SessionInit(id);
                }
            }
            LineAction::Ignore
        }
        "assistant" => {
            let text = extract_text(msg.message.as_ref());
            if text.is_empty() {
                LineAction::Ignore
            } else {
                LineAction::Text(text)
            }
        }
        // A result line always closes the turn, even with no text.
        "result" => LineAction::Done(extract_text(msg.result.as_ref())),
        _ => LineAction::Ignore,
    }
}

#[derive(Debug, Deserialize)]
struct ContentMessage {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

/// Concatenate the `text` of every `text` content block, in order,
/// with no separator. Anything unparseable yields an empty string.
fn extract_text(raw: Option<&serde_json::Value>) -> String {
    let Some(raw) = raw else {
        return String::new();
    };

    let msg: ContentMessage = match serde_json::from_value(raw.clone()) {
        Ok(msg) => msg,
        Err(_) => return String::new(),
    };

    msg.content
        .iter()
        .filter(|block| block.kind == "text")
        .map(|block| block.text.as_str())
        .collect()
}
