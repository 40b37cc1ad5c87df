//! Conversion of agent markdown output to Telegram MarkdownV2.
//!
//! Code fences are preserved with their language hint; inside a fence
//! only `\` and backtick need escaping. Inline code spans are preserved
//! the same way. `**bold**` becomes the single-asterisk MarkdownV2 bold
//! form. Every other special character is escaped so Telegram never
//! rejects the message.

/// Characters that must be escaped in MarkdownV2 plain text.
const SPECIAL: &str = "\\_*[]()~`>#+-=|{}.!";

fn is_special(c: char) -> bool {
    SPECIAL.contains(c)
}

/// Render agent output as Telegram MarkdownV2.
#[must_use]
pub fn format_markdown_v2(text: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut in_fence = false;

    for line in text.split('\n') {
        if line.starts_with("```") {
            in_fence = !in_fence;
            // Fence delimiters pass through unchanged.
            out.push(line.to_string());
            continue;
        }
        if in_fence {
            out.push(line.replace('\\', "\\\\").replace('`', "\\`"));
        } else {
            out.push(escape_line(line));
        }
    }

    // Close an unclosed fence so Telegram does not reject the message.
    if in_fence {
        out.push("```".to_string());
    }

    out.join("\n")
}

/// Escape a single plain-text line, preserving inline code spans and
/// converting `**bold**` spans.
fn escape_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len() * 2);
    let mut rest = line;

    while !rest.is_empty() {
        // Inline code span: `...`
        if let Some(after) = rest.strip_prefix('`') {
            if let Some(end) = after.find('`') {
                out.push('`');
                // Inside inline code only backslash needs escaping.
                out.push_str(&after[..end].replace('\\', "\\\\"));
                out.push('`');
                rest = &after[end + 1..];
            } else {
                // No closing backtick: emit it as a literal.
                out.push_str("\\`");
                rest = after;
            }
            continue;
        }

        // Bold span: **...** becomes *...* (MarkdownV2 bold)
        if let Some(after) = rest.strip_prefix("**") {
            if let Some(end) = after.find("**") {
                out.push('*');
                for c in after[..end].chars() {
                    if is_special(c) {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out.push('*');
                rest = &after[end + 2..];
            } else {
                // Unmatched **: escape both asterisks as literals.
                out.push_str("\\*\\*");
                rest = after;
            }
            continue;
        }

        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            if is_special(c) {
                out.push('\\');
            }
            out.push(c);
            rest = chars.as_str();
        }
    }

    out
}
