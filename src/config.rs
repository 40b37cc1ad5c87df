//! YAML configuration: credentials, session tuning, agent selection,
//! workspace mapping, and memory paths.
//!
//! Environment references (`$VAR` or `${VAR}`) are expanded before the
//! file is parsed, so secrets like the bot token can stay out of the
//! file itself.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Top-level configuration loaded from `config.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Telegram credentials and access control.
    pub telegram: TelegramConfig,
    /// Session timing knobs.
    pub session: SessionConfig,
    /// Claude Code agent selection.
    pub claude: ClaudeConfig,
    /// Workspace base path and chat mapping.
    pub workspaces: WorkspacesConfig,
    /// Identity / shared-memory documents.
    pub memory: MemoryConfig,
}

/// Telegram bot credentials and the user allow-list.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot API token from @BotFather.
    pub bot_token: String,
    /// User IDs allowed to talk to the bot. Everyone else is silently
    /// dropped.
    pub allowed_user_ids: Vec<i64>,
}

/// Session timing configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Interval between in-place message edits while streaming, in
    /// milliseconds. Default 2000.
    pub edit_interval_ms: u64,
    /// Remove a session after this many seconds without a message.
    /// 0 disables inactivity expiry.
    pub inactivity_timeout_secs: u64,
}

impl SessionConfig {
    /// Streaming edit interval as a duration.
    #[must_use]
    pub fn edit_interval(&self) -> Duration {
        Duration::from_millis(self.edit_interval_ms)
    }

    /// Inactivity timeout as a duration, `None` when disabled.
    #[must_use]
    pub fn inactivity_timeout(&self) -> Option<Duration> {
        (self.inactivity_timeout_secs > 0)
            .then(|| Duration::from_secs(self.inactivity_timeout_secs))
    }
}

/// Claude Code agent configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClaudeConfig {
    /// Model passed to `claude --model`. Default "sonnet".
    pub model: String,
    /// Explicit path to the `claude` binary; searched on PATH when
    /// unset.
    pub binary: Option<PathBuf>,
}

/// Workspace layout configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkspacesConfig {
    /// Directory under which all workspaces live. Required.
    pub base_path: String,
    /// Mapping from `@username` / username / chat title / decimal chat
    /// id to a workspace subdirectory.
    pub chat_map: HashMap<String, String>,
    /// Subdirectory used when nothing in `chat_map` matches. Default
    /// "home".
    pub default: String,
}

/// Identity and shared-memory document paths.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Identity document prepended to every new session's context.
    pub identity_path: Option<PathBuf>,
    /// Shared-memory document appended after the identity.
    pub memory_path: Option<PathBuf>,
}

impl Config {
    /// Read, expand, parse, and validate a configuration file.
    ///
    /// # Errors
    /// Fails when the file cannot be read, is not valid YAML, or fails
    /// validation.
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::invalid_config(format!("read {}: {e}", path.display())))?;
        Self::parse(&raw)
    }

    /// Parse configuration from a YAML string (after env expansion) and
    /// validate it.
    ///
    /// # Errors
    /// Fails on YAML errors or validation failures.
    pub fn parse(raw: &str) -> Result<Self> {
        let expanded = expand_env(raw);
        let mut cfg: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| Error::invalid_config(format!("parse config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check required fields and apply defaults.
    fn validate(&mut self) -> Result<()> {
        if self.telegram.bot_token.is_empty() {
            return Err(Error::invalid_config("telegram.bot_token is required"));
        }
        if self.telegram.allowed_user_ids.is_empty() {
            return Err(Error::invalid_config(
                "telegram.allowed_user_ids must have at least one entry",
            ));
        }
        if self.workspaces.base_path.is_empty() {
            return Err(Error::invalid_config("workspaces.base_path is required"));
        }

        if self.session.edit_interval_ms == 0 {
            self.session.edit_interval_ms = 2000;
        }
        if self.claude.model.is_empty() {
            self.claude.model = "sonnet".to_string();
        }
        if self.workspaces.default.is_empty() {
            self.workspaces.default = "home".to_string();
        }

        Ok(())
    }
}

/// Expand `$VAR` and `${VAR}` references from the process environment.
/// Unset variables expand to the empty string.
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        match chars.peek() {
            Some('{') => {
                chars.next();
                let mut name = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if closed && !name.is_empty() {
                    out.push_str(&std::env::var(&name).unwrap_or_default());
                } else {
                    // Malformed reference: keep it verbatim.
                    out.push_str("${");
                    out.push_str(&name);
                    if closed {
                        out.push('}');
                    }
                }
            }
            Some(c) if c.is_ascii_alphabetic() || *c == '_' => {
                let mut name = String::new();
                while let Some(c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || *c == '_' {
                        name.push(*c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&std::env::var(&name).unwrap_or_default());
            }
            _ => out.push('$'),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
telegram:
  bot_token: "123:abc"
  allowed_user_ids: [42]
workspaces:
  base_path: /srv/workspaces
"#;

    #[test]
    fn parse_minimal_applies_defaults() {
        let cfg = Config::parse(MINIMAL).unwrap();
        assert_eq!(cfg.session.edit_interval_ms, 2000);
        assert_eq!(cfg.session.inactivity_timeout(), None);
        assert_eq!(cfg.claude.model, "sonnet");
        assert_eq!(cfg.workspaces.default, "home");
    }

    #[test]
    fn parse_full() {
        let cfg = Config::parse(
            r#"
telegram:
  bot_token: "123:abc"
  allowed_user_ids: [42, 43]
session:
  edit_interval_ms: 500
  inactivity_timeout_secs: 3600
claude:
  model: opus
  binary: /usr/local/bin/claude
workspaces:
  base_path: /srv/workspaces
  default: shared
  chat_map:
    "@alice": alice
    "My Team": team
    "-1001234": group
memory:
  identity_path: /srv/identity.md
"#,
        )
        .unwrap();
        assert_eq!(cfg.telegram.allowed_user_ids, vec![42, 43]);
        assert_eq!(cfg.session.edit_interval(), Duration::from_millis(500));
        assert_eq!(
            cfg.session.inactivity_timeout(),
            Some(Duration::from_secs(3600))
        );
        assert_eq!(cfg.claude.model, "opus");
        assert_eq!(cfg.workspaces.chat_map.len(), 3);
        assert_eq!(
            cfg.memory.identity_path,
            Some(PathBuf::from("/srv/identity.md"))
        );
    }

    #[test]
    fn missing_token_rejected() {
        let err = Config::parse(
            r#"
telegram:
  allowed_user_ids: [42]
workspaces:
  base_path: /srv/workspaces
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("bot_token"));
    }

    #[test]
    fn missing_allow_list_rejected() {
        let err = Config::parse(
            r#"
telegram:
  bot_token: "123:abc"
workspaces:
  base_path: /srv/workspaces
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("allowed_user_ids"));
    }

    #[test]
    fn missing_base_path_rejected() {
        let err = Config::parse(
            r#"
telegram:
  bot_token: "123:abc"
  allowed_user_ids: [42]
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("base_path"));
    }

    #[test]
    fn env_expansion() {
        std::env::set_var("BRIDGE_TEST_TOKEN", "tok-123");
        let cfg = Config::parse(
            r#"
telegram:
  bot_token: "${BRIDGE_TEST_TOKEN}"
  allowed_user_ids: [42]
workspaces:
  base_path: /srv/workspaces
"#,
        )
        .unwrap();
        assert_eq!(cfg.telegram.bot_token, "tok-123");
    }

    #[test]
    fn expand_env_forms() {
        std::env::set_var("BRIDGE_TEST_VAR", "x");
        assert_eq!(expand_env("a $BRIDGE_TEST_VAR b"), "a x b");
        assert_eq!(expand_env("a ${BRIDGE_TEST_VAR} b"), "a x b");
        assert_eq!(expand_env("price: $5"), "price: $5");
        assert_eq!(expand_env("unset ${BRIDGE_TEST_UNSET_VAR} ."), "unset  .");
    }
}
