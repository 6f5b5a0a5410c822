//! Configuration types.
//!
//! Values come from an optional `key=value` properties file, then from
//! environment variables, which win.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

use crate::channels::AuthorizedChats;
use crate::error::ConfigError;
use crate::mail::MailboxQuery;

/// Properties file read when `CONFIG_PATH` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config.properties";

/// Token value shipped in the sample properties file.
const PLACEHOLDER_TOKEN: &str = "YOUR_BOT_TOKEN_HERE";

/// Environment variable → properties key.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("TELEGRAM_BOT_TOKEN", "telegram.bot.token"),
    ("TELEGRAM_AUTHORIZED_CHAT_IDS", "telegram.authorized_chat_ids"),
    ("EMAIL_SERVER", "email.server"),
    ("EMAIL_PORT", "email.port"),
    ("EMAIL_ADDRESS", "email.address"),
    ("EMAIL_PASSWORD", "email.password"),
    ("EMAIL_FETCH_TIMEOUT", "email.fetch_timeout"),
    ("LOG_LEVEL", "log.level"),
];

/// Telegram bot settings.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    pub authorized_chats: AuthorizedChats,
}

/// Where the settings came from, for the startup log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSources {
    /// Properties file that was read, if it existed.
    pub file: Option<PathBuf>,
    /// Environment variables that overrode file values.
    pub env_overrides: Vec<&'static str>,
}

/// Complete bot configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub telegram: TelegramConfig,
    pub mailbox: MailboxQuery,
    /// Upper bound on one fetch run; unset means no bound.
    pub fetch_timeout: Option<Duration>,
    /// Filter directive used when `RUST_LOG` is unset.
    pub log_level: Option<String>,
    pub sources: ConfigSources,
}

impl AppConfig {
    /// Read `path` (a missing file is fine), apply process environment
    /// overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Like `load`, with an explicit environment lookup.
    pub fn load_with(
        path: impl AsRef<Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut sources = ConfigSources::default();

        let mut props = match std::fs::read_to_string(path) {
            Ok(text) => {
                sources.file = Some(path.to_path_buf());
                parse_properties(&text)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No properties file, using environment only");
                HashMap::new()
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        sources.env_overrides = apply_env_overrides(&mut props, lookup);

        let mut config = Self::from_properties(&props)?;
        config.sources = sources;
        Ok(config)
    }

    /// Build and validate from already-merged properties.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bot_token = required(props, "telegram.bot.token", "TELEGRAM_BOT_TOKEN")?;
        if bot_token == PLACEHOLDER_TOKEN {
            return Err(ConfigError::InvalidValue {
                key: "telegram.bot.token".into(),
                message: "still set to the placeholder value".into(),
            });
        }

        let chat_ids = required(
            props,
            "telegram.authorized_chat_ids",
            "TELEGRAM_AUTHORIZED_CHAT_IDS",
        )?;
        let authorized_chats = AuthorizedChats::parse_list(chat_ids);
        if authorized_chats.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "telegram.authorized_chat_ids".into(),
                message: format!("no valid chat ids in '{chat_ids}'"),
            });
        }

        let server = required(props, "email.server", "EMAIL_SERVER")?;
        let port_raw = required(props, "email.port", "EMAIL_PORT")?;
        let port: u16 = port_raw
            .parse()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "email.port".into(),
                message: format!("'{port_raw}' is not a valid port"),
            })?;
        let address = required(props, "email.address", "EMAIL_ADDRESS")?;
        let password = required(props, "email.password", "EMAIL_PASSWORD")?;

        let fetch_timeout = match optional(props, "email.fetch_timeout") {
            Some(raw) => {
                let secs: u64 = raw
                    .parse()
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or_else(|| ConfigError::InvalidValue {
                        key: "email.fetch_timeout".into(),
                        message: format!("'{raw}' is not a positive number of seconds"),
                    })?;
                Some(Duration::from_secs(secs))
            }
            None => None,
        };

        Ok(Self {
            telegram: TelegramConfig {
                bot_token: SecretString::from(bot_token.to_string()),
                authorized_chats,
            },
            mailbox: MailboxQuery {
                server: server.to_string(),
                port,
                address: address.to_string(),
                credential: SecretString::from(password.to_string()),
            },
            fetch_timeout,
            log_level: optional(props, "log.level").map(str::to_string),
            sources: ConfigSources::default(),
        })
    }
}

/// Parse `key=value` (or `key: value`) lines. `#` and `;` start comments,
/// `[section]` headers are skipped, keys are lowercased.
pub fn parse_properties(text: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut props = HashMap::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(['#', ';']) {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            continue;
        }

        let Some(split) = line.find(['=', ':']) else {
            return Err(ConfigError::ParseError {
                line: idx + 1,
                reason: format!("expected key=value, got '{line}'"),
            });
        };
        let key = line[..split].trim();
        if key.is_empty() {
            return Err(ConfigError::ParseError {
                line: idx + 1,
                reason: "empty key".into(),
            });
        }
        let value = line[split + 1..].trim();
        props.insert(key.to_ascii_lowercase(), value.to_string());
    }
    Ok(props)
}

/// Overwrite properties from the environment. Returns the variables applied.
fn apply_env_overrides(
    props: &mut HashMap<String, String>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Vec<&'static str> {
    let mut applied = Vec::new();
    for (var, key) in ENV_OVERRIDES {
        if let Some(value) = lookup(var) {
            props.insert((*key).to_string(), value.trim().to_string());
            applied.push(*var);
        }
    }
    applied
}

fn optional<'a>(props: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    props.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

fn required<'a>(
    props: &'a HashMap<String, String>,
    key: &str,
    env: &str,
) -> Result<&'a str, ConfigError> {
    optional(props, key).ok_or_else(|| ConfigError::MissingRequired {
        key: key.into(),
        hint: format!("Set {key} in the properties file or {env} in the environment."),
    })
}
