//! Telegram bot: long-polls the Bot API for commands.
//!
//! Each accepted command runs on its own task: authorization check first,
//! then the command itself, then one reply to the originating chat.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::channels::auth::AuthorizedChats;
use crate::error::ChannelError;
use crate::messages;
use crate::pipeline::{CodeSource, Reply};

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Long-poll wait passed to getUpdates.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Back-off after a failed poll.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

// ── Commands ────────────────────────────────────────────────────────

/// Bot commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `/netflix_start`
    Start,
    /// `/netflix_help`
    Help,
    /// `/netflix_code`, or the legacy `/getCode`
    Code,
}

impl Command {
    /// Parse the leading `/command` of a message.
    ///
    /// Matching is case-insensitive. A `@botname` suffix must name this bot
    /// when `bot_username` is known.
    pub fn parse(text: &str, bot_username: Option<&str>) -> Option<Self> {
        let word = text.split_whitespace().next()?.strip_prefix('/')?;
        let (name, target) = match word.split_once('@') {
            Some((name, target)) => (name, Some(target)),
            None => (word, None),
        };

        if let (Some(target), Some(me)) = (target, bot_username)
            && !target.eq_ignore_ascii_case(me)
        {
            return None;
        }

        match name.to_ascii_lowercase().as_str() {
            "netflix_start" => Some(Command::Start),
            "netflix_help" => Some(Command::Help),
            "netflix_code" | "getcode" => Some(Command::Code),
            _ => None,
        }
    }
}

/// A parsed command and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCommand {
    pub chat_id: i64,
    pub username: Option<String>,
    pub command: Command,
}

// ── Bot API wire types ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    chat: Chat,
    #[serde(default)]
    from: Option<User>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct User {
    #[serde(default)]
    username: Option<String>,
}

// ── Bot ─────────────────────────────────────────────────────────────

/// Telegram front end for the verification pipeline.
pub struct TelegramBot {
    bot_token: SecretString,
    authorized: AuthorizedChats,
    source: Arc<dyn CodeSource>,
    client: reqwest::Client,
    username: OnceLock<String>,
}

impl TelegramBot {
    pub fn new(
        bot_token: SecretString,
        authorized: AuthorizedChats,
        source: Arc<dyn CodeSource>,
    ) -> Self {
        Self {
            bot_token,
            authorized,
            source,
            client: reqwest::Client::new(),
            username: OnceLock::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{method}",
            self.bot_token.expose_secret()
        )
    }

    /// Verify the token with getMe, then poll until the task is dropped.
    pub async fn run(self: Arc<Self>) -> crate::error::Result<()> {
        let username = self.health_check().await?;
        info!(bot = %username, "Telegram bot listening for commands...");
        let _ = self.username.set(username);

        let mut offset: i64 = 0;
        loop {
            let updates = match self.get_updates(offset).await {
                Ok(updates) => updates,
                Err(e) => {
                    warn!("Telegram poll error: {e}");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };

            for update in updates {
                // Advance offset past this update
                offset = offset.max(update.update_id + 1);

                let bot_username = self.username.get().map(String::as_str);
                let Some(incoming) = command_from_update(update, bot_username) else {
                    continue;
                };

                let bot = Arc::clone(&self);
                tokio::spawn(async move { bot.handle(incoming).await });
            }
        }
    }

    /// Run one command end to end and deliver the reply.
    async fn handle(&self, incoming: IncomingCommand) {
        if incoming.command == Command::Code && self.authorized.check(incoming.chat_id) {
            self.send_typing(incoming.chat_id).await;
        }

        let reply = self.reply_for(&incoming).await;
        if let Err(e) = self.send_message(incoming.chat_id, &reply).await {
            error!(chat_id = incoming.chat_id, "Failed to deliver reply: {e}");
        }
    }

    /// Authorization gate, then command dispatch.
    pub async fn reply_for(&self, incoming: &IncomingCommand) -> Reply {
        if !self.authorized.check(incoming.chat_id) {
            warn!(
                chat_id = incoming.chat_id,
                "Unauthorized access attempt from chat"
            );
            return Reply::markdown(messages::UNAUTHORIZED);
        }

        match incoming.command {
            Command::Start => Reply::markdown(messages::WELCOME),
            Command::Help => Reply::markdown(messages::HELP),
            Command::Code => {
                info!(
                    user = incoming.username.as_deref().unwrap_or("unknown"),
                    chat_id = incoming.chat_id,
                    "Fetching Netflix verification code"
                );
                self.source.fetch().await.into_reply()
            }
        }
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, ChannelError> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": POLL_TIMEOUT_SECS,
            "allowed_updates": ["message"]
        });

        let resp = self
            .client
            .post(self.api_url("getUpdates"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.without_url().to_string()))?;

        let data: ApiResponse<Vec<Update>> = resp
            .json()
            .await
            .map_err(|e| ChannelError::Http(format!("invalid getUpdates response: {}", e.without_url())))?;

        if !data.ok {
            return Err(ChannelError::Http(
                data.description
                    .unwrap_or_else(|| "getUpdates returned ok=false".into()),
            ));
        }
        Ok(data.result.unwrap_or_default())
    }

    /// Send a reply, trying its parse mode first with plain text fallback.
    /// Splits long messages that exceed Telegram's 4096 char limit.
    async fn send_message(&self, chat_id: i64, reply: &Reply) -> Result<(), ChannelError> {
        for chunk in split_message(&reply.text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            self.send_message_chunk(chat_id, &chunk, reply).await?;
        }
        Ok(())
    }

    async fn send_message_chunk(
        &self,
        chat_id: i64,
        text: &str,
        reply: &Reply,
    ) -> Result<(), ChannelError> {
        let formatted_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": reply.parse_mode.as_api_str()
        });

        let formatted_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&formatted_body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.without_url().to_string(),
            })?;

        if formatted_resp.status().is_success() {
            return Ok(());
        }

        let formatted_status = formatted_resp.status();
        let formatted_err = formatted_resp.text().await.unwrap_or_default();
        warn!(
            status = ?formatted_status,
            error = %formatted_err,
            "Telegram sendMessage with {} failed; retrying without parse_mode",
            reply.parse_mode.as_api_str()
        );

        let plain_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        let plain_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&plain_body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.without_url().to_string(),
            })?;

        if !plain_resp.status().is_success() {
            let plain_err = plain_resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!(
                    "sendMessage failed (formatted: {}, plain: {})",
                    formatted_status, plain_err
                ),
            });
        }

        Ok(())
    }

    /// Show "typing..." while the mailbox is queried. Failures are ignored.
    async fn send_typing(&self, chat_id: i64) {
        let _ = self
            .client
            .post(self.api_url("sendChatAction"))
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "action": "typing"
            }))
            .send()
            .await;
    }

    /// Call getMe and return the bot's username.
    async fn health_check(&self) -> Result<String, ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.without_url().to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: format!("getMe returned {}", resp.status()),
            });
        }

        let me: ApiResponse<User> = resp.json().await.map_err(|e| ChannelError::StartupFailed {
            name: "telegram".into(),
            reason: format!("invalid getMe response: {}", e.without_url()),
        })?;

        Ok(me
            .result
            .and_then(|u| u.username)
            .unwrap_or_else(|| "unknown".into()))
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Turn an update into a command, if it carries one.
fn command_from_update(update: Update, bot_username: Option<&str>) -> Option<IncomingCommand> {
    let message = update.message?;
    let command = Command::parse(message.text.as_deref()?, bot_username)?;
    Some(IncomingCommand {
        chat_id: message.chat.id,
        username: message.from.and_then(|u| u.username),
        command,
    })
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut limit = max_len;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }

        // Find a good split point
        let chunk = &remaining[..limit];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(limit);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { limit } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
