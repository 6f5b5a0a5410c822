//! Error types for the code fetcher bot.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration line {line}: {reason}")]
    ParseError { line: usize, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Failures reaching or talking to the IMAP server.
///
/// Every variant is a connection-class failure: the caller reports it and
/// decides whether to retry.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Could not connect to {server}:{port}: {reason}")]
    Connect {
        server: String,
        port: u16,
        reason: String,
    },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IMAP login failed for {address}: {reason}")]
    AuthFailed { address: String, reason: String },

    #[error("IMAP command {command} failed: {reason}")]
    Command { command: String, reason: String },

    #[error("IMAP protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raw message could not be parsed into headers and body.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Message is empty")]
    Empty,

    #[error("Malformed message: {0}")]
    Malformed(String),
}

/// Result type alias for the bot.
pub type Result<T> = std::result::Result<T, Error>;
