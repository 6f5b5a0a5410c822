//! Shared types for the verification pipeline.

use crate::messages;

// ── Reply ───────────────────────────────────────────────────────────

/// Markup dialect the reply text is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Telegram MarkdownV2.
    MarkdownV2,
}

impl ParseMode {
    /// Value for the Bot API `parse_mode` field.
    pub fn as_api_str(self) -> &'static str {
        match self {
            ParseMode::MarkdownV2 => "MarkdownV2",
        }
    }
}

/// A message ready for delivery, tagged with how it must be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub parse_mode: ParseMode,
}

impl Reply {
    pub fn markdown(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parse_mode: ParseMode::MarkdownV2,
        }
    }
}

// ── Extraction results ──────────────────────────────────────────────

/// A verification link message built from one email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedReply {
    /// Link after `=3D` cleanup and percent-decoding.
    pub link: String,
    /// Name from the "Hi <name>," greeting, unescaped.
    pub recipient_name: String,
    /// Sent time in the target zone, or "Unknown".
    pub formatted_date: String,
    /// Full MarkdownV2 message.
    pub text: String,
}

/// The email body had no verification link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no verification link in email body")]
pub struct LinkNotFound;

// ── Outcome ─────────────────────────────────────────────────────────

/// Result of one fetch request, as seen by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Link found and formatted.
    Verified(FormattedReply),
    /// The mailbox search matched nothing.
    NoMatchingEmail,
    /// A matching email exists but carries no link.
    LinkNotFound,
    /// Connection, login, protocol or decode failure.
    FetchFailed,
}

impl FetchOutcome {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            FetchOutcome::Verified(_) => "verified",
            FetchOutcome::NoMatchingEmail => "no_matching_email",
            FetchOutcome::LinkNotFound => "link_not_found",
            FetchOutcome::FetchFailed => "fetch_failed",
        }
    }

    pub fn into_reply(self) -> Reply {
        match self {
            FetchOutcome::Verified(formatted) => Reply::markdown(formatted.text),
            FetchOutcome::NoMatchingEmail => Reply::markdown(messages::NO_MATCHING_EMAIL),
            FetchOutcome::LinkNotFound => Reply::markdown(messages::LINK_NOT_FOUND),
            FetchOutcome::FetchFailed => Reply::markdown(messages::FETCH_FAILED),
        }
    }
}
