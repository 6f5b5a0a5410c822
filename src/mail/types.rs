//! Mailbox query, search filter, and message types.

use secrecy::SecretString;

/// Where to find the mailbox and how to log in.
#[derive(Debug, Clone)]
pub struct MailboxQuery {
    /// IMAP server hostname (also used for TLS server name verification).
    pub server: String,
    /// IMAP port, normally 993 for implicit TLS.
    pub port: u16,
    /// Login address.
    pub address: String,
    /// Login password or app password.
    pub credential: SecretString,
}

/// Sender + subject substrings that identify the mail we care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailFilter {
    pub sender: &'static str,
    pub subject: &'static str,
}

impl MailFilter {
    /// Netflix "temporary access code" mails, which carry the travel verify link.
    pub const NETFLIX_ACCESS_CODE: MailFilter = MailFilter {
        sender: "info@account.netflix.com",
        subject: "Your Netflix temporary access code",
    };
}

/// One complete RFC 822 message as returned by `FETCH ... RFC822`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEmail(Vec<u8>);

impl RawEmail {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The parts of a message the formatter needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEmail {
    /// Decoded Subject header, or "No Subject".
    pub subject: String,
    /// From header as it appears in the message.
    pub sender: String,
    /// Date header text (RFC 2822), empty when absent.
    pub date_header: String,
    /// Plain-text body, trimmed.
    pub body: String,
}
