//! Fetch → decode → format, one run per request.
//!
//! `CodeSource` is the seam the bot calls through. `MailboxCodeSource` is
//! the real one: it runs the blocking IMAP fetch on the blocking pool and
//! turns every failure into a tagged `FetchOutcome`.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::mail::{self, MailFilter, MailboxQuery, RawEmail};
use crate::pipeline::extract::format_reply;
use crate::pipeline::types::FetchOutcome;

/// Something that can produce a verification outcome on demand.
#[async_trait]
pub trait CodeSource: Send + Sync {
    async fn fetch(&self) -> FetchOutcome;
}

/// Reads the newest matching email from an IMAP mailbox.
pub struct MailboxCodeSource {
    query: MailboxQuery,
    filter: MailFilter,
    timeout: Option<Duration>,
}

impl MailboxCodeSource {
    pub fn new(query: MailboxQuery, filter: MailFilter) -> Self {
        Self {
            query,
            filter,
            timeout: None,
        }
    }

    /// Bound the whole run. An expired run reports `FetchFailed`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl CodeSource for MailboxCodeSource {
    async fn fetch(&self) -> FetchOutcome {
        let run = run_pipeline(&self.query, self.filter);
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!(timeout_secs = limit.as_secs(), server = %self.query.server, "Email fetch timed out");
                    FetchOutcome::FetchFailed
                }
            },
            None => run.await,
        };
        debug!(outcome = outcome.label(), "Email fetch finished");
        outcome
    }
}

/// Run the full pipeline once against the mailbox.
pub async fn run_pipeline(query: &MailboxQuery, filter: MailFilter) -> FetchOutcome {
    let q = query.clone();
    let fetched =
        tokio::task::spawn_blocking(move || mail::fetch_latest_matching(&q, &filter)).await;

    let raw = match fetched {
        Ok(Ok(Some(raw))) => raw,
        Ok(Ok(None)) => {
            warn!(
                sender = filter.sender,
                subject = filter.subject,
                "No Netflix verification code emails found"
            );
            return FetchOutcome::NoMatchingEmail;
        }
        Ok(Err(e)) => {
            error!(error = %e, server = %query.server, port = query.port, "Error fetching email");
            return FetchOutcome::FetchFailed;
        }
        Err(e) => {
            error!("Email fetch task panicked: {e}");
            return FetchOutcome::FetchFailed;
        }
    };

    process_raw(&raw)
}

/// Decode and format an already-fetched message.
pub fn process_raw(raw: &RawEmail) -> FetchOutcome {
    let email = match mail::decode(raw) {
        Ok(email) => email,
        Err(e) => {
            error!(error = %e, bytes = raw.len(), "Failed to decode email");
            return FetchOutcome::FetchFailed;
        }
    };
    debug!(
        subject = %email.subject,
        sender = %email.sender,
        date = %email.date_header,
        "Decoded verification email"
    );

    match format_reply(&email) {
        Ok(formatted) => {
            info!(recipient = %formatted.recipient_name, "Verification link extracted");
            FetchOutcome::Verified(formatted)
        }
        Err(e) => {
            warn!(subject = %email.subject, "{e}");
            FetchOutcome::LinkNotFound
        }
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    fn raw(text: &str) -> RawEmail {
        RawEmail::new(text.as_bytes().to_vec())
    }

    #[test]
    fn process_raw_verified() {
        let outcome = process_raw(&raw(
            "From: info@account.netflix.com\n\
             Date: Mon, 01 Jan 2024 04:00:00 +0000\n\
             Content-Type: text/plain\n\n\
             Hi Maria,\nhttps://www.netflix.com/account/travel/verify?nftoken=abc\n",
        ));
        let FetchOutcome::Verified(formatted) = outcome else {
            panic!("expected Verified, got {outcome:?}");
        };
        assert_eq!(formatted.recipient_name, "Maria");
        assert_eq!(formatted.formatted_date, "Monday, 01 January 2024, 12:00 PM SGT");
    }

    #[test]
    fn process_raw_without_link() {
        let outcome = process_raw(&raw("From: info@account.netflix.com\n\nHi Maria,\nno link\n"));
        assert_eq!(outcome, FetchOutcome::LinkNotFound);
    }

    #[test]
    fn process_raw_undecodable_is_fetch_failed() {
        assert_eq!(process_raw(&raw("")), FetchOutcome::FetchFailed);
        assert_eq!(
            process_raw(&raw("hello world no headers")),
            FetchOutcome::FetchFailed
        );
    }

    #[tokio::test]
    async fn unreachable_mailbox_is_fetch_failed() {
        let query = MailboxQuery {
            server: "127.0.0.1".into(),
            port: 1,
            address: "bot@test.com".into(),
            credential: SecretString::from("pass".to_string()),
        };
        let source = MailboxCodeSource::new(query, MailFilter::NETFLIX_ACCESS_CODE)
            .with_timeout(Duration::from_secs(5));
        assert_eq!(source.fetch().await, FetchOutcome::FetchFailed);
    }
}
