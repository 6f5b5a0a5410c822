//! Mailbox access: IMAP fetch and message decoding.

pub mod decode;
pub mod imap;
pub mod types;

pub use decode::decode;
pub use imap::fetch_latest_matching;
pub use types::{DecodedEmail, MailFilter, MailboxQuery, RawEmail};
