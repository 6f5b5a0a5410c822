//! Verification pipeline: mailbox fetch → decode → link extraction → reply.

pub mod extract;
pub mod processor;
pub mod types;

pub use processor::{CodeSource, MailboxCodeSource};
pub use types::{FetchOutcome, FormattedReply, LinkNotFound, ParseMode, Reply};
