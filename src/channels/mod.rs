//! Chat front ends.

pub mod auth;
pub mod telegram;

pub use auth::AuthorizedChats;
pub use telegram::{Command, IncomingCommand, TelegramBot};
