//! Netflix code bot. Fetches the latest verification link from a mailbox
//! and posts it to authorized Telegram chats.

pub mod channels;
pub mod config;
pub mod error;
pub mod mail;
pub mod messages;
pub mod pipeline;
