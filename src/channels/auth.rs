//! Chat authorization gate.
//!
//! The dispatcher calls `check` before running any command.

use std::collections::HashSet;

/// Telegram chat ids allowed to use the bot. Group chats have negative ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizedChats {
    ids: HashSet<i64>,
}

impl AuthorizedChats {
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// Parse a comma-separated id list. Entries that are not an optional
    /// `-` followed by digits are skipped.
    pub fn parse_list(raw: &str) -> Self {
        let mut ids = HashSet::new();
        for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let digits = entry.strip_prefix('-').unwrap_or(entry);
            let well_formed = !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit());
            match entry.parse::<i64>() {
                Ok(id) if well_formed => {
                    ids.insert(id);
                }
                _ => tracing::warn!(entry, "Ignoring invalid authorized chat id"),
            }
        }
        Self { ids }
    }

    pub fn check(&self, chat_id: i64) -> bool {
        self.ids.contains(&chat_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
