//! Chat snapshots and recipient resolution

use serde::{Deserialize, Serialize};

/// WhatsApp chat identifier (`<user>@<server>`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatId {
    pub server: String,
    /// Numeric user portion, e.g. `15551234567`
    pub user: String,
    #[serde(rename = "_serialized")]
    pub serialized: String,
}

impl ChatId {
    pub fn new(user: &str, server: &str) -> Self {
        Self {
            server: server.to_string(),
            user: user.to_string(),
            serialized: format!("{}@{}", user, server),
        }
    }
}

/// Read-only view of one entry in the session's chat list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "isGroup")]
    pub is_group: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageId {
    pub id: String,
    #[serde(default, rename = "_serialized")]
    pub serialized: String,
}

/// Acknowledgement returned by a send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub id: MessageId,
}

/// Strip `+` and whitespace so `+1 555 123 4567` compares against `15551234567`.
pub fn normalize_recipient(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != '+' && !c.is_whitespace())
        .collect()
}

/// Find the chat addressed by `recipient`.
///
/// An exact display-name match anywhere in the list wins; only when no name
/// matches is the normalized recipient compared to each chat's user portion.
pub fn find_chat<'a>(chats: &'a [Chat], recipient: &str) -> Option<&'a Chat> {
    if let Some(chat) = chats.iter().find(|c| c.name == recipient) {
        return Some(chat);
    }

    let normalized = normalize_recipient(recipient);
    if normalized.is_empty() {
        return None;
    }
    chats.iter().find(|c| c.id.user == normalized)
}
