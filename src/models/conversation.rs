//! Conversation identifiers

use std::fmt;
use std::str::FromStr;

/// Key of a conversation: either a match chat or a private thread.
///
/// Written as `match:<id>` or `dm:<id>` on the command line; a bare id is a
/// match conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConversationId {
    Match(String),
    Private(String),
}

#[derive(Debug, thiserror::Error)]
#[error("invalid conversation id '{0}' (expected match:<id> or dm:<id>)")]
pub struct ParseConversationError(String);

impl ConversationId {
    /// Backend key without the kind prefix.
    pub fn key(&self) -> &str {
        match self {
            ConversationId::Match(id) | ConversationId::Private(id) => id,
        }
    }

    /// Table holding this conversation's messages.
    pub fn table(&self) -> &'static str {
        match self {
            ConversationId::Match(_) => "messages",
            ConversationId::Private(_) => "private_messages",
        }
    }

    /// Column that links a message row to its conversation.
    pub fn column(&self) -> &'static str {
        match self {
            ConversationId::Match(_) => "match_id",
            ConversationId::Private(_) => "thread_id",
        }
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationId::Match(id) => write!(f, "match:{}", id),
            ConversationId::Private(id) => write!(f, "dm:{}", id),
        }
    }
}

impl FromStr for ConversationId {
    type Err = ParseConversationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (kind, id) = match s.split_once(':') {
            Some((kind, id)) => (kind, id),
            None => ("match", s),
        };
        if id.is_empty() {
            return Err(ParseConversationError(s.to_string()));
        }
        match kind {
            "match" => Ok(ConversationId::Match(id.to_string())),
            "dm" | "private" => Ok(ConversationId::Private(id.to_string())),
            _ => Err(ParseConversationError(s.to_string())),
        }
    }
}
