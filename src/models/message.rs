//! Message-related models

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ConversationId, Profile};

/// Marker that distinguishes client-generated ids from backend-assigned ones.
pub const TEMP_ID_PREFIX: &str = "temp-";

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Message identifier: either final (assigned by the backend) or temporary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh temporary id: client clock in milliseconds plus a process-wide
    /// sequence, so two sends in the same millisecond still differ.
    pub fn temporary() -> Self {
        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        Self(format!(
            "{}{}-{}",
            TEMP_ID_PREFIX,
            Utc::now().timestamp_millis(),
            seq
        ))
    }

    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message kind, as stored in the `message_type` column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    QuickAction,
    Voice,
    System,
    JoinInfo,
    LeaveInfo,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::QuickAction => "quick_action",
            MessageKind::Voice => "voice",
            MessageKind::System => "system",
            MessageKind::JoinInfo => "join_info",
            MessageKind::LeaveInfo => "leave_info",
        }
    }

    /// Informational kinds rendered as centered notices rather than bubbles.
    pub fn is_notice(&self) -> bool {
        matches!(
            self,
            MessageKind::System | MessageKind::JoinInfo | MessageKind::LeaveInfo
        )
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "quick_action" => Ok(MessageKind::QuickAction),
            "voice" => Ok(MessageKind::Voice),
            "system" => Ok(MessageKind::System),
            "join_info" => Ok(MessageKind::JoinInfo),
            "leave_info" => Ok(MessageKind::LeaveInfo),
            other => Err(format!("unknown message kind: {}", other)),
        }
    }
}

/// Delivery state shown next to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Pending,
    Delivered,
}

impl DeliveryState {
    /// Glyph for the terminal transcript: spinner vs. double check.
    pub fn glyph(&self) -> &'static str {
        match self {
            DeliveryState::Pending => "…",
            DeliveryState::Delivered => "✓✓",
        }
    }
}

/// Chat message
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: String,
    pub body: String,
    pub kind: MessageKind,
    /// Set only once the voice upload completed.
    pub voice_url: Option<String>,
    /// Voice clip length in whole seconds.
    pub voice_duration: Option<u32>,
    pub created_at: DateTime<Utc>,
    /// Sender profile snapshot (denormalized for rendering).
    pub sender: Option<Profile>,
}

impl Message {
    /// Build the optimistic placeholder for a local send.
    pub fn optimistic(
        conversation_id: ConversationId,
        sender: &Profile,
        body: &str,
        kind: MessageKind,
    ) -> Self {
        Self {
            id: MessageId::temporary(),
            conversation_id,
            sender_id: sender.id.clone(),
            body: body.to_string(),
            kind,
            voice_url: None,
            voice_duration: None,
            created_at: Utc::now(),
            sender: Some(sender.clone()),
        }
    }

    /// Pure function of the id shape.
    pub fn delivery_state(&self) -> DeliveryState {
        if self.id.is_temporary() {
            DeliveryState::Pending
        } else {
            DeliveryState::Delivered
        }
    }

    /// Sender label for display.
    pub fn sender_label(&self) -> &str {
        self.sender
            .as_ref()
            .map(|p| p.label())
            .unwrap_or(&self.sender_id)
    }
}
