//! Failures surfaced by the chat view

/// Every failure the view shows to the user. None of these escape the view.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// Initial fetch failed; the previous list stays visible.
    #[error("Could not load messages: {0}")]
    Load(String),
    /// Text or voice send failed; the optimistic entry is gone.
    #[error("Message not sent: {0}")]
    Send(String),
    /// Microphone unavailable or denied; recording aborted.
    #[error("Microphone unavailable: {0}")]
    Permission(String),
    /// Push channel went offline; a reconnect is scheduled.
    #[error("Connection lost: {0}")]
    Connection(String),
}

impl ChatError {
    /// Whether the user can act on it (retry the load, resend).
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::Load(_) | ChatError::Send(_))
    }
}
