//! Audible alert for new incoming messages

use std::io::Write;

use crate::models::Message;

/// Side effect fired for genuinely new messages from other users.
pub trait Notifier: Send {
    fn alert(&self, message: &Message);
}

/// Rings the terminal bell.
pub struct TerminalBell;

impl Notifier for TerminalBell {
    fn alert(&self, message: &Message) {
        tracing::debug!("Alert for {} from {}", message.id, message.sender_id);
        let mut out = std::io::stdout();
        let _ = out.write_all(b"\x07");
        let _ = out.flush();
    }
}
