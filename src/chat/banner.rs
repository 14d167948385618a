//! Transient, auto-dismissing error banner

use std::time::{Duration, Instant};

use super::ChatError;

/// Shortest time an error stays visible.
pub const MIN_TTL: Duration = Duration::from_secs(1);

/// Holds the latest error until its display time runs out.
#[derive(Debug)]
pub struct Banner {
    ttl: Duration,
    current: Option<(ChatError, Instant)>,
}

impl Banner {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: ttl.max(MIN_TTL),
            current: None,
        }
    }

    /// Show `error`, replacing whatever was shown.
    pub fn show(&mut self, error: ChatError) {
        self.show_at(error, Instant::now());
    }

    pub fn show_at(&mut self, error: ChatError, now: Instant) {
        tracing::warn!("{}", error);
        self.current = Some((error, now + self.ttl));
    }

    /// Error still visible at `now`.
    pub fn current_at(&self, now: Instant) -> Option<&ChatError> {
        match &self.current {
            Some((err, until)) if now < *until => Some(err),
            _ => None,
        }
    }

    pub fn current(&self) -> Option<&ChatError> {
        self.current_at(Instant::now())
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}
