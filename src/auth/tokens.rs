//! Session and token storage

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::models::Profile;

/// Stored access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub token: String,
    /// Unix seconds.
    pub expires_at: Option<i64>,
}

impl StoredToken {
    pub fn new(token: String, expires_in_secs: Option<u64>) -> Self {
        let expires_at = expires_in_secs.map(|secs| Utc::now().timestamp() + secs as i64);
        Self { token, expires_at }
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            // Consider expired if less than 1 minute remaining
            Some(exp) => Utc::now().timestamp() + 60 >= exp,
            None => false,
        }
    }
}

/// Authenticated session handed out by the backend's auth service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub access_token: StoredToken,
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub profile: Option<Profile>,
}

impl Session {
    /// Profile used for optimistic rendering of our own messages.
    pub fn local_profile(&self) -> Profile {
        self.profile.clone().unwrap_or_else(|| Profile {
            id: self.user_id.clone(),
            ..Default::default()
        })
    }
}

/// Session store trait for different storage backends
pub trait SessionStore {
    fn session(&self) -> Option<&Session>;
    fn set_session(&mut self, session: Session);
    fn clear_session(&mut self);
}
