//! Last-seen markers per (conversation, user), kept on local disk
//!
//! Used only to compute unread badges; no other chat state is persisted.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::models::{ConversationId, Message};

#[derive(Debug, Default, Serialize, Deserialize)]
struct MarkerFile {
    #[serde(default)]
    last_seen: BTreeMap<String, DateTime<Utc>>,
}

/// Composite key of a marker.
pub fn marker_key(conversation: &ConversationId, user_id: &str) -> String {
    format!("last_seen:{}:{}", conversation, user_id)
}

/// Count messages from other users newer than `last_seen` (all of them
/// when the conversation was never seen).
pub fn unread_since(messages: &[Message], last_seen: Option<DateTime<Utc>>, user_id: &str) -> usize {
    messages
        .iter()
        .filter(|m| m.sender_id != user_id && !m.id.is_temporary())
        .filter(|m| last_seen.map_or(true, |seen| m.created_at > seen))
        .count()
}

pub struct ReadMarkers {
    path: Option<PathBuf>,
    file: MarkerFile,
}

impl ReadMarkers {
    /// Markers in the platform data directory.
    pub fn open_default() -> Result<Self> {
        Self::open(&Config::data_dir()?.join("read_markers.toml"))
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file = if path.exists() {
            let content = fs::read_to_string(path).context("Failed to read read markers")?;
            toml::from_str(&content).context("Failed to parse read markers")?
        } else {
            MarkerFile::default()
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            file,
        })
    }

    /// Markers that are never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            file: MarkerFile::default(),
        }
    }

    pub fn last_seen(&self, conversation: &ConversationId, user_id: &str) -> Option<DateTime<Utc>> {
        self.file
            .last_seen
            .get(&marker_key(conversation, user_id))
            .copied()
    }

    /// Advance the marker. Returns false if `at` is older than the stored one.
    pub fn mark_seen(&mut self, conversation: &ConversationId, user_id: &str, at: DateTime<Utc>) -> bool {
        let entry = self
            .file
            .last_seen
            .entry(marker_key(conversation, user_id))
            .or_insert(at);
        if *entry < at {
            *entry = at;
            true
        } else {
            *entry == at
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = match &self.path {
            Some(p) => p,
            None => return Ok(()),
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create data directory")?;
        }
        let content = toml::to_string_pretty(&self.file).context("Failed to serialize read markers")?;
        fs::write(path, content).context("Failed to write read markers")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageId, MessageKind};
    use chrono::Duration;

    fn msg(id: &str, sender: &str, at: DateTime<Utc>) -> Message {
        Message {
            id: MessageId::new(id),
            conversation_id: ConversationId::Match("1".to_string()),
            sender_id: sender.to_string(),
            body: "x".to_string(),
            kind: MessageKind::Text,
            voice_url: None,
            voice_duration: None,
            created_at: at,
            sender: None,
        }
    }

    #[test]
    fn test_key_format() {
        assert_eq!(
            marker_key(&ConversationId::Private("t".to_string()), "u1"),
            "last_seen:dm:t:u1"
        );
    }

    #[test]
    fn test_marker_only_moves_forward() {
        let conv = ConversationId::Match("1".to_string());
        let mut markers = ReadMarkers::in_memory();
        let t0 = Utc::now();
        assert!(markers.mark_seen(&conv, "u1", t0));
        assert!(!markers.mark_seen(&conv, "u1", t0 - Duration::seconds(10)));
        assert_eq!(markers.last_seen(&conv, "u1"), Some(t0));
        assert!(markers.last_seen(&conv, "u2").is_none());
        markers.save().unwrap();
    }

    #[test]
    fn test_unread_counts_foreign_messages_after_marker() {
        let t0 = Utc::now();
        let msgs = vec![
            msg("1", "other", t0 - Duration::seconds(30)),
            msg("2", "me", t0 + Duration::seconds(1)),
            msg("3", "other", t0 + Duration::seconds(2)),
            msg("temp-1", "other", t0 + Duration::seconds(3)),
        ];
        assert_eq!(unread_since(&msgs, Some(t0), "me"), 1);
        assert_eq!(unread_since(&msgs, None, "me"), 2);
    }

    #[test]
    fn test_markers_persist_to_disk() {
        let path = std::env::temp_dir().join(format!("matchchat-markers-{}.toml", uuid::Uuid::new_v4()));
        let conv = ConversationId::Match("42".to_string());
        let at = Utc::now();
        {
            let mut markers = ReadMarkers::open(&path).unwrap();
            markers.mark_seen(&conv, "u1", at);
            markers.save().unwrap();
        }
        let reopened = ReadMarkers::open(&path).unwrap();
        assert_eq!(reopened.last_seen(&conv, "u1"), Some(at));
        let _ = fs::remove_file(&path);
    }
}
