//! Message rows: REST queries, inserts, voice uploads and read state

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de;
use serde::Deserialize;
use std::path::Path;

use super::client::BaasClient;
use super::ChatBackend;
use crate::chat::{classify_delivery_state, unread_since, ReadMarkers};
use crate::models::{ConversationId, Message, MessageId, MessageKind, Profile};
use crate::voice::{self, VoiceClip};

/// Columns fetched for every message, with the sender profile embedded.
const MESSAGE_SELECT: &str =
    "*,sender:profiles!sender_id(id,username,display_name,avatar_url)";

const VOICE_BUCKET: &str = "voice-messages";

fn string_or_number<'de, D: de::Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = String;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("string or integer id")
        }
        fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<String, E> {
            Ok(v.to_string())
        }
        fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<String, E> {
            Ok(v.to_string())
        }
        fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<String, E> {
            Ok(v.to_string())
        }
    }
    d.deserialize_any(Visitor)
}

/// A message row as returned by the REST and realtime surfaces.
#[derive(Debug, Deserialize)]
struct MessageRow {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    sender_id: String,
    content: Option<String>,
    message_type: Option<String>,
    voice_url: Option<String>,
    voice_duration: Option<u32>,
    created_at: DateTime<Utc>,
    /// Present only on REST reads (embedded join).
    sender: Option<Profile>,
}

impl MessageRow {
    fn into_message(self, conversation: &ConversationId) -> Message {
        let kind = match self.message_type.as_deref() {
            None => MessageKind::Text,
            Some(t) => t.parse().unwrap_or_else(|e| {
                tracing::debug!("{}; treating as text", e);
                MessageKind::Text
            }),
        };
        Message {
            id: MessageId::new(self.id),
            conversation_id: conversation.clone(),
            sender_id: self.sender_id,
            body: self.content.unwrap_or_default(),
            kind,
            voice_url: self.voice_url,
            voice_duration: self.voice_duration,
            created_at: self.created_at,
            sender: self.sender,
        }
    }
}

/// Decode a single JSON row into a message of `conversation`.
pub fn decode_row(value: serde_json::Value, conversation: &ConversationId) -> Result<Message> {
    let row: MessageRow = serde_json::from_value(value).context("Failed to decode message row")?;
    Ok(row.into_message(conversation))
}

/// `column=<operator expression>`, with the expression form-encoded.
fn query_pair(column: &str, expression: &str) -> String {
    format!(
        "{}={}",
        column,
        url::form_urlencoded::byte_serialize(expression.as_bytes()).collect::<String>()
    )
}

fn conversation_filter(conversation: &ConversationId) -> String {
    query_pair(conversation.column(), &format!("eq.{}", conversation.key()))
}

/// Unread rows from others in `conversation`.
fn mark_read_path(conversation: &ConversationId, user_id: &str) -> String {
    format!(
        "{}?{}&{}&read_at=is.null",
        conversation.table(),
        conversation_filter(conversation),
        query_pair("sender_id", &format!("neq.{}", user_id))
    )
}

async fn first_row(resp: reqwest::Response, conversation: &ConversationId) -> Result<Message> {
    let rows: Vec<MessageRow> = resp
        .json()
        .await
        .context("Failed to parse inserted message")?;
    let row = rows
        .into_iter()
        .next()
        .context("Insert returned no row")?;
    Ok(row.into_message(conversation))
}

pub async fn get_messages(client: &BaasClient, conversation: &ConversationId) -> Result<Vec<Message>> {
    let path = format!(
        "{}?{}&select={}&order=created_at.asc",
        conversation.table(),
        conversation_filter(conversation),
        MESSAGE_SELECT
    );
    let resp = client.rest_get(&path).await?;
    let rows: Vec<MessageRow> = resp
        .json()
        .await
        .context("Failed to parse messages response")?;

    Ok(rows
        .into_iter()
        .map(|r| r.into_message(conversation))
        .collect())
}

pub async fn send_message(
    client: &BaasClient,
    conversation: &ConversationId,
    user_id: &str,
    body: &str,
    kind: MessageKind,
) -> Result<Message> {
    let mut row = serde_json::json!({
        "sender_id": user_id,
        "content": body,
        "message_type": kind.as_str(),
    });
    row[conversation.column()] = conversation.key().into();
    let path = format!("{}?select={}", conversation.table(), MESSAGE_SELECT);
    let resp = client.rest_post(&path, &row).await?;
    first_row(resp, conversation).await
}

pub async fn send_voice_message(
    client: &BaasClient,
    conversation: &ConversationId,
    user_id: &str,
    clip: &VoiceClip,
    duration_secs: u32,
) -> Result<Message> {
    let object_path = format!(
        "{}/{}/{}.{}",
        conversation.key(),
        user_id,
        uuid::Uuid::new_v4(),
        clip.extension()
    );
    let voice_url = client
        .storage_upload(VOICE_BUCKET, &object_path, clip.data.clone(), &clip.mime)
        .await
        .context("Voice upload failed")?;

    let mut row = serde_json::json!({
        "sender_id": user_id,
        "content": "",
        "message_type": MessageKind::Voice.as_str(),
        "voice_url": voice_url,
        "voice_duration": duration_secs,
    });
    row[conversation.column()] = conversation.key().into();
    let path = format!("{}?select={}", conversation.table(), MESSAGE_SELECT);
    let resp = client.rest_post(&path, &row).await?;
    first_row(resp, conversation).await
}

pub async fn mark_as_read(
    client: &BaasClient,
    conversation: &ConversationId,
    user_id: &str,
) -> Result<()> {
    let path = mark_read_path(conversation, user_id);
    let body = serde_json::json!({ "read_at": Utc::now() });
    client.rest_patch(&path, &body).await?;
    Ok(())
}

pub async fn get_unread_count(client: &BaasClient, user_id: &str) -> Result<u64> {
    let resp = client
        .rpc("get_unread_count", &serde_json::json!({ "p_user_id": user_id }))
        .await?;
    resp.json::<u64>()
        .await
        .context("Failed to parse unread count")
}

// ---------------------------------------------------------------------------
// CLI commands
// ---------------------------------------------------------------------------

/// One transcript line for a message.
pub fn format_message(msg: &Message) -> String {
    let time = msg.created_at.with_timezone(&chrono::Local).format("%H:%M");
    let body = match msg.kind {
        MessageKind::Voice => match msg.voice_duration {
            Some(d) => format!("[voice {}s] {}", d, msg.voice_url.as_deref().unwrap_or("")),
            None => "[voice]".to_string(),
        },
        MessageKind::QuickAction => format!("[quick] {}", msg.body),
        _ => msg.body.clone(),
    };
    if msg.kind.is_notice() {
        format!("[{}] -- {} --", time, body)
    } else {
        format!(
            "[{}] {}: {} {}",
            time,
            msg.sender_label(),
            body,
            classify_delivery_state(msg).glyph()
        )
    }
}

pub async fn read_messages(conversation: &ConversationId, limit: usize) -> Result<()> {
    let client = BaasClient::new().await?;
    let msgs = client.get_messages(conversation).await?;

    if msgs.is_empty() {
        println!("(no messages)");
        return Ok(());
    }

    let markers = ReadMarkers::open_default()?;
    let last_seen = markers.last_seen(conversation, client.user_id());
    let unread = unread_since(&msgs, last_seen, client.user_id());

    let skip = msgs.len().saturating_sub(limit);
    for msg in &msgs[skip..] {
        println!("{}", format_message(msg));
    }
    if unread > 0 {
        println!("({} unread)", unread);
    }

    Ok(())
}

pub async fn send_message_cli(
    conversation: &ConversationId,
    body: &str,
    kind: MessageKind,
) -> Result<()> {
    let body = body.trim();
    anyhow::ensure!(!body.is_empty(), "Message body is empty");

    let client = BaasClient::new().await?;
    let msg = client
        .send_message(conversation, client.user_id(), body, kind)
        .await?;
    println!("Message sent ({}).", msg.id);
    Ok(())
}

pub async fn send_voice_file(
    conversation: &ConversationId,
    file: &Path,
    duration_secs: Option<u32>,
) -> Result<()> {
    let clip = VoiceClip::load(file)?;
    let duration = match duration_secs {
        Some(d) => d.max(1),
        None => voice::recorded_duration_secs(clip.wav_duration().unwrap_or_default()),
    };

    let client = BaasClient::new().await?;
    let msg = client
        .send_voice_message(conversation, client.user_id(), &clip, duration)
        .await?;
    println!("Voice message sent ({}, {}s).", msg.id, duration);
    Ok(())
}

pub async fn unread() -> Result<()> {
    let client = BaasClient::new().await?;
    let count = client.get_unread_count(client.user_id()).await?;
    println!("{} unread", count);
    Ok(())
}

pub async fn mark_read(conversation: &ConversationId) -> Result<()> {
    let client = BaasClient::new().await?;
    client.mark_as_read(conversation, client.user_id()).await?;

    let mut markers = ReadMarkers::open_default()?;
    markers.mark_seen(conversation, client.user_id(), Utc::now());
    markers.save()?;

    println!("Marked {} as read.", conversation);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv() -> ConversationId {
        ConversationId::Match("7".to_string())
    }

    #[test]
    fn test_decode_rest_row_with_embedded_sender() {
        let value = serde_json::json!({
            "id": 12,
            "match_id": "7",
            "sender_id": "u2",
            "content": "gg",
            "message_type": "quick_action",
            "voice_url": null,
            "voice_duration": null,
            "created_at": "2026-05-01T10:00:00Z",
            "sender": {"id": "u2", "username": "bo", "display_name": null, "avatar_url": null}
        });
        let msg = decode_row(value, &conv()).unwrap();
        assert_eq!(msg.id.as_str(), "12");
        assert_eq!(msg.kind, MessageKind::QuickAction);
        assert_eq!(msg.sender_label(), "bo");
        assert_eq!(msg.conversation_id, conv());
    }

    #[test]
    fn test_decode_realtime_record_without_sender() {
        let value = serde_json::json!({
            "id": "b3c1",
            "sender_id": "u2",
            "content": null,
            "message_type": "voice",
            "voice_url": "https://x/v.webm",
            "voice_duration": 4,
            "created_at": "2026-05-01T10:00:00.123+00:00"
        });
        let msg = decode_row(value, &conv()).unwrap();
        assert_eq!(msg.kind, MessageKind::Voice);
        assert_eq!(msg.voice_duration, Some(4));
        assert_eq!(msg.body, "");
        assert!(msg.sender.is_none());
        assert!(format_message(&msg).contains("[voice 4s]"));
    }

    #[test]
    fn test_unknown_kind_falls_back_to_text() {
        let value = serde_json::json!({
            "id": "1",
            "sender_id": "u2",
            "content": "hi",
            "message_type": "sticker",
            "created_at": "2026-05-01T10:00:00Z"
        });
        assert_eq!(decode_row(value, &conv()).unwrap().kind, MessageKind::Text);
    }

    #[test]
    fn test_conversation_filter_encodes_value() {
        assert_eq!(conversation_filter(&conv()), "match_id=eq.7");
        let dm = ConversationId::Private("a b".to_string());
        assert_eq!(conversation_filter(&dm), "thread_id=eq.a+b");
    }

    #[test]
    fn test_mark_read_path_encodes_user_id() {
        assert_eq!(
            mark_read_path(&conv(), "u1"),
            "messages?match_id=eq.7&sender_id=neq.u1&read_at=is.null"
        );
        assert_eq!(
            mark_read_path(&conv(), "a&read_at=not.is.null"),
            "messages?match_id=eq.7&sender_id=neq.a%26read_at%3Dnot.is.null&read_at=is.null"
        );
    }
}
