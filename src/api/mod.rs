//! Backend API: the chat contract and its HTTP implementation

pub mod client;
mod messages;

use std::future::Future;
use std::path::Path;

use anyhow::Result;
use tokio::sync::mpsc;

use crate::models::{ConversationId, Message, MessageKind};
use crate::realtime::{self, PushEvent, Subscription};
use crate::voice::VoiceClip;
use client::BaasClient;

pub use messages::{decode_row, format_message};

/// Operations the chat view needs from the backend.
///
/// Futures are `Send` so the view can run each call on its own task.
pub trait ChatBackend: Send + Sync + 'static {
    /// Full current history of a conversation, oldest first.
    fn get_messages(
        &self,
        conversation: &ConversationId,
    ) -> impl Future<Output = Result<Vec<Message>>> + Send;

    /// Persist a text message and return the canonical row.
    fn send_message(
        &self,
        conversation: &ConversationId,
        user_id: &str,
        body: &str,
        kind: MessageKind,
    ) -> impl Future<Output = Result<Message>> + Send;

    /// Upload a voice clip, persist the voice message and return it.
    fn send_voice_message(
        &self,
        conversation: &ConversationId,
        user_id: &str,
        clip: &VoiceClip,
        duration_secs: u32,
    ) -> impl Future<Output = Result<Message>> + Send;

    /// Start push delivery for a conversation. Events go to `sink` until the
    /// returned handle is unsubscribed or dropped.
    fn subscribe_to_messages(
        &self,
        conversation: &ConversationId,
        sink: mpsc::UnboundedSender<PushEvent>,
    ) -> Subscription;

    fn mark_as_read(
        &self,
        conversation: &ConversationId,
        user_id: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    fn get_unread_count(&self, user_id: &str) -> impl Future<Output = Result<u64>> + Send;
}

impl ChatBackend for BaasClient {
    async fn get_messages(&self, conversation: &ConversationId) -> Result<Vec<Message>> {
        messages::get_messages(self, conversation).await
    }

    async fn send_message(
        &self,
        conversation: &ConversationId,
        user_id: &str,
        body: &str,
        kind: MessageKind,
    ) -> Result<Message> {
        messages::send_message(self, conversation, user_id, body, kind).await
    }

    async fn send_voice_message(
        &self,
        conversation: &ConversationId,
        user_id: &str,
        clip: &VoiceClip,
        duration_secs: u32,
    ) -> Result<Message> {
        messages::send_voice_message(self, conversation, user_id, clip, duration_secs).await
    }

    fn subscribe_to_messages(
        &self,
        conversation: &ConversationId,
        sink: mpsc::UnboundedSender<PushEvent>,
    ) -> Subscription {
        realtime::subscribe(
            realtime::ChannelParams {
                url: self.realtime_url(),
                access_token: self.access_token().to_string(),
                conversation: conversation.clone(),
            },
            sink,
        )
    }

    async fn mark_as_read(&self, conversation: &ConversationId, user_id: &str) -> Result<()> {
        messages::mark_as_read(self, conversation, user_id).await
    }

    async fn get_unread_count(&self, user_id: &str) -> Result<u64> {
        messages::get_unread_count(self, user_id).await
    }
}

/// Print the messages of a conversation (CLI `read`).
pub async fn read_messages(conversation: &ConversationId, limit: usize) -> Result<()> {
    messages::read_messages(conversation, limit).await
}

/// Send a one-shot text message (CLI `send`).
pub async fn send_message(conversation: &ConversationId, body: &str, kind: MessageKind) -> Result<()> {
    messages::send_message_cli(conversation, body, kind).await
}

/// Upload and send a voice clip from disk (CLI `send-voice`).
pub async fn send_voice_file(
    conversation: &ConversationId,
    file: &Path,
    duration_secs: Option<u32>,
) -> Result<()> {
    messages::send_voice_file(conversation, file, duration_secs).await
}

/// Print the unread message count (CLI `unread`).
pub async fn unread() -> Result<()> {
    messages::unread().await
}

/// Mark a conversation read on the backend and locally (CLI `mark-read`).
pub async fn mark_read(conversation: &ConversationId) -> Result<()> {
    messages::mark_read(conversation).await
}
