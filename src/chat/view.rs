//! A mounted conversation: message list, delivery channels and teardown
//!
//! Every async source (send completions, push delivery, poll ticks) reports
//! back through a channel; `apply` handles one event at a time, so the
//! message list is only ever mutated from the task that owns the view.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::banner::Banner;
use super::engine::{renders_same, should_alert, MessageLog};
use super::error::ChatError;
use super::notify::{Notifier, TerminalBell};
use super::poller::Poller;
use super::read_markers::{unread_since, ReadMarkers};
use crate::api::ChatBackend;
use crate::config::Config;
use crate::models::{ConversationId, Message, MessageId, MessageKind, Profile};
use crate::realtime::{ConnectionStatus, PushEvent, Subscription};
use crate::voice::{self, AudioSource, CaptureError, VoiceClip, VoiceRecorder};

/// Per-view behaviour switches.
#[derive(Debug, Clone)]
pub struct ViewSettings {
    pub sound_enabled: bool,
    pub realtime_enabled: bool,
    pub poll_interval: Duration,
    pub banner_ttl: Duration,
}

impl From<&Config> for ViewSettings {
    fn from(config: &Config) -> Self {
        Self {
            sound_enabled: config.sound_enabled,
            realtime_enabled: config.realtime_enabled,
            poll_interval: config.poll_interval(),
            banner_ttl: config.error_banner_ttl(),
        }
    }
}

/// Something that happened off the view's task.
#[derive(Debug)]
pub enum ViewEvent {
    TextSent {
        temp_id: MessageId,
        result: Result<Message>,
    },
    VoiceSent(Result<Message>),
    Push(PushEvent),
    Polled(Result<Vec<Message>>),
}

/// What changed after applying an event, for the renderer.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Entry at `index` was added (`fresh`) or replaced in place.
    Message { index: usize, fresh: bool },
    Removed(MessageId),
    Status(ConnectionStatus),
    Error(ChatError),
}

pub struct ChatView<B: ChatBackend> {
    backend: Arc<B>,
    conversation: ConversationId,
    me: Profile,
    settings: ViewSettings,
    log: MessageLog,
    banner: Banner,
    connection: Option<ConnectionStatus>,
    notifier: Box<dyn Notifier>,
    markers: ReadMarkers,
    seen_at_mount: Option<DateTime<Utc>>,
    events_tx: mpsc::UnboundedSender<ViewEvent>,
    events_rx: mpsc::UnboundedReceiver<ViewEvent>,
    push_rx: Option<mpsc::UnboundedReceiver<PushEvent>>,
    poll_rx: Option<mpsc::UnboundedReceiver<Result<Vec<Message>>>>,
    subscription: Option<Subscription>,
    poller: Option<Poller>,
    recorder: Option<VoiceRecorder>,
    voice_in_flight: usize,
}

impl<B: ChatBackend> ChatView<B> {
    pub fn new(
        backend: Arc<B>,
        conversation: ConversationId,
        me: Profile,
        settings: ViewSettings,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let banner = Banner::new(settings.banner_ttl);
        Self {
            backend,
            conversation,
            me,
            settings,
            log: MessageLog::new(),
            banner,
            connection: None,
            notifier: Box::new(TerminalBell),
            markers: ReadMarkers::in_memory(),
            seen_at_mount: None,
            events_tx,
            events_rx,
            push_rx: None,
            poll_rx: None,
            subscription: None,
            poller: None,
            recorder: None,
            voice_in_flight: 0,
        }
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_markers(mut self, markers: ReadMarkers) -> Self {
        self.markers = markers;
        self
    }

    /// Load history, start delivery, and record the visit.
    pub async fn mount(&mut self) {
        tracing::info!("Mounting chat view for {}", self.conversation);
        self.seen_at_mount = self.markers.last_seen(&self.conversation, &self.me.id);

        // A failed load leaves the banner up; delivery still starts.
        let _ = self.load_initial().await;

        if self.settings.realtime_enabled {
            self.start_push();
        } else {
            self.start_polling();
        }
        self.mark_viewed();
    }

    /// Fetch the full history and replace the list. On failure the current
    /// list stays as it is and a load error is shown.
    pub async fn load_initial(&mut self) -> Result<(), ChatError> {
        match self.backend.get_messages(&self.conversation).await {
            Ok(messages) => {
                tracing::info!("Loaded {} messages for {}", messages.len(), self.conversation);
                self.log.replace_all(messages);
                if matches!(self.banner.current(), Some(ChatError::Load(_))) {
                    self.banner.clear();
                }
                Ok(())
            }
            Err(e) => {
                let err = ChatError::Load(format!("{:#}", e));
                self.banner.show(err.clone());
                Err(err)
            }
        }
    }

    /// Optimistically append a text message and send it in the background.
    /// Returns the temporary id, or `None` when there is nothing to send.
    pub fn send_text(&mut self, body: &str, kind: MessageKind) -> Option<MessageId> {
        let body = body.trim();
        if body.is_empty() || self.me.id.is_empty() {
            return None;
        }

        let message = Message::optimistic(self.conversation.clone(), &self.me, body, kind);
        let temp_id = self.log.insert_optimistic(message);
        tracing::debug!("Sending {} as {}", kind.as_str(), temp_id);

        let backend = Arc::clone(&self.backend);
        let conversation = self.conversation.clone();
        let user_id = self.me.id.clone();
        let body = body.to_string();
        let tx = self.events_tx.clone();
        let id = temp_id.clone();
        tokio::spawn(async move {
            let result = backend
                .send_message(&conversation, &user_id, &body, kind)
                .await;
            let _ = tx.send(ViewEvent::TextSent {
                temp_id: id,
                result,
            });
        });

        Some(temp_id)
    }

    /// Upload and send a voice clip. No placeholder is shown; the message
    /// joins the list through the merge path once the backend accepts it.
    pub fn send_voice(&mut self, clip: VoiceClip, duration_secs: u32) -> bool {
        if self.me.id.is_empty() {
            return false;
        }
        let duration_secs = duration_secs.max(1);
        self.voice_in_flight += 1;

        let backend = Arc::clone(&self.backend);
        let conversation = self.conversation.clone();
        let user_id = self.me.id.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = backend
                .send_voice_message(&conversation, &user_id, &clip, duration_secs)
                .await;
            let _ = tx.send(ViewEvent::VoiceSent(result));
        });
        true
    }

    /// Acquire the audio source and start timing. Fails with a permission
    /// error (and a banner) when the source cannot be opened.
    pub fn start_recording(&mut self, source: Box<dyn AudioSource>) -> Result<(), ChatError> {
        if self.recorder.is_some() {
            return Ok(());
        }
        match VoiceRecorder::start(source) {
            Ok(recorder) => {
                self.recorder = Some(recorder);
                Ok(())
            }
            Err(e) => Err(self.capture_failed(e)),
        }
    }

    /// Record from the platform microphone.
    pub fn start_microphone(&mut self) -> Result<(), ChatError> {
        match voice::default_microphone() {
            Ok(mic) => self.start_recording(mic),
            Err(e) => Err(self.capture_failed(e)),
        }
    }

    fn capture_failed(&mut self, e: CaptureError) -> ChatError {
        let reason = match e {
            CaptureError::Denied(r) | CaptureError::Failed(r) => r,
        };
        let err = ChatError::Permission(reason);
        self.banner.show(err.clone());
        err
    }

    /// Stop the current recording and send it.
    pub fn stop_recording(&mut self) -> Result<(), ChatError> {
        let recorder = match self.recorder.take() {
            Some(r) => r,
            None => return Ok(()),
        };
        match recorder.stop() {
            Ok((clip, secs)) => {
                self.send_voice(clip, secs);
                Ok(())
            }
            Err(e) => {
                let err = ChatError::Send(e.to_string());
                self.banner.show(err.clone());
                Err(err)
            }
        }
    }

    pub fn cancel_recording(&mut self) {
        self.recorder.take();
    }

    /// Wait for the next event from any background source.
    pub async fn next_event(&mut self) -> Option<ViewEvent> {
        tokio::select! {
            Some(event) = self.events_rx.recv() => Some(event),
            Some(event) = recv_opt(&mut self.push_rx) => Some(ViewEvent::Push(event)),
            Some(batch) = recv_opt(&mut self.poll_rx) => Some(ViewEvent::Polled(batch)),
            else => None,
        }
    }

    /// Apply one event to the list.
    pub fn apply(&mut self, event: ViewEvent) -> Vec<Update> {
        match event {
            ViewEvent::TextSent { temp_id, result } => match result {
                Ok(canonical) => {
                    // Set when the push echo already replaced the temporary entry.
                    let echoed = match self.log.get(&temp_id) {
                        Some(_) => None,
                        None => self.log.get(&canonical.id).cloned(),
                    };
                    let index = self.log.confirm(&temp_id, canonical);
                    let confirmed = &self.log.messages()[index];
                    if echoed.is_some_and(|prev| renders_same(&prev, confirmed)) {
                        return Vec::new();
                    }
                    vec![Update::Message {
                        index,
                        fresh: false,
                    }]
                }
                Err(e) => {
                    let mut updates = Vec::new();
                    if self.log.discard(&temp_id) {
                        updates.push(Update::Removed(temp_id));
                    }
                    updates.push(self.fail(ChatError::Send(format!("{:#}", e))));
                    updates
                }
            },
            ViewEvent::VoiceSent(result) => {
                self.voice_in_flight = self.voice_in_flight.saturating_sub(1);
                match result {
                    Ok(message) => self.merge(message).into_iter().collect(),
                    Err(e) => vec![self.fail(ChatError::Send(format!("{:#}", e)))],
                }
            }
            ViewEvent::Push(PushEvent::Message(message)) => {
                self.merge(message).into_iter().collect()
            }
            ViewEvent::Push(PushEvent::Status(status)) => self.on_status(status),
            ViewEvent::Polled(Ok(batch)) => {
                let missing = self.log.missing_from(batch);
                missing.into_iter().filter_map(|m| self.merge(m)).collect()
            }
            ViewEvent::Polled(Err(e)) => vec![self.fail(ChatError::Load(format!("{:#}", e)))],
        }
    }

    fn fail(&mut self, err: ChatError) -> Update {
        self.banner.show(err.clone());
        Update::Error(err)
    }

    /// `None` when the transcript already shows exactly this message.
    fn merge(&mut self, message: Message) -> Option<Update> {
        let outcome = self.log.merge_incoming(message);
        let index = outcome.index();
        let merged = &self.log.messages()[index];
        if should_alert(outcome, merged, &self.me.id, self.settings.sound_enabled) {
            self.notifier.alert(merged);
        }
        if outcome.is_new() && merged.sender_id != self.me.id {
            self.mark_viewed();
        }
        outcome.is_visible().then(|| Update::Message {
            index,
            fresh: outcome.is_new(),
        })
    }

    fn on_status(&mut self, status: ConnectionStatus) -> Vec<Update> {
        let mut updates = vec![Update::Status(status.clone())];
        match &status {
            ConnectionStatus::Offline { retry_in, reason } => {
                updates.push(self.fail(ChatError::Connection(format!(
                    "{} (retrying in {}s)",
                    reason,
                    retry_in.as_secs()
                ))));
                self.start_polling();
            }
            ConnectionStatus::Online => {
                if self.settings.realtime_enabled {
                    self.stop_polling();
                }
            }
            ConnectionStatus::Connecting => {}
        }
        self.connection = Some(status);
        updates
    }

    fn start_push(&mut self) {
        if self.subscription.is_some() {
            return;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscription = Some(self.backend.subscribe_to_messages(&self.conversation, tx));
        self.push_rx = Some(rx);
    }

    fn stop_push(&mut self) {
        if let Some(mut sub) = self.subscription.take() {
            sub.unsubscribe();
        }
        self.push_rx = None;
        self.connection = None;
    }

    fn start_polling(&mut self) {
        if self.poller.is_some() {
            return;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.poller = Some(Poller::start(
            Arc::clone(&self.backend),
            self.conversation.clone(),
            self.settings.poll_interval,
            tx,
        ));
        self.poll_rx = Some(rx);
    }

    fn stop_polling(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.stop();
            tracing::info!("Polling stopped for {}", self.conversation);
        }
        self.poll_rx = None;
    }

    /// Advance the local read marker and tell the backend.
    fn mark_viewed(&mut self) {
        if self.me.id.is_empty() {
            return;
        }
        if let Some(latest) = self.log.latest_canonical_at() {
            if self.markers.mark_seen(&self.conversation, &self.me.id, latest) {
                if let Err(e) = self.markers.save() {
                    tracing::warn!("Failed to save read marker: {:#}", e);
                }
            }
        }

        let backend = Arc::clone(&self.backend);
        let conversation = self.conversation.clone();
        let user_id = self.me.id.clone();
        tokio::spawn(async move {
            if let Err(e) = backend.mark_as_read(&conversation, &user_id).await {
                tracing::warn!("mark_as_read failed for {}: {:#}", conversation, e);
            }
        });
    }

    /// Switch between push delivery and polling. Returns the new setting.
    ///
    /// Turning push back on keeps the poller until the channel is online.
    pub fn toggle_realtime(&mut self) -> bool {
        self.settings.realtime_enabled = !self.settings.realtime_enabled;
        if self.settings.realtime_enabled {
            self.start_push();
        } else {
            self.stop_push();
            self.start_polling();
        }
        self.settings.realtime_enabled
    }

    pub fn toggle_sound(&mut self) -> bool {
        self.settings.sound_enabled = !self.settings.sound_enabled;
        self.settings.sound_enabled
    }

    pub fn messages(&self) -> &[Message] {
        self.log.messages()
    }

    pub fn banner(&self) -> Option<&ChatError> {
        self.banner.current()
    }

    pub fn connection(&self) -> Option<&ConnectionStatus> {
        self.connection.as_ref()
    }

    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(|p| p.is_running())
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    pub fn recording_elapsed(&self) -> Option<Duration> {
        self.recorder.as_ref().map(|r| r.elapsed())
    }

    pub fn is_sending_voice(&self) -> bool {
        self.voice_in_flight > 0
    }

    /// Messages from others that arrived since the previous visit.
    pub fn unread_at_mount(&self) -> usize {
        unread_since(self.log.messages(), self.seen_at_mount, &self.me.id)
    }
}

impl<B: ChatBackend> Drop for ChatView<B> {
    fn drop(&mut self) {
        self.stop_push();
        if let Some(poller) = self.poller.take() {
            poller.stop();
        }
        self.poll_rx = None;
        self.recorder.take();
        tracing::info!("Chat view for {} unmounted", self.conversation);
    }
}

async fn recv_opt<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
