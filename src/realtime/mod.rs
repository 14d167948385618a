//! Realtime push delivery for a conversation
//!
//! Joins the conversation's Phoenix channel on the backend's realtime
//! websocket and forwards inserted/updated message rows to the subscriber.

pub mod protocol;
pub mod websocket;

use anyhow::{bail, Result};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;

use crate::api;
use crate::models::{ConversationId, Message};
use protocol::Inbound;
use websocket::ChannelSocket;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// Reset backoff after a connection stayed up this long.
const STABILITY_THRESHOLD: Duration = Duration::from_secs(60);
const MAX_BACKOFF_SECS: u64 = 64;
/// Upper bound on the phx_leave and close handshake at shutdown.
const LEAVE_TIMEOUT: Duration = Duration::from_secs(2);

/// State of the push channel as seen by the subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Online,
    Offline { retry_in: Duration, reason: String },
}

/// Events delivered to a subscriber.
#[derive(Debug, Clone)]
pub enum PushEvent {
    Message(Message),
    Status(ConnectionStatus),
}

/// Everything the channel task needs; owned so the task is `'static`.
#[derive(Debug, Clone)]
pub struct ChannelParams {
    pub url: String,
    pub access_token: String,
    pub conversation: ConversationId,
}

/// Handle to a running push subscription. Dropping it unsubscribes.
pub struct Subscription {
    task: Option<JoinHandle<()>>,
    shutdown: Option<watch::Sender<bool>>,
}

impl Subscription {
    /// Task that is aborted on unsubscribe.
    pub fn new(task: JoinHandle<()>) -> Self {
        Self {
            task: Some(task),
            shutdown: None,
        }
    }

    /// Task that leaves the channel and exits on its own once `shutdown`
    /// is signalled.
    pub fn graceful(task: JoinHandle<()>, shutdown: watch::Sender<bool>) -> Self {
        Self {
            task: Some(task),
            shutdown: Some(shutdown),
        }
    }

    /// A handle with no task behind it (delivery driven elsewhere).
    pub fn inert() -> Self {
        Self {
            task: None,
            shutdown: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop delivery. Idempotent.
    pub fn unsubscribe(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        match self.shutdown.take() {
            Some(shutdown) if !task.is_finished() && shutdown.send(true).is_ok() => {
                tracing::debug!("Push subscription leaving");
            }
            _ => {
                task.abort();
                tracing::debug!("Push subscription cancelled");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Start the channel task for `params.conversation`.
pub fn subscribe(params: ChannelParams, sink: mpsc::UnboundedSender<PushEvent>) -> Subscription {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(run_with_reconnect(params, sink, shutdown_rx));
    Subscription::graceful(task, shutdown_tx)
}

/// Next backoff step: doubling, capped.
fn next_backoff(current: u64) -> u64 {
    (current * 2).min(MAX_BACKOFF_SECS)
}

/// Keep the channel joined until the subscriber goes away or `shutdown`
/// fires.
///
/// On errors or server-initiated closes, reports `Offline` and reconnects
/// with exponential backoff (1s, 2s, 4s, ... capped at 64s). A connection
/// that stayed up past the stability threshold resets the backoff.
async fn run_with_reconnect(
    params: ChannelParams,
    sink: mpsc::UnboundedSender<PushEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = 1u64;

    loop {
        if sink
            .send(PushEvent::Status(ConnectionStatus::Connecting))
            .is_err()
        {
            return;
        }

        let started = Instant::now();
        let reason = match run_session(&params, &sink, &mut shutdown).await {
            Ok(()) => "channel closed by server".to_string(),
            Err(e) => format!("{:#}", e),
        };

        if sink.is_closed() || *shutdown.borrow() {
            return;
        }

        if started.elapsed() >= STABILITY_THRESHOLD {
            backoff = 1;
        }

        tracing::warn!(
            "Push channel for {} disconnected: {}. Reconnecting in {}s...",
            params.conversation,
            reason,
            backoff
        );

        let retry_in = Duration::from_secs(backoff);
        let status = ConnectionStatus::Offline { retry_in, reason };
        if sink.send(PushEvent::Status(status)).is_err() {
            return;
        }

        tokio::select! {
            _ = time::sleep(retry_in) => {}
            _ = sink.closed() => return,
            _ = shutdown.changed() => return,
        }

        backoff = next_backoff(backoff);
    }
}

/// One connection: connect, join, then pump frames and heartbeats.
///
/// Returns `Ok(())` when the server closes the socket, the subscriber is
/// gone or shutdown was requested; `Err` on transport or channel errors.
async fn run_session(
    params: &ChannelParams,
    sink: &mpsc::UnboundedSender<PushEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let mut socket = tokio::select! {
        socket = ChannelSocket::connect(&params.url) => socket?,
        _ = shutdown.changed() => return Ok(()),
    };
    let topic = protocol::topic_for(&params.conversation);

    let mut next_ref = 1u64;
    let join_ref = next_ref.to_string();
    socket
        .send_frame(&protocol::join_frame(
            &params.conversation,
            &params.access_token,
            next_ref,
        ))
        .await?;
    next_ref += 1;

    let mut heartbeat = time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // skip first immediate tick

    loop {
        tokio::select! {
            frame = socket.recv_frame() => {
                let frame = match frame? {
                    Some(f) => f,
                    None => return Ok(()),
                };
                match protocol::classify(&frame, &topic, &join_ref) {
                    Inbound::JoinOk => {
                        tracing::info!("Joined {}", topic);
                        let _ = sink.send(PushEvent::Status(ConnectionStatus::Online));
                    }
                    Inbound::JoinRejected(reason) => {
                        bail!("Join of {} rejected: {}", topic, reason);
                    }
                    Inbound::Record(record) => {
                        match api::decode_row(record, &params.conversation) {
                            Ok(msg) => {
                                tracing::debug!("Push delivered {}", msg.id);
                                let _ = sink.send(PushEvent::Message(msg));
                            }
                            Err(e) => tracing::warn!("Dropping undecodable push record: {:#}", e),
                        }
                    }
                    Inbound::Closed(reason) => {
                        bail!("{} on {}", reason, topic);
                    }
                    Inbound::Ignored => {}
                }
            }
            _ = heartbeat.tick() => {
                socket.send_frame(&protocol::heartbeat_frame(next_ref)).await?;
                next_ref += 1;
            }
            _ = shutdown.changed() => {
                leave(&mut socket, &params.conversation, next_ref).await;
                return Ok(());
            }
            _ = sink.closed() => {
                leave(&mut socket, &params.conversation, next_ref).await;
                return Ok(());
            }
        }
    }
}

/// Send phx_leave and close the socket, giving up after `LEAVE_TIMEOUT`.
async fn leave(socket: &mut ChannelSocket, conversation: &ConversationId, reference: u64) {
    let handshake = async {
        let _ = socket
            .send_frame(&protocol::leave_frame(conversation, reference))
            .await;
        socket.close().await;
    };
    match time::timeout(LEAVE_TIMEOUT, handshake).await {
        Ok(()) => tracing::info!("Left {}", protocol::topic_for(conversation)),
        Err(_) => tracing::debug!("Leave of {} timed out", conversation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut b = 1;
        let mut seen = vec![b];
        for _ in 0..8 {
            b = next_backoff(b);
            seen.push(b);
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 16, 32, 64, 64, 64]);
    }

    #[tokio::test]
    async fn test_unsubscribe_aborts_task() {
        let task = tokio::spawn(async {
            time::sleep(Duration::from_secs(3600)).await;
        });
        let mut sub = Subscription::new(task);
        assert!(sub.is_active());
        sub.unsubscribe();
        assert!(!sub.is_active());
        // Second call is a no-op.
        sub.unsubscribe();
    }

    #[tokio::test]
    async fn test_unsubscribe_leaves_channel() {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::tungstenite::Message as WsMessage;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Accept one client, ack its join and record every event it sends.
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let mut events = Vec::new();
            while let Some(Ok(msg)) = ws.next().await {
                let WsMessage::Text(text) = msg else { continue };
                let frame: protocol::Frame = serde_json::from_str(&text).unwrap();
                if frame.event == "phx_join" {
                    let reply = protocol::Frame {
                        topic: frame.topic.clone(),
                        event: "phx_reply".to_string(),
                        payload: serde_json::json!({ "status": "ok", "response": {} }),
                        reference: frame.reference.clone(),
                    };
                    let text = serde_json::to_string(&reply).unwrap();
                    ws.send(WsMessage::Text(text)).await.unwrap();
                }
                events.push(frame.event);
            }
            events
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let params = ChannelParams {
            url: format!("ws://{}/realtime/v1/websocket", addr),
            access_token: "t".to_string(),
            conversation: ConversationId::Match("1".to_string()),
        };
        let mut sub = subscribe(params, tx);

        loop {
            match rx.recv().await {
                Some(PushEvent::Status(ConnectionStatus::Online)) => break,
                Some(PushEvent::Status(ConnectionStatus::Offline { reason, .. })) => {
                    panic!("went offline: {}", reason)
                }
                Some(_) => {}
                None => panic!("subscription ended before join"),
            }
        }

        sub.unsubscribe();
        assert!(!sub.is_active());

        let events = time::timeout(Duration::from_secs(5), server)
            .await
            .expect("client never closed")
            .unwrap();
        assert_eq!(events, vec!["phx_join", "phx_leave"]);
        // No reconnect after a requested leave.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_reports_offline() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let params = ChannelParams {
            // Port 9 (discard) on localhost is expected to refuse connections.
            url: "ws://127.0.0.1:9/realtime/v1/websocket".to_string(),
            access_token: "t".to_string(),
            conversation: ConversationId::Match("1".to_string()),
        };
        let _sub = subscribe(params, tx);

        match rx.recv().await {
            Some(PushEvent::Status(ConnectionStatus::Connecting)) => {}
            other => panic!("unexpected {:?}", other),
        }
        match rx.recv().await {
            Some(PushEvent::Status(ConnectionStatus::Offline { retry_in, .. })) => {
                assert_eq!(retry_in, Duration::from_secs(1));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
