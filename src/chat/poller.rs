//! Polling fallback for when push delivery is off or offline

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::api::ChatBackend;
use crate::models::{ConversationId, Message};

/// Cancellable periodic task that re-fetches the conversation history.
///
/// Every tick sends the full fetched batch (or the fetch error) to `sink`;
/// diffing against the current list is the receiver's job. Stops on
/// `stop()`, on drop, or when the receiver is gone.
pub struct Poller {
    task: JoinHandle<()>,
}

impl Poller {
    pub fn start<B: ChatBackend>(
        backend: Arc<B>,
        conversation: ConversationId,
        interval: Duration,
        sink: mpsc::UnboundedSender<Result<Vec<Message>>>,
    ) -> Self {
        tracing::info!("Polling {} every {:?}", conversation, interval);
        let task = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // skip first immediate tick

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = sink.closed() => break,
                }
                let result = backend.get_messages(&conversation).await;
                if sink.send(result).is_err() {
                    break;
                }
            }
        });
        Self { task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.task.abort();
        tracing::debug!("Poller stopped");
    }
}
