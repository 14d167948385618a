//! Message reconciliation: one ordered, duplicate-free list per conversation.
//!
//! Messages reach the list from three places: the initial load, optimistic
//! local sends (temporary ids), and push/poll delivery. Display order is
//! insertion order; entries are replaced in place, never re-sorted.

use chrono::{DateTime, Utc};

use crate::models::{DeliveryState, Message, MessageId};

/// A temporary entry and a canonical message with the same sender and body
/// are the same send if their timestamps are at most this far apart.
pub const MATCH_WINDOW_MS: i64 = 5_000;

/// How `merge_incoming` placed a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Same final id already present; contents replaced.
    Updated(usize),
    /// Same final id redelivered with nothing visible changed.
    Unchanged(usize),
    /// Took the place of a matching temporary entry.
    Reconciled(usize),
    /// Genuinely new; appended at the end.
    Appended(usize),
}

impl MergeOutcome {
    pub fn index(&self) -> usize {
        match *self {
            MergeOutcome::Updated(i)
            | MergeOutcome::Unchanged(i)
            | MergeOutcome::Reconciled(i)
            | MergeOutcome::Appended(i) => i,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, MergeOutcome::Appended(_))
    }

    /// Whether the transcript needs to show the entry again.
    pub fn is_visible(&self) -> bool {
        !matches!(self, MergeOutcome::Unchanged(_))
    }
}

/// Pending while the id is temporary, delivered once it is final.
pub fn classify_delivery_state(message: &Message) -> DeliveryState {
    message.delivery_state()
}

/// Alert only for genuinely new messages from someone else.
pub fn should_alert(
    outcome: MergeOutcome,
    message: &Message,
    local_user: &str,
    sound_enabled: bool,
) -> bool {
    outcome.is_new() && sound_enabled && message.sender_id != local_user
}

fn within_window(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    (a - b).num_milliseconds().abs() <= MATCH_WINDOW_MS
}

/// Keep the optimistic profile snapshot when the canonical row has none.
fn adopt(previous: &Message, mut canonical: Message) -> Message {
    if canonical.sender.is_none() {
        canonical.sender = previous.sender.clone();
    }
    canonical
}

/// Same transcript line: nothing the user sees differs.
pub(crate) fn renders_same(a: &Message, b: &Message) -> bool {
    a.id == b.id
        && a.sender_id == b.sender_id
        && a.body == b.body
        && a.kind == b.kind
        && a.voice_url == b.voice_url
        && a.voice_duration == b.voice_duration
        && a.created_at == b.created_at
}

/// In-memory message list of one mounted conversation.
#[derive(Debug, Default)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.position(id).map(|i| &self.messages[i])
    }

    /// Newest timestamp among canonical messages.
    pub fn latest_canonical_at(&self) -> Option<DateTime<Utc>> {
        self.messages
            .iter()
            .filter(|m| !m.id.is_temporary())
            .map(|m| m.created_at)
            .max()
    }

    /// Replace the whole list with a freshly loaded history.
    pub fn replace_all(&mut self, messages: Vec<Message>) {
        tracing::debug!(
            "Replacing {} messages with {} loaded",
            self.messages.len(),
            messages.len()
        );
        self.messages = messages;
    }

    /// Append a temporary message and return its id.
    pub fn insert_optimistic(&mut self, message: Message) -> MessageId {
        debug_assert!(message.id.is_temporary());
        let id = message.id.clone();
        self.messages.push(message);
        id
    }

    /// The backend accepted the send identified by `temp_id`.
    ///
    /// The canonical message takes the temporary entry's slot. If push
    /// delivery already placed the canonical message elsewhere, that copy is
    /// dropped so the send keeps the position it was shown at.
    pub fn confirm(&mut self, temp_id: &MessageId, canonical: Message) -> usize {
        let existing = self.position(&canonical.id);
        let temp = self.position(temp_id);

        match (temp, existing) {
            (Some(t), Some(e)) => {
                let merged = adopt(&self.messages[t], canonical);
                self.messages[t] = merged;
                self.messages.remove(e);
                if e < t {
                    t - 1
                } else {
                    t
                }
            }
            (Some(t), None) => {
                let merged = adopt(&self.messages[t], canonical);
                self.messages[t] = merged;
                t
            }
            (None, Some(e)) => {
                // Echo already reconciled the temporary entry.
                let merged = adopt(&self.messages[e], canonical);
                self.messages[e] = merged;
                e
            }
            (None, None) => {
                tracing::debug!(
                    "Temporary {} gone before confirmation; appending {}",
                    temp_id,
                    canonical.id
                );
                self.messages.push(canonical);
                self.messages.len() - 1
            }
        }
    }

    /// The send identified by `temp_id` failed. Returns whether it was present.
    pub fn discard(&mut self, temp_id: &MessageId) -> bool {
        match self.position(temp_id) {
            Some(i) if self.messages[i].id.is_temporary() => {
                self.messages.remove(i);
                true
            }
            _ => false,
        }
    }

    /// Merge one push- or poll-delivered message.
    ///
    /// 1. same final id: replace contents in place;
    /// 2. temporary entry with same sender and body within the match window:
    ///    replace it in place;
    /// 3. otherwise append.
    pub fn merge_incoming(&mut self, message: Message) -> MergeOutcome {
        if let Some(i) = self.position(&message.id) {
            let merged = adopt(&self.messages[i], message);
            let unchanged = renders_same(&self.messages[i], &merged);
            self.messages[i] = merged;
            return if unchanged {
                MergeOutcome::Unchanged(i)
            } else {
                MergeOutcome::Updated(i)
            };
        }

        let temp = self.messages.iter().position(|m| {
            m.id.is_temporary()
                && m.sender_id == message.sender_id
                && m.body == message.body
                && within_window(m.created_at, message.created_at)
        });
        if let Some(i) = temp {
            tracing::debug!("Reconciled {} with {}", self.messages[i].id, message.id);
            let merged = adopt(&self.messages[i], message);
            self.messages[i] = merged;
            return MergeOutcome::Reconciled(i);
        }

        self.messages.push(message);
        MergeOutcome::Appended(self.messages.len() - 1)
    }

    /// Messages of a polled batch whose ids are not in the list yet, in
    /// batch order.
    pub fn missing_from(&self, batch: Vec<Message>) -> Vec<Message> {
        batch
            .into_iter()
            .filter(|m| self.position(&m.id).is_none())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConversationId, MessageKind, Profile};
    use chrono::Duration;

    fn conv() -> ConversationId {
        ConversationId::Match("1".to_string())
    }

    fn me() -> Profile {
        Profile {
            id: "me".to_string(),
            username: Some("me_user".to_string()),
            ..Default::default()
        }
    }

    fn canonical(id: &str, sender: &str, body: &str, at: DateTime<Utc>) -> Message {
        Message {
            id: MessageId::new(id),
            conversation_id: conv(),
            sender_id: sender.to_string(),
            body: body.to_string(),
            kind: MessageKind::Text,
            voice_url: None,
            voice_duration: None,
            created_at: at,
            sender: None,
        }
    }

    fn optimistic(log: &mut MessageLog, body: &str) -> MessageId {
        log.insert_optimistic(Message::optimistic(conv(), &me(), body, MessageKind::Text))
    }

    #[test]
    fn test_send_then_confirm_scenario() {
        let mut log = MessageLog::new();
        let temp = optimistic(&mut log, "hello");
        assert_eq!(log.len(), 1);
        assert_eq!(
            classify_delivery_state(&log.messages()[0]),
            DeliveryState::Pending
        );

        let idx = log.confirm(&temp, canonical("m1", "me", "hello", Utc::now()));
        assert_eq!(idx, 0);
        assert_eq!(log.len(), 1);
        assert_eq!(log.messages()[0].id.as_str(), "m1");
        assert_eq!(
            classify_delivery_state(&log.messages()[0]),
            DeliveryState::Delivered
        );
        // Optimistic snapshot survives a canonical row without profile.
        assert_eq!(log.messages()[0].sender_label(), "me_user");
    }

    #[test]
    fn test_duplicate_delivery_is_idempotent() {
        let mut log = MessageLog::new();
        let at = Utc::now();
        assert_eq!(
            log.merge_incoming(canonical("m3", "other", "yo", at)),
            MergeOutcome::Appended(0)
        );
        assert_eq!(
            log.merge_incoming(canonical("m3", "other", "yo (edited)", at)),
            MergeOutcome::Updated(0)
        );
        assert_eq!(log.len(), 1);
        assert_eq!(log.messages()[0].body, "yo (edited)");
    }

    #[test]
    fn test_identical_redelivery_is_unchanged() {
        let mut log = MessageLog::new();
        let at = Utc::now();
        log.merge_incoming(canonical("m3", "other", "yo", at));

        let outcome = log.merge_incoming(canonical("m3", "other", "yo", at));
        assert_eq!(outcome, MergeOutcome::Unchanged(0));
        assert!(!outcome.is_visible());
        assert!(!outcome.is_new());
        assert_eq!(log.len(), 1);

        let mut voiced = canonical("m3", "other", "yo", at);
        voiced.voice_duration = Some(3);
        assert_eq!(log.merge_incoming(voiced), MergeOutcome::Updated(0));
    }

    #[test]
    fn test_echo_reconciles_temporary_in_place() {
        let mut log = MessageLog::new();
        log.merge_incoming(canonical("m0", "other", "hey", Utc::now()));
        optimistic(&mut log, "hello");
        log.merge_incoming(canonical("m9", "other", "later", Utc::now()));

        let outcome = log.merge_incoming(canonical("m1", "me", "hello", Utc::now()));
        assert_eq!(outcome, MergeOutcome::Reconciled(1));
        let ids: Vec<&str> = log.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m0", "m1", "m9"]);
    }

    #[test]
    fn test_match_window_boundary() {
        let mut log = MessageLog::new();
        let temp = optimistic(&mut log, "hello");
        let sent_at = log.get(&temp).unwrap().created_at;

        let late = canonical("m1", "me", "hello", sent_at + Duration::milliseconds(5_001));
        assert_eq!(log.merge_incoming(late), MergeOutcome::Appended(1));
        // Temporary entry is left orphaned and still pending.
        assert!(log.get(&temp).is_some());

        let mut log = MessageLog::new();
        let temp = optimistic(&mut log, "hello");
        let sent_at = log.get(&temp).unwrap().created_at;
        let on_edge = canonical("m1", "me", "hello", sent_at + Duration::milliseconds(5_000));
        assert_eq!(log.merge_incoming(on_edge), MergeOutcome::Reconciled(0));
    }

    #[test]
    fn test_rule_requires_same_sender_and_body() {
        let mut log = MessageLog::new();
        optimistic(&mut log, "hello");
        assert!(log
            .merge_incoming(canonical("a", "other", "hello", Utc::now()))
            .is_new());
        assert!(log
            .merge_incoming(canonical("b", "me", "hello!", Utc::now()))
            .is_new());
        assert_eq!(log.len(), 3);
        assert!(log.messages()[0].id.is_temporary());
    }

    #[test]
    fn test_confirm_after_echo_keeps_single_entry() {
        let mut log = MessageLog::new();
        let temp = optimistic(&mut log, "hello");
        log.merge_incoming(canonical("m1", "me", "hello", Utc::now()));

        let idx = log.confirm(&temp, canonical("m1", "me", "hello", Utc::now()));
        assert_eq!(idx, 0);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_confirm_drops_late_echo_copy_and_keeps_position() {
        let mut log = MessageLog::new();
        let temp = optimistic(&mut log, "hello");
        let sent_at = log.get(&temp).unwrap().created_at;
        log.merge_incoming(canonical("x", "other", "hi", Utc::now()));
        // Echo outside the window got appended separately.
        log.merge_incoming(canonical("m1", "me", "hello", sent_at + Duration::seconds(9)));
        assert_eq!(log.len(), 3);

        let idx = log.confirm(&temp, canonical("m1", "me", "hello", sent_at));
        assert_eq!(idx, 0);
        let ids: Vec<&str> = log.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "x"]);
    }

    #[test]
    fn test_discard_restores_length() {
        let mut log = MessageLog::new();
        log.merge_incoming(canonical("m0", "other", "hey", Utc::now()));
        let before = log.len();
        let temp = optimistic(&mut log, "oops");
        assert!(log.discard(&temp));
        assert_eq!(log.len(), before);
        assert!(!log.discard(&temp));
        // Never removes canonical entries.
        assert!(!log.discard(&MessageId::new("m0")));
    }

    #[test]
    fn test_missing_from_filters_known_ids() {
        let mut log = MessageLog::new();
        let at = Utc::now();
        log.merge_incoming(canonical("m1", "other", "a", at));
        let missing = log.missing_from(vec![
            canonical("m1", "other", "a", at),
            canonical("m2", "other", "b", at),
        ]);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].id.as_str(), "m2");
    }

    #[test]
    fn test_should_alert_only_for_new_foreign_messages() {
        let msg = canonical("m2", "other", "hi", Utc::now());
        assert!(should_alert(MergeOutcome::Appended(0), &msg, "me", true));
        assert!(!should_alert(MergeOutcome::Appended(0), &msg, "me", false));
        assert!(!should_alert(MergeOutcome::Updated(0), &msg, "me", true));
        assert!(!should_alert(MergeOutcome::Unchanged(0), &msg, "me", true));
        assert!(!should_alert(MergeOutcome::Reconciled(0), &msg, "me", true));

        let mine = canonical("m3", "me", "hi", Utc::now());
        assert!(!should_alert(MergeOutcome::Appended(0), &mine, "me", true));
    }

    #[test]
    fn test_no_duplicate_canonical_ids_under_interleaving() {
        let mut log = MessageLog::new();
        let t1 = optimistic(&mut log, "a");
        let t2 = optimistic(&mut log, "b");
        log.merge_incoming(canonical("m2", "me", "b", Utc::now()));
        log.merge_incoming(canonical("m9", "other", "c", Utc::now()));
        log.confirm(&t1, canonical("m1", "me", "a", Utc::now()));
        log.merge_incoming(canonical("m1", "me", "a", Utc::now()));
        log.confirm(&t2, canonical("m2", "me", "b", Utc::now()));
        log.merge_incoming(canonical("m9", "other", "c", Utc::now()));

        let mut ids: Vec<&str> = log.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m9"]);
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_latest_canonical_ignores_temporary() {
        let mut log = MessageLog::new();
        assert!(log.latest_canonical_at().is_none());
        let at = Utc::now() - Duration::minutes(5);
        log.merge_incoming(canonical("m1", "other", "a", at));
        optimistic(&mut log, "b");
        assert_eq!(log.latest_canonical_at(), Some(at));
    }
}
