//! Phoenix channel frames used by the realtime service

use serde::{Deserialize, Serialize};

use crate::models::ConversationId;

/// One JSON frame on the realtime websocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

/// What an inbound frame means for the subscription.
#[derive(Debug, PartialEq)]
pub enum Inbound {
    /// A row inserted or updated in the conversation's table.
    Record(serde_json::Value),
    JoinOk,
    JoinRejected(String),
    /// Server closed or errored the channel.
    Closed(String),
    Ignored,
}

/// Channel topic for a conversation's message table.
pub fn topic_for(conversation: &ConversationId) -> String {
    format!("realtime:{}:{}", conversation.table(), conversation.key())
}

pub fn join_frame(conversation: &ConversationId, access_token: &str, reference: u64) -> Frame {
    let filter = format!("{}=eq.{}", conversation.column(), conversation.key());
    let change = |event: &str| {
        serde_json::json!({
            "event": event,
            "schema": "public",
            "table": conversation.table(),
            "filter": filter,
        })
    };
    Frame {
        topic: topic_for(conversation),
        event: "phx_join".to_string(),
        payload: serde_json::json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [change("INSERT"), change("UPDATE")],
            },
            "access_token": access_token,
        }),
        reference: Some(reference.to_string()),
    }
}

pub fn leave_frame(conversation: &ConversationId, reference: u64) -> Frame {
    Frame {
        topic: topic_for(conversation),
        event: "phx_leave".to_string(),
        payload: serde_json::json!({}),
        reference: Some(reference.to_string()),
    }
}

pub fn heartbeat_frame(reference: u64) -> Frame {
    Frame {
        topic: "phoenix".to_string(),
        event: "heartbeat".to_string(),
        payload: serde_json::json!({}),
        reference: Some(reference.to_string()),
    }
}

/// Interpret a frame received on `topic`; `join_ref` is the ref of our join.
pub fn classify(frame: &Frame, topic: &str, join_ref: &str) -> Inbound {
    if frame.topic != topic {
        // Heartbeat replies arrive on "phoenix".
        return Inbound::Ignored;
    }

    match frame.event.as_str() {
        "phx_reply" if frame.reference.as_deref() == Some(join_ref) => {
            let status = frame
                .payload
                .get("status")
                .and_then(|s| s.as_str())
                .unwrap_or("");
            if status == "ok" {
                Inbound::JoinOk
            } else {
                let reason = frame
                    .payload
                    .pointer("/response/reason")
                    .and_then(|r| r.as_str())
                    .unwrap_or(status);
                Inbound::JoinRejected(reason.to_string())
            }
        }
        "postgres_changes" => {
            let change = frame.payload.pointer("/data/type").and_then(|t| t.as_str());
            match (change, frame.payload.pointer("/data/record")) {
                (Some("INSERT") | Some("UPDATE"), Some(record)) => Inbound::Record(record.clone()),
                _ => Inbound::Ignored,
            }
        }
        "phx_error" => Inbound::Closed("channel error".to_string()),
        "phx_close" => Inbound::Closed("channel closed".to_string()),
        "system" => {
            let status = frame.payload.get("status").and_then(|s| s.as_str());
            if status == Some("error") {
                let msg = frame
                    .payload
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("system error");
                Inbound::Closed(msg.to_string())
            } else {
                Inbound::Ignored
            }
        }
        _ => Inbound::Ignored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv() -> ConversationId {
        ConversationId::Private("t9".to_string())
    }

    fn frame(json: &str) -> Frame {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_join_frame_filters_conversation() {
        let f = join_frame(&conv(), "jwt", 1);
        assert_eq!(f.topic, "realtime:private_messages:t9");
        assert_eq!(f.reference.as_deref(), Some("1"));
        let changes = f.payload.pointer("/config/postgres_changes").unwrap();
        assert_eq!(changes[0]["filter"], "thread_id=eq.t9");
        assert_eq!(changes[1]["event"], "UPDATE");
        assert_eq!(f.payload["access_token"], "jwt");
    }

    #[test]
    fn test_classify_join_reply() {
        let topic = topic_for(&conv());
        let ok = frame(
            r#"{"topic":"realtime:private_messages:t9","event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"1"}"#,
        );
        assert_eq!(classify(&ok, &topic, "1"), Inbound::JoinOk);

        let rejected = frame(
            r#"{"topic":"realtime:private_messages:t9","event":"phx_reply","payload":{"status":"error","response":{"reason":"unauthorized"}},"ref":"1"}"#,
        );
        assert_eq!(
            classify(&rejected, &topic, "1"),
            Inbound::JoinRejected("unauthorized".to_string())
        );

        // Reply to some other ref (e.g. a heartbeat on our topic) is not a join result.
        assert_eq!(classify(&ok, &topic, "7"), Inbound::Ignored);
    }

    #[test]
    fn test_classify_postgres_change() {
        let topic = topic_for(&conv());
        let insert = frame(
            r#"{"topic":"realtime:private_messages:t9","event":"postgres_changes","payload":{"ids":[1],"data":{"type":"INSERT","record":{"id":"m2"}}},"ref":null}"#,
        );
        match classify(&insert, &topic, "1") {
            Inbound::Record(r) => assert_eq!(r["id"], "m2"),
            other => panic!("unexpected {:?}", other),
        }

        let delete = frame(
            r#"{"topic":"realtime:private_messages:t9","event":"postgres_changes","payload":{"data":{"type":"DELETE","old_record":{"id":"m2"}}},"ref":null}"#,
        );
        assert_eq!(classify(&delete, &topic, "1"), Inbound::Ignored);
    }

    #[test]
    fn test_classify_close_and_foreign_topic() {
        let topic = topic_for(&conv());
        let close = frame(r#"{"topic":"realtime:private_messages:t9","event":"phx_close","payload":{},"ref":null}"#);
        assert!(matches!(classify(&close, &topic, "1"), Inbound::Closed(_)));

        let heartbeat = frame(r#"{"topic":"phoenix","event":"phx_reply","payload":{"status":"ok"},"ref":"2"}"#);
        assert_eq!(classify(&heartbeat, &topic, "2"), Inbound::Ignored);
    }
}
