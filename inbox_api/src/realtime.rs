use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::Message;

pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_LEAVE: &str = "phx_leave";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_CHANGES: &str = "postgres_changes";

/// Top level frame exchanged with the realtime websocket.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl Frame {
    /// Join `topic`, asking for INSERT notifications on `table` rows matching `filter`.
    pub fn join(topic: &str, table: &str, filter: &str, reference: &str) -> Self {
        Self {
            topic: topic.into(),
            event: EVENT_JOIN.into(),
            payload: json!({
                "config": {
                    "postgres_changes": [{
                        "event": "INSERT",
                        "schema": "public",
                        "table": table,
                        "filter": filter,
                    }]
                }
            }),
            reference: Some(reference.into()),
        }
    }

    pub fn leave(topic: &str, reference: &str) -> Self {
        Self {
            topic: topic.into(),
            event: EVENT_LEAVE.into(),
            payload: json!({}),
            reference: Some(reference.into()),
        }
    }

    pub fn heartbeat(reference: &str) -> Self {
        Self {
            topic: "phoenix".into(),
            event: EVENT_HEARTBEAT.into(),
            payload: json!({}),
            reference: Some(reference.into()),
        }
    }

    /// Status of a `phx_reply` frame (`ok` or `error`), if this is one.
    pub fn reply_status(&self) -> Option<&str> {
        if self.event != EVENT_REPLY {
            return None;
        }
        self.payload.get("status").and_then(Value::as_str)
    }

    /// The inserted message carried by a `postgres_changes` frame. Any other
    /// event, or a change that is not an INSERT, yields `None`.
    pub fn inserted_message(&self) -> Option<Message> {
        if self.event != EVENT_CHANGES {
            return None;
        }
        let change: PostgresChange = serde_json::from_value(self.payload.clone()).ok()?;
        change.data.inserted()
    }
}

/// Payload of a `postgres_changes` event.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PostgresChange {
    pub data: ChangeData,
    #[serde(default)]
    pub ids: Vec<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChangeData {
    #[serde(rename = "type")]
    pub kind: String,
    pub table: String,
    #[serde(default)]
    pub schema: String,
    #[serde(default)]
    pub record: Option<Value>,
}

impl ChangeData {
    fn inserted(&self) -> Option<Message> {
        if !self.kind.eq_ignore_ascii_case("INSERT") {
            return None;
        }
        serde_json::from_value(self.record.clone()?).ok()
    }
}
