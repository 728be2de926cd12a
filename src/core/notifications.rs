use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Addressable notification channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// `participant:<id>`
    Participant(i64),
    /// `event:<id>:host`
    Host(i64),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Participant(id) => write!(f, "participant:{}", id),
            Topic::Host(event_id) => write!(f, "event:{}:host", event_id),
        }
    }
}

/// Typed payload pushed to subscribers, serialized with a `type` tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Notification {
    ReceivedUpdate {
        received_count: i32,
    },
    MatchCreated {
        partner_nickname: String,
        match_count: i64,
    },
    MatchCountUpdate {
        match_count: i64,
    },
    MessageReceived {
        from_nickname: String,
        text: String,
        created_at: DateTime<Utc>,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::ReceivedUpdate { .. } => "received_update",
            Notification::MatchCreated { .. } => "match_created",
            Notification::MatchCountUpdate { .. } => "match_count_update",
            Notification::MessageReceived { .. } => "message_received",
        }
    }
}

/// A notification bound to its destination, queued until the transaction that
/// produced it has committed.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub topic: Topic,
    pub payload: Notification,
}

impl Outbound {
    pub fn new(topic: Topic, payload: Notification) -> Self {
        Self { topic, payload }
    }
}
