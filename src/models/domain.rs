use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an event. Only OPEN events accept new participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "event_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum EventStatus {
    Open,
    Closed,
}

impl EventStatus {
    pub fn toggled(self) -> Self {
        match self {
            EventStatus::Open => EventStatus::Closed,
            EventStatus::Closed => EventStatus::Open,
        }
    }
}

/// Binary gender category. Signals and messages may only cross categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "gender")]
pub enum Gender {
    #[sqlx(rename = "M")]
    #[serde(rename = "M")]
    Male,
    #[sqlx(rename = "F")]
    #[serde(rename = "F")]
    Female,
}

impl Gender {
    pub fn opposite(self) -> Self {
        match self {
            Gender::Male => Gender::Female,
            Gender::Female => Gender::Male,
        }
    }

    /// Parse the wire code, accepting lowercase input.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "M" => Some(Gender::Male),
            "F" => Some(Gender::Female),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Gender::Male => "M",
            Gender::Female => "F",
        }
    }
}

/// One matching session, identified by a short code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub code: String,
    pub status: EventStatus,
    #[serde(rename = "messageWriteOpen")]
    pub message_write_open: bool,
    #[serde(rename = "messageOpenedAt")]
    pub message_opened_at: Option<DateTime<Utc>>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn is_open(&self) -> bool {
        self.status == EventStatus::Open
    }
}

/// A person registered within one event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: i64,
    #[serde(rename = "eventId")]
    pub event_id: i64,
    pub nickname: String,
    pub gender: Gender,
    #[serde(skip_serializing, default)]
    pub pin_hash: String,
    #[serde(rename = "receivedCount")]
    pub received_count: i32,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// Fields needed to register a new participant
#[derive(Debug, Clone)]
pub struct NewParticipant {
    pub event_id: i64,
    pub nickname: String,
    pub gender: Gender,
    pub pin_hash: String,
}

/// Participant row annotated with how many signals it has sent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantStats {
    #[serde(flatten)]
    pub participant: Participant,
    #[serde(rename = "sentCount")]
    pub sent_count: i64,
}

/// A one-directional expression of interest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: i64,
    #[serde(rename = "eventId")]
    pub event_id: i64,
    #[serde(rename = "senderId")]
    pub sender_id: i64,
    #[serde(rename = "receiverId")]
    pub receiver_id: i64,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// Unordered participant pair stored as (smaller, larger)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NormalizedPair {
    pub low: i64,
    pub high: i64,
}

impl NormalizedPair {
    pub fn new(a: i64, b: i64) -> Self {
        if a < b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn contains(&self, id: i64) -> bool {
        self.low == id || self.high == id
    }

    /// The other member of the pair, if `id` is a member at all.
    pub fn partner_of(&self, id: i64) -> Option<i64> {
        if id == self.low {
            Some(self.high)
        } else if id == self.high {
            Some(self.low)
        } else {
            None
        }
    }
}

/// A confirmed mutual pairing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub id: i64,
    #[serde(rename = "eventId")]
    pub event_id: i64,
    #[serde(rename = "p1Id")]
    pub p1_id: i64,
    #[serde(rename = "p2Id")]
    pub p2_id: i64,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl Match {
    pub fn pair(&self) -> NormalizedPair {
        NormalizedPair::new(self.p1_id, self.p2_id)
    }
}

/// Outcome of an idempotent match insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchInsert {
    Created(i64),
    AlreadyExisted,
}

/// A second-phase private message, one per sender per event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    #[serde(rename = "eventId")]
    pub event_id: i64,
    #[serde(rename = "senderId")]
    pub sender_id: i64,
    #[serde(rename = "receiverId")]
    pub receiver_id: i64,
    pub text: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// A message joined with both participants' nicknames, for the host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: i64,
    pub sender_nickname: String,
    pub receiver_nickname: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Aggregate counters shown on the host dashboard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStats {
    pub participants: i64,
    pub signals: i64,
    pub matches: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_pair_orders_ids() {
        assert_eq!(NormalizedPair::new(7, 3), NormalizedPair { low: 3, high: 7 });
        assert_eq!(NormalizedPair::new(3, 7), NormalizedPair::new(7, 3));
    }

    #[test]
    fn test_partner_of() {
        let pair = NormalizedPair::new(1, 2);
        assert_eq!(pair.partner_of(1), Some(2));
        assert_eq!(pair.partner_of(2), Some(1));
        assert_eq!(pair.partner_of(3), None);
        assert!(pair.contains(2));
    }

    #[test]
    fn test_gender_codes() {
        assert_eq!(Gender::from_code("m"), Some(Gender::Male));
        assert_eq!(Gender::from_code(" F "), Some(Gender::Female));
        assert_eq!(Gender::from_code("x"), None);
        assert_eq!(Gender::Male.opposite(), Gender::Female);
        assert_eq!(serde_json::to_string(&Gender::Female).unwrap(), "\"F\"");
    }

    #[test]
    fn test_status_toggle() {
        assert_eq!(EventStatus::Open.toggled(), EventStatus::Closed);
        assert_eq!(
            serde_json::to_string(&EventStatus::Closed).unwrap(),
            "\"CLOSED\""
        );
    }

    #[test]
    fn test_message_view_uses_camel_case() {
        let view = MessageView {
            id: 1,
            sender_nickname: "adam".to_string(),
            receiver_nickname: "bella".to_string(),
            text: "hi".to_string(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["senderNickname"], "adam");
        assert_eq!(json["receiverNickname"], "bella");
        assert!(json.get("createdAt").is_some());
        assert!(json.get("sender_nickname").is_none());
    }
}
