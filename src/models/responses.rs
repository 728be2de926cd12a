use serde::{Deserialize, Serialize};
use crate::models::domain::{Event, EventStats, EventStatus, Gender, MessageView, ParticipantStats};

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Join response carrying the bearer token for later calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub id: i64,
    pub token: String,
}

/// Minimal id + nickname view of another participant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerView {
    pub id: i64,
    pub nickname: String,
}

/// The caller's own state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub id: i64,
    pub event_id: i64,
    pub event_code: String,
    pub event_status: EventStatus,
    pub nickname: String,
    pub gender: Gender,
    pub received_count: i32,
    pub sent_count: i64,
    pub partner: Option<PartnerView>,
}

/// One opposite-gender card
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: i64,
    pub nickname: String,
    pub sent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardsResponse {
    pub cards: Vec<Card>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchesResponse {
    pub matches: Vec<PartnerView>,
}

/// Acknowledgement for a persisted signal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalResponse {
    pub ok: bool,
    pub matched: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStateResponse {
    pub message_open: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountResponse {
    pub count: i64,
}

/// Host dashboard snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResponse {
    pub event: Event,
    pub message_open: bool,
    pub stats: EventStats,
    pub males: Vec<ParticipantStats>,
    pub females: Vec<ParticipantStats>,
}

/// Every message of an event, for the host only
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesResponse {
    pub messages: Vec<MessageView>,
}
