use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    Event, EventStats, EventStatus, Match, MatchInsert, Message, MessageView, NewParticipant,
    NormalizedPair, Participant, ParticipantStats, Signal,
};

/// Errors raised by a store backend. Expected conflicts (duplicate match,
/// duplicate message) are reported through return values. `Conflict` only
/// surfaces when a commit would break a uniqueness rule that the caller's
/// locks should have ruled out.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrateError(#[from] sqlx::migrate::MigrateError),

    #[error("Row not found: {0}")]
    Missing(String),

    #[error("Unique constraint violated: {0}")]
    Conflict(String),
}

/// Durable storage for one deployment's events.
///
/// Reads outside of [`StoreTx`] see committed state only. Every write that must
/// be consistent with a check goes through a transaction from [`Store::begin`].
#[async_trait]
pub trait Store: Send + Sync {
    /// Start a transaction. Dropping the returned handle without calling
    /// [`StoreTx::commit`] rolls it back.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    async fn create_event(&self, code: &str) -> Result<Option<Event>, StoreError>;
    async fn find_event(&self, code: &str) -> Result<Option<Event>, StoreError>;
    async fn find_event_by_id(&self, event_id: i64) -> Result<Option<Event>, StoreError>;
    async fn set_event_status(
        &self,
        event_id: i64,
        status: EventStatus,
    ) -> Result<Option<Event>, StoreError>;
    async fn set_message_phase(
        &self,
        event_id: i64,
        write_open: bool,
        opened_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Event>, StoreError>;

    async fn find_participant(
        &self,
        event_id: i64,
        participant_id: i64,
    ) -> Result<Option<Participant>, StoreError>;
    async fn find_participant_by_nickname(
        &self,
        event_id: i64,
        nickname: &str,
    ) -> Result<Option<Participant>, StoreError>;
    /// Insert unless the (event, nickname) pair is taken. `None` means taken.
    async fn insert_participant_if_absent(
        &self,
        participant: NewParticipant,
    ) -> Result<Option<Participant>, StoreError>;
    /// All participants of an event, ordered by nickname.
    async fn list_participants(&self, event_id: i64) -> Result<Vec<ParticipantStats>, StoreError>;

    async fn count_sent_signals(&self, event_id: i64, sender_id: i64) -> Result<i64, StoreError>;
    async fn signal_targets(&self, event_id: i64, sender_id: i64) -> Result<Vec<i64>, StoreError>;

    /// Matches involving a participant, newest first.
    async fn matches_for(&self, event_id: i64, participant_id: i64) -> Result<Vec<Match>, StoreError>;
    async fn event_stats(&self, event_id: i64) -> Result<EventStats, StoreError>;

    /// Insert unless the sender already has a message in this event. `None` means it has.
    async fn insert_message_if_absent(
        &self,
        event_id: i64,
        sender_id: i64,
        receiver_id: i64,
        text: &str,
    ) -> Result<Option<Message>, StoreError>;
    async fn message_sent_by(&self, event_id: i64, sender_id: i64) -> Result<bool, StoreError>;
    async fn count_messages_to(&self, event_id: i64, receiver_id: i64) -> Result<i64, StoreError>;
    /// Every message of an event with both nicknames, oldest first.
    async fn list_messages(&self, event_id: i64) -> Result<Vec<MessageView>, StoreError>;

    async fn health_check(&self) -> Result<bool, StoreError>;
}

/// Operations the matching engine runs inside one atomic unit.
#[async_trait]
pub trait StoreTx: Send {
    /// Lock participant rows until commit/rollback. Implementations must lock
    /// in ascending id order so that overlapping lock sets cannot deadlock.
    async fn lock_participants(&mut self, event_id: i64, ids: &[i64]) -> Result<(), StoreError>;
    /// Lock the event row until commit/rollback. Taken after participant
    /// locks; serializes match counting across different pairs.
    async fn lock_event(&mut self, event_id: i64) -> Result<(), StoreError>;
    async fn count_signals(&mut self, event_id: i64, sender_id: i64) -> Result<i64, StoreError>;
    async fn signal_exists(
        &mut self,
        event_id: i64,
        sender_id: i64,
        receiver_id: i64,
    ) -> Result<bool, StoreError>;
    async fn create_signal(
        &mut self,
        event_id: i64,
        sender_id: i64,
        receiver_id: i64,
    ) -> Result<Signal, StoreError>;
    /// Atomically add one and return the new value.
    async fn increment_received_count(&mut self, participant_id: i64) -> Result<i32, StoreError>;
    async fn create_match_if_absent(
        &mut self,
        event_id: i64,
        pair: NormalizedPair,
    ) -> Result<MatchInsert, StoreError>;
    async fn count_matches(&mut self, event_id: i64) -> Result<i64, StoreError>;
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
