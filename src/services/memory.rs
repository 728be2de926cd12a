use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::{
    Event, EventStats, EventStatus, Match, MatchInsert, Message, MessageView, NewParticipant,
    NormalizedPair, Participant, ParticipantStats, Signal,
};
use crate::services::store::{Store, StoreError, StoreTx};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    next_id: i64,
    events: Vec<Event>,
    participants: Vec<Participant>,
    signals: Vec<Signal>,
    matches: Vec<Match>,
    messages: Vec<Message>,
}

impl MemoryState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn event_mut(&mut self, event_id: i64) -> Option<&mut Event> {
        self.events.iter_mut().find(|e| e.id == event_id)
    }

    fn participant(&self, event_id: i64, participant_id: i64) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|p| p.event_id == event_id && p.id == participant_id)
    }

    fn nickname(&self, participant_id: i64) -> String {
        self.participants
            .iter()
            .find(|p| p.id == participant_id)
            .map(|p| p.nickname.clone())
            .unwrap_or_default()
    }

    fn count_signals(&self, event_id: i64, sender_id: i64) -> i64 {
        self.signals
            .iter()
            .filter(|s| s.event_id == event_id && s.sender_id == sender_id)
            .count() as i64
    }

    fn has_signal(&self, event_id: i64, sender_id: i64, receiver_id: i64) -> bool {
        self.signals.iter().any(|s| {
            s.event_id == event_id && s.sender_id == sender_id && s.receiver_id == receiver_id
        })
    }

    fn has_match(&self, event_id: i64, pair: NormalizedPair) -> bool {
        self.matches
            .iter()
            .any(|m| m.event_id == event_id && m.pair() == pair)
    }

    fn count_matches(&self, event_id: i64) -> i64 {
        self.matches.iter().filter(|m| m.event_id == event_id).count() as i64
    }
}

/// Row identity for the in-process lock table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum LockKey {
    Participant(i64),
    Event(i64),
}

/// In-process store for development and tests
///
/// Committed state sits behind a mutex that is only held for the duration of
/// a single read or write. Transactions behave like READ COMMITTED with row
/// locks: each lock key maps to its own async mutex, held until the
/// transaction commits or is dropped, and uncommitted writes stay private to
/// the transaction that made them.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    locks: Arc<DashMap<LockKey, Arc<Mutex<()>>>>,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause for `latency` inside every transactional read and write, which
    /// widens the window between a check and the write that depends on it.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        Ok(Box::new(MemoryTx {
            state: self.state.clone(),
            locks: self.locks.clone(),
            latency: self.latency,
            held: Vec::new(),
            pending: PendingWrites::default(),
        }))
    }

    async fn create_event(&self, code: &str) -> Result<Option<Event>, StoreError> {
        let mut state = self.state.lock().await;
        if state.events.iter().any(|e| e.code == code) {
            return Ok(None);
        }
        let event = Event {
            id: state.allocate_id(),
            code: code.to_string(),
            status: EventStatus::Open,
            message_write_open: false,
            message_opened_at: None,
            created_at: Utc::now(),
        };
        state.events.push(event.clone());
        Ok(Some(event))
    }

    async fn find_event(&self, code: &str) -> Result<Option<Event>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.events.iter().find(|e| e.code == code).cloned())
    }

    async fn find_event_by_id(&self, event_id: i64) -> Result<Option<Event>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.events.iter().find(|e| e.id == event_id).cloned())
    }

    async fn set_event_status(
        &self,
        event_id: i64,
        status: EventStatus,
    ) -> Result<Option<Event>, StoreError> {
        let mut state = self.state.lock().await;
        Ok(state.event_mut(event_id).map(|event| {
            event.status = status;
            event.clone()
        }))
    }

    async fn set_message_phase(
        &self,
        event_id: i64,
        write_open: bool,
        opened_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Event>, StoreError> {
        let mut state = self.state.lock().await;
        Ok(state.event_mut(event_id).map(|event| {
            event.message_write_open = write_open;
            if opened_at.is_some() {
                event.message_opened_at = opened_at;
            }
            event.clone()
        }))
    }

    async fn find_participant(
        &self,
        event_id: i64,
        participant_id: i64,
    ) -> Result<Option<Participant>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.participant(event_id, participant_id).cloned())
    }

    async fn find_participant_by_nickname(
        &self,
        event_id: i64,
        nickname: &str,
    ) -> Result<Option<Participant>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .participants
            .iter()
            .find(|p| p.event_id == event_id && p.nickname == nickname)
            .cloned())
    }

    async fn insert_participant_if_absent(
        &self,
        participant: NewParticipant,
    ) -> Result<Option<Participant>, StoreError> {
        let mut state = self.state.lock().await;
        if !state.events.iter().any(|e| e.id == participant.event_id) {
            return Err(StoreError::Missing(format!("event {}", participant.event_id)));
        }
        if state
            .participants
            .iter()
            .any(|p| p.event_id == participant.event_id && p.nickname == participant.nickname)
        {
            return Ok(None);
        }
        let created = Participant {
            id: state.allocate_id(),
            event_id: participant.event_id,
            nickname: participant.nickname,
            gender: participant.gender,
            pin_hash: participant.pin_hash,
            received_count: 0,
            created_at: Utc::now(),
        };
        state.participants.push(created.clone());
        Ok(Some(created))
    }

    async fn list_participants(&self, event_id: i64) -> Result<Vec<ParticipantStats>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: Vec<ParticipantStats> = state
            .participants
            .iter()
            .filter(|p| p.event_id == event_id)
            .map(|p| ParticipantStats {
                participant: p.clone(),
                sent_count: state.count_signals(event_id, p.id),
            })
            .collect();
        rows.sort_by(|a, b| a.participant.nickname.cmp(&b.participant.nickname));
        Ok(rows)
    }

    async fn count_sent_signals(&self, event_id: i64, sender_id: i64) -> Result<i64, StoreError> {
        let state = self.state.lock().await;
        Ok(state.count_signals(event_id, sender_id))
    }

    async fn signal_targets(&self, event_id: i64, sender_id: i64) -> Result<Vec<i64>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .signals
            .iter()
            .filter(|s| s.event_id == event_id && s.sender_id == sender_id)
            .map(|s| s.receiver_id)
            .collect())
    }

    async fn matches_for(&self, event_id: i64, participant_id: i64) -> Result<Vec<Match>, StoreError> {
        let state = self.state.lock().await;
        let mut found: Vec<Match> = state
            .matches
            .iter()
            .filter(|m| m.event_id == event_id && m.pair().contains(participant_id))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(found)
    }

    async fn event_stats(&self, event_id: i64) -> Result<EventStats, StoreError> {
        let state = self.state.lock().await;
        Ok(EventStats {
            participants: state.participants.iter().filter(|p| p.event_id == event_id).count() as i64,
            signals: state.signals.iter().filter(|s| s.event_id == event_id).count() as i64,
            matches: state.count_matches(event_id),
        })
    }

    async fn insert_message_if_absent(
        &self,
        event_id: i64,
        sender_id: i64,
        receiver_id: i64,
        text: &str,
    ) -> Result<Option<Message>, StoreError> {
        let mut state = self.state.lock().await;
        if state
            .messages
            .iter()
            .any(|m| m.event_id == event_id && m.sender_id == sender_id)
        {
            return Ok(None);
        }
        let message = Message {
            id: state.allocate_id(),
            event_id,
            sender_id,
            receiver_id,
            text: text.to_string(),
            created_at: Utc::now(),
        };
        state.messages.push(message.clone());
        Ok(Some(message))
    }

    async fn message_sent_by(&self, event_id: i64, sender_id: i64) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .messages
            .iter()
            .any(|m| m.event_id == event_id && m.sender_id == sender_id))
    }

    async fn count_messages_to(&self, event_id: i64, receiver_id: i64) -> Result<i64, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .messages
            .iter()
            .filter(|m| m.event_id == event_id && m.receiver_id == receiver_id)
            .count() as i64)
    }

    async fn list_messages(&self, event_id: i64) -> Result<Vec<MessageView>, StoreError> {
        let state = self.state.lock().await;
        let mut found: Vec<&Message> = state
            .messages
            .iter()
            .filter(|m| m.event_id == event_id)
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(found
            .into_iter()
            .map(|m| MessageView {
                id: m.id,
                sender_nickname: state.nickname(m.sender_id),
                receiver_nickname: state.nickname(m.receiver_id),
                text: m.text.clone(),
                created_at: m.created_at,
            })
            .collect())
    }

    async fn health_check(&self) -> Result<bool, StoreError> {
        Ok(true)
    }
}

/// Writes made by a transaction and not yet visible to anyone else
#[derive(Debug, Default)]
struct PendingWrites {
    signals: Vec<Signal>,
    received: Vec<i64>,
    matches: Vec<Match>,
}

/// A transaction over the in-process state
pub struct MemoryTx {
    state: Arc<Mutex<MemoryState>>,
    locks: Arc<DashMap<LockKey, Arc<Mutex<()>>>>,
    latency: Option<Duration>,
    held: Vec<(LockKey, OwnedMutexGuard<()>)>,
    pending: PendingWrites,
}

impl MemoryTx {
    async fn settle(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    async fn acquire(&mut self, key: LockKey) {
        if self.held.iter().any(|(held, _)| *held == key) {
            return;
        }
        let lock = self.locks.entry(key).or_default().clone();
        let guard = lock.lock_owned().await;
        self.held.push((key, guard));
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn lock_participants(&mut self, event_id: i64, ids: &[i64]) -> Result<(), StoreError> {
        let mut ordered = ids.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        for id in ordered {
            let exists = self.state.lock().await.participant(event_id, id).is_some();
            if !exists {
                return Err(StoreError::Missing(format!("participant {id} in event {event_id}")));
            }
            self.acquire(LockKey::Participant(id)).await;
        }
        Ok(())
    }

    async fn lock_event(&mut self, event_id: i64) -> Result<(), StoreError> {
        let exists = self.state.lock().await.events.iter().any(|e| e.id == event_id);
        if !exists {
            return Err(StoreError::Missing(format!("event {event_id}")));
        }
        self.acquire(LockKey::Event(event_id)).await;
        Ok(())
    }

    async fn count_signals(&mut self, event_id: i64, sender_id: i64) -> Result<i64, StoreError> {
        self.settle().await;
        let committed = self.state.lock().await.count_signals(event_id, sender_id);
        let pending = self
            .pending
            .signals
            .iter()
            .filter(|s| s.event_id == event_id && s.sender_id == sender_id)
            .count() as i64;
        Ok(committed + pending)
    }

    async fn signal_exists(
        &mut self,
        event_id: i64,
        sender_id: i64,
        receiver_id: i64,
    ) -> Result<bool, StoreError> {
        self.settle().await;
        if self.pending.signals.iter().any(|s| {
            s.event_id == event_id && s.sender_id == sender_id && s.receiver_id == receiver_id
        }) {
            return Ok(true);
        }
        Ok(self.state.lock().await.has_signal(event_id, sender_id, receiver_id))
    }

    async fn create_signal(
        &mut self,
        event_id: i64,
        sender_id: i64,
        receiver_id: i64,
    ) -> Result<Signal, StoreError> {
        self.settle().await;
        let signal = Signal {
            id: self.state.lock().await.allocate_id(),
            event_id,
            sender_id,
            receiver_id,
            created_at: Utc::now(),
        };
        self.pending.signals.push(signal.clone());
        Ok(signal)
    }

    async fn increment_received_count(&mut self, participant_id: i64) -> Result<i32, StoreError> {
        self.settle().await;
        let committed = self
            .state
            .lock()
            .await
            .participants
            .iter()
            .find(|p| p.id == participant_id)
            .map(|p| p.received_count)
            .ok_or_else(|| StoreError::Missing(format!("participant {participant_id}")))?;
        self.pending.received.push(participant_id);
        let pending = self
            .pending
            .received
            .iter()
            .filter(|id| **id == participant_id)
            .count() as i32;
        Ok(committed + pending)
    }

    async fn create_match_if_absent(
        &mut self,
        event_id: i64,
        pair: NormalizedPair,
    ) -> Result<MatchInsert, StoreError> {
        self.settle().await;
        if self
            .pending
            .matches
            .iter()
            .any(|m| m.event_id == event_id && m.pair() == pair)
        {
            return Ok(MatchInsert::AlreadyExisted);
        }
        let id = {
            let mut state = self.state.lock().await;
            if state.has_match(event_id, pair) {
                return Ok(MatchInsert::AlreadyExisted);
            }
            state.allocate_id()
        };
        self.pending.matches.push(Match {
            id,
            event_id,
            p1_id: pair.low,
            p2_id: pair.high,
            created_at: Utc::now(),
        });
        Ok(MatchInsert::Created(id))
    }

    async fn count_matches(&mut self, event_id: i64) -> Result<i64, StoreError> {
        self.settle().await;
        let committed = self.state.lock().await.count_matches(event_id);
        let pending = self
            .pending
            .matches
            .iter()
            .filter(|m| m.event_id == event_id)
            .count() as i64;
        Ok(committed + pending)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx {
            state,
            held,
            pending,
            ..
        } = *self;
        let mut state = state.lock().await;

        // Same uniqueness rules as the SQL schema; nothing is applied on violation.
        for signal in &pending.signals {
            if state.has_signal(signal.event_id, signal.sender_id, signal.receiver_id) {
                return Err(StoreError::Conflict(format!(
                    "signal {} -> {} in event {}",
                    signal.sender_id, signal.receiver_id, signal.event_id
                )));
            }
        }
        for m in &pending.matches {
            if state.has_match(m.event_id, m.pair()) {
                return Err(StoreError::Conflict(format!(
                    "match {} <-> {} in event {}",
                    m.p1_id, m.p2_id, m.event_id
                )));
            }
        }

        state.signals.extend(pending.signals);
        for participant_id in pending.received {
            if let Some(participant) = state.participants.iter_mut().find(|p| p.id == participant_id) {
                participant.received_count += 1;
            }
        }
        state.matches.extend(pending.matches);

        drop(state);
        drop(held);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Gender;

    async fn seeded() -> (MemoryStore, i64, i64, i64) {
        let store = MemoryStore::new();
        let event = store.create_event("TEST").await.unwrap().unwrap();
        let a = store
            .insert_participant_if_absent(NewParticipant {
                event_id: event.id,
                nickname: "a".to_string(),
                gender: Gender::Male,
                pin_hash: String::new(),
            })
            .await
            .unwrap()
            .unwrap();
        let b = store
            .insert_participant_if_absent(NewParticipant {
                event_id: event.id,
                nickname: "b".to_string(),
                gender: Gender::Female,
                pin_hash: String::new(),
            })
            .await
            .unwrap()
            .unwrap();
        (store, event.id, a.id, b.id)
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let (store, event_id, a, b) = seeded().await;

        {
            let mut tx = store.begin().await.unwrap();
            tx.create_signal(event_id, a, b).await.unwrap();
            tx.increment_received_count(b).await.unwrap();
        }

        assert_eq!(store.count_sent_signals(event_id, a).await.unwrap(), 0);
        let receiver = store.find_participant(event_id, b).await.unwrap().unwrap();
        assert_eq!(receiver.received_count, 0);
    }

    #[tokio::test]
    async fn test_match_insert_is_idempotent() {
        let (store, event_id, a, b) = seeded().await;
        let pair = NormalizedPair::new(b, a);

        let mut tx = store.begin().await.unwrap();
        assert!(matches!(
            tx.create_match_if_absent(event_id, pair).await.unwrap(),
            MatchInsert::Created(_)
        ));
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(
            tx.create_match_if_absent(event_id, NormalizedPair::new(a, b)).await.unwrap(),
            MatchInsert::AlreadyExisted
        );
        assert_eq!(tx.count_matches(event_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_nickname_is_not_inserted() {
        let (store, event_id, _, _) = seeded().await;
        let again = store
            .insert_participant_if_absent(NewParticipant {
                event_id,
                nickname: "a".to_string(),
                gender: Gender::Female,
                pin_hash: String::new(),
            })
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn test_participant_lock_is_held_until_commit() {
        let (store, event_id, a, b) = seeded().await;

        let mut first = store.begin().await.unwrap();
        first.lock_participants(event_id, &[b, a]).await.unwrap();

        let mut second = store.begin().await.unwrap();
        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            second.lock_participants(event_id, &[b]),
        )
        .await;
        assert!(blocked.is_err());

        first.commit().await.unwrap();

        let acquired = tokio::time::timeout(
            Duration::from_millis(50),
            second.lock_participants(event_id, &[b]),
        )
        .await;
        assert!(matches!(acquired, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_dropped_transaction_releases_locks() {
        let (store, event_id, a, _) = seeded().await;

        {
            let mut tx = store.begin().await.unwrap();
            tx.lock_participants(event_id, &[a]).await.unwrap();
            tx.lock_event(event_id).await.unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        let acquired = tokio::time::timeout(Duration::from_millis(50), async {
            tx.lock_participants(event_id, &[a]).await?;
            tx.lock_event(event_id).await
        })
        .await;
        assert!(matches!(acquired, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_uncommitted_signal_is_private() {
        let (store, event_id, a, b) = seeded().await;

        let mut writer = store.begin().await.unwrap();
        writer.create_signal(event_id, a, b).await.unwrap();
        assert!(writer.signal_exists(event_id, a, b).await.unwrap());
        assert_eq!(writer.count_signals(event_id, a).await.unwrap(), 1);

        let mut reader = store.begin().await.unwrap();
        assert!(!reader.signal_exists(event_id, a, b).await.unwrap());

        writer.commit().await.unwrap();
        assert!(reader.signal_exists(event_id, a, b).await.unwrap());
    }

    #[tokio::test]
    async fn test_conflicting_commit_is_rejected() {
        let (store, event_id, a, b) = seeded().await;
        let pair = NormalizedPair::new(a, b);

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        assert!(matches!(
            first.create_match_if_absent(event_id, pair).await.unwrap(),
            MatchInsert::Created(_)
        ));
        assert!(matches!(
            second.create_match_if_absent(event_id, pair).await.unwrap(),
            MatchInsert::Created(_)
        ));

        first.commit().await.unwrap();
        assert!(matches!(second.commit().await, Err(StoreError::Conflict(_))));
        assert_eq!(store.event_stats(event_id).await.unwrap().matches, 1);
    }

    #[tokio::test]
    async fn test_lock_on_unknown_participant_is_missing() {
        let (store, event_id, a, _) = seeded().await;
        let mut tx = store.begin().await.unwrap();
        let err = tx.lock_participants(event_id, &[a, a + 100]).await.unwrap_err();
        assert!(matches!(err, StoreError::Missing(_)));
    }
}
