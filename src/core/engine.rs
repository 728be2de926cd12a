use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::core::notifications::{Notification, Outbound, Topic};
use crate::core::phase::{self, DEFAULT_MESSAGE_WINDOW_MINUTES};
use crate::core::rejection::{EngineError, Rejection};
use crate::models::{Event, MatchInsert, Message, NormalizedPair, Participant, Signal};
use crate::services::notifier::Notifier;
use crate::services::store::Store;

/// Tunables for the engine
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Maximum outgoing signals per participant per event
    pub signal_cap: i64,
    pub message_window: Duration,
    /// Maximum message length in characters
    pub max_message_chars: usize,
    /// Push `MessageReceived` to the receiver on a successful message
    pub notify_message_receiver: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            signal_cap: 2,
            message_window: Duration::minutes(DEFAULT_MESSAGE_WINDOW_MINUTES),
            max_message_chars: 200,
            notify_message_receiver: false,
        }
    }
}

/// Match state after a signal was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchState {
    /// No reverse signal yet
    Pending,
    /// This call created the match
    Created { match_count: i64 },
    /// A reverse signal exists and the match row was already present
    AlreadyMatched,
}

impl MatchState {
    pub fn is_matched(&self) -> bool {
        !matches!(self, MatchState::Pending)
    }
}

/// Result of a successful `submit_signal`
#[derive(Debug, Clone)]
pub struct SignalReceipt {
    pub signal: Signal,
    /// Receiver's counter after this signal
    pub received_count: i32,
    pub match_state: MatchState,
}

/// The mutual-signal matching engine
///
/// Signal and match writes are decided inside one store transaction; all
/// notifications are published only after that transaction commits, so a
/// notifier failure can never undo or fail a persisted signal.
#[derive(Clone)]
pub struct MatchingEngine {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
}

impl MatchingEngine {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>, config: EngineConfig) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    async fn load_event(&self, event_id: i64) -> Result<Event, EngineError> {
        self.store
            .find_event_by_id(event_id)
            .await?
            .ok_or(EngineError::Rejected(Rejection::EventNotFound))
    }

    async fn load_sender(&self, event_id: i64, sender_id: i64) -> Result<Participant, EngineError> {
        self.store
            .find_participant(event_id, sender_id)
            .await?
            .ok_or(EngineError::Rejected(Rejection::UnknownSender))
    }

    /// Resolve and validate a target for either a signal or a message.
    async fn load_target(
        &self,
        sender: &Participant,
        receiver_id: i64,
    ) -> Result<Participant, EngineError> {
        let receiver = self
            .store
            .find_participant(sender.event_id, receiver_id)
            .await?
            .ok_or(Rejection::TargetNotFound)?;

        if receiver.id == sender.id {
            return Err(Rejection::SelfTarget.into());
        }
        if receiver.gender == sender.gender {
            return Err(Rejection::SameGenderTarget.into());
        }
        Ok(receiver)
    }

    /// Record a signal from `sender_id` to `receiver_id` and create the match
    /// if the reverse signal already exists.
    pub async fn submit_signal(
        &self,
        event_id: i64,
        sender_id: i64,
        receiver_id: i64,
    ) -> Result<SignalReceipt, EngineError> {
        let event = self.load_event(event_id).await?;
        let sender = self.load_sender(event.id, sender_id).await?;
        let receiver = self.load_target(&sender, receiver_id).await?;

        let mut tx = self.store.begin().await?;

        // Locks both rows: the sender's lock serializes its cap check, the
        // pair lock orders the two directions of a reciprocal race.
        tx.lock_participants(event.id, &[sender.id, receiver.id]).await?;

        let sent = tx.count_signals(event.id, sender.id).await?;
        if sent >= self.config.signal_cap {
            tracing::debug!(
                "Signal cap reached for participant {} in event {} ({} sent)",
                sender.id,
                event.id,
                sent
            );
            return Err(Rejection::SignalCapExceeded.into());
        }
        if tx.signal_exists(event.id, sender.id, receiver.id).await? {
            return Err(Rejection::DuplicateSignal.into());
        }

        let signal = tx.create_signal(event.id, sender.id, receiver.id).await?;
        let received_count = tx.increment_received_count(receiver.id).await?;

        let mut outbound = vec![Outbound::new(
            Topic::Participant(receiver.id),
            Notification::ReceivedUpdate { received_count },
        )];

        let mut match_state = MatchState::Pending;
        if tx.signal_exists(event.id, receiver.id, sender.id).await? {
            let pair = NormalizedPair::new(sender.id, receiver.id);
            match tx.create_match_if_absent(event.id, pair).await? {
                MatchInsert::Created(match_id) => {
                    // Matches of other pairs are counted under the event lock
                    // so every host update carries a distinct total.
                    tx.lock_event(event.id).await?;
                    let match_count = tx.count_matches(event.id).await?;
                    tracing::info!(
                        "Match {} created in event {}: {} <-> {} (total {})",
                        match_id,
                        event.id,
                        pair.low,
                        pair.high,
                        match_count
                    );
                    outbound.extend(match_notifications(&event, &sender, &receiver, match_count));
                    match_state = MatchState::Created { match_count };
                }
                MatchInsert::AlreadyExisted => {
                    tracing::debug!(
                        "Match for {} <-> {} already present in event {}",
                        pair.low,
                        pair.high,
                        event.id
                    );
                    match_state = MatchState::AlreadyMatched;
                }
            }
        }

        tx.commit().await?;

        tracing::debug!(
            "Signal {} recorded: {} -> {} in event {}",
            signal.id,
            sender.id,
            receiver.id,
            event.id
        );

        self.dispatch(outbound);

        Ok(SignalReceipt {
            signal,
            received_count,
            match_state,
        })
    }

    /// Whether the message phase of `event_id` is currently open
    pub async fn is_message_phase_open(&self, event_id: i64) -> Result<bool, EngineError> {
        self.is_message_phase_open_at(event_id, Utc::now()).await
    }

    pub async fn is_message_phase_open_at(
        &self,
        event_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let event = self.load_event(event_id).await?;
        Ok(phase::is_open(&event, now, self.config.message_window))
    }

    /// Send the sender's single message of the event
    pub async fn submit_message(
        &self,
        event_id: i64,
        sender_id: i64,
        receiver_id: i64,
        text: &str,
    ) -> Result<Message, EngineError> {
        self.submit_message_at(event_id, sender_id, receiver_id, text, Utc::now())
            .await
    }

    pub async fn submit_message_at(
        &self,
        event_id: i64,
        sender_id: i64,
        receiver_id: i64,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Message, EngineError> {
        let event = self.load_event(event_id).await?;
        let sender = self.load_sender(event.id, sender_id).await?;

        if !phase::is_open(&event, now, self.config.message_window) {
            return Err(Rejection::PhaseClosed.into());
        }
        if self.store.message_sent_by(event.id, sender.id).await? {
            return Err(Rejection::AlreadySent.into());
        }

        let text = text.trim();
        if text.is_empty() {
            return Err(Rejection::TextEmpty.into());
        }
        if text.chars().count() > self.config.max_message_chars {
            return Err(Rejection::TextTooLong.into());
        }

        let receiver = self.load_target(&sender, receiver_id).await?;

        // The (event, sender) constraint settles concurrent double submits.
        let message = self
            .store
            .insert_message_if_absent(event.id, sender.id, receiver.id, text)
            .await?
            .ok_or(Rejection::AlreadySent)?;

        tracing::info!(
            "Message {} stored in event {}: {} -> {}",
            message.id,
            event.id,
            sender.id,
            receiver.id
        );

        if self.config.notify_message_receiver {
            self.dispatch(vec![Outbound::new(
                Topic::Participant(receiver.id),
                Notification::MessageReceived {
                    from_nickname: sender.nickname.clone(),
                    text: message.text.clone(),
                    created_at: message.created_at,
                },
            )]);
        }

        Ok(message)
    }

    fn dispatch(&self, outbound: Vec<Outbound>) {
        for Outbound { topic, payload } in outbound {
            tracing::debug!("Publishing {} to {}", payload.kind(), topic);
            self.notifier.publish(topic, payload);
        }
    }
}

/// The three notifications for a newly created match, in delivery order
pub fn match_notifications(
    event: &Event,
    sender: &Participant,
    receiver: &Participant,
    match_count: i64,
) -> [Outbound; 3] {
    [
        Outbound::new(
            Topic::Participant(sender.id),
            Notification::MatchCreated {
                partner_nickname: receiver.nickname.clone(),
                match_count,
            },
        ),
        Outbound::new(
            Topic::Participant(receiver.id),
            Notification::MatchCreated {
                partner_nickname: sender.nickname.clone(),
                match_count,
            },
        ),
        Outbound::new(
            Topic::Host(event.id),
            Notification::MatchCountUpdate { match_count },
        ),
    ]
}
