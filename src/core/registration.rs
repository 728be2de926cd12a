use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::core::rejection::{EngineError, Rejection};
use crate::models::{Event, Gender, NewParticipant, Participant};
use crate::services::store::Store;

/// Hash a pin, salted with the event and nickname it belongs to.
pub fn hash_pin(event_id: i64, nickname: &str, pin: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event_id.to_be_bytes());
    hasher.update(nickname.as_bytes());
    hasher.update([0u8]);
    hasher.update(pin.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn verify_pin(participant: &Participant, pin: &str) -> bool {
    hash_pin(participant.event_id, &participant.nickname, pin) == participant.pin_hash
}

/// Joins participants to events and re-authenticates returning ones
#[derive(Clone)]
pub struct Registrar {
    store: Arc<dyn Store>,
}

impl Registrar {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Join `code` as `nickname`, or log back in if the nickname is taken by
    /// the same person. Input is expected to be validated already.
    pub async fn join(
        &self,
        code: &str,
        nickname: &str,
        gender: Gender,
        pin: &str,
    ) -> Result<(Event, Participant), EngineError> {
        let event = self
            .store
            .find_event(code)
            .await?
            .ok_or(Rejection::EventNotFound)?;

        if !event.is_open() {
            return Err(Rejection::EventClosed.into());
        }

        if let Some(existing) = self.store.find_participant_by_nickname(event.id, nickname).await? {
            let participant = check_returning(existing, gender, pin)?;
            return Ok((event, participant));
        }

        let created = self
            .store
            .insert_participant_if_absent(NewParticipant {
                event_id: event.id,
                nickname: nickname.to_string(),
                gender,
                pin_hash: hash_pin(event.id, nickname, pin),
            })
            .await?;

        let participant = match created {
            Some(participant) => {
                tracing::info!(
                    "Participant {} ({}) joined event {}",
                    participant.id,
                    participant.nickname,
                    event.code
                );
                participant
            }
            None => {
                // Lost a race for the nickname; treat the winner as an existing account.
                let winner = self
                    .store
                    .find_participant_by_nickname(event.id, nickname)
                    .await?
                    .ok_or_else(|| {
                        crate::services::store::StoreError::Missing(format!(
                            "participant {} in event {}",
                            nickname, event.id
                        ))
                    })?;
                check_returning(winner, gender, pin)?
            }
        };

        Ok((event, participant))
    }

    /// Create a new OPEN event
    pub async fn create_event(&self, code: &str) -> Result<Event, EngineError> {
        let event = self
            .store
            .create_event(code)
            .await?
            .ok_or(Rejection::DuplicateEvent)?;
        tracing::info!("Event {} created (id {})", event.code, event.id);
        Ok(event)
    }
}

fn check_returning(existing: Participant, gender: Gender, pin: &str) -> Result<Participant, Rejection> {
    if existing.gender != gender {
        return Err(Rejection::NicknameGenderMismatch);
    }
    if !verify_pin(&existing, pin) {
        return Err(Rejection::InvalidPin);
    }
    Ok(existing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventStatus;
    use crate::services::memory::MemoryStore;

    #[test]
    fn test_pin_hash_is_salted() {
        let a = hash_pin(1, "neo", "1234");
        assert_eq!(a.len(), 64);
        assert_eq!(a, hash_pin(1, "neo", "1234"));
        assert_ne!(a, hash_pin(2, "neo", "1234"));
        assert_ne!(a, hash_pin(1, "trinity", "1234"));
    }

    #[tokio::test]
    async fn test_join_then_rejoin() {
        let store = Arc::new(MemoryStore::new());
        let registrar = Registrar::new(store.clone());
        registrar.create_event("NIGHT").await.unwrap();

        let (_, first) = registrar.join("NIGHT", "neo", Gender::Male, "1234").await.unwrap();
        let (_, again) = registrar.join("NIGHT", "neo", Gender::Male, "1234").await.unwrap();
        assert_eq!(first.id, again.id);

        let wrong_pin = registrar.join("NIGHT", "neo", Gender::Male, "9999").await;
        assert_eq!(wrong_pin.unwrap_err().rejection(), Some(Rejection::InvalidPin));

        let wrong_gender = registrar.join("NIGHT", "neo", Gender::Female, "1234").await;
        assert_eq!(
            wrong_gender.unwrap_err().rejection(),
            Some(Rejection::NicknameGenderMismatch)
        );
    }

    #[tokio::test]
    async fn test_join_requires_open_event() {
        let store = Arc::new(MemoryStore::new());
        let registrar = Registrar::new(store.clone());
        let event = registrar.create_event("NIGHT").await.unwrap();
        store.set_event_status(event.id, EventStatus::Closed).await.unwrap();

        let err = registrar.join("NIGHT", "neo", Gender::Male, "1234").await.unwrap_err();
        assert_eq!(err.rejection(), Some(Rejection::EventClosed));

        let err = registrar.join("NOPE", "neo", Gender::Male, "1234").await.unwrap_err();
        assert_eq!(err.rejection(), Some(Rejection::EventNotFound));
    }

    #[tokio::test]
    async fn test_duplicate_event_code() {
        let registrar = Registrar::new(Arc::new(MemoryStore::new()));
        registrar.create_event("NIGHT").await.unwrap();
        let err = registrar.create_event("NIGHT").await.unwrap_err();
        assert_eq!(err.rejection(), Some(Rejection::DuplicateEvent));
    }
}
