use serde::Serialize;
use thiserror::Error;

use crate::services::store::StoreError;

/// Expected, caller-visible refusal. Every rejection happens before any write
/// or inside a transaction that is rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Error)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Rejection {
    #[error("event not found")]
    EventNotFound,
    #[error("event is closed for entry")]
    EventClosed,
    #[error("duplicate event code")]
    DuplicateEvent,
    #[error("sender is not a participant of this event")]
    UnknownSender,
    #[error("target participant not found")]
    TargetNotFound,
    #[error("cannot target yourself")]
    SelfTarget,
    #[error("target must be of the opposite gender")]
    SameGenderTarget,
    #[error("signal limit reached")]
    SignalCapExceeded,
    #[error("signal already sent to this participant")]
    DuplicateSignal,
    #[error("message phase is closed")]
    PhaseClosed,
    #[error("message already sent")]
    AlreadySent,
    #[error("message text is empty")]
    TextEmpty,
    #[error("message text is too long")]
    TextTooLong,
    #[error("nickname is registered with a different gender")]
    NicknameGenderMismatch,
    #[error("wrong pin")]
    InvalidPin,
}

impl Rejection {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::EventNotFound => "EVENT_NOT_FOUND",
            Rejection::EventClosed => "EVENT_CLOSED",
            Rejection::DuplicateEvent => "DUPLICATE_EVENT",
            Rejection::UnknownSender => "UNKNOWN_SENDER",
            Rejection::TargetNotFound => "TARGET_NOT_FOUND",
            Rejection::SelfTarget => "SELF_TARGET",
            Rejection::SameGenderTarget => "SAME_GENDER_TARGET",
            Rejection::SignalCapExceeded => "SIGNAL_CAP_EXCEEDED",
            Rejection::DuplicateSignal => "DUPLICATE_SIGNAL",
            Rejection::PhaseClosed => "PHASE_CLOSED",
            Rejection::AlreadySent => "ALREADY_SENT",
            Rejection::TextEmpty => "TEXT_EMPTY",
            Rejection::TextTooLong => "TEXT_TOO_LONG",
            Rejection::NicknameGenderMismatch => "NICKNAME_GENDER_MISMATCH",
            Rejection::InvalidPin => "INVALID_PIN",
        }
    }

    /// HTTP status used by the route layer
    pub fn status_code(&self) -> u16 {
        match self {
            Rejection::EventNotFound | Rejection::TargetNotFound => 404,
            Rejection::UnknownSender => 401,
            Rejection::EventClosed | Rejection::PhaseClosed | Rejection::InvalidPin => 403,
            Rejection::DuplicateEvent => 409,
            _ => 400,
        }
    }
}

/// Failure of an engine operation
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("rejected: {0}")]
    Rejected(#[from] Rejection),

    #[error("storage failure: {0}")]
    StorageFailure(#[from] StoreError),
}

impl EngineError {
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            EngineError::Rejected(rejection) => Some(*rejection),
            EngineError::StorageFailure(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_match_serialized_names() {
        for rejection in [
            Rejection::TargetNotFound,
            Rejection::SignalCapExceeded,
            Rejection::NicknameGenderMismatch,
        ] {
            let serialized = serde_json::to_value(rejection).unwrap();
            assert_eq!(serialized, rejection.code());
        }
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Rejection::TargetNotFound.status_code(), 404);
        assert_eq!(Rejection::PhaseClosed.status_code(), 403);
        assert_eq!(Rejection::DuplicateSignal.status_code(), 400);
    }

    #[test]
    fn test_engine_error_exposes_rejection() {
        let err: EngineError = Rejection::SelfTarget.into();
        assert_eq!(err.rejection(), Some(Rejection::SelfTarget));
        assert_eq!(err.to_string(), "rejected: cannot target yourself");
    }
}
