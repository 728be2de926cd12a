//! Spark Signal - live signal-matching service for in-person mixer events
//!
//! Participants send a limited number of signals to participants of the
//! opposite gender; a mutual pair of signals becomes a match exactly once,
//! pushed in real time to both participants and to the host dashboard.

pub mod config;
pub mod core;
pub mod models;
pub mod routes;
pub mod services;

// Re-export commonly used types
pub use self::core::{EngineConfig, EngineError, MatchState, MatchingEngine, Notification, Rejection, SignalReceipt, Topic};
pub use self::models::{Event, EventStatus, Gender, Match, NormalizedPair, Participant, Signal};
pub use self::services::{BroadcastNotifier, MemoryStore, Notifier, PostgresStore, Store};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let pair = NormalizedPair::new(9, 4);
        assert_eq!(pair.low, 4);
        assert_eq!(Topic::Participant(pair.high).to_string(), "participant:9");
    }
}
