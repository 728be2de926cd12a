// Core matching exports
pub mod engine;
pub mod notifications;
pub mod phase;
pub mod registration;
pub mod rejection;

pub use engine::{match_notifications, EngineConfig, MatchState, MatchingEngine, SignalReceipt};
pub use notifications::{Notification, Outbound, Topic};
pub use phase::{closes_at, is_open};
pub use registration::{hash_pin, verify_pin, Registrar};
pub use rejection::{EngineError, Rejection};
