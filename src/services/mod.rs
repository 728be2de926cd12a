// Service exports
pub mod auth;
pub mod memory;
pub mod notifier;
pub mod postgres;
pub mod store;

pub use auth::{bearer_token, AuthError, Claims, TokenIssuer};
pub use memory::MemoryStore;
pub use notifier::{BroadcastNotifier, Notifier};
pub use postgres::PostgresStore;
pub use store::{Store, StoreError, StoreTx};
