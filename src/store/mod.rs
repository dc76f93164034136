pub mod circuit_breaker;
pub mod event_log;
pub mod match_store;

pub use circuit_breaker::CircuitBreaker;
pub use event_log::{AppendError, EventLogAppender};
pub use match_store::{InMemoryMatchStore, MatchStore, PgMatchStore, StoreError};
