//! Port traits (interfaces for adapters).
//!
//! These are the contracts that adapters must implement.
//! The application layer depends on these traits, not concrete implementations.

mod bus;
mod cache;
mod clock;
mod idempotency;
mod outbox;
mod provider;
mod repository;

pub use bus::{BusError, BusMessage, MessageBus};
pub use cache::{CacheError, CacheStore};
pub use clock::{Clock, SystemClock};
pub use idempotency::IdempotencyStore;
pub use outbox::OutboxStore;
pub use provider::{CreatedIntent, IntentStatus, PaymentProvider, ProviderError};
pub use repository::{MutationOutcome, PaymentMutation, PaymentRepository};
