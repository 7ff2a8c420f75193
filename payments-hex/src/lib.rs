//! # Payments Hex
//!
//! Application layer and adapters for the payment engine.
//!
//! ## Architecture
//!
//! - `service/` - Payment use cases (create, confirm, cancel, refund, queries)
//! - `reconciler/` - Provider notification handling on top of the service
//! - `cache/` - Cache-aside reads for payments
//! - `relay/` - Outbox relay that drains committed events onto the bus
//! - `inbound/` - HTTP adapter (Axum server, webhook intake)
//! - `outbound/` - Bus, cache, provider and in-memory store adapters
//!
//! The service is generic over `R: PaymentRepository + IdempotencyStore`, so
//! the SQL repository and the in-memory store are interchangeable.

pub mod cache;
pub mod inbound;
pub mod outbound;
pub mod reconciler;
pub mod relay;
pub mod service;

#[cfg(test)]
mod service_tests;

pub use cache::PaymentCache;
pub use relay::{OutboxRelay, RelayConfig, RelayReport};
pub use service::{PaymentService, ServiceConfig};
