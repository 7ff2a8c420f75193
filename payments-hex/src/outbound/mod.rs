//! Outbound adapters.
//!
//! Every port has one production implementation and one in-memory
//! implementation for tests and local runs; the binary picks one per port at
//! startup.

pub mod memory_bus;
pub mod memory_cache;
pub mod memory_store;
pub mod nats_bus;
pub mod redis_cache;
pub mod simulated;
pub mod stripe;

pub use memory_bus::InMemoryBus;
pub use memory_cache::InMemoryCache;
pub use memory_store::InMemoryStore;
pub use nats_bus::NatsBus;
pub use redis_cache::RedisCache;
pub use simulated::SimulatedProvider;
pub use stripe::StripeProvider;
