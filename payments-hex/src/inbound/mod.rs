//! HTTP Inbound Adapter
//!
//! Axum-based HTTP server that drives the application layer, including the
//! provider webhook intake.

mod handlers;
mod server;
pub mod signature;
pub mod stripe_event;

pub use server::{HttpServer, shutdown_signal};
pub use signature::SignatureVerifier;
