//! Escrow gateway adapters.
//!
//! [`RestEscrowGateway`] talks to a real payment processor over its REST API. [`MockGateway`] is an
//! in-memory processor for tests and sandbox deployments; it models the full hold → capture →
//! transfer lifecycle without any network traffic.
mod mock;
mod rest;

pub use mock::MockGateway;
pub use rest::RestEscrowGateway;
