//! Marketplace Engine
//!
//! The marketplace engine is the core logic for a services marketplace with escrow-backed payments:
//! buyers make offers (or buy outright), funds are held at a payment processor until the work is
//! delivered and approved, and sellers withdraw their earnings once orders complete. The library is
//! storage- and transport-agnostic.
//!
//! It is divided into three main sections:
//! 1. Backend and collaborator contracts ([`mod@traits`]). A storage backend implements
//!    [`MarketplaceDatabase`] (mutations, each composite operation atomic) and
//!    [`traits::LedgerManagement`] (reads, including derived balances); [`traits::EscrowGateway`]
//!    wraps the payment processor and [`traits::ChatProvider`] the buyer–seller chat. SQLite is the
//!    supported backend ([`SqliteDatabase`]); you should never need to touch the database directly.
//! 2. The flow APIs ([`mod@api`]). [`OfferFlowApi`] covers offers, payment confirmation and seller
//!    decisions; [`OrderFlowApi`] the order state machine from payment to completion, cancellation
//!    or dispute; [`DeliveryApi`] work submissions; [`LedgerApi`] balances and withdrawals;
//!    [`ListingApi`] listing visibility.
//! 3. Events ([`mod@events`]). The engine emits notification events (offer decided, order
//!    delivered, completed, cancelled) through a simple hook system so callers can bolt on
//!    notifications without touching the flows.
pub mod api;
pub mod config;
pub mod db_types;
pub mod events;
pub mod gateway;
pub mod helpers;
pub mod traits;

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;

pub use api::{order_objects, DeliveryApi, LedgerApi, ListingApi, OfferFlowApi, OrderFlowApi};
pub use config::{EngineConfig, GatewayConfig};
pub use traits::{MarketplaceDatabase, MarketplaceError};
