//! # Backend and collaborator contracts.
//!
//! This module defines the interface contracts between the engine's flow APIs and the things they
//! coordinate: the document store, the escrow payment processor, and the chat collaborator.
//!
//! * [`MarketplaceDatabase`] defines the mutating lifecycle operations a storage backend must provide.
//!   Every multi-entity operation is specified as a single atomic unit; the SQLite backend implements
//!   each one as one transaction.
//! * [`LedgerManagement`] provides the read-side queries, including the derived balance aggregation.
//! * [`EscrowGateway`] wraps the external payment processor's authorize/capture/refund/transfer
//!   primitives behind a stable, idempotent interface.
//! * [`ChatProvider`] opens a buyer–seller channel once per confirmed purchase.
mod chat;
mod data_objects;
mod escrow_gateway;
mod ledger_management;
mod marketplace_database;

pub use chat::{ChatError, ChatProvider, NullChatProvider};
pub use data_objects::{
    AcceptanceResult,
    BalanceSummary,
    CancellationResult,
    CompletionResult,
    PaymentConfirmation,
    RevisionOutcome,
};
pub use escrow_gateway::{
    AuthorizationStatus,
    CaptureOutcome,
    EscrowGateway,
    GatewayError,
    PaymentMetadata,
    PaymentVerification,
};
pub use ledger_management::{LedgerApiError, LedgerManagement};
pub use marketplace_database::{MarketplaceDatabase, MarketplaceError};
