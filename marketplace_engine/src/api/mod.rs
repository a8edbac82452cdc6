//! The engine's public flow APIs.
//!
//! Each API owns one slice of the marketplace lifecycle and composes the backend traits:
//! * [`ListingApi`] — listing creation and visibility, reservation housekeeping.
//! * [`OfferFlowApi`] — offers, two-phase payment confirmation, seller decisions, direct purchases,
//!   and the processor's payment webhooks.
//! * [`OrderFlowApi`] — the order state machine: fulfilment transitions, completion (escrow
//!   capture), cancellation (hold release) and disputes.
//! * [`DeliveryApi`] — delivery submissions and revision history.
//! * [`LedgerApi`] — seller balances and the withdrawal lifecycle, including transfer webhooks.
pub mod delivery_api;
pub mod ledger_api;
pub mod listing_api;
pub mod offer_flow_api;
pub mod order_flow_api;
pub mod order_objects;

pub use delivery_api::DeliveryApi;
pub use ledger_api::LedgerApi;
pub use listing_api::ListingApi;
pub use offer_flow_api::OfferFlowApi;
pub use order_flow_api::OrderFlowApi;
