use thiserror::Error;

use crate::{
    db_types::{Delivery, Listing, Offer, OfferId, Order, OrderId, Role, Withdrawal},
    order_objects::OrderQueryFilter,
    traits::BalanceSummary,
};

#[derive(Debug, Clone, Error)]
pub enum LedgerApiError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("User error constructing query: {0}")]
    QueryError(String),
}

impl From<sqlx::Error> for LedgerApiError {
    fn from(e: sqlx::Error) -> Self {
        LedgerApiError::DatabaseError(e.to_string())
    }
}

/// Read-side queries over the marketplace store.
///
/// The [`super::MarketplaceDatabase`] trait handles the mutating lifecycle machinery; `LedgerManagement`
/// provides the lookups and aggregations the flow APIs and callers build on. Balances are *derived* here:
/// there is no stored counter anywhere, so a crashed or failed write can never leave a stale balance
/// behind — the next read recomputes the truth from the order and withdrawal history.
#[allow(async_fn_in_trait)]
pub trait LedgerManagement {
    async fn fetch_listing(&self, listing_id: i64) -> Result<Option<Listing>, LedgerApiError>;

    async fn fetch_offer(&self, offer_id: &OfferId) -> Result<Option<Offer>, LedgerApiError>;

    async fn fetch_order(&self, order_id: &OrderId) -> Result<Option<Order>, LedgerApiError>;

    /// Fetches the order created from the given offer, if payment has been confirmed.
    async fn fetch_order_for_offer(&self, offer_id: &OfferId) -> Result<Option<Order>, LedgerApiError>;

    /// The buyer's live (`PendingPayment` or `Paid`) offer on a listing, if any. At most one can exist.
    async fn fetch_live_offer(&self, listing_id: i64, buyer_id: i64) -> Result<Option<Offer>, LedgerApiError>;

    async fn fetch_offers_for_listing(&self, listing_id: i64) -> Result<Vec<Offer>, LedgerApiError>;

    async fn fetch_orders_for_user(&self, user_id: i64, role: Role) -> Result<Vec<Order>, LedgerApiError>;

    async fn fetch_deliveries_for_order(&self, order_id: &OrderId) -> Result<Vec<Delivery>, LedgerApiError>;

    /// Recomputes the seller's balances from completed orders and settled withdrawals.
    async fn balance_for_seller(&self, seller_id: i64) -> Result<BalanceSummary, LedgerApiError>;

    async fn fetch_withdrawals_for_seller(&self, seller_id: i64) -> Result<Vec<Withdrawal>, LedgerApiError>;

    async fn fetch_withdrawal_by_transfer_ref(&self, transfer_ref: &str) -> Result<Option<Withdrawal>, LedgerApiError>;

    /// Webhook entry point: the offer holding the given payment authorization, if any.
    async fn fetch_offer_by_payment_ref(&self, payment_ref: &str) -> Result<Option<Offer>, LedgerApiError>;

    /// Webhook entry point: the order holding the given payment authorization, if any.
    async fn fetch_order_by_payment_ref(&self, payment_ref: &str) -> Result<Option<Order>, LedgerApiError>;

    async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, LedgerApiError>;
}
