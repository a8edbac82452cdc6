use chrono::{DateTime, Utc};
use mp_common::Money;
use thiserror::Error;

use crate::{
    db_types::{
        Delivery,
        Listing,
        ListingStatus,
        NewDelivery,
        NewListing,
        NewOffer,
        NewOrder,
        Offer,
        OfferId,
        OfferStatus,
        Order,
        OrderId,
        OrderStatusType,
        Role,
        StatusList,
        Withdrawal,
        WithdrawalStatus,
    },
    traits::{AcceptanceResult, CancellationResult, GatewayError, LedgerApiError, LedgerManagement, RevisionOutcome},
};

/// This trait defines the highest level of behaviour for backends supporting the marketplace engine.
///
/// Every method that touches more than one entity is a single logical transaction: either all of its
/// writes land, or none do. Status changes are written with a guard on the current status, which gives
/// the per-entity serialization boundary — two racing calls on the same offer or order cannot both
/// succeed, because only one of them will find the row in the expected state.
///
/// Validation and authority checks live in the flow APIs; the backend enforces atomicity and the state
/// guards, and reports a conflict when a guard misses.
#[allow(async_fn_in_trait)]
pub trait MarketplaceDatabase: Clone + LedgerManagement {
    /// The URL of the database
    fn url(&self) -> &str;

    async fn insert_listing(&self, listing: NewListing) -> Result<Listing, MarketplaceError>;

    /// Moves a listing between non-reservation statuses (Draft → Active, Active → Inactive, ...).
    /// The guard is on `expected`; a miss returns [`MarketplaceError::ListingUnavailable`].
    async fn update_listing_status(
        &self,
        listing_id: i64,
        expected: ListingStatus,
        new_status: ListingStatus,
    ) -> Result<Listing, MarketplaceError>;

    /// Releases every reservation whose expiry has passed back to `Active`. This is an optimization
    /// only: all read paths already treat an expired reservation as released.
    async fn release_expired_reservations(&self, now: DateTime<Utc>) -> Result<Vec<Listing>, MarketplaceError>;

    async fn insert_offer(&self, offer: NewOffer) -> Result<Offer, MarketplaceError>;

    /// Confirms an offer payment. In one transaction: the offer moves `PendingPayment` → `Paid`, the
    /// paired order is created, and the listing is reserved until `reserved_until`.
    async fn commit_offer_payment(
        &self,
        offer_id: &OfferId,
        order: NewOrder,
        reserved_until: DateTime<Utc>,
    ) -> Result<(Offer, Order), MarketplaceError>;

    /// Records the chat channel opened for an order. Chat failures never roll back a confirmation, so
    /// this is deliberately a separate write.
    async fn set_order_chat_channel(&self, order_id: &OrderId, channel_id: &str) -> Result<Order, MarketplaceError>;

    /// Seller accepts a paid offer. In one transaction: offer → `Accepted`, the listing is marked
    /// `Sold` (single-unit) or returned to `Active` (repeatable), and every other live offer on the
    /// listing is cascade-rejected. A listing can only be won by one offer.
    async fn accept_offer(&self, offer_id: &OfferId) -> Result<AcceptanceResult, MarketplaceError>;

    /// Seller rejects a paid offer. In one transaction: offer → `Rejected`, the paired order is
    /// cancelled, and the listing reservation is released back to `Active`.
    async fn reject_offer(
        &self,
        offer_id: &OfferId,
    ) -> Result<(Offer, Option<Order>, Listing), MarketplaceError>;

    /// Buyer withdraws a non-terminal offer. Releases the listing reservation if this offer held it.
    async fn cancel_offer(
        &self,
        offer_id: &OfferId,
    ) -> Result<(Offer, Option<Order>, Listing), MarketplaceError>;

    /// Creates a direct-purchase order and reserves the listing, atomically.
    async fn create_direct_order(
        &self,
        order: NewOrder,
        reserved_until: DateTime<Utc>,
    ) -> Result<Order, MarketplaceError>;

    /// Marks a direct-purchase order as paid (`PendingPayment` → `Paid`, guarded).
    async fn mark_order_paid(&self, order_id: &OrderId) -> Result<Order, MarketplaceError>;

    /// A plain, guarded status transition with no side effects (e.g. `Paid` → `Processing`). The
    /// transitions with side effects have their own methods below.
    async fn update_order_status(
        &self,
        order_id: &OrderId,
        expected: OrderStatusType,
        new_status: OrderStatusType,
    ) -> Result<Order, MarketplaceError>;

    /// Completes a delivered order. The caller has already captured the payment; this transaction
    /// records the capture, writes the fee split, flips `payment_released` and stamps `completed_at`,
    /// and settles the latest delivery. Guarded on `Delivered`.
    async fn complete_order(
        &self,
        order_id: &OrderId,
        platform_fee: Money,
        seller_payout: Money,
        captured_at: DateTime<Utc>,
    ) -> Result<Order, MarketplaceError>;

    /// Cancels an order. In one transaction: order → `Cancelled` (guarded on `expected`), the listing
    /// reservation is released, and the originating offer (if any) is marked `Cancelled`.
    async fn cancel_order(
        &self,
        order_id: &OrderId,
        expected: OrderStatusType,
    ) -> Result<CancellationResult, MarketplaceError>;

    /// Records a buyer revision request. In one transaction: the revision counter is incremented
    /// (guarded against the budget), the order moves `Delivered` → `InRevision`, and the latest
    /// delivery is annotated with the buyer's notes.
    async fn record_revision_request(
        &self,
        order_id: &OrderId,
        notes: &str,
    ) -> Result<RevisionOutcome, MarketplaceError>;

    /// Persists a delivery with the next revision number and drives the order to `Delivered`, in one
    /// transaction. The order must be `InProgress` or `InRevision`.
    async fn insert_delivery(&self, delivery: NewDelivery) -> Result<(Delivery, Order), MarketplaceError>;

    /// Creates a `Pending` withdrawal after re-checking the available balance *inside* the same
    /// transaction, so two concurrent requests cannot both claim the same funds.
    async fn create_withdrawal(&self, seller_id: i64, amount: Money) -> Result<Withdrawal, MarketplaceError>;

    /// Guarded withdrawal status update, recording the transfer reference or failure reason.
    async fn update_withdrawal_status(
        &self,
        withdrawal_id: i64,
        expected: &[WithdrawalStatus],
        new_status: WithdrawalStatus,
        transfer_ref: Option<&str>,
        failure_reason: Option<&str>,
    ) -> Result<Withdrawal, MarketplaceError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), MarketplaceError> {
        Ok(())
    }
}

/// The error taxonomy for the engine. Validation, authorization and state-conflict variants carry
/// enough detail for the caller to self-correct; rejected transitions name the current status and the
/// actor's allowed next statuses, and that payload is part of the contract.
#[derive(Debug, Clone, Error)]
pub enum MarketplaceError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("{0}")]
    Validation(String),
    #[error("The requested listing {0} does not exist")]
    ListingNotFound(i64),
    #[error("The requested offer {0} does not exist")]
    OfferNotFound(OfferId),
    #[error("The requested order {0} does not exist")]
    OrderNotFound(OrderId),
    #[error("The requested withdrawal {0} does not exist")]
    WithdrawalNotFound(i64),
    #[error("No offer or order is linked to payment reference {0}")]
    PaymentRefNotFound(String),
    #[error("You do not have permission to act on this resource: {0}")]
    Forbidden(String),
    #[error("As the {role}, you may not move order {order_id} from {current} to {requested}. Allowed: {allowed}")]
    TransitionNotAllowed { role: Role, order_id: OrderId, current: OrderStatusType, requested: OrderStatusType, allowed: StatusList },
    #[error("Order {order_id} is {status}; expected {expected}")]
    OrderStateConflict { order_id: OrderId, status: OrderStatusType, expected: StatusList },
    #[error("Offer {offer_id} is {status}; expected {expected}")]
    OfferStateConflict { offer_id: OfferId, status: OfferStatus, expected: OfferStatus },
    #[error("Listing {listing_id} is not available ({status})")]
    ListingUnavailable { listing_id: i64, status: ListingStatus },
    #[error("Revision limit reached for order {order_id}: all {max} revisions have been used")]
    RevisionLimitReached { order_id: OrderId, max: i64 },
    #[error("Insufficient balance: requested {requested} but only {available} is available")]
    InsufficientBalance { requested: Money, available: Money },
    #[error("Withdrawal {withdrawal_id} is {status} and cannot move to {requested}")]
    WithdrawalStateConflict { withdrawal_id: i64, status: WithdrawalStatus, requested: WithdrawalStatus },
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("{0}")]
    Ledger(#[from] LedgerApiError),
}

impl From<sqlx::Error> for MarketplaceError {
    fn from(e: sqlx::Error) -> Self {
        MarketplaceError::DatabaseError(e.to_string())
    }
}
