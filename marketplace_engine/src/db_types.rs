//! Core data types for the marketplace escrow engine.
//!
//! Everything in this module is a plain record or a pure function over one. The status enums carry the
//! full transition and authority rules for the order state machine, so they can be tested without a
//! database or a payment processor anywhere in sight.

use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use mp_common::Money;
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid status value: {0}")]
pub struct ConversionError(String);

//--------------------------------------        Role        ----------------------------------------------------------
/// The party performing an action on an order. Transition authority (which status changes each party may
/// request) is keyed on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Buyer,
    Seller,
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Buyer => write!(f, "buyer"),
            Role::Seller => write!(f, "seller"),
        }
    }
}

//--------------------------------------      OrderId       ----------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct OrderId(pub String);

impl FromStr for OrderId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl OrderId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------      OfferId       ----------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct OfferId(pub String);

impl From<String> for OfferId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for OfferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl OfferId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------  OrderStatusType   ----------------------------------------------------------
/// The order state machine.
///
/// ```text
/// PendingPayment → Paid → Processing → InProgress → Delivered
/// Delivered → InRevision → Delivered      (bounded by max_revisions)
/// Delivered → Completed (T)
/// {PendingPayment, Paid, Processing} → Cancelled (T)
/// any non-terminal → Disputed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum OrderStatusType {
    /// A payment authorization exists but has not been confirmed yet.
    PendingPayment,
    /// The buyer's funds are held in escrow. The seller has not started work.
    Paid,
    /// The seller has acknowledged the order and is preparing to start.
    Processing,
    /// The seller is actively working on the order.
    InProgress,
    /// The seller has submitted a deliverable and is waiting on the buyer.
    Delivered,
    /// The buyer has requested rework on the latest deliverable.
    InRevision,
    /// The buyer accepted the work. Funds are captured and released. Terminal.
    Completed,
    /// The order was cancelled and any held funds refunded. Terminal.
    Cancelled,
    /// One of the parties raised a dispute. Resolution happens outside this engine.
    Disputed,
}

impl OrderStatusType {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatusType::Completed | OrderStatusType::Cancelled)
    }

    /// The statuses a seller may move an order with this status to. Note that the two `→ Delivered`
    /// transitions only happen via a delivery submission, never via a bare status change.
    pub fn seller_transitions(&self) -> Vec<OrderStatusType> {
        use OrderStatusType::*;
        let mut next = match self {
            Paid => vec![Processing, Cancelled],
            Processing => vec![InProgress, Cancelled],
            InProgress => vec![Delivered],
            InRevision => vec![Delivered],
            _ => vec![],
        };
        if !self.is_terminal() {
            next.push(Disputed);
        }
        next
    }

    /// The statuses a buyer may move an order with this status to.
    pub fn buyer_transitions(&self) -> Vec<OrderStatusType> {
        use OrderStatusType::*;
        let mut next = match self {
            PendingPayment => vec![Cancelled],
            Paid => vec![Cancelled],
            Delivered => vec![Completed, InRevision],
            _ => vec![],
        };
        if !self.is_terminal() {
            next.push(Disputed);
        }
        next
    }

    pub fn next_statuses(&self, role: Role) -> Vec<OrderStatusType> {
        match role {
            Role::Buyer => self.buyer_transitions(),
            Role::Seller => self.seller_transitions(),
        }
    }

    pub fn can_transition(&self, role: Role, to: OrderStatusType) -> bool {
        self.next_statuses(role).contains(&to)
    }
}

impl Display for OrderStatusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatusType::PendingPayment => "PendingPayment",
            OrderStatusType::Paid => "Paid",
            OrderStatusType::Processing => "Processing",
            OrderStatusType::InProgress => "InProgress",
            OrderStatusType::Delivered => "Delivered",
            OrderStatusType::InRevision => "InRevision",
            OrderStatusType::Completed => "Completed",
            OrderStatusType::Cancelled => "Cancelled",
            OrderStatusType::Disputed => "Disputed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for OrderStatusType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PendingPayment" => Ok(Self::PendingPayment),
            "Paid" => Ok(Self::Paid),
            "Processing" => Ok(Self::Processing),
            "InProgress" => Ok(Self::InProgress),
            "Delivered" => Ok(Self::Delivered),
            "InRevision" => Ok(Self::InRevision),
            "Completed" => Ok(Self::Completed),
            "Cancelled" => Ok(Self::Cancelled),
            "Disputed" => Ok(Self::Disputed),
            s => Err(ConversionError(format!("Invalid order status: {s}"))),
        }
    }
}

/// A displayable list of statuses, used in error payloads so that a rejected transition can tell the
/// caller exactly which moves were legal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusList(pub Vec<OrderStatusType>);

impl Display for StatusList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return write!(f, "none");
        }
        let s = self.0.iter().map(|s| s.to_string()).collect::<Vec<String>>().join(", ");
        write!(f, "{s}")
    }
}

impl From<Vec<OrderStatusType>> for StatusList {
    fn from(v: Vec<OrderStatusType>) -> Self {
        Self(v)
    }
}

//--------------------------------------   ListingStatus    ----------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum ListingStatus {
    Draft,
    Active,
    Reserved,
    Sold,
    Inactive,
}

impl Display for ListingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ListingStatus::Draft => "Draft",
            ListingStatus::Active => "Active",
            ListingStatus::Reserved => "Reserved",
            ListingStatus::Sold => "Sold",
            ListingStatus::Inactive => "Inactive",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ListingStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Draft" => Ok(Self::Draft),
            "Active" => Ok(Self::Active),
            "Reserved" => Ok(Self::Reserved),
            "Sold" => Ok(Self::Sold),
            "Inactive" => Ok(Self::Inactive),
            s => Err(ConversionError(format!("Invalid listing status: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum Availability {
    /// The listing is for a unique item and is taken off the market once sold.
    SingleUnit,
    /// The listing can be sold any number of times (e.g. a service).
    Repeatable,
}

impl Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Availability::SingleUnit => write!(f, "SingleUnit"),
            Availability::Repeatable => write!(f, "Repeatable"),
        }
    }
}

//--------------------------------------    OfferStatus     ----------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum OfferStatus {
    /// A payment authorization was created, but the client hasn't completed the confirmation step.
    PendingPayment,
    /// The authorization is confirmed and funds are on hold. The seller can now decide.
    Paid,
    /// The seller accepted the offer. Terminal.
    Accepted,
    /// The seller rejected the offer. Terminal.
    Rejected,
    /// The buyer withdrew the offer before the seller decided. Terminal.
    Cancelled,
}

impl OfferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OfferStatus::Accepted | OfferStatus::Rejected | OfferStatus::Cancelled)
    }
}

impl Display for OfferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OfferStatus::PendingPayment => "PendingPayment",
            OfferStatus::Paid => "Paid",
            OfferStatus::Accepted => "Accepted",
            OfferStatus::Rejected => "Rejected",
            OfferStatus::Cancelled => "Cancelled",
        };
        write!(f, "{s}")
    }
}

impl FromStr for OfferStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PendingPayment" => Ok(Self::PendingPayment),
            "Paid" => Ok(Self::Paid),
            "Accepted" => Ok(Self::Accepted),
            "Rejected" => Ok(Self::Rejected),
            "Cancelled" => Ok(Self::Cancelled),
            s => Err(ConversionError(format!("Invalid offer status: {s}"))),
        }
    }
}

//--------------------------------------   DeliveryStatus   ----------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum DeliveryStatus {
    PendingReview,
    Accepted,
    RevisionRequested,
    Completed,
}

impl Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeliveryStatus::PendingReview => "PendingReview",
            DeliveryStatus::Accepted => "Accepted",
            DeliveryStatus::RevisionRequested => "RevisionRequested",
            DeliveryStatus::Completed => "Completed",
        };
        write!(f, "{s}")
    }
}

//-------------------------------------- WithdrawalStatus   ----------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum WithdrawalStatus {
    /// Persisted, but the external transfer has not been submitted yet.
    Pending,
    /// The transfer was accepted by the payment processor and is settling.
    Processing,
    /// The transfer settled. Only withdrawals in this state debit the seller's balance.
    Completed,
    /// The transfer was rejected or bounced. Kept for audit; does not debit the balance.
    Failed,
}

impl WithdrawalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WithdrawalStatus::Completed | WithdrawalStatus::Failed)
    }
}

impl Display for WithdrawalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WithdrawalStatus::Pending => "Pending",
            WithdrawalStatus::Processing => "Processing",
            WithdrawalStatus::Completed => "Completed",
            WithdrawalStatus::Failed => "Failed",
        };
        write!(f, "{s}")
    }
}

//--------------------------------------      Listing       ----------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Listing {
    pub id: i64,
    pub seller_id: i64,
    pub title: String,
    pub price: Money,
    pub availability: Availability,
    pub status: ListingStatus,
    /// When the current reservation lapses. Must be `None` whenever `status` is not `Reserved`.
    pub reserved_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Listing {
    /// An expired reservation counts as released even before any row has been updated (lazy expiry).
    pub fn reservation_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ListingStatus::Reserved && self.reserved_until.map(|t| t <= now).unwrap_or(true)
    }

    /// The status this listing effectively has at `now`, treating an expired reservation as `Active`.
    pub fn effective_status(&self, now: DateTime<Utc>) -> ListingStatus {
        if self.reservation_expired(now) {
            ListingStatus::Active
        } else {
            self.status
        }
    }

    pub fn is_purchasable(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now) == ListingStatus::Active
    }
}

#[derive(Debug, Clone)]
pub struct NewListing {
    pub seller_id: i64,
    pub title: String,
    pub price: Money,
    pub availability: Availability,
}

impl NewListing {
    pub fn new(seller_id: i64, title: impl Into<String>, price: Money) -> Self {
        Self { seller_id, title: title.into(), price, availability: Availability::SingleUnit }
    }

    pub fn repeatable(mut self) -> Self {
        self.availability = Availability::Repeatable;
        self
    }
}

//--------------------------------------       Offer        ----------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Offer {
    pub id: i64,
    pub offer_id: OfferId,
    pub listing_id: i64,
    pub buyer_id: i64,
    pub amount: Money,
    pub message: Option<String>,
    /// The payment authorization reference held against this offer.
    pub payment_ref: String,
    pub status: OfferStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOffer {
    pub offer_id: OfferId,
    pub listing_id: i64,
    pub buyer_id: i64,
    pub amount: Money,
    pub message: Option<String>,
    pub payment_ref: String,
}

//--------------------------------------       Order        ----------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub order_id: OrderId,
    /// The offer this order was created from, or `None` for a direct purchase.
    pub offer_id: Option<OfferId>,
    pub listing_id: i64,
    pub buyer_id: i64,
    pub seller_id: i64,
    pub amount: Money,
    /// Populated on completion. `platform_fee + seller_payout == amount` whenever both are set.
    pub platform_fee: Money,
    pub seller_payout: Money,
    pub status: OrderStatusType,
    pub revisions: i64,
    pub max_revisions: i64,
    pub payment_ref: String,
    pub captured: bool,
    pub captured_at: Option<DateTime<Utc>>,
    /// Flips false → true exactly once, on completion.
    pub payment_released: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub chat_channel_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn remaining_revisions(&self) -> i64 {
        (self.max_revisions - self.revisions).max(0)
    }
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_id: OrderId,
    pub offer_id: Option<OfferId>,
    pub listing_id: i64,
    pub buyer_id: i64,
    pub seller_id: i64,
    pub amount: Money,
    pub status: OrderStatusType,
    pub max_revisions: i64,
    pub payment_ref: String,
}

impl NewOrder {
    /// An order backed by a paid offer starts life in `Paid`; the escrow hold already exists.
    pub fn from_offer(order_id: OrderId, offer: &Offer, seller_id: i64, max_revisions: i64) -> Self {
        Self {
            order_id,
            offer_id: Some(offer.offer_id.clone()),
            listing_id: offer.listing_id,
            buyer_id: offer.buyer_id,
            seller_id,
            amount: offer.amount,
            status: OrderStatusType::Paid,
            max_revisions,
            payment_ref: offer.payment_ref.clone(),
        }
    }

    /// A direct purchase starts in `PendingPayment` until the client confirms the authorization.
    pub fn direct(
        order_id: OrderId,
        listing: &Listing,
        buyer_id: i64,
        max_revisions: i64,
        payment_ref: String,
    ) -> Self {
        Self {
            order_id,
            offer_id: None,
            listing_id: listing.id,
            buyer_id,
            seller_id: listing.seller_id,
            amount: listing.price,
            status: OrderStatusType::PendingPayment,
            max_revisions,
            payment_ref,
        }
    }
}

//--------------------------------------      Delivery      ----------------------------------------------------------
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub url: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Delivery {
    pub id: i64,
    pub order_id: OrderId,
    /// Starts at 1 and increases by one per submission. Unique per order.
    pub revision_number: i64,
    pub message: String,
    pub attachments: Json<Vec<Attachment>>,
    pub is_final: bool,
    pub status: DeliveryStatus,
    /// The buyer's notes when they request a revision against this delivery.
    pub revision_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub order_id: OrderId,
    pub message: String,
    pub attachments: Vec<Attachment>,
    pub is_final: bool,
}

//--------------------------------------     Withdrawal     ----------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: i64,
    pub seller_id: i64,
    pub amount: Money,
    pub status: WithdrawalStatus,
    /// The external transfer reference, once the processor has accepted the payout.
    pub transfer_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod test {
    use chrono::Duration;

    use super::*;

    #[test]
    fn seller_authority_table() {
        use OrderStatusType::*;
        assert!(Paid.can_transition(Role::Seller, Processing));
        assert!(Paid.can_transition(Role::Seller, Cancelled));
        assert!(Processing.can_transition(Role::Seller, InProgress));
        assert!(Processing.can_transition(Role::Seller, Cancelled));
        assert!(InProgress.can_transition(Role::Seller, Delivered));
        assert!(InRevision.can_transition(Role::Seller, Delivered));
        // Sellers never complete, and never cancel once work is delivered
        assert!(!Delivered.can_transition(Role::Seller, Completed));
        assert!(!InProgress.can_transition(Role::Seller, Cancelled));
        assert!(!Delivered.can_transition(Role::Seller, Cancelled));
    }

    #[test]
    fn buyer_authority_table() {
        use OrderStatusType::*;
        assert!(PendingPayment.can_transition(Role::Buyer, Cancelled));
        assert!(Paid.can_transition(Role::Buyer, Cancelled));
        assert!(Delivered.can_transition(Role::Buyer, Completed));
        assert!(Delivered.can_transition(Role::Buyer, InRevision));
        assert!(!Processing.can_transition(Role::Buyer, Cancelled));
        assert!(!InProgress.can_transition(Role::Buyer, Completed));
    }

    #[test]
    fn anyone_can_dispute_non_terminal_orders() {
        use OrderStatusType::*;
        for status in [PendingPayment, Paid, Processing, InProgress, Delivered, InRevision, Disputed] {
            assert!(status.can_transition(Role::Buyer, Disputed), "{status} should be disputable");
            assert!(status.can_transition(Role::Seller, Disputed), "{status} should be disputable");
        }
        assert!(!Completed.can_transition(Role::Buyer, Disputed));
        assert!(!Cancelled.can_transition(Role::Seller, Disputed));
    }

    #[test]
    fn reservation_expiry_is_lazy() {
        let now = Utc::now();
        let mut listing = Listing {
            id: 1,
            seller_id: 10,
            title: "Vintage synth".to_string(),
            price: Money::from_units(500),
            availability: Availability::SingleUnit,
            status: ListingStatus::Reserved,
            reserved_until: Some(now + Duration::hours(2)),
            created_at: now,
            updated_at: now,
        };
        assert_eq!(listing.effective_status(now), ListingStatus::Reserved);
        assert!(!listing.is_purchasable(now));
        listing.reserved_until = Some(now - Duration::seconds(1));
        assert_eq!(listing.effective_status(now), ListingStatus::Active);
        assert!(listing.is_purchasable(now));
        // A sold listing never reverts, no matter the timestamp
        listing.status = ListingStatus::Sold;
        listing.reserved_until = None;
        assert_eq!(listing.effective_status(now), ListingStatus::Sold);
    }

    #[test]
    fn status_round_trips() {
        assert_eq!("InRevision".parse::<OrderStatusType>().unwrap(), OrderStatusType::InRevision);
        assert_eq!("Reserved".parse::<ListingStatus>().unwrap(), ListingStatus::Reserved);
        assert_eq!("Paid".parse::<OfferStatus>().unwrap(), OfferStatus::Paid);
        assert!("Shipped".parse::<OrderStatusType>().is_err());
    }

    #[test]
    fn status_list_display() {
        let list = StatusList(vec![OrderStatusType::Processing, OrderStatusType::Cancelled]);
        assert_eq!(list.to_string(), "Processing, Cancelled");
        assert_eq!(StatusList(vec![]).to_string(), "none");
    }
}
