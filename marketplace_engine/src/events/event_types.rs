use serde::{Deserialize, Serialize};

use crate::db_types::{Delivery, Offer, Order, Role};

/// The outcome of a seller's decision on a paid offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferDecision {
    Accepted,
    Rejected,
}

/// Published when a seller accepts or rejects a paid offer. Cascade-rejected sibling offers each
/// produce their own `Rejected` event.
#[derive(Debug, Clone)]
pub struct OfferDecidedEvent {
    pub offer: Offer,
    pub decision: OfferDecision,
}

impl OfferDecidedEvent {
    pub fn new(offer: Offer, decision: OfferDecision) -> Self {
        Self { offer, decision }
    }
}

/// Published when a seller submits a delivery and the order moves to `Delivered`.
#[derive(Debug, Clone)]
pub struct OrderDeliveredEvent {
    pub order: Order,
    pub delivery: Delivery,
}

impl OrderDeliveredEvent {
    pub fn new(order: Order, delivery: Delivery) -> Self {
        Self { order, delivery }
    }
}

/// Published when a buyer approves a delivery, the escrow is captured, and the payout is released.
#[derive(Debug, Clone)]
pub struct OrderCompletedEvent {
    pub order: Order,
}

impl OrderCompletedEvent {
    pub fn new(order: Order) -> Self {
        Self { order }
    }
}

/// Published when an order is cancelled, carrying who pulled the trigger and whether the escrowed
/// payment was refunded.
#[derive(Debug, Clone)]
pub struct OrderCancelledEvent {
    pub order: Order,
    pub cancelled_by: Role,
    pub refunded: bool,
}

impl OrderCancelledEvent {
    pub fn new(order: Order, cancelled_by: Role, refunded: bool) -> Self {
        Self { order, cancelled_by, refunded }
    }
}
