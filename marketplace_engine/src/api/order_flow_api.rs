use std::fmt::Debug;

use chrono::Utc;
use log::*;

use crate::{
    config::EngineConfig,
    db_types::{Order, OrderId, OrderStatusType, Role, StatusList},
    events::{EventProducers, OrderCancelledEvent, OrderCompletedEvent},
    helpers::fee_split,
    order_objects::OrderQueryFilter,
    traits::{
        CancellationResult,
        CompletionResult,
        EscrowGateway,
        LedgerManagement,
        MarketplaceDatabase,
        MarketplaceError,
        RevisionOutcome,
    },
};

/// `OrderFlowApi` drives a confirmed order through fulfilment: the seller's progress transitions,
/// buyer revisions, completion (the only place escrow funds are captured), cancellation (the hold is
/// released) and disputes.
///
/// Every mutation authenticates the actor against the order and checks the requested transition
/// against that actor's authority table before touching the store, so a rejected request carries the
/// current status and the moves that *would* have been allowed.
pub struct OrderFlowApi<B, G> {
    db: B,
    gateway: G,
    config: EngineConfig,
    producers: EventProducers,
}

impl<B, G> Debug for OrderFlowApi<B, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderFlowApi")
    }
}

impl<B, G> OrderFlowApi<B, G> {
    pub fn new(db: B, gateway: G, config: EngineConfig, producers: EventProducers) -> Self {
        Self { db, gateway, config, producers }
    }
}

impl<B, G> OrderFlowApi<B, G>
where
    B: MarketplaceDatabase,
    G: EscrowGateway,
{
    /// A plain fulfilment transition with no money movement, e.g. the seller moving `Paid` →
    /// `Processing` → `InProgress`. Completion, cancellation, revisions and disputes have their own
    /// methods below and are rejected here.
    pub async fn update_status(
        &self,
        user_id: i64,
        role: Role,
        order_id: &OrderId,
        new_status: OrderStatusType,
    ) -> Result<Order, MarketplaceError> {
        use OrderStatusType::*;
        if matches!(new_status, Completed | Cancelled | InRevision | Disputed | Delivered) {
            return Err(MarketplaceError::Validation(format!(
                "{new_status} is not a plain transition; use the dedicated operation for it"
            )));
        }
        let order = self.authorized_order(user_id, role, order_id).await?;
        self.check_transition(&order, role, new_status)?;
        let order = self.db.update_order_status(order_id, order.status, new_status).await?;
        info!("🔄️📦️ Order [{order_id}] moved to {new_status} by the {role}");
        Ok(order)
    }

    /// The buyer approves the delivered work. This is the point of no return: the escrow hold is
    /// captured, the platform fee is taken, and the remainder is released to the seller's balance.
    ///
    /// Replaying a completion is safe. The capture is idempotent at the processor, and an order that
    /// is already `Completed` short-circuits to the recorded split.
    pub async fn complete_order(&self, buyer_id: i64, order_id: &OrderId) -> Result<CompletionResult, MarketplaceError> {
        let order = self.authorized_order(buyer_id, Role::Buyer, order_id).await?;
        if order.status == OrderStatusType::Completed && order.payment_released {
            debug!("🔄️📦️ Order [{order_id}] is already completed. Returning the recorded split.");
            return Ok(CompletionResult {
                captured: order.amount,
                platform_fee: order.platform_fee,
                seller_payout: order.seller_payout,
                order,
            });
        }
        self.check_transition(&order, Role::Buyer, OrderStatusType::Completed)?;
        // Capture first. If the processor balks, nothing is persisted and the order stays Delivered.
        let outcome = self.gateway.capture(&order.payment_ref).await?;
        let captured = outcome.amount();
        let (platform_fee, seller_payout) = fee_split(order.amount, self.config.platform_fee_bps);
        let order = self.db.complete_order(order_id, platform_fee, seller_payout, Utc::now()).await?;
        self.call_order_completed_hook(order.clone()).await;
        info!(
            "🔄️📦️ Order [{order_id}] completed. Captured {captured}; fee {platform_fee}; {seller_payout} released \
             to seller #{}",
            order.seller_id
        );
        Ok(CompletionResult { order, captured, platform_fee, seller_payout })
    }

    /// Cancels an order that has not entered fulfilment. The escrow hold is released back to the
    /// buyer before the order record changes; a processor failure therefore leaves the order alive.
    pub async fn cancel_order(
        &self,
        user_id: i64,
        role: Role,
        order_id: &OrderId,
    ) -> Result<CancellationResult, MarketplaceError> {
        let order = self.authorized_order(user_id, role, order_id).await?;
        self.check_transition(&order, role, OrderStatusType::Cancelled)?;
        // Funds are only held, never captured, before completion. Cancelling is a void of the hold.
        let refunded = order.status != OrderStatusType::PendingPayment;
        self.gateway.cancel_authorization(&order.payment_ref).await?;
        let mut result = self.db.cancel_order(order_id, order.status).await?;
        result.refunded = refunded;
        self.call_order_cancelled_hook(result.order.clone(), role, refunded).await;
        info!("🔄️📦️ Order [{order_id}] cancelled by the {role}. Hold released: {refunded}");
        Ok(result)
    }

    /// The buyer sends delivered work back for another round. Fails with
    /// [`MarketplaceError::RevisionLimitReached`] once the order's revision budget is spent.
    pub async fn request_revision(
        &self,
        buyer_id: i64,
        order_id: &OrderId,
        notes: &str,
    ) -> Result<RevisionOutcome, MarketplaceError> {
        let order = self.authorized_order(buyer_id, Role::Buyer, order_id).await?;
        self.check_transition(&order, Role::Buyer, OrderStatusType::InRevision)?;
        let outcome = self.db.record_revision_request(order_id, notes).await?;
        info!(
            "🔄️📦️ Revision requested on order [{order_id}]. {} of {} remaining.",
            outcome.remaining_revisions, outcome.order.max_revisions
        );
        Ok(outcome)
    }

    /// Either party freezes the order pending resolution. Allowed from any non-terminal status; the
    /// escrowed funds stay held until the dispute is resolved out of band.
    pub async fn raise_dispute(&self, user_id: i64, role: Role, order_id: &OrderId) -> Result<Order, MarketplaceError> {
        let order = self.authorized_order(user_id, role, order_id).await?;
        self.check_transition(&order, role, OrderStatusType::Disputed)?;
        let order = self.db.update_order_status(order_id, order.status, OrderStatusType::Disputed).await?;
        warn!("🔄️📦️ Order [{order_id}] is now disputed, raised by the {role}");
        Ok(order)
    }

    /// The orders a user is party to, in the given role, oldest first.
    pub async fn orders_for_user(&self, user_id: i64, role: Role) -> Result<Vec<Order>, MarketplaceError> {
        Ok(self.db.fetch_orders_for_user(user_id, role).await?)
    }

    /// Searches orders by the filter's criteria, oldest first.
    pub async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, MarketplaceError> {
        Ok(self.db.search_orders(query).await?)
    }

    async fn authorized_order(&self, user_id: i64, role: Role, order_id: &OrderId) -> Result<Order, MarketplaceError> {
        let order = self
            .db
            .fetch_order(order_id)
            .await?
            .ok_or_else(|| MarketplaceError::OrderNotFound(order_id.clone()))?;
        let owner = match role {
            Role::Buyer => order.buyer_id,
            Role::Seller => order.seller_id,
        };
        if owner != user_id {
            return Err(MarketplaceError::Forbidden(format!("user #{user_id} is not the {role} on order {order_id}")));
        }
        Ok(order)
    }

    fn check_transition(&self, order: &Order, role: Role, requested: OrderStatusType) -> Result<(), MarketplaceError> {
        if !order.status.can_transition(role, requested) {
            return Err(MarketplaceError::TransitionNotAllowed {
                role,
                order_id: order.order_id.clone(),
                current: order.status,
                requested,
                allowed: StatusList(order.status.next_statuses(role)),
            });
        }
        Ok(())
    }

    async fn call_order_completed_hook(&self, order: Order) {
        for emitter in &self.producers.order_completed_producer {
            emitter.publish_event(OrderCompletedEvent::new(order.clone())).await;
        }
    }

    async fn call_order_cancelled_hook(&self, order: Order, cancelled_by: Role, refunded: bool) {
        for emitter in &self.producers.order_cancelled_producer {
            emitter.publish_event(OrderCancelledEvent::new(order.clone(), cancelled_by, refunded)).await;
        }
    }
}
