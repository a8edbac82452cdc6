use std::fmt::Debug;

use chrono::Utc;
use log::*;
use mp_common::Money;

use crate::{
    config::EngineConfig,
    db_types::{Listing, ListingStatus, NewOffer, NewOrder, Offer, OfferId, OfferStatus, Order, OrderId, OrderStatusType},
    events::{EventProducers, OfferDecidedEvent, OfferDecision},
    helpers::new_reference,
    traits::{
        AcceptanceResult,
        AuthorizationStatus,
        ChatProvider,
        EscrowGateway,
        GatewayError,
        LedgerManagement,
        MarketplaceDatabase,
        MarketplaceError,
        PaymentConfirmation,
        PaymentMetadata,
    },
};

/// `OfferFlowApi` drives everything between "a buyer wants this listing" and "the seller has a
/// confirmed, escrow-backed order": offer creation, the two-phase payment confirmation, seller
/// accept/reject decisions with their rejection cascade, direct purchases, and the processor's
/// payment webhooks.
///
/// Ordering rule: gateway calls always run *before* the matching database write. If the processor
/// rejects an operation, the store is untouched; if the store write fails after a processor call,
/// the remaining compensation (releasing a hold) is retried out of band and logged here.
pub struct OfferFlowApi<B, G, C> {
    db: B,
    gateway: G,
    chat: C,
    config: EngineConfig,
    producers: EventProducers,
}

impl<B, G, C> Debug for OfferFlowApi<B, G, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OfferFlowApi")
    }
}

impl<B, G, C> OfferFlowApi<B, G, C> {
    pub fn new(db: B, gateway: G, chat: C, config: EngineConfig, producers: EventProducers) -> Self {
        Self { db, gateway, chat, config, producers }
    }
}

impl<B, G, C> OfferFlowApi<B, G, C>
where
    B: MarketplaceDatabase,
    G: EscrowGateway,
    C: ChatProvider,
{
    /// Creates a new offer on a listing and places the escrow hold for it.
    ///
    /// Offers may be made while the listing is `Active` or `Reserved` (another buyer holding a
    /// reservation does not block competing offers; the seller picks the winner). Each buyer may
    /// hold at most one live offer per listing.
    pub async fn make_offer(
        &self,
        buyer_id: i64,
        listing_id: i64,
        amount: Money,
        message: Option<String>,
    ) -> Result<Offer, MarketplaceError> {
        let listing = self.fetch_listing(listing_id).await?;
        if listing.seller_id == buyer_id {
            return Err(MarketplaceError::Validation("You cannot make an offer on your own listing".to_string()));
        }
        let now = Utc::now();
        let effective = listing.effective_status(now);
        if !matches!(effective, ListingStatus::Active | ListingStatus::Reserved) {
            return Err(MarketplaceError::ListingUnavailable { listing_id, status: effective });
        }
        if amount < self.config.min_offer_amount {
            return Err(MarketplaceError::Validation(format!(
                "Offers below {} are not accepted",
                self.config.min_offer_amount
            )));
        }
        if let Some(existing) = self.db.fetch_live_offer(listing_id, buyer_id).await? {
            return Err(MarketplaceError::Validation(format!(
                "You already have a live offer ({}) on this listing",
                existing.offer_id
            )));
        }
        let offer_id = OfferId(new_reference("off"));
        let meta = PaymentMetadata {
            buyer_id,
            listing_id,
            reference: offer_id.as_str().to_string(),
            description: format!("Offer on listing {listing_id}: {}", listing.title),
        };
        let payment_ref = self.gateway.authorize(amount, meta).await?;
        let offer = self
            .db
            .insert_offer(NewOffer { offer_id, listing_id, buyer_id, amount, message, payment_ref })
            .await?;
        info!("🔄️🤝️ Buyer #{buyer_id} offered {amount} on listing {listing_id}. Offer [{}]", offer.offer_id);
        Ok(offer)
    }

    /// Confirms the escrow hold behind an offer. On success the offer moves to `Paid`, the paired
    /// order is created, the listing is reserved, and a chat channel is opened.
    ///
    /// Replaying a confirmation for an already-`Paid` offer is not an error: the original order is
    /// returned with `already_confirmed` set, so processor webhooks and client retries converge on
    /// the same result.
    pub async fn confirm_offer_payment(&self, offer_id: &OfferId) -> Result<PaymentConfirmation, MarketplaceError> {
        let offer = self
            .db
            .fetch_offer(offer_id)
            .await?
            .ok_or_else(|| MarketplaceError::OfferNotFound(offer_id.clone()))?;
        match offer.status {
            OfferStatus::PendingPayment => {},
            OfferStatus::Paid => {
                debug!("🔄️🤝️ Offer [{offer_id}] is already paid. Returning the existing confirmation.");
                let order = self
                    .db
                    .fetch_order_for_offer(offer_id)
                    .await?
                    .ok_or_else(|| MarketplaceError::OrderNotFound(OrderId(format!("for offer {offer_id}"))))?;
                let chat_channel_id = order.chat_channel_id.clone();
                return Ok(PaymentConfirmation { offer, order, chat_channel_id, already_confirmed: true });
            },
            status => {
                return Err(MarketplaceError::OfferStateConflict {
                    offer_id: offer_id.clone(),
                    status,
                    expected: OfferStatus::PendingPayment,
                })
            },
        }
        self.verify_hold(&offer.payment_ref).await?;
        let listing = self.fetch_listing(offer.listing_id).await?;
        let order_id = OrderId(new_reference("ord"));
        let new_order = NewOrder::from_offer(order_id, &offer, listing.seller_id, self.config.default_max_revisions);
        let reserved_until = Utc::now() + self.config.reservation_ttl;
        let (offer, order) = self.db.commit_offer_payment(offer_id, new_order, reserved_until).await?;
        let order = self.open_chat_channel(order).await;
        let chat_channel_id = order.chat_channel_id.clone();
        info!("🔄️🤝️ Offer [{offer_id}] confirmed. Order [{}] is in escrow.", order.order_id);
        Ok(PaymentConfirmation { offer, order, chat_channel_id, already_confirmed: false })
    }

    /// The seller accepts a paid offer. Every other live offer on the listing is auto-rejected, the
    /// losers' escrow holds are released, and their paired orders (if any) are cancelled.
    pub async fn accept_offer(&self, seller_id: i64, offer_id: &OfferId) -> Result<AcceptanceResult, MarketplaceError> {
        let offer = self
            .db
            .fetch_offer(offer_id)
            .await?
            .ok_or_else(|| MarketplaceError::OfferNotFound(offer_id.clone()))?;
        self.assert_seller_owns(seller_id, offer.listing_id).await?;
        let result = self.db.accept_offer(offer_id).await?;
        // Post-commit compensations: release the losing holds. A failure here leaves a dangling
        // authorization at the processor, which expires on its own; we log it and move on.
        for loser in &result.rejected_offers {
            if let Err(e) = self.gateway.cancel_authorization(&loser.payment_ref).await {
                warn!(
                    "🔄️🤝️ Could not release the hold for auto-rejected offer [{}]: {e}. The hold will lapse at the \
                     processor.",
                    loser.offer_id
                );
            }
            self.call_offer_decided_hook(loser.clone(), OfferDecision::Rejected).await;
        }
        self.call_offer_decided_hook(result.offer.clone(), OfferDecision::Accepted).await;
        info!(
            "🔄️🤝️ Offer [{offer_id}] accepted by seller #{seller_id}. {} competing offer(s) auto-rejected.",
            result.rejected_offers.len()
        );
        Ok(result)
    }

    /// The seller declines a paid offer. The hold is released, the paired order is cancelled, and
    /// the listing goes back on the market.
    pub async fn reject_offer(&self, seller_id: i64, offer_id: &OfferId) -> Result<Offer, MarketplaceError> {
        let offer = self
            .db
            .fetch_offer(offer_id)
            .await?
            .ok_or_else(|| MarketplaceError::OfferNotFound(offer_id.clone()))?;
        self.assert_seller_owns(seller_id, offer.listing_id).await?;
        // The hold must only be voided for an offer the rejection can actually land on
        if offer.status != OfferStatus::Paid {
            return Err(MarketplaceError::OfferStateConflict {
                offer_id: offer_id.clone(),
                status: offer.status,
                expected: OfferStatus::Paid,
            });
        }
        self.gateway.cancel_authorization(&offer.payment_ref).await?;
        let (offer, _order, _listing) = self.db.reject_offer(offer_id).await?;
        self.call_offer_decided_hook(offer.clone(), OfferDecision::Rejected).await;
        info!("🔄️🤝️ Offer [{offer_id}] rejected by seller #{seller_id}");
        Ok(offer)
    }

    /// The buyer withdraws their own live offer.
    pub async fn cancel_offer(&self, buyer_id: i64, offer_id: &OfferId) -> Result<Offer, MarketplaceError> {
        let offer = self
            .db
            .fetch_offer(offer_id)
            .await?
            .ok_or_else(|| MarketplaceError::OfferNotFound(offer_id.clone()))?;
        if offer.buyer_id != buyer_id {
            return Err(MarketplaceError::Forbidden(format!("offer {offer_id} belongs to another buyer")));
        }
        // A decided offer's hold either backs a live order (Accepted) or is already released;
        // touch the gateway only when the withdrawal can land
        if !matches!(offer.status, OfferStatus::PendingPayment | OfferStatus::Paid) {
            return Err(MarketplaceError::OfferStateConflict {
                offer_id: offer_id.clone(),
                status: offer.status,
                expected: OfferStatus::Paid,
            });
        }
        self.gateway.cancel_authorization(&offer.payment_ref).await?;
        let (offer, _order, _listing) = self.db.cancel_offer(offer_id).await?;
        info!("🔄️🤝️ Offer [{offer_id}] withdrawn by buyer #{buyer_id}");
        Ok(offer)
    }

    /// Buys a listing outright at its asking price, skipping the offer negotiation. The order starts
    /// in `PendingPayment`; [`Self::confirm_purchase_payment`] (or the `payment_succeeded` webhook)
    /// moves it to `Paid`.
    pub async fn direct_purchase(&self, buyer_id: i64, listing_id: i64) -> Result<Order, MarketplaceError> {
        let listing = self.fetch_listing(listing_id).await?;
        if listing.seller_id == buyer_id {
            return Err(MarketplaceError::Validation("You cannot buy your own listing".to_string()));
        }
        let now = Utc::now();
        if !listing.is_purchasable(now) {
            return Err(MarketplaceError::ListingUnavailable { listing_id, status: listing.effective_status(now) });
        }
        let order_id = OrderId(new_reference("ord"));
        let meta = PaymentMetadata {
            buyer_id,
            listing_id,
            reference: order_id.as_str().to_string(),
            description: format!("Purchase of listing {listing_id}: {}", listing.title),
        };
        let payment_ref = self.gateway.authorize(listing.price, meta).await?;
        let new_order = NewOrder::direct(order_id, &listing, buyer_id, self.config.default_max_revisions, payment_ref);
        let reserved_until = now + self.config.reservation_ttl;
        let order = self.db.create_direct_order(new_order, reserved_until).await?;
        info!("🔄️🛒️ Buyer #{buyer_id} is purchasing listing {listing_id} directly. Order [{}]", order.order_id);
        Ok(order)
    }

    /// Confirms the hold behind a direct purchase and moves the order to `Paid`. Idempotent: a
    /// second confirmation returns the order as-is.
    pub async fn confirm_purchase_payment(&self, order_id: &OrderId) -> Result<Order, MarketplaceError> {
        let order = self
            .db
            .fetch_order(order_id)
            .await?
            .ok_or_else(|| MarketplaceError::OrderNotFound(order_id.clone()))?;
        if order.status != OrderStatusType::PendingPayment {
            debug!("🔄️🛒️ Order [{order_id}] is already {}. Nothing to confirm.", order.status);
            return Ok(order);
        }
        self.verify_hold(&order.payment_ref).await?;
        let order = self.db.mark_order_paid(order_id).await?;
        let order = self.open_chat_channel(order).await;
        info!("🔄️🛒️ Order [{order_id}] is paid and in escrow");
        Ok(order)
    }

    /// Processor webhook: the hold behind `payment_ref` is confirmed. Routes to the matching offer
    /// or direct-purchase confirmation; unknown references are rejected so a misconfigured webhook
    /// endpoint is noticed.
    pub async fn payment_succeeded(&self, payment_ref: &str) -> Result<Order, MarketplaceError> {
        if let Some(offer) = self.db.fetch_offer_by_payment_ref(payment_ref).await? {
            let confirmation = self.confirm_offer_payment(&offer.offer_id).await?;
            return Ok(confirmation.order);
        }
        if let Some(order) = self.db.fetch_order_by_payment_ref(payment_ref).await? {
            return self.confirm_purchase_payment(&order.order_id).await;
        }
        Err(MarketplaceError::PaymentRefNotFound(payment_ref.to_string()))
    }

    /// Processor webhook: the authorization behind `payment_ref` failed or lapsed. The linked offer
    /// or pending order is cancelled. Replays on an already-terminal entity are no-ops.
    pub async fn payment_failed(&self, payment_ref: &str) -> Result<(), MarketplaceError> {
        if let Some(offer) = self.db.fetch_offer_by_payment_ref(payment_ref).await? {
            if offer.status.is_terminal() {
                debug!("🔄️🤝️ Payment failure replay for settled offer [{}]. Ignoring.", offer.offer_id);
                return Ok(());
            }
            let (offer, _, _) = self.db.cancel_offer(&offer.offer_id).await?;
            info!("🔄️🤝️ Offer [{}] cancelled: its payment failed", offer.offer_id);
            return Ok(());
        }
        if let Some(order) = self.db.fetch_order_by_payment_ref(payment_ref).await? {
            if order.status != OrderStatusType::PendingPayment {
                debug!("🔄️🛒️ Payment failure replay for order [{}] ({}). Ignoring.", order.order_id, order.status);
                return Ok(());
            }
            let result = self.db.cancel_order(&order.order_id, OrderStatusType::PendingPayment).await?;
            info!("🔄️🛒️ Order [{}] cancelled: its payment failed", result.order.order_id);
            return Ok(());
        }
        Err(MarketplaceError::PaymentRefNotFound(payment_ref.to_string()))
    }

    async fn verify_hold(&self, payment_ref: &str) -> Result<(), MarketplaceError> {
        let verification = self.gateway.verify_authorization(payment_ref).await?;
        match verification.status {
            AuthorizationStatus::Succeeded => Ok(()),
            AuthorizationStatus::RequiresAction => Err(GatewayError::RequiresAction(
                verification.reason.unwrap_or_else(|| "The buyer must complete authentication first".to_string()),
            )
            .into()),
            AuthorizationStatus::Failed => Err(GatewayError::Declined(
                verification.reason.unwrap_or_else(|| "The authorization was declined".to_string()),
            )
            .into()),
        }
    }

    async fn fetch_listing(&self, listing_id: i64) -> Result<Listing, MarketplaceError> {
        self.db.fetch_listing(listing_id).await?.ok_or(MarketplaceError::ListingNotFound(listing_id))
    }

    async fn assert_seller_owns(&self, seller_id: i64, listing_id: i64) -> Result<(), MarketplaceError> {
        let listing = self.fetch_listing(listing_id).await?;
        if listing.seller_id != seller_id {
            return Err(MarketplaceError::Forbidden(format!("listing {listing_id} belongs to another seller")));
        }
        Ok(())
    }

    /// Chat is best-effort. A failed channel open is logged; the confirmation stands.
    async fn open_chat_channel(&self, order: Order) -> Order {
        match self.chat.open_channel(order.buyer_id, order.seller_id, &order.order_id).await {
            Ok(channel_id) => match self.db.set_order_chat_channel(&order.order_id, &channel_id).await {
                Ok(order) => order,
                Err(e) => {
                    warn!("🔄️💬️ Could not record chat channel for order [{}]: {e}", order.order_id);
                    order
                },
            },
            Err(e) => {
                warn!("🔄️💬️ Could not open a chat channel for order [{}]: {e}", order.order_id);
                order
            },
        }
    }

    async fn call_offer_decided_hook(&self, offer: Offer, decision: OfferDecision) {
        for emitter in &self.producers.offer_decided_producer {
            let event = OfferDecidedEvent::new(offer.clone(), decision);
            emitter.publish_event(event).await;
        }
    }
}
