//! Scenario tests for the order state machine: seller decisions, fulfilment, revisions,
//! completion, cancellation and disputes.
mod support;

use marketplace_engine::{
    db_types::{Attachment, ListingStatus, NewDelivery, OfferStatus, OrderStatusType, Role},
    order_objects::OrderQueryFilter,
    traits::{LedgerManagement, MarketplaceError},
};
use mp_common::Money;
use support::{live_listing, new_marketplace, order_in_progress, paid_offer, BUYER, OTHER_BUYER, SELLER};

fn delivery_for(order_id: &marketplace_engine::db_types::OrderId, message: &str) -> NewDelivery {
    NewDelivery {
        order_id: order_id.clone(),
        message: message.to_string(),
        attachments: vec![Attachment {
            name: "final_mix.wav".to_string(),
            mime_type: "audio/wav".to_string(),
            size_bytes: 44_100_000,
            url: "https://files.example/final_mix.wav".to_string(),
        }],
        is_final: false,
    }
}

#[tokio::test]
async fn accepting_an_offer_rejects_the_competition() {
    let m = new_marketplace().await;
    let listing = live_listing(&m, Money::from_units(200)).await;
    let winner = paid_offer(&m, BUYER, listing.id, Money::from_units(180)).await;
    let loser = paid_offer(&m, OTHER_BUYER, listing.id, Money::from_units(160)).await;

    let result = m.offers.accept_offer(SELLER, &winner.offer.offer_id).await.expect("Error accepting offer");
    assert_eq!(result.offer.status, OfferStatus::Accepted);
    assert_eq!(result.order.order_id, winner.order.order_id);
    // Single-unit listing: the win takes it off the market for good
    assert_eq!(result.listing.status, ListingStatus::Sold);

    // The losing offer was cascade-rejected, its order cancelled, and its hold released
    assert_eq!(result.rejected_offers.len(), 1);
    let rejected = &result.rejected_offers[0];
    assert_eq!(rejected.offer_id, loser.offer.offer_id);
    assert_eq!(rejected.status, OfferStatus::Rejected);
    assert!(m.gateway.is_cancelled(&rejected.payment_ref));
    let losing_order = m.db.fetch_order(&loser.order.order_id).await.expect("Error fetching order").unwrap();
    assert_eq!(losing_order.status, OrderStatusType::Cancelled);
    // The winner's escrow is untouched until completion
    assert!(!m.gateway.is_captured(&result.order.payment_ref));
    assert!(!m.gateway.is_cancelled(&result.order.payment_ref));
}

#[tokio::test]
async fn only_the_listing_owner_decides_offers() {
    let m = new_marketplace().await;
    let listing = live_listing(&m, Money::from_units(100)).await;
    let confirmation = paid_offer(&m, BUYER, listing.id, Money::from_units(100)).await;

    let err = m.offers.accept_offer(OTHER_BUYER, &confirmation.offer.offer_id).await.unwrap_err();
    assert!(matches!(err, MarketplaceError::Forbidden(_)), "got {err}");
    let err = m.offers.reject_offer(OTHER_BUYER, &confirmation.offer.offer_id).await.unwrap_err();
    assert!(matches!(err, MarketplaceError::Forbidden(_)), "got {err}");
}

#[tokio::test]
async fn rejecting_an_offer_releases_everything() {
    let m = new_marketplace().await;
    let listing = live_listing(&m, Money::from_units(100)).await;
    let confirmation = paid_offer(&m, BUYER, listing.id, Money::from_units(100)).await;

    let offer = m.offers.reject_offer(SELLER, &confirmation.offer.offer_id).await.expect("Error rejecting offer");
    assert_eq!(offer.status, OfferStatus::Rejected);
    assert!(m.gateway.is_cancelled(&offer.payment_ref));
    let order = m.db.fetch_order(&confirmation.order.order_id).await.expect("Error fetching order").unwrap();
    assert_eq!(order.status, OrderStatusType::Cancelled);
    let listing = m.listings.fetch_listing(listing.id).await.expect("Error fetching listing");
    assert_eq!(listing.status, ListingStatus::Active);
}

#[tokio::test]
async fn delivery_then_completion_releases_the_payout() {
    let m = new_marketplace().await;
    let (_offer, order) = order_in_progress(&m, Money::from_units(100)).await;

    let (delivery, order) = m
        .deliveries
        .submit_delivery(SELLER, delivery_for(&order.order_id, "First cut attached. Let me know!"))
        .await
        .expect("Error submitting delivery");
    assert_eq!(delivery.revision_number, 1);
    assert_eq!(order.status, OrderStatusType::Delivered);

    let before = m.ledger.balance(SELLER).await.expect("Error fetching balance");
    assert_eq!(before.available, Money::default());

    let result = m.orders.complete_order(BUYER, &order.order_id).await.expect("Error completing order");
    assert_eq!(result.order.status, OrderStatusType::Completed);
    assert_eq!(result.captured, Money::from_units(100));
    // 10% platform fee, remainder to the seller, summing back exactly
    assert_eq!(result.platform_fee, Money::from_units(10));
    assert_eq!(result.seller_payout, Money::from_units(90));
    assert_eq!(result.platform_fee + result.seller_payout, result.order.amount);
    assert!(result.order.payment_released);
    assert_eq!(m.gateway.capture_count(&result.order.payment_ref), 1);

    let after = m.ledger.balance(SELLER).await.expect("Error fetching balance");
    assert_eq!(after.available, Money::from_units(90));
    assert_eq!(after.total_earned, Money::from_units(90));

    // Completing again captures nothing further and returns the recorded split
    let replay = m.orders.complete_order(BUYER, &order.order_id).await.expect("Error replaying completion");
    assert_eq!(replay.seller_payout, Money::from_units(90));
    assert_eq!(m.gateway.capture_count(&result.order.payment_ref), 1);
}

#[tokio::test]
async fn revisions_cycle_until_the_budget_runs_out() {
    let m = new_marketplace().await;
    let (_offer, order) = order_in_progress(&m, Money::from_units(100)).await;
    let order_id = order.order_id.clone();

    // The default budget is 3 revisions
    for round in 1..=3 {
        let (_, order) = m
            .deliveries
            .submit_delivery(SELLER, delivery_for(&order_id, "Here you go"))
            .await
            .expect("Error submitting delivery");
        assert_eq!(order.status, OrderStatusType::Delivered);
        let outcome = m
            .orders
            .request_revision(BUYER, &order_id, "Please tweak the intro")
            .await
            .expect("Error requesting revision");
        assert_eq!(outcome.order.status, OrderStatusType::InRevision);
        assert_eq!(outcome.order.revisions, round);
        assert_eq!(outcome.remaining_revisions, 3 - round);
        // The revision notes land on the delivery under review
        let delivery = outcome.delivery.expect("The latest delivery should be returned");
        assert_eq!(delivery.revision_notes.as_deref(), Some("Please tweak the intro"));
    }

    let (delivery, _) = m
        .deliveries
        .submit_delivery(SELLER, delivery_for(&order_id, "Fourth and final cut"))
        .await
        .expect("Error submitting delivery");
    assert_eq!(delivery.revision_number, 4);
    let err = m.orders.request_revision(BUYER, &order_id, "One more?").await.unwrap_err();
    assert!(matches!(err, MarketplaceError::RevisionLimitReached { max: 3, .. }), "got {err}");

    // Out of revisions, the buyer can still complete
    let result = m.orders.complete_order(BUYER, &order_id).await.expect("Error completing order");
    assert_eq!(result.order.status, OrderStatusType::Completed);
    let history = m.deliveries.delivery_history(&order_id).await.expect("Error fetching history");
    assert_eq!(history.len(), 4);
}

#[tokio::test]
async fn unauthorized_transitions_name_the_allowed_moves() {
    let m = new_marketplace().await;
    let listing = live_listing(&m, Money::from_units(100)).await;
    let confirmation = paid_offer(&m, BUYER, listing.id, Money::from_units(100)).await;
    m.offers.accept_offer(SELLER, &confirmation.offer.offer_id).await.expect("Error accepting offer");
    let order_id = confirmation.order.order_id.clone();

    // The buyer cannot drive fulfilment
    let err = m.orders.update_status(BUYER, Role::Buyer, &order_id, OrderStatusType::Processing).await.unwrap_err();
    match err {
        MarketplaceError::TransitionNotAllowed { role, current, requested, allowed, .. } => {
            assert_eq!(role, Role::Buyer);
            assert_eq!(current, OrderStatusType::Paid);
            assert_eq!(requested, OrderStatusType::Processing);
            assert!(!allowed.0.contains(&OrderStatusType::Processing));
        },
        other => panic!("Expected TransitionNotAllowed, got {other}"),
    }

    // The seller cannot skip straight to InProgress from Paid
    let err = m.orders.update_status(SELLER, Role::Seller, &order_id, OrderStatusType::InProgress).await.unwrap_err();
    assert!(matches!(err, MarketplaceError::TransitionNotAllowed { .. }), "got {err}");

    // And a stranger is refused before any state is inspected in detail
    let err = m.orders.update_status(999, Role::Seller, &order_id, OrderStatusType::Processing).await.unwrap_err();
    assert!(matches!(err, MarketplaceError::Forbidden(_)), "got {err}");
}

#[tokio::test]
async fn cancelling_a_paid_order_releases_the_hold() {
    let m = new_marketplace().await;
    let listing = live_listing(&m, Money::from_units(130)).await;
    let confirmation = paid_offer(&m, BUYER, listing.id, Money::from_units(130)).await;
    m.offers.accept_offer(SELLER, &confirmation.offer.offer_id).await.expect("Error accepting offer");
    let order_id = confirmation.order.order_id.clone();

    let result = m.orders.cancel_order(BUYER, Role::Buyer, &order_id).await.expect("Error cancelling order");
    assert_eq!(result.order.status, OrderStatusType::Cancelled);
    assert!(result.refunded);
    assert!(m.gateway.is_cancelled(&result.order.payment_ref));
    // The sold listing goes back on the market
    assert_eq!(result.listing.status, ListingStatus::Active);

    // Terminal orders accept no further transitions
    let err = m.orders.cancel_order(BUYER, Role::Buyer, &order_id).await.unwrap_err();
    assert!(matches!(err, MarketplaceError::TransitionNotAllowed { .. }), "got {err}");
}

#[tokio::test]
async fn deliveries_are_rejected_outside_fulfilment() {
    let m = new_marketplace().await;
    let listing = live_listing(&m, Money::from_units(100)).await;
    let confirmation = paid_offer(&m, BUYER, listing.id, Money::from_units(100)).await;
    m.offers.accept_offer(SELLER, &confirmation.offer.offer_id).await.expect("Error accepting offer");
    let order_id = confirmation.order.order_id.clone();

    // Paid, but work hasn't started: no deliveries yet
    let err = m.deliveries.submit_delivery(SELLER, delivery_for(&order_id, "Too early")).await.unwrap_err();
    assert!(matches!(err, MarketplaceError::OrderStateConflict { .. }), "got {err}");

    // And the buyer can't deliver at all
    let err = m.deliveries.submit_delivery(BUYER, delivery_for(&order_id, "Wrong side")).await.unwrap_err();
    assert!(matches!(err, MarketplaceError::Forbidden(_)), "got {err}");
}

#[tokio::test]
async fn empty_deliveries_are_rejected() {
    let m = new_marketplace().await;
    let (_offer, order) = order_in_progress(&m, Money::from_units(100)).await;

    // A blank message is refused
    let err = m.deliveries.submit_delivery(SELLER, delivery_for(&order.order_id, "   ")).await.unwrap_err();
    assert!(matches!(err, MarketplaceError::Validation(_)), "got {err}");

    // As is a delivery with nothing attached
    let mut bare = delivery_for(&order.order_id, "Files to follow");
    bare.attachments.clear();
    let err = m.deliveries.submit_delivery(SELLER, bare).await.unwrap_err();
    assert!(matches!(err, MarketplaceError::Validation(_)), "got {err}");

    // Nothing was persisted and the order never left fulfilment
    let history = m.deliveries.delivery_history(&order.order_id).await.expect("Error fetching history");
    assert!(history.is_empty());
    let order = m.db.fetch_order(&order.order_id).await.expect("Error fetching order").unwrap();
    assert_eq!(order.status, OrderStatusType::InProgress);
}

#[tokio::test]
async fn order_queries_filter_by_party_and_status() {
    let m = new_marketplace().await;
    // Two orders for the same seller: one stays Paid, one gets cancelled
    let listing_a = live_listing(&m, Money::from_units(100)).await;
    let kept = paid_offer(&m, BUYER, listing_a.id, Money::from_units(100)).await;
    let listing_b = live_listing(&m, Money::from_units(100)).await;
    let cancelled = paid_offer(&m, OTHER_BUYER, listing_b.id, Money::from_units(100)).await;
    m.orders
        .cancel_order(OTHER_BUYER, Role::Buyer, &cancelled.order.order_id)
        .await
        .expect("Error cancelling order");

    let sellers_orders = m.orders.orders_for_user(SELLER, Role::Seller).await.expect("Error listing orders");
    assert_eq!(sellers_orders.len(), 2);
    let buyers_orders = m.orders.orders_for_user(BUYER, Role::Buyer).await.expect("Error listing orders");
    assert_eq!(buyers_orders.len(), 1);
    assert_eq!(buyers_orders[0].order_id, kept.order.order_id);

    let query = OrderQueryFilter::default().with_seller_id(SELLER).with_status(OrderStatusType::Paid);
    let live = m.orders.search_orders(query).await.expect("Error searching orders");
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].order_id, kept.order.order_id);

    let query = OrderQueryFilter::default().with_order_id(cancelled.order.order_id.clone());
    let by_id = m.orders.search_orders(query).await.expect("Error searching orders");
    assert_eq!(by_id.len(), 1);
    assert_eq!(by_id[0].status, OrderStatusType::Cancelled);
}

#[tokio::test]
async fn either_party_can_freeze_a_live_order() {
    let m = new_marketplace().await;
    let (_offer, order) = order_in_progress(&m, Money::from_units(100)).await;

    let disputed = m.orders.raise_dispute(BUYER, Role::Buyer, &order.order_id).await.expect("Error raising dispute");
    assert_eq!(disputed.status, OrderStatusType::Disputed);
    // The escrow stays held while the dispute is resolved
    assert!(!m.gateway.is_captured(&disputed.payment_ref));
    assert!(!m.gateway.is_cancelled(&disputed.payment_ref));

    // No fulfilment moves are allowed from Disputed
    let err = m
        .orders
        .update_status(SELLER, Role::Seller, &order.order_id, OrderStatusType::InProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketplaceError::TransitionNotAllowed { .. }), "got {err}");
}
