//! Scenario tests for the offer and payment-confirmation flows.
mod support;

use marketplace_engine::{
    db_types::{ListingStatus, OfferStatus, OrderStatusType},
    traits::{GatewayError, LedgerManagement, MarketplaceError},
};
use mp_common::Money;
use support::{live_listing, new_marketplace, paid_offer, BUYER, OTHER_BUYER, SELLER};

#[tokio::test]
async fn offer_to_paid_order_happy_path() {
    let m = new_marketplace().await;
    let listing = live_listing(&m, Money::from_units(120)).await;

    let offer = m
        .offers
        .make_offer(BUYER, listing.id, Money::from_units(100), Some("Would you take $100?".to_string()))
        .await
        .expect("Error making offer");
    assert_eq!(offer.status, OfferStatus::PendingPayment);
    assert!(!offer.payment_ref.is_empty());

    let confirmation = m.offers.confirm_offer_payment(&offer.offer_id).await.expect("Error confirming payment");
    assert!(!confirmation.already_confirmed);
    assert_eq!(confirmation.offer.status, OfferStatus::Paid);
    assert_eq!(confirmation.order.status, OrderStatusType::Paid);
    assert_eq!(confirmation.order.amount, Money::from_units(100));
    assert_eq!(confirmation.order.seller_id, SELLER);
    // A chat channel is opened as part of confirmation
    assert!(confirmation.chat_channel_id.is_some());

    // The listing is now reserved for the seller's decision window
    let listing = m.listings.fetch_listing(listing.id).await.expect("Error fetching listing");
    assert_eq!(listing.status, ListingStatus::Reserved);
    assert!(listing.reserved_until.is_some());
}

#[tokio::test]
async fn confirming_twice_returns_the_same_order() {
    let m = new_marketplace().await;
    let listing = live_listing(&m, Money::from_units(80)).await;
    let first = paid_offer(&m, BUYER, listing.id, Money::from_units(80)).await;

    let replay = m
        .offers
        .confirm_offer_payment(&first.offer.offer_id)
        .await
        .expect("Error replaying payment confirmation");
    assert!(replay.already_confirmed);
    assert_eq!(replay.order.order_id, first.order.order_id);
    assert_eq!(replay.chat_channel_id, first.chat_channel_id);
}

#[tokio::test]
async fn offer_validation_rules() {
    let m = new_marketplace().await;
    let listing = live_listing(&m, Money::from_units(50)).await;

    // Sellers can't bid on their own listings
    let err = m.offers.make_offer(SELLER, listing.id, Money::from_units(50), None).await.unwrap_err();
    assert!(matches!(err, MarketplaceError::Validation(_)), "got {err}");

    // Offers below the processor minimum are rejected
    let err = m.offers.make_offer(BUYER, listing.id, Money::from_cents(50), None).await.unwrap_err();
    assert!(matches!(err, MarketplaceError::Validation(_)), "got {err}");

    // One live offer per buyer per listing
    m.offers.make_offer(BUYER, listing.id, Money::from_units(40), None).await.expect("Error making offer");
    let err = m.offers.make_offer(BUYER, listing.id, Money::from_units(45), None).await.unwrap_err();
    assert!(matches!(err, MarketplaceError::Validation(_)), "got {err}");

    // Unknown listings are a not-found, not a validation error
    let err = m.offers.make_offer(BUYER, 9999, Money::from_units(40), None).await.unwrap_err();
    assert!(matches!(err, MarketplaceError::ListingNotFound(9999)), "got {err}");
}

#[tokio::test]
async fn declined_authorization_creates_no_offer() {
    let m = new_marketplace().await;
    let listing = live_listing(&m, Money::from_units(60)).await;
    m.gateway.decline_next_authorization();

    let err = m.offers.make_offer(BUYER, listing.id, Money::from_units(60), None).await.unwrap_err();
    assert!(matches!(err, MarketplaceError::Gateway(GatewayError::Declined(_))), "got {err}");
    let offers = m.db.fetch_offers_for_listing(listing.id).await.expect("Error fetching offers");
    assert!(offers.is_empty());
}

#[tokio::test]
async fn confirmation_waits_for_pending_authentication() {
    let m = new_marketplace().await;
    let listing = live_listing(&m, Money::from_units(75)).await;
    let offer = m.offers.make_offer(BUYER, listing.id, Money::from_units(75), None).await.expect("Error making offer");

    m.gateway.require_action(&offer.payment_ref);
    let err = m.offers.confirm_offer_payment(&offer.offer_id).await.unwrap_err();
    match err {
        MarketplaceError::Gateway(e @ GatewayError::RequiresAction(_)) => assert!(e.retryable()),
        other => panic!("Expected a pending-authentication error, got {other}"),
    }
    // Nothing moved: the offer still awaits payment and the listing is untouched
    let offer = m.db.fetch_offer(&offer.offer_id).await.expect("Error fetching offer").unwrap();
    assert_eq!(offer.status, OfferStatus::PendingPayment);

    // Once the buyer completes the challenge, confirmation goes through
    m.gateway.complete_action(&offer.payment_ref);
    let confirmation = m.offers.confirm_offer_payment(&offer.offer_id).await.expect("Error confirming payment");
    assert_eq!(confirmation.order.status, OrderStatusType::Paid);
}

#[tokio::test]
async fn buyer_can_withdraw_a_live_offer() {
    let m = new_marketplace().await;
    let listing = live_listing(&m, Money::from_units(90)).await;
    let confirmation = paid_offer(&m, BUYER, listing.id, Money::from_units(90)).await;
    let offer_id = confirmation.offer.offer_id.clone();

    // Someone else's buyer id is turned away
    let err = m.offers.cancel_offer(OTHER_BUYER, &offer_id).await.unwrap_err();
    assert!(matches!(err, MarketplaceError::Forbidden(_)), "got {err}");

    let offer = m.offers.cancel_offer(BUYER, &offer_id).await.expect("Error cancelling offer");
    assert_eq!(offer.status, OfferStatus::Cancelled);
    assert!(m.gateway.is_cancelled(&offer.payment_ref));
    // The paired order is cancelled and the listing is back on the market
    let order = m.db.fetch_order_for_offer(&offer_id).await.expect("Error fetching order").unwrap();
    assert_eq!(order.status, OrderStatusType::Cancelled);
    let listing = m.listings.fetch_listing(listing.id).await.expect("Error fetching listing");
    assert_eq!(listing.status, ListingStatus::Active);
}

#[tokio::test]
async fn decided_offers_keep_their_escrow_holds() {
    let m = new_marketplace().await;
    let listing = live_listing(&m, Money::from_units(140)).await;
    let confirmation = paid_offer(&m, BUYER, listing.id, Money::from_units(140)).await;
    let offer_id = confirmation.offer.offer_id.clone();
    let payment_ref = confirmation.offer.payment_ref.clone();
    m.offers.accept_offer(SELLER, &offer_id).await.expect("Error accepting offer");

    // The buyer can no longer withdraw, and the hold backing the live order stays put
    let err = m.offers.cancel_offer(BUYER, &offer_id).await.unwrap_err();
    assert!(matches!(err, MarketplaceError::OfferStateConflict { status: OfferStatus::Accepted, .. }), "got {err}");
    assert!(!m.gateway.is_cancelled(&payment_ref));

    // Nor can the seller reverse their decision through a rejection
    let err = m.offers.reject_offer(SELLER, &offer_id).await.unwrap_err();
    assert!(matches!(err, MarketplaceError::OfferStateConflict { status: OfferStatus::Accepted, .. }), "got {err}");
    assert!(!m.gateway.is_cancelled(&payment_ref));
}

#[tokio::test]
async fn confirmation_fails_cleanly_on_a_withdrawn_listing() {
    let m = new_marketplace().await;
    let listing = live_listing(&m, Money::from_units(85)).await;
    let offer = m.offers.make_offer(BUYER, listing.id, Money::from_units(85), None).await.expect("Error making offer");
    m.listings.deactivate(SELLER, listing.id).await.expect("Error deactivating listing");

    let err = m.offers.confirm_offer_payment(&offer.offer_id).await.unwrap_err();
    match err {
        MarketplaceError::ListingUnavailable { listing_id, status } => {
            assert_eq!(listing_id, listing.id);
            assert_eq!(status, ListingStatus::Inactive);
        },
        other => panic!("Expected ListingUnavailable, got {other}"),
    }
    // The whole confirmation rolled back: the offer still awaits payment and no order exists
    let offer = m.db.fetch_offer(&offer.offer_id).await.expect("Error fetching offer").unwrap();
    assert_eq!(offer.status, OfferStatus::PendingPayment);
    assert!(m.db.fetch_order_for_offer(&offer.offer_id).await.expect("Error fetching order").is_none());
}

#[tokio::test]
async fn direct_purchase_flow() {
    let m = new_marketplace().await;
    let listing = live_listing(&m, Money::from_units(150)).await;

    let order = m.offers.direct_purchase(BUYER, listing.id).await.expect("Error starting direct purchase");
    assert_eq!(order.status, OrderStatusType::PendingPayment);
    assert_eq!(order.amount, Money::from_units(150));
    assert!(order.offer_id.is_none());
    let reserved = m.listings.fetch_listing(listing.id).await.expect("Error fetching listing");
    assert_eq!(reserved.status, ListingStatus::Reserved);

    let order = m.offers.confirm_purchase_payment(&order.order_id).await.expect("Error confirming purchase");
    assert_eq!(order.status, OrderStatusType::Paid);
    assert!(order.chat_channel_id.is_some());

    // Replay is a no-op
    let replay = m.offers.confirm_purchase_payment(&order.order_id).await.expect("Error replaying confirmation");
    assert_eq!(replay.status, OrderStatusType::Paid);
}

#[tokio::test]
async fn payment_webhooks_route_by_reference() {
    let m = new_marketplace().await;
    let listing = live_listing(&m, Money::from_units(70)).await;
    let offer = m.offers.make_offer(BUYER, listing.id, Money::from_units(70), None).await.expect("Error making offer");

    // Success webhook confirms the offer payment
    let order = m.offers.payment_succeeded(&offer.payment_ref).await.expect("Error processing webhook");
    assert_eq!(order.status, OrderStatusType::Paid);
    // And a replay of the same webhook converges on the same order
    let replay = m.offers.payment_succeeded(&offer.payment_ref).await.expect("Error replaying webhook");
    assert_eq!(replay.order_id, order.order_id);

    // Unknown references are rejected loudly
    let err = m.offers.payment_succeeded("pay_does_not_exist").await.unwrap_err();
    assert!(matches!(err, MarketplaceError::PaymentRefNotFound(_)), "got {err}");
}

#[tokio::test]
async fn failed_payment_cancels_the_pending_purchase() {
    let m = new_marketplace().await;
    let listing = live_listing(&m, Money::from_units(110)).await;
    let order = m.offers.direct_purchase(BUYER, listing.id).await.expect("Error starting direct purchase");

    m.offers.payment_failed(&order.payment_ref).await.expect("Error processing failure webhook");
    let order = m.db.fetch_order(&order.order_id).await.expect("Error fetching order").unwrap();
    assert_eq!(order.status, OrderStatusType::Cancelled);
    let listing = m.listings.fetch_listing(listing.id).await.expect("Error fetching listing");
    assert_eq!(listing.status, ListingStatus::Active);

    // Replaying the failure after settlement is ignored
    m.offers.payment_failed(&order.payment_ref).await.expect("Failure replay should be a no-op");
}
