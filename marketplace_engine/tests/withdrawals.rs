//! Scenario tests for seller balances and the withdrawal lifecycle.
mod support;

use marketplace_engine::{
    db_types::{Attachment, NewDelivery, WithdrawalStatus},
    traits::{LedgerManagement, MarketplaceError},
};
use mp_common::Money;
use support::{new_marketplace, order_in_progress, Marketplace, BUYER, SELLER};

/// Runs one order of `amount` through delivery and completion, leaving the 90% payout in the
/// seller's balance.
async fn earn(m: &Marketplace, amount: Money) -> Money {
    let (_offer, order) = order_in_progress(m, amount).await;
    let delivery = NewDelivery {
        order_id: order.order_id.clone(),
        message: "All done, enjoy!".to_string(),
        attachments: vec![Attachment {
            name: "deliverable.zip".to_string(),
            mime_type: "application/zip".to_string(),
            size_bytes: 1_048_576,
            url: "https://files.example/deliverable.zip".to_string(),
        }],
        is_final: true,
    };
    let (_, order) = m.deliveries.submit_delivery(SELLER, delivery).await.expect("Error submitting delivery");
    let result = m.orders.complete_order(BUYER, &order.order_id).await.expect("Error completing order");
    result.seller_payout
}

#[tokio::test]
async fn balances_are_recomputed_not_stored() {
    let m = new_marketplace().await;
    let zero = m.ledger.balance(SELLER).await.expect("Error fetching balance");
    assert_eq!(zero.available, Money::default());
    assert_eq!(zero.total_earned, Money::default());

    let payout_a = earn(&m, Money::from_units(100)).await;
    let payout_b = earn(&m, Money::from_units(300)).await;
    assert_eq!(payout_a, Money::from_units(90));
    assert_eq!(payout_b, Money::from_units(270));

    let balance = m.ledger.balance(SELLER).await.expect("Error fetching balance");
    assert_eq!(balance.total_earned, Money::from_units(360));
    assert_eq!(balance.available, Money::from_units(360));
    assert_eq!(balance.total_withdrawn, Money::default());
    assert_eq!(balance.locked, Money::default());
}

#[tokio::test]
async fn escrowed_orders_show_as_pending_not_available() {
    let m = new_marketplace().await;
    let (_offer, order) = order_in_progress(&m, Money::from_units(100)).await;

    let balance = m.ledger.balance(SELLER).await.expect("Error fetching balance");
    assert_eq!(balance.available, Money::default());
    // The gross escrowed amount is visible as pending until the order completes
    assert_eq!(balance.pending, order.amount);
}

#[tokio::test]
async fn withdrawal_happy_path() {
    let m = new_marketplace().await;
    earn(&m, Money::from_units(100)).await;

    let withdrawal = m
        .ledger
        .request_withdrawal(SELLER, Money::from_units(60), "acct_seller_101")
        .await
        .expect("Error requesting withdrawal");
    assert_eq!(withdrawal.status, WithdrawalStatus::Processing);
    let transfer_ref = withdrawal.transfer_ref.clone().expect("A transfer ref should be recorded");
    assert_eq!(m.gateway.transfer_amount(&transfer_ref), Some(Money::from_units(60)));

    // The in-flight amount is locked away from the available balance
    let balance = m.ledger.balance(SELLER).await.expect("Error fetching balance");
    assert_eq!(balance.locked, Money::from_units(60));
    assert_eq!(balance.available, Money::from_units(30));

    // Settlement moves it to the withdrawn column
    let settled = m.ledger.transfer_paid(&transfer_ref).await.expect("Error settling transfer");
    assert_eq!(settled.status, WithdrawalStatus::Completed);
    let balance = m.ledger.balance(SELLER).await.expect("Error fetching balance");
    assert_eq!(balance.total_withdrawn, Money::from_units(60));
    assert_eq!(balance.available, Money::from_units(30));
    assert_eq!(balance.locked, Money::default());

    // Webhook replays change nothing
    let replay = m.ledger.transfer_paid(&transfer_ref).await.expect("Error replaying settlement");
    assert_eq!(replay.status, WithdrawalStatus::Completed);
}

#[tokio::test]
async fn withdrawal_guardrails() {
    let m = new_marketplace().await;
    earn(&m, Money::from_units(100)).await;

    // Below the configured minimum
    let err = m.ledger.request_withdrawal(SELLER, Money::from_units(5), "acct_seller_101").await.unwrap_err();
    assert!(matches!(err, MarketplaceError::Validation(_)), "got {err}");

    // More than the seller has
    let err = m.ledger.request_withdrawal(SELLER, Money::from_units(500), "acct_seller_101").await.unwrap_err();
    match err {
        MarketplaceError::InsufficientBalance { requested, available } => {
            assert_eq!(requested, Money::from_units(500));
            assert_eq!(available, Money::from_units(90));
        },
        other => panic!("Expected InsufficientBalance, got {other}"),
    }
    // Nothing was persisted for either attempt
    let history = m.ledger.withdrawal_history(SELLER).await.expect("Error fetching history");
    assert!(history.is_empty());

    // Two requests cannot claim the same funds: the first locks them
    m.ledger.request_withdrawal(SELLER, Money::from_units(60), "acct_seller_101").await.expect("Error withdrawing");
    let err = m.ledger.request_withdrawal(SELLER, Money::from_units(60), "acct_seller_101").await.unwrap_err();
    assert!(matches!(err, MarketplaceError::InsufficientBalance { .. }), "got {err}");
}

#[tokio::test]
async fn failed_submission_keeps_the_audit_record_and_heals_the_balance() {
    let m = new_marketplace().await;
    earn(&m, Money::from_units(100)).await;
    m.gateway.set_reject_transfers(true);

    let withdrawal = m
        .ledger
        .request_withdrawal(SELLER, Money::from_units(80), "acct_seller_101")
        .await
        .expect("A failed submission still returns the record");
    assert_eq!(withdrawal.status, WithdrawalStatus::Failed);
    assert!(withdrawal.failure_reason.is_some());
    assert!(withdrawal.transfer_ref.is_none());

    // Failed withdrawals don't debit or lock anything
    let balance = m.ledger.balance(SELLER).await.expect("Error fetching balance");
    assert_eq!(balance.available, Money::from_units(90));
    assert_eq!(balance.locked, Money::default());

    // With the processor healthy again the same funds go through
    m.gateway.set_reject_transfers(false);
    let retry = m
        .ledger
        .request_withdrawal(SELLER, Money::from_units(80), "acct_seller_101")
        .await
        .expect("Error requesting withdrawal");
    assert_eq!(retry.status, WithdrawalStatus::Processing);
}

#[tokio::test]
async fn bounced_transfers_return_the_funds() {
    let m = new_marketplace().await;
    earn(&m, Money::from_units(100)).await;
    let withdrawal = m
        .ledger
        .request_withdrawal(SELLER, Money::from_units(90), "acct_seller_101")
        .await
        .expect("Error requesting withdrawal");
    let transfer_ref = withdrawal.transfer_ref.clone().expect("A transfer ref should be recorded");

    let bounced = m
        .ledger
        .transfer_failed(&transfer_ref, "destination account closed")
        .await
        .expect("Error processing failure webhook");
    assert_eq!(bounced.status, WithdrawalStatus::Failed);
    assert_eq!(bounced.failure_reason.as_deref(), Some("destination account closed"));

    let balance = m.ledger.balance(SELLER).await.expect("Error fetching balance");
    assert_eq!(balance.available, Money::from_units(90));
    assert_eq!(balance.total_withdrawn, Money::default());

    // Unknown transfer references are rejected
    let err = m.ledger.transfer_paid("tr_unknown").await.unwrap_err();
    assert!(matches!(err, MarketplaceError::PaymentRefNotFound(_)), "got {err}");
}

#[tokio::test]
async fn withdrawal_history_is_per_seller() {
    let m = new_marketplace().await;
    earn(&m, Money::from_units(500)).await;
    m.ledger.request_withdrawal(SELLER, Money::from_units(100), "acct_seller_101").await.expect("Error withdrawing");
    m.ledger.request_withdrawal(SELLER, Money::from_units(200), "acct_seller_101").await.expect("Error withdrawing");

    let history = m.ledger.withdrawal_history(SELLER).await.expect("Error fetching history");
    assert_eq!(history.len(), 2);
    let none = m.db.fetch_withdrawals_for_seller(999).await.expect("Error fetching history");
    assert!(none.is_empty());
}
