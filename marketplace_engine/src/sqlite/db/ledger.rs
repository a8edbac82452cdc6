//! Balance aggregation queries.
//!
//! There is no stored balance anywhere in the schema. Available funds are recomputed from the order
//! and withdrawal history on every read, so a partial failure elsewhere can never leave a counter out
//! of step with the rows it was supposed to summarise.

use mp_common::Money;
use sqlx::SqliteConnection;

use crate::traits::BalanceSummary;

/// Σ seller_payout over completed, payment-released orders.
pub async fn total_earned(seller_id: i64, conn: &mut SqliteConnection) -> Result<Money, sqlx::Error> {
    let cents: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(seller_payout), 0) FROM orders \
         WHERE seller_id = $1 AND status = 'Completed' AND payment_released = 1",
    )
    .bind(seller_id)
    .fetch_one(conn)
    .await?;
    Ok(Money::from_cents(cents))
}

/// Σ amount over settled withdrawals. Failed withdrawals never debit the balance.
pub async fn total_withdrawn(seller_id: i64, conn: &mut SqliteConnection) -> Result<Money, sqlx::Error> {
    let cents: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM withdrawals WHERE seller_id = $1 AND status = 'Completed'",
    )
    .bind(seller_id)
    .fetch_one(conn)
    .await?;
    Ok(Money::from_cents(cents))
}

/// Σ amount over withdrawal requests still in flight. These are locked so the same funds cannot be
/// requested twice while a transfer settles.
pub async fn total_locked(seller_id: i64, conn: &mut SqliteConnection) -> Result<Money, sqlx::Error> {
    let cents: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM withdrawals \
         WHERE seller_id = $1 AND status IN ('Pending', 'Processing')",
    )
    .bind(seller_id)
    .fetch_one(conn)
    .await?;
    Ok(Money::from_cents(cents))
}

/// Gross amounts held in escrow on the seller's active orders, before fees.
pub async fn pending_escrow(seller_id: i64, conn: &mut SqliteConnection) -> Result<Money, sqlx::Error> {
    let cents: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM orders \
         WHERE seller_id = $1 AND status NOT IN ('Completed', 'Cancelled', 'PendingPayment')",
    )
    .bind(seller_id)
    .fetch_one(conn)
    .await?;
    Ok(Money::from_cents(cents))
}

pub async fn balance_summary(seller_id: i64, conn: &mut SqliteConnection) -> Result<BalanceSummary, sqlx::Error> {
    let total = total_earned(seller_id, conn).await?;
    let withdrawn = total_withdrawn(seller_id, conn).await?;
    let locked = total_locked(seller_id, conn).await?;
    let pending = pending_escrow(seller_id, conn).await?;
    Ok(BalanceSummary {
        available: total - withdrawn - locked,
        pending,
        total_earned: total,
        total_withdrawn: withdrawn,
        locked,
    })
}
