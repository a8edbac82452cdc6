use chrono::Utc;
use log::debug;
use mp_common::Money;
use sqlx::SqliteConnection;

use crate::{
    db_types::{Withdrawal, WithdrawalStatus},
    traits::MarketplaceError,
};

pub async fn insert_withdrawal(
    seller_id: i64,
    amount: Money,
    conn: &mut SqliteConnection,
) -> Result<Withdrawal, MarketplaceError> {
    let now = Utc::now();
    let withdrawal: Withdrawal = sqlx::query_as(
        r#"
            INSERT INTO withdrawals (seller_id, amount, status, created_at, updated_at)
            VALUES ($1, $2, 'Pending', $3, $3)
            RETURNING *;
        "#,
    )
    .bind(seller_id)
    .bind(amount)
    .bind(now)
    .fetch_one(conn)
    .await?;
    debug!("🗃️ Withdrawal #{} for {} created for seller {seller_id}", withdrawal.id, withdrawal.amount);
    Ok(withdrawal)
}

pub async fn fetch_withdrawal(id: i64, conn: &mut SqliteConnection) -> Result<Option<Withdrawal>, sqlx::Error> {
    let withdrawal = sqlx::query_as("SELECT * FROM withdrawals WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(withdrawal)
}

pub async fn fetch_by_transfer_ref(
    transfer_ref: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Withdrawal>, sqlx::Error> {
    let withdrawal = sqlx::query_as("SELECT * FROM withdrawals WHERE transfer_ref = $1")
        .bind(transfer_ref)
        .fetch_optional(conn)
        .await?;
    Ok(withdrawal)
}

pub async fn fetch_for_seller(seller_id: i64, conn: &mut SqliteConnection) -> Result<Vec<Withdrawal>, sqlx::Error> {
    let withdrawals = sqlx::query_as("SELECT * FROM withdrawals WHERE seller_id = $1 ORDER BY created_at ASC")
        .bind(seller_id)
        .fetch_all(conn)
        .await?;
    Ok(withdrawals)
}

/// Guarded status change, recording the transfer reference and/or failure reason as they become known.
pub async fn set_status(
    id: i64,
    expected: &[WithdrawalStatus],
    new_status: WithdrawalStatus,
    transfer_ref: Option<&str>,
    failure_reason: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<Option<Withdrawal>, sqlx::Error> {
    let guard = expected.iter().map(|s| format!("'{s}'")).collect::<Vec<String>>().join(",");
    let sql = format!(
        r#"
            UPDATE withdrawals SET
                status = $1,
                transfer_ref = COALESCE($2, transfer_ref),
                failure_reason = COALESCE($3, failure_reason),
                updated_at = $4
            WHERE id = $5 AND status IN ({guard})
            RETURNING *;
        "#
    );
    let withdrawal = sqlx::query_as(&sql)
        .bind(new_status)
        .bind(transfer_ref)
        .bind(failure_reason)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(withdrawal)
}
