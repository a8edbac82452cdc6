use chrono::Utc;
use log::debug;
use sqlx::{types::Json, SqliteConnection};

use crate::{
    db_types::{Delivery, DeliveryStatus, NewDelivery, OrderId},
    traits::MarketplaceError,
};

pub async fn count_for_order(order_id: &OrderId, conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM deliveries WHERE order_id = $1")
        .bind(order_id.as_str())
        .fetch_one(conn)
        .await?;
    Ok(count)
}

/// Inserts the delivery under the given revision number. The unique index on
/// `(order_id, revision_number)` turns two racing submissions into one winner and one constraint
/// violation.
pub async fn insert_delivery(
    delivery: NewDelivery,
    revision_number: i64,
    conn: &mut SqliteConnection,
) -> Result<Delivery, MarketplaceError> {
    let delivery: Delivery = sqlx::query_as(
        r#"
            INSERT INTO deliveries (order_id, revision_number, message, attachments, is_final, status, created_at)
            VALUES ($1, $2, $3, $4, $5, 'PendingReview', $6)
            RETURNING *;
        "#,
    )
    .bind(delivery.order_id)
    .bind(revision_number)
    .bind(delivery.message)
    .bind(Json(delivery.attachments))
    .bind(delivery.is_final)
    .bind(Utc::now())
    .fetch_one(conn)
    .await?;
    debug!("🗃️ Delivery #{} (revision {revision_number}) recorded for order [{}]", delivery.id, delivery.order_id);
    Ok(delivery)
}

pub async fn fetch_for_order(order_id: &OrderId, conn: &mut SqliteConnection) -> Result<Vec<Delivery>, sqlx::Error> {
    let deliveries = sqlx::query_as("SELECT * FROM deliveries WHERE order_id = $1 ORDER BY revision_number ASC")
        .bind(order_id.as_str())
        .fetch_all(conn)
        .await?;
    Ok(deliveries)
}

/// Updates the most recent delivery for the order, optionally attaching the buyer's revision notes.
pub async fn set_latest_status(
    order_id: &OrderId,
    status: DeliveryStatus,
    notes: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<Option<Delivery>, sqlx::Error> {
    let delivery = sqlx::query_as(
        r#"
            UPDATE deliveries SET status = $1, revision_notes = COALESCE($2, revision_notes)
            WHERE id = (SELECT id FROM deliveries WHERE order_id = $3 ORDER BY revision_number DESC LIMIT 1)
            RETURNING *;
        "#,
    )
    .bind(status)
    .bind(notes)
    .bind(order_id.as_str())
    .fetch_optional(conn)
    .await?;
    Ok(delivery)
}
