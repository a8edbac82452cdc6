use chrono::{DateTime, Utc};
use log::{debug, trace};
use mp_common::Money;
use sqlx::{QueryBuilder, SqliteConnection};

use crate::{
    db_types::{NewOrder, Order, OrderId, OrderStatusType, Role},
    order_objects::OrderQueryFilter,
    traits::MarketplaceError,
};

pub async fn insert_order(order: NewOrder, conn: &mut SqliteConnection) -> Result<Order, MarketplaceError> {
    let now = Utc::now();
    let order: Order = sqlx::query_as(
        r#"
            INSERT INTO orders (
                order_id,
                offer_id,
                listing_id,
                buyer_id,
                seller_id,
                amount,
                status,
                max_revisions,
                payment_ref,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            RETURNING *;
        "#,
    )
    .bind(order.order_id)
    .bind(order.offer_id)
    .bind(order.listing_id)
    .bind(order.buyer_id)
    .bind(order.seller_id)
    .bind(order.amount)
    .bind(order.status)
    .bind(order.max_revisions)
    .bind(order.payment_ref)
    .bind(now)
    .fetch_one(conn)
    .await?;
    debug!("🗃️ Order [{}] inserted with id {} in status {}", order.order_id, order.id, order.status);
    Ok(order)
}

pub async fn fetch_order_by_order_id(
    order_id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order =
        sqlx::query_as("SELECT * FROM orders WHERE order_id = $1").bind(order_id.as_str()).fetch_optional(conn).await?;
    Ok(order)
}

pub async fn fetch_order_by_offer_id(
    offer_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order =
        sqlx::query_as("SELECT * FROM orders WHERE offer_id = $1").bind(offer_id).fetch_optional(conn).await?;
    Ok(order)
}

pub async fn fetch_order_by_payment_ref(
    payment_ref: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as("SELECT * FROM orders WHERE payment_ref = $1 ORDER BY created_at DESC LIMIT 1")
        .bind(payment_ref)
        .fetch_optional(conn)
        .await?;
    Ok(order)
}

pub async fn fetch_orders_for_user(
    user_id: i64,
    role: Role,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, sqlx::Error> {
    let column = match role {
        Role::Buyer => "buyer_id",
        Role::Seller => "seller_id",
    };
    let sql = format!("SELECT * FROM orders WHERE {column} = $1 ORDER BY created_at ASC");
    let orders = sqlx::query_as(&sql).bind(user_id).fetch_all(conn).await?;
    Ok(orders)
}

/// Guarded status transition. The `WHERE status = expected` clause is the per-order serialization
/// boundary: of two racing writers, exactly one sees the row in the expected state.
pub async fn transition(
    order_id: &OrderId,
    expected: OrderStatusType,
    new_status: OrderStatusType,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as(
        r#"
            UPDATE orders SET status = $1, updated_at = $2
            WHERE order_id = $3 AND status = $4
            RETURNING *;
        "#,
    )
    .bind(new_status)
    .bind(Utc::now())
    .bind(order_id.as_str())
    .bind(expected)
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

/// The completion write: capture bookkeeping, fee split and release flag in one statement. The
/// `payment_released = 0` guard makes the false → true flip a once-only event.
pub async fn complete(
    order_id: &OrderId,
    platform_fee: Money,
    seller_payout: Money,
    captured_at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as(
        r#"
            UPDATE orders SET
                status = 'Completed',
                platform_fee = $1,
                seller_payout = $2,
                captured = 1,
                captured_at = $3,
                payment_released = 1,
                completed_at = $4,
                updated_at = $4
            WHERE order_id = $5 AND status = 'Delivered' AND payment_released = 0
            RETURNING *;
        "#,
    )
    .bind(platform_fee)
    .bind(seller_payout)
    .bind(captured_at)
    .bind(Utc::now())
    .bind(order_id.as_str())
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

/// Burns one revision from the order's budget and moves it to `InRevision`. The guard enforces both
/// the `Delivered` precondition and `revisions < max_revisions`, so the budget can never be exceeded
/// even under concurrent requests.
pub async fn spend_revision(order_id: &OrderId, conn: &mut SqliteConnection) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as(
        r#"
            UPDATE orders SET status = 'InRevision', revisions = revisions + 1, updated_at = $1
            WHERE order_id = $2 AND status = 'Delivered' AND revisions < max_revisions
            RETURNING *;
        "#,
    )
    .bind(Utc::now())
    .bind(order_id.as_str())
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

pub async fn set_chat_channel(
    order_id: &OrderId,
    channel_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as(
        "UPDATE orders SET chat_channel_id = $1, updated_at = $2 WHERE order_id = $3 RETURNING *",
    )
    .bind(channel_id)
    .bind(Utc::now())
    .bind(order_id.as_str())
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

/// Fetches orders according to criteria specified in the `OrderQueryFilter`.
///
/// Resulting orders are ordered by `created_at` in ascending order
pub async fn search_orders(query: OrderQueryFilter, conn: &mut SqliteConnection) -> Result<Vec<Order>, sqlx::Error> {
    let mut builder = QueryBuilder::new(
        r#"
    SELECT * FROM orders
    "#,
    );
    if !query.is_empty() {
        builder.push("WHERE ");
    }
    let mut where_clause = builder.separated(" AND ");
    if let Some(order_id) = query.order_id {
        where_clause.push("order_id = ");
        where_clause.push_bind_unseparated(order_id.0);
    }
    if let Some(buyer_id) = query.buyer_id {
        where_clause.push("buyer_id = ");
        where_clause.push_bind_unseparated(buyer_id);
    }
    if let Some(seller_id) = query.seller_id {
        where_clause.push("seller_id = ");
        where_clause.push_bind_unseparated(seller_id);
    }
    if let Some(listing_id) = query.listing_id {
        where_clause.push("listing_id = ");
        where_clause.push_bind_unseparated(listing_id);
    }
    if query.status.as_ref().map(|s| !s.is_empty()).unwrap_or(false) {
        let mut statuses = vec![];
        query.status.as_ref().unwrap().iter().for_each(|s| {
            statuses.push(format!("'{s}'"));
        });
        let status_clause = statuses.join(",");
        where_clause.push(format!("status IN ({status_clause})"));
    }
    if let Some(since) = query.since {
        where_clause.push("created_at >= ");
        where_clause.push_bind_unseparated(since);
    }
    if let Some(until) = query.until {
        where_clause.push("created_at <= ");
        where_clause.push_bind_unseparated(until);
    }
    builder.push(" ORDER BY created_at ASC");

    trace!("🗃️ Executing query: {}", builder.sql());
    let query = builder.build_query_as::<Order>();
    let orders = query.fetch_all(conn).await?;
    Ok(orders)
}
