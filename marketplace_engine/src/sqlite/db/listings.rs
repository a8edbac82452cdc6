use chrono::{DateTime, Utc};
use log::debug;
use sqlx::SqliteConnection;

use crate::{
    db_types::{Listing, ListingStatus, NewListing},
    traits::MarketplaceError,
};

pub async fn insert_listing(listing: NewListing, conn: &mut SqliteConnection) -> Result<Listing, MarketplaceError> {
    let now = Utc::now();
    let listing: Listing = sqlx::query_as(
        r#"
            INSERT INTO listings (seller_id, title, price, availability, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'Draft', $5, $5)
            RETURNING *;
        "#,
    )
    .bind(listing.seller_id)
    .bind(listing.title)
    .bind(listing.price)
    .bind(listing.availability)
    .bind(now)
    .fetch_one(conn)
    .await?;
    debug!("🗃️ Listing \"{}\" inserted with id {}", listing.title, listing.id);
    Ok(listing)
}

pub async fn fetch_listing(id: i64, conn: &mut SqliteConnection) -> Result<Option<Listing>, sqlx::Error> {
    let listing = sqlx::query_as("SELECT * FROM listings WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(listing)
}

/// Guarded status change. `reserved_until` is always rewritten, so a transition out of `Reserved`
/// clears the expiry as a matter of course. Returns `None` if the guard missed.
pub async fn set_status(
    id: i64,
    expected: ListingStatus,
    new_status: ListingStatus,
    reserved_until: Option<DateTime<Utc>>,
    conn: &mut SqliteConnection,
) -> Result<Option<Listing>, sqlx::Error> {
    let listing = sqlx::query_as(
        r#"
            UPDATE listings SET status = $1, reserved_until = $2, updated_at = $3
            WHERE id = $4 AND status = $5
            RETURNING *;
        "#,
    )
    .bind(new_status)
    .bind(reserved_until)
    .bind(Utc::now())
    .bind(id)
    .bind(expected)
    .fetch_optional(conn)
    .await?;
    Ok(listing)
}

/// Places or extends a reservation. The listing carries a single `reserved_until` field, so there is
/// never more than one live reservation; a later confirmed payment on the same listing simply renews
/// the hold while the seller decides between the paid offers. Sold and inactive listings cannot be
/// reserved.
pub async fn reserve(
    id: i64,
    until: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<Listing>, sqlx::Error> {
    let listing = sqlx::query_as(
        r#"
            UPDATE listings SET status = 'Reserved', reserved_until = $1, updated_at = $2
            WHERE id = $3 AND status IN ('Active', 'Reserved')
            RETURNING *;
        "#,
    )
    .bind(until)
    .bind(Utc::now())
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(listing)
}

/// Marks the listing as won. Only a `Reserved` listing can be sold; acceptance always confirms an
/// existing reservation.
pub async fn mark_sold(id: i64, conn: &mut SqliteConnection) -> Result<Option<Listing>, sqlx::Error> {
    let listing = sqlx::query_as(
        r#"
            UPDATE listings SET status = 'Sold', reserved_until = NULL, updated_at = $1
            WHERE id = $2 AND status = 'Reserved'
            RETURNING *;
        "#,
    )
    .bind(Utc::now())
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(listing)
}

/// Releases a reservation back to `Active`. A no-op (returning `None`) when the listing is not
/// reserved, e.g. because it was already sold to another offer.
pub async fn release_reservation(id: i64, conn: &mut SqliteConnection) -> Result<Option<Listing>, sqlx::Error> {
    let listing = sqlx::query_as(
        r#"
            UPDATE listings SET status = 'Active', reserved_until = NULL, updated_at = $1
            WHERE id = $2 AND status = 'Reserved'
            RETURNING *;
        "#,
    )
    .bind(Utc::now())
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(listing)
}

/// Puts a reserved or sold listing back on the market. Used when the order that claimed it is
/// cancelled; a single-unit listing has at most one live order, so `Sold` here always belongs to the
/// caller's order.
pub async fn relist(id: i64, conn: &mut SqliteConnection) -> Result<Option<Listing>, sqlx::Error> {
    let listing = sqlx::query_as(
        r#"
            UPDATE listings SET status = 'Active', reserved_until = NULL, updated_at = $1
            WHERE id = $2 AND status IN ('Reserved', 'Sold')
            RETURNING *;
        "#,
    )
    .bind(Utc::now())
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(listing)
}

/// The sweep counterpart of lazy expiry: releases every reservation that lapsed before `now`.
pub async fn release_all_expired(
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<Listing>, sqlx::Error> {
    let listings = sqlx::query_as(
        r#"
            UPDATE listings SET status = 'Active', reserved_until = NULL, updated_at = $1
            WHERE status = 'Reserved' AND reserved_until <= $1
            RETURNING *;
        "#,
    )
    .bind(now)
    .fetch_all(conn)
    .await?;
    Ok(listings)
}
