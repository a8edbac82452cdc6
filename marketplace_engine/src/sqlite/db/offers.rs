use chrono::Utc;
use log::debug;
use sqlx::SqliteConnection;

use crate::{
    db_types::{NewOffer, Offer, OfferId, OfferStatus},
    traits::MarketplaceError,
};

pub async fn insert_offer(offer: NewOffer, conn: &mut SqliteConnection) -> Result<Offer, MarketplaceError> {
    let now = Utc::now();
    let offer: Offer = sqlx::query_as(
        r#"
            INSERT INTO offers (offer_id, listing_id, buyer_id, amount, message, payment_ref, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'PendingPayment', $7, $7)
            RETURNING *;
        "#,
    )
    .bind(offer.offer_id)
    .bind(offer.listing_id)
    .bind(offer.buyer_id)
    .bind(offer.amount)
    .bind(offer.message)
    .bind(offer.payment_ref)
    .bind(now)
    .fetch_one(conn)
    .await?;
    debug!("🗃️ Offer [{}] inserted for listing {} with id {}", offer.offer_id, offer.listing_id, offer.id);
    Ok(offer)
}

pub async fn fetch_offer_by_offer_id(
    offer_id: &OfferId,
    conn: &mut SqliteConnection,
) -> Result<Option<Offer>, sqlx::Error> {
    let offer =
        sqlx::query_as("SELECT * FROM offers WHERE offer_id = $1").bind(offer_id.as_str()).fetch_optional(conn).await?;
    Ok(offer)
}

pub async fn fetch_offer_by_payment_ref(
    payment_ref: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Offer>, sqlx::Error> {
    let offer =
        sqlx::query_as("SELECT * FROM offers WHERE payment_ref = $1").bind(payment_ref).fetch_optional(conn).await?;
    Ok(offer)
}

/// The buyer's live offer on the listing, if one exists. The partial unique index on the offers table
/// guarantees there is at most one.
pub async fn fetch_live_offer(
    listing_id: i64,
    buyer_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<Offer>, sqlx::Error> {
    let offer = sqlx::query_as(
        "SELECT * FROM offers WHERE listing_id = $1 AND buyer_id = $2 AND status IN ('PendingPayment', 'Paid')",
    )
    .bind(listing_id)
    .bind(buyer_id)
    .fetch_optional(conn)
    .await?;
    Ok(offer)
}

pub async fn fetch_offers_for_listing(
    listing_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Offer>, sqlx::Error> {
    let offers = sqlx::query_as("SELECT * FROM offers WHERE listing_id = $1 ORDER BY created_at ASC")
        .bind(listing_id)
        .fetch_all(conn)
        .await?;
    Ok(offers)
}

/// Guarded status change. Returns `None` when the offer is not in one of the `expected` statuses,
/// which is how concurrent decisions on the same offer lose the race.
pub async fn set_status(
    offer_id: &OfferId,
    expected: &[OfferStatus],
    new_status: OfferStatus,
    conn: &mut SqliteConnection,
) -> Result<Option<Offer>, sqlx::Error> {
    let guard = expected.iter().map(|s| format!("'{s}'")).collect::<Vec<String>>().join(",");
    let sql = format!(
        "UPDATE offers SET status = $1, updated_at = $2 WHERE offer_id = $3 AND status IN ({guard}) RETURNING *"
    );
    let offer = sqlx::query_as(&sql)
        .bind(new_status)
        .bind(Utc::now())
        .bind(offer_id.as_str())
        .fetch_optional(conn)
        .await?;
    Ok(offer)
}

/// The auto-rejection cascade: every live offer on the listing other than `winner` is marked
/// `Rejected`. Returns the losers so their payment holds can be released after commit.
pub async fn reject_siblings(
    listing_id: i64,
    winner: &OfferId,
    conn: &mut SqliteConnection,
) -> Result<Vec<Offer>, sqlx::Error> {
    let losers: Vec<Offer> = sqlx::query_as(
        r#"
            UPDATE offers SET status = 'Rejected', updated_at = $1
            WHERE listing_id = $2 AND offer_id != $3 AND status IN ('PendingPayment', 'Paid')
            RETURNING *;
        "#,
    )
    .bind(Utc::now())
    .bind(listing_id)
    .bind(winner.as_str())
    .fetch_all(conn)
    .await?;
    if !losers.is_empty() {
        debug!("🗃️ {} sibling offer(s) on listing {listing_id} auto-rejected", losers.len());
    }
    Ok(losers)
}
