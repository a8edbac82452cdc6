//! `SqliteDatabase` is a concrete implementation of a marketplace engine backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements the traits defined in the [`crate::traits`]
//! module. Every composite lifecycle operation runs inside a single transaction; the low-level query
//! functions in [`super::db`] are written against `&mut SqliteConnection` so they compose into those
//! transactions without ceremony.
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;
use mp_common::Money;
use sqlx::SqlitePool;

use super::db::{db_url, deliveries, ledger, listings, new_pool, offers, orders, withdrawals};
use crate::{
    db_types::{
        Availability,
        Delivery,
        DeliveryStatus,
        Listing,
        ListingStatus,
        NewDelivery,
        NewListing,
        NewOffer,
        NewOrder,
        Offer,
        OfferId,
        OfferStatus,
        Order,
        OrderId,
        OrderStatusType,
        Role,
        StatusList,
        Withdrawal,
        WithdrawalStatus,
    },
    order_objects::OrderQueryFilter,
    traits::{
        AcceptanceResult,
        BalanceSummary,
        CancellationResult,
        LedgerApiError,
        LedgerManagement,
        MarketplaceDatabase,
        MarketplaceError,
        RevisionOutcome,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new database connection pool using the `MPE_DATABASE_URL` environment variable, or
    /// the default url if it is not set.
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        Self::new_with_url(&url, max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = new_pool(url, max_connections).await?;
        Ok(Self { url: url.to_string(), pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl LedgerManagement for SqliteDatabase {
    async fn fetch_listing(&self, listing_id: i64) -> Result<Option<Listing>, LedgerApiError> {
        let mut conn = self.pool.acquire().await?;
        Ok(listings::fetch_listing(listing_id, &mut conn).await?)
    }

    async fn fetch_offer(&self, offer_id: &OfferId) -> Result<Option<Offer>, LedgerApiError> {
        let mut conn = self.pool.acquire().await?;
        Ok(offers::fetch_offer_by_offer_id(offer_id, &mut conn).await?)
    }

    async fn fetch_order(&self, order_id: &OrderId) -> Result<Option<Order>, LedgerApiError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::fetch_order_by_order_id(order_id, &mut conn).await?)
    }

    async fn fetch_order_for_offer(&self, offer_id: &OfferId) -> Result<Option<Order>, LedgerApiError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::fetch_order_by_offer_id(offer_id.as_str(), &mut conn).await?)
    }

    async fn fetch_live_offer(&self, listing_id: i64, buyer_id: i64) -> Result<Option<Offer>, LedgerApiError> {
        let mut conn = self.pool.acquire().await?;
        Ok(offers::fetch_live_offer(listing_id, buyer_id, &mut conn).await?)
    }

    async fn fetch_offers_for_listing(&self, listing_id: i64) -> Result<Vec<Offer>, LedgerApiError> {
        let mut conn = self.pool.acquire().await?;
        Ok(offers::fetch_offers_for_listing(listing_id, &mut conn).await?)
    }

    async fn fetch_orders_for_user(&self, user_id: i64, role: Role) -> Result<Vec<Order>, LedgerApiError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::fetch_orders_for_user(user_id, role, &mut conn).await?)
    }

    async fn fetch_deliveries_for_order(&self, order_id: &OrderId) -> Result<Vec<Delivery>, LedgerApiError> {
        let mut conn = self.pool.acquire().await?;
        Ok(deliveries::fetch_for_order(order_id, &mut conn).await?)
    }

    async fn balance_for_seller(&self, seller_id: i64) -> Result<BalanceSummary, LedgerApiError> {
        let mut conn = self.pool.acquire().await?;
        Ok(ledger::balance_summary(seller_id, &mut conn).await?)
    }

    async fn fetch_withdrawals_for_seller(&self, seller_id: i64) -> Result<Vec<Withdrawal>, LedgerApiError> {
        let mut conn = self.pool.acquire().await?;
        Ok(withdrawals::fetch_for_seller(seller_id, &mut conn).await?)
    }

    async fn fetch_withdrawal_by_transfer_ref(&self, transfer_ref: &str) -> Result<Option<Withdrawal>, LedgerApiError> {
        let mut conn = self.pool.acquire().await?;
        Ok(withdrawals::fetch_by_transfer_ref(transfer_ref, &mut conn).await?)
    }

    async fn fetch_offer_by_payment_ref(&self, payment_ref: &str) -> Result<Option<Offer>, LedgerApiError> {
        let mut conn = self.pool.acquire().await?;
        Ok(offers::fetch_offer_by_payment_ref(payment_ref, &mut conn).await?)
    }

    async fn fetch_order_by_payment_ref(&self, payment_ref: &str) -> Result<Option<Order>, LedgerApiError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::fetch_order_by_payment_ref(payment_ref, &mut conn).await?)
    }

    async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, LedgerApiError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::search_orders(query, &mut conn).await?)
    }
}

impl MarketplaceDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn insert_listing(&self, listing: NewListing) -> Result<Listing, MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        listings::insert_listing(listing, &mut conn).await
    }

    async fn update_listing_status(
        &self,
        listing_id: i64,
        expected: ListingStatus,
        new_status: ListingStatus,
    ) -> Result<Listing, MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        match listings::set_status(listing_id, expected, new_status, None, &mut conn).await? {
            Some(listing) => Ok(listing),
            None => match listings::fetch_listing(listing_id, &mut conn).await? {
                Some(listing) => {
                    Err(MarketplaceError::ListingUnavailable { listing_id, status: listing.status })
                },
                None => Err(MarketplaceError::ListingNotFound(listing_id)),
            },
        }
    }

    async fn release_expired_reservations(&self, now: DateTime<Utc>) -> Result<Vec<Listing>, MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        let released = listings::release_all_expired(now, &mut conn).await?;
        if !released.is_empty() {
            info!("🗃️ {} expired listing reservation(s) released", released.len());
        }
        Ok(released)
    }

    async fn insert_offer(&self, offer: NewOffer) -> Result<Offer, MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        offers::insert_offer(offer, &mut conn).await
    }

    async fn commit_offer_payment(
        &self,
        offer_id: &OfferId,
        order: NewOrder,
        reserved_until: DateTime<Utc>,
    ) -> Result<(Offer, Order), MarketplaceError> {
        let mut tx = self.pool.begin().await?;
        let offer =
            match offers::set_status(offer_id, &[OfferStatus::PendingPayment], OfferStatus::Paid, &mut tx).await? {
                Some(offer) => offer,
                None => return Err(offer_miss(offer_id, OfferStatus::PendingPayment, &mut tx).await?),
            };
        let listing_id = order.listing_id;
        let order = orders::insert_order(order, &mut tx).await?;
        let listing = match listings::reserve(listing_id, reserved_until, &mut tx).await? {
            Some(listing) => listing,
            None => return Err(listing_miss(listing_id, &mut tx).await?),
        };
        tx.commit().await?;
        debug!(
            "🗃️ Offer [{}] is paid. Order [{}] created; listing {} reserved until {reserved_until}",
            offer.offer_id, order.order_id, listing.id
        );
        Ok((offer, order))
    }

    async fn set_order_chat_channel(&self, order_id: &OrderId, channel_id: &str) -> Result<Order, MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        orders::set_chat_channel(order_id, channel_id, &mut conn)
            .await?
            .ok_or_else(|| MarketplaceError::OrderNotFound(order_id.clone()))
    }

    async fn accept_offer(&self, offer_id: &OfferId) -> Result<AcceptanceResult, MarketplaceError> {
        let mut tx = self.pool.begin().await?;
        let offer = match offers::set_status(offer_id, &[OfferStatus::Paid], OfferStatus::Accepted, &mut tx).await? {
            Some(offer) => offer,
            None => return Err(offer_miss(offer_id, OfferStatus::Paid, &mut tx).await?),
        };
        let order = orders::fetch_order_by_offer_id(offer_id.as_str(), &mut tx)
            .await?
            .ok_or_else(|| MarketplaceError::OrderNotFound(OrderId(format!("for offer {offer_id}"))))?;
        let listing = listings::fetch_listing(offer.listing_id, &mut tx)
            .await?
            .ok_or(MarketplaceError::ListingNotFound(offer.listing_id))?;
        let listing = match listing.availability {
            Availability::SingleUnit => listings::mark_sold(listing.id, &mut tx).await?.ok_or(
                MarketplaceError::ListingUnavailable { listing_id: listing.id, status: listing.status },
            )?,
            // A repeatable listing goes straight back on the market
            Availability::Repeatable => {
                listings::release_reservation(listing.id, &mut tx).await?.unwrap_or(listing)
            },
        };
        let rejected_offers = offers::reject_siblings(listing.id, offer_id, &mut tx).await?;
        // Cancel the orders that were opened for the losing paid offers
        for loser in &rejected_offers {
            if let Some(o) = orders::fetch_order_by_offer_id(loser.offer_id.as_str(), &mut tx).await? {
                if !o.status.is_terminal() {
                    orders::transition(&o.order_id, o.status, OrderStatusType::Cancelled, &mut tx).await?;
                }
            }
        }
        tx.commit().await?;
        debug!(
            "🗃️ Offer [{}] accepted. Order [{}] confirmed; {} sibling offer(s) rejected",
            offer.offer_id,
            order.order_id,
            rejected_offers.len()
        );
        Ok(AcceptanceResult { offer, order, listing, rejected_offers })
    }

    async fn reject_offer(&self, offer_id: &OfferId) -> Result<(Offer, Option<Order>, Listing), MarketplaceError> {
        let mut tx = self.pool.begin().await?;
        let offer = match offers::set_status(offer_id, &[OfferStatus::Paid], OfferStatus::Rejected, &mut tx).await? {
            Some(offer) => offer,
            None => return Err(offer_miss(offer_id, OfferStatus::Paid, &mut tx).await?),
        };
        let order = match orders::fetch_order_by_offer_id(offer_id.as_str(), &mut tx).await? {
            Some(o) if !o.status.is_terminal() => {
                orders::transition(&o.order_id, o.status, OrderStatusType::Cancelled, &mut tx).await?
            },
            other => other,
        };
        let listing = release_or_fetch(offer.listing_id, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Offer [{}] rejected; listing {} released", offer.offer_id, listing.id);
        Ok((offer, order, listing))
    }

    async fn cancel_offer(&self, offer_id: &OfferId) -> Result<(Offer, Option<Order>, Listing), MarketplaceError> {
        let mut tx = self.pool.begin().await?;
        let live = [OfferStatus::PendingPayment, OfferStatus::Paid];
        let offer = match offers::set_status(offer_id, &live, OfferStatus::Cancelled, &mut tx).await? {
            Some(offer) => offer,
            None => return Err(offer_miss(offer_id, OfferStatus::Paid, &mut tx).await?),
        };
        let order = match orders::fetch_order_by_offer_id(offer_id.as_str(), &mut tx).await? {
            Some(o) if !o.status.is_terminal() => {
                orders::transition(&o.order_id, o.status, OrderStatusType::Cancelled, &mut tx).await?
            },
            other => other,
        };
        let listing = release_or_fetch(offer.listing_id, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Offer [{}] cancelled by buyer", offer.offer_id);
        Ok((offer, order, listing))
    }

    async fn create_direct_order(
        &self,
        order: NewOrder,
        reserved_until: DateTime<Utc>,
    ) -> Result<Order, MarketplaceError> {
        let mut tx = self.pool.begin().await?;
        let listing_id = order.listing_id;
        let order = orders::insert_order(order, &mut tx).await?;
        if listings::reserve(listing_id, reserved_until, &mut tx).await?.is_none() {
            return Err(listing_miss(listing_id, &mut tx).await?);
        }
        tx.commit().await?;
        Ok(order)
    }

    async fn mark_order_paid(&self, order_id: &OrderId) -> Result<Order, MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        match orders::transition(order_id, OrderStatusType::PendingPayment, OrderStatusType::Paid, &mut conn).await? {
            Some(order) => Ok(order),
            None => Err(order_miss(order_id, &[OrderStatusType::PendingPayment], &mut conn).await?),
        }
    }

    async fn update_order_status(
        &self,
        order_id: &OrderId,
        expected: OrderStatusType,
        new_status: OrderStatusType,
    ) -> Result<Order, MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        match orders::transition(order_id, expected, new_status, &mut conn).await? {
            Some(order) => Ok(order),
            None => Err(order_miss(order_id, &[expected], &mut conn).await?),
        }
    }

    async fn complete_order(
        &self,
        order_id: &OrderId,
        platform_fee: Money,
        seller_payout: Money,
        captured_at: DateTime<Utc>,
    ) -> Result<Order, MarketplaceError> {
        let mut tx = self.pool.begin().await?;
        let order = match orders::complete(order_id, platform_fee, seller_payout, captured_at, &mut tx).await? {
            Some(order) => order,
            None => return Err(order_miss(order_id, &[OrderStatusType::Delivered], &mut tx).await?),
        };
        deliveries::set_latest_status(order_id, DeliveryStatus::Completed, None, &mut tx).await?;
        tx.commit().await?;
        debug!(
            "🗃️ Order [{}] completed. Fee {platform_fee}, payout {seller_payout} released to seller {}",
            order.order_id, order.seller_id
        );
        Ok(order)
    }

    async fn cancel_order(
        &self,
        order_id: &OrderId,
        expected: OrderStatusType,
    ) -> Result<CancellationResult, MarketplaceError> {
        let mut tx = self.pool.begin().await?;
        let order = match orders::transition(order_id, expected, OrderStatusType::Cancelled, &mut tx).await? {
            Some(order) => order,
            None => return Err(order_miss(order_id, &[expected], &mut tx).await?),
        };
        // A cancelled order always puts its listing back on the market, even after acceptance
        let listing = match listings::relist(order.listing_id, &mut tx).await? {
            Some(listing) => listing,
            None => listings::fetch_listing(order.listing_id, &mut tx)
                .await?
                .ok_or(MarketplaceError::ListingNotFound(order.listing_id))?,
        };
        let offer = match order.offer_id.as_ref() {
            Some(offer_id) => {
                let live = [OfferStatus::PendingPayment, OfferStatus::Paid, OfferStatus::Accepted];
                offers::set_status(offer_id, &live, OfferStatus::Cancelled, &mut tx).await?
            },
            None => None,
        };
        tx.commit().await?;
        debug!("🗃️ Order [{}] cancelled; listing {} back on the market", order.order_id, listing.id);
        Ok(CancellationResult { order, listing, offer, refunded: false })
    }

    async fn record_revision_request(
        &self,
        order_id: &OrderId,
        notes: &str,
    ) -> Result<RevisionOutcome, MarketplaceError> {
        let mut tx = self.pool.begin().await?;
        let order = match orders::spend_revision(order_id, &mut tx).await? {
            Some(order) => order,
            None => {
                // Work out which precondition failed so the caller gets an actionable error
                let err = match orders::fetch_order_by_order_id(order_id, &mut tx).await? {
                    None => MarketplaceError::OrderNotFound(order_id.clone()),
                    Some(o) if o.status == OrderStatusType::Delivered && o.revisions >= o.max_revisions => {
                        MarketplaceError::RevisionLimitReached { order_id: order_id.clone(), max: o.max_revisions }
                    },
                    Some(o) => MarketplaceError::OrderStateConflict {
                        order_id: order_id.clone(),
                        status: o.status,
                        expected: StatusList(vec![OrderStatusType::Delivered]),
                    },
                };
                return Err(err);
            },
        };
        let delivery = deliveries::set_latest_status(order_id, DeliveryStatus::RevisionRequested, Some(notes), &mut tx)
            .await?;
        tx.commit().await?;
        let remaining = order.remaining_revisions();
        debug!("🗃️ Revision {} of {} recorded for order [{}]", order.revisions, order.max_revisions, order.order_id);
        Ok(RevisionOutcome { order, delivery, remaining_revisions: remaining })
    }

    async fn insert_delivery(&self, delivery: NewDelivery) -> Result<(Delivery, Order), MarketplaceError> {
        let mut tx = self.pool.begin().await?;
        let order_id = delivery.order_id.clone();
        let order = orders::fetch_order_by_order_id(&order_id, &mut tx)
            .await?
            .ok_or_else(|| MarketplaceError::OrderNotFound(order_id.clone()))?;
        let deliverable = [OrderStatusType::InProgress, OrderStatusType::InRevision];
        if !deliverable.contains(&order.status) {
            return Err(MarketplaceError::OrderStateConflict {
                order_id,
                status: order.status,
                expected: StatusList(deliverable.to_vec()),
            });
        }
        let revision_number = deliveries::count_for_order(&order_id, &mut tx).await? + 1;
        let delivery = deliveries::insert_delivery(delivery, revision_number, &mut tx).await?;
        let order = orders::transition(&order_id, order.status, OrderStatusType::Delivered, &mut tx)
            .await?
            .ok_or_else(|| MarketplaceError::OrderStateConflict {
                order_id: order_id.clone(),
                status: order.status,
                expected: StatusList(deliverable.to_vec()),
            })?;
        tx.commit().await?;
        Ok((delivery, order))
    }

    async fn create_withdrawal(&self, seller_id: i64, amount: Money) -> Result<Withdrawal, MarketplaceError> {
        let mut tx = self.pool.begin().await?;
        // The balance is recomputed inside the transaction so concurrent requests cannot both pass
        let summary = ledger::balance_summary(seller_id, &mut tx).await?;
        if amount > summary.available {
            return Err(MarketplaceError::InsufficientBalance { requested: amount, available: summary.available });
        }
        let withdrawal = withdrawals::insert_withdrawal(seller_id, amount, &mut tx).await?;
        tx.commit().await?;
        Ok(withdrawal)
    }

    async fn update_withdrawal_status(
        &self,
        withdrawal_id: i64,
        expected: &[WithdrawalStatus],
        new_status: WithdrawalStatus,
        transfer_ref: Option<&str>,
        failure_reason: Option<&str>,
    ) -> Result<Withdrawal, MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        match withdrawals::set_status(withdrawal_id, expected, new_status, transfer_ref, failure_reason, &mut conn)
            .await?
        {
            Some(withdrawal) => Ok(withdrawal),
            None => match withdrawals::fetch_withdrawal(withdrawal_id, &mut conn).await? {
                Some(w) => Err(MarketplaceError::WithdrawalStateConflict {
                    withdrawal_id,
                    status: w.status,
                    requested: new_status,
                }),
                None => Err(MarketplaceError::WithdrawalNotFound(withdrawal_id)),
            },
        }
    }

    async fn close(&mut self) -> Result<(), MarketplaceError> {
        self.pool.close().await;
        Ok(())
    }
}

/// Builds the right error for a missed offer-status guard: either the offer doesn't exist, or it is
/// in a state the caller didn't expect.
async fn offer_miss(
    offer_id: &OfferId,
    expected: OfferStatus,
    conn: &mut sqlx::SqliteConnection,
) -> Result<MarketplaceError, MarketplaceError> {
    let err = match offers::fetch_offer_by_offer_id(offer_id, conn).await? {
        Some(offer) => MarketplaceError::OfferStateConflict { offer_id: offer_id.clone(), status: offer.status, expected },
        None => MarketplaceError::OfferNotFound(offer_id.clone()),
    };
    Ok(err)
}

/// Same as [`offer_miss`], for a missed listing reservation: the listing is either gone or no
/// longer in a reservable state.
async fn listing_miss(listing_id: i64, conn: &mut sqlx::SqliteConnection) -> Result<MarketplaceError, MarketplaceError> {
    let err = match listings::fetch_listing(listing_id, conn).await? {
        Some(listing) => MarketplaceError::ListingUnavailable { listing_id, status: listing.status },
        None => MarketplaceError::ListingNotFound(listing_id),
    };
    Ok(err)
}

/// Same as [`offer_miss`], for order-status guards.
async fn order_miss(
    order_id: &OrderId,
    expected: &[OrderStatusType],
    conn: &mut sqlx::SqliteConnection,
) -> Result<MarketplaceError, MarketplaceError> {
    let err = match orders::fetch_order_by_order_id(order_id, conn).await? {
        Some(order) => MarketplaceError::OrderStateConflict {
            order_id: order_id.clone(),
            status: order.status,
            expected: StatusList(expected.to_vec()),
        },
        None => MarketplaceError::OrderNotFound(order_id.clone()),
    };
    Ok(err)
}

/// Releases the listing's reservation if it holds one, otherwise returns the listing as-is. Used by
/// the cancellation paths, where a listing may already have moved on (e.g. sold to another offer).
async fn release_or_fetch(listing_id: i64, conn: &mut sqlx::SqliteConnection) -> Result<Listing, MarketplaceError> {
    match listings::release_reservation(listing_id, conn).await? {
        Some(listing) => Ok(listing),
        None => listings::fetch_listing(listing_id, conn)
            .await?
            .ok_or(MarketplaceError::ListingNotFound(listing_id)),
    }
}
