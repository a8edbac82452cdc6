use std::fmt::Debug;

use chrono::Utc;
use log::*;
use mp_common::Money;

use crate::{
    db_types::{Listing, ListingStatus, NewListing},
    traits::{LedgerManagement, MarketplaceDatabase, MarketplaceError},
};

/// `ListingApi` manages listing creation and visibility. Reservation expiry is lazy: readers use
/// [`Listing::effective_status`], and [`Self::release_expired`] is the housekeeping sweep that
/// rewrites lapsed rows.
pub struct ListingApi<B> {
    db: B,
}

impl<B> Debug for ListingApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ListingApi")
    }
}

impl<B> ListingApi<B> {
    pub fn new(db: B) -> Self {
        Self { db }
    }
}

impl<B> ListingApi<B>
where B: MarketplaceDatabase
{
    /// Creates a new listing in `Draft`.
    pub async fn create_listing(&self, listing: NewListing) -> Result<Listing, MarketplaceError> {
        if listing.title.trim().is_empty() {
            return Err(MarketplaceError::Validation("A listing needs a title".to_string()));
        }
        if listing.price <= Money::default() {
            return Err(MarketplaceError::Validation("The asking price must be positive".to_string()));
        }
        let listing = self.db.insert_listing(listing).await?;
        info!("🔄️🏷️ Listing {} created by seller #{}", listing.id, listing.seller_id);
        Ok(listing)
    }

    /// Puts a draft listing on the market.
    pub async fn publish(&self, seller_id: i64, listing_id: i64) -> Result<Listing, MarketplaceError> {
        self.assert_owner(seller_id, listing_id).await?;
        let listing = self.db.update_listing_status(listing_id, ListingStatus::Draft, ListingStatus::Active).await?;
        info!("🔄️🏷️ Listing {listing_id} is now live");
        Ok(listing)
    }

    /// Takes an active listing off the market. Existing orders are unaffected.
    pub async fn deactivate(&self, seller_id: i64, listing_id: i64) -> Result<Listing, MarketplaceError> {
        self.assert_owner(seller_id, listing_id).await?;
        let listing = self.db.update_listing_status(listing_id, ListingStatus::Active, ListingStatus::Inactive).await?;
        info!("🔄️🏷️ Listing {listing_id} deactivated");
        Ok(listing)
    }

    pub async fn fetch_listing(&self, listing_id: i64) -> Result<Listing, MarketplaceError> {
        self.db.fetch_listing(listing_id).await?.ok_or(MarketplaceError::ListingNotFound(listing_id))
    }

    /// Sweeps every `Reserved` listing whose reservation has lapsed back to `Active`. Run this
    /// periodically; correctness does not depend on it, since readers apply lazy expiry.
    pub async fn release_expired(&self) -> Result<Vec<Listing>, MarketplaceError> {
        self.db.release_expired_reservations(Utc::now()).await
    }

    async fn assert_owner(&self, seller_id: i64, listing_id: i64) -> Result<(), MarketplaceError> {
        let listing = self.fetch_listing(listing_id).await?;
        if listing.seller_id != seller_id {
            return Err(MarketplaceError::Forbidden(format!("listing {listing_id} belongs to another seller")));
        }
        Ok(())
    }
}
