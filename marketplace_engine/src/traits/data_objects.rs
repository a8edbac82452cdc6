use mp_common::Money;
use serde::{Deserialize, Serialize};

use crate::db_types::{Delivery, Listing, Offer, Order};

/// The result of confirming an offer payment. Returned unchanged when the confirmation is replayed, so
/// retrying clients always land on the same order and chat channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub offer: Offer,
    pub order: Order,
    pub chat_channel_id: Option<String>,
    /// True when the offer was already `Paid` and this call was an idempotent replay.
    pub already_confirmed: bool,
}

/// The result of a seller accepting an offer. `rejected_offers` is the auto-rejection cascade: every
/// other live offer on the listing, now marked `Rejected`. Their holds are released post-commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptanceResult {
    pub offer: Offer,
    pub order: Order,
    pub listing: Listing,
    pub rejected_offers: Vec<Offer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResult {
    pub order: Order,
    pub captured: Money,
    pub platform_fee: Money,
    pub seller_payout: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationResult {
    pub order: Order,
    pub listing: Listing,
    /// The originating offer, also marked `Cancelled`, when the order came from one.
    pub offer: Option<Offer>,
    pub refunded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionOutcome {
    pub order: Order,
    pub delivery: Option<Delivery>,
    pub remaining_revisions: i64,
}

/// A seller's balances, recomputed from source-of-truth on every read.
///
/// `available = Σ seller_payout over (Completed, released) orders − Σ amount over Completed withdrawals
///              − Σ amount over Pending/Processing withdrawals`
///
/// The last term locks in-flight payouts so a seller cannot request the same funds twice; a withdrawal
/// that ends up `Failed` drops out of the sum and the balance heals on the next read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSummary {
    pub available: Money,
    /// Gross amounts still held in escrow on active (non-terminal) orders, before fees.
    pub pending: Money,
    pub total_earned: Money,
    pub total_withdrawn: Money,
    /// Amounts tied up in Pending/Processing withdrawal requests.
    pub locked: Money,
}
