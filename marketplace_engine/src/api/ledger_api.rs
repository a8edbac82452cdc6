use std::fmt::Debug;

use log::*;
use mp_common::Money;

use crate::{
    config::EngineConfig,
    db_types::{Withdrawal, WithdrawalStatus},
    traits::{BalanceSummary, EscrowGateway, LedgerManagement, MarketplaceDatabase, MarketplaceError},
};

/// `LedgerApi` covers the money that has already been earned: seller balances and the withdrawal
/// lifecycle, including the processor's transfer webhooks.
///
/// Balances are never stored; every read recomputes them from completed orders and the withdrawal
/// ledger, so there is no counter to drift. In-flight (Pending/Processing) withdrawals are treated
/// as locked, which is what stops a seller requesting the same funds twice. A withdrawal that fails
/// simply drops out of the sums and the balance heals on the next read.
pub struct LedgerApi<B, G> {
    db: B,
    gateway: G,
    config: EngineConfig,
}

impl<B, G> Debug for LedgerApi<B, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LedgerApi")
    }
}

impl<B, G> LedgerApi<B, G> {
    pub fn new(db: B, gateway: G, config: EngineConfig) -> Self {
        Self { db, gateway, config }
    }
}

impl<B, G> LedgerApi<B, G>
where
    B: MarketplaceDatabase,
    G: EscrowGateway,
{
    pub async fn balance(&self, seller_id: i64) -> Result<BalanceSummary, MarketplaceError> {
        Ok(self.db.balance_for_seller(seller_id).await?)
    }

    pub async fn withdrawal_history(&self, seller_id: i64) -> Result<Vec<Withdrawal>, MarketplaceError> {
        Ok(self.db.fetch_withdrawals_for_seller(seller_id).await?)
    }

    /// Requests a payout of `amount` to the seller's external account.
    ///
    /// The withdrawal is persisted as `Pending` (the balance check happens atomically with the
    /// insert) and then submitted to the processor. If the processor accepts it, the record moves to
    /// `Processing` with the transfer reference; if the submission fails, the record moves to
    /// `Failed` and is returned so the caller can see why. Either way the audit trail is kept.
    pub async fn request_withdrawal(
        &self,
        seller_id: i64,
        amount: Money,
        destination: &str,
    ) -> Result<Withdrawal, MarketplaceError> {
        if amount < self.config.min_withdrawal {
            return Err(MarketplaceError::Validation(format!(
                "Withdrawals below {} are not accepted",
                self.config.min_withdrawal
            )));
        }
        if destination.trim().is_empty() {
            return Err(MarketplaceError::Validation("A destination account is required".to_string()));
        }
        let withdrawal = self.db.create_withdrawal(seller_id, amount).await?;
        match self.gateway.transfer(amount, destination).await {
            Ok(transfer_ref) => {
                let withdrawal = self
                    .db
                    .update_withdrawal_status(
                        withdrawal.id,
                        &[WithdrawalStatus::Pending],
                        WithdrawalStatus::Processing,
                        Some(&transfer_ref),
                        None,
                    )
                    .await?;
                info!(
                    "🔄️💸️ Withdrawal #{} of {amount} for seller #{seller_id} submitted. Transfer [{transfer_ref}]",
                    withdrawal.id
                );
                Ok(withdrawal)
            },
            Err(e) => {
                warn!("🔄️💸️ Transfer submission for withdrawal #{} failed: {e}", withdrawal.id);
                let withdrawal = self
                    .db
                    .update_withdrawal_status(
                        withdrawal.id,
                        &[WithdrawalStatus::Pending],
                        WithdrawalStatus::Failed,
                        None,
                        Some(&e.to_string()),
                    )
                    .await?;
                Ok(withdrawal)
            },
        }
    }

    /// Processor webhook: the transfer settled. Idempotent; a replay on a `Completed` withdrawal
    /// returns it unchanged.
    pub async fn transfer_paid(&self, transfer_ref: &str) -> Result<Withdrawal, MarketplaceError> {
        let withdrawal = self
            .db
            .fetch_withdrawal_by_transfer_ref(transfer_ref)
            .await?
            .ok_or_else(|| MarketplaceError::PaymentRefNotFound(transfer_ref.to_string()))?;
        if withdrawal.status == WithdrawalStatus::Completed {
            debug!("🔄️💸️ Transfer [{transfer_ref}] settlement replay. Ignoring.");
            return Ok(withdrawal);
        }
        let withdrawal = self
            .db
            .update_withdrawal_status(
                withdrawal.id,
                &[WithdrawalStatus::Processing],
                WithdrawalStatus::Completed,
                None,
                None,
            )
            .await?;
        info!("🔄️💸️ Withdrawal #{} settled. Transfer [{transfer_ref}]", withdrawal.id);
        Ok(withdrawal)
    }

    /// Processor webhook: the transfer bounced. The withdrawal is marked `Failed` with the reason
    /// and its amount returns to the seller's available balance.
    pub async fn transfer_failed(&self, transfer_ref: &str, reason: &str) -> Result<Withdrawal, MarketplaceError> {
        let withdrawal = self
            .db
            .fetch_withdrawal_by_transfer_ref(transfer_ref)
            .await?
            .ok_or_else(|| MarketplaceError::PaymentRefNotFound(transfer_ref.to_string()))?;
        if withdrawal.status == WithdrawalStatus::Failed {
            debug!("🔄️💸️ Transfer [{transfer_ref}] failure replay. Ignoring.");
            return Ok(withdrawal);
        }
        let withdrawal = self
            .db
            .update_withdrawal_status(
                withdrawal.id,
                &[WithdrawalStatus::Processing],
                WithdrawalStatus::Failed,
                None,
                Some(reason),
            )
            .await?;
        warn!("🔄️💸️ Withdrawal #{} failed: {reason}. The funds are back in the seller's balance.", withdrawal.id);
        Ok(withdrawal)
    }
}
