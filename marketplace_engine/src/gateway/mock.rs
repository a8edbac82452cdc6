use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use log::*;
use mp_common::Money;

use crate::traits::{
    AuthorizationStatus,
    CaptureOutcome,
    EscrowGateway,
    GatewayError,
    PaymentMetadata,
    PaymentVerification,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HoldState {
    Authorized,
    RequiresAction,
    Captured,
    Cancelled,
}

#[derive(Debug, Clone)]
struct Hold {
    amount: Money,
    state: HoldState,
    captures: u32,
    refunded: bool,
}

#[derive(Default)]
struct Inner {
    holds: HashMap<String, Hold>,
    transfers: HashMap<String, Money>,
    counter: u64,
    decline_next_authorization: bool,
    reject_transfers: bool,
}

/// An in-memory payment processor. It models the complete hold lifecycle (authorize → capture or
/// cancel, plus refunds and payout transfers) and keeps counters so tests can assert that money
/// moved exactly once. The failure knobs let tests script declines, pending 3DS actions and transfer
/// rejections.
#[derive(Clone, Default)]
pub struct MockGateway {
    inner: Arc<Mutex<Inner>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("mock gateway state poisoned")
    }

    /// The next `authorize` call will be declined.
    pub fn decline_next_authorization(&self) {
        self.lock().decline_next_authorization = true;
    }

    /// Puts an existing hold into the requires-action state, as if the processor demanded 3DS.
    pub fn require_action(&self, payment_ref: &str) {
        if let Some(hold) = self.lock().holds.get_mut(payment_ref) {
            hold.state = HoldState::RequiresAction;
        }
    }

    /// Completes the pending client action on a hold.
    pub fn complete_action(&self, payment_ref: &str) {
        if let Some(hold) = self.lock().holds.get_mut(payment_ref) {
            if hold.state == HoldState::RequiresAction {
                hold.state = HoldState::Authorized;
            }
        }
    }

    /// When set, `transfer` calls are rejected instead of accepted.
    pub fn set_reject_transfers(&self, reject: bool) {
        self.lock().reject_transfers = reject;
    }

    /// How many times `capture` has been *charged* against this reference. At most 1 by contract.
    pub fn capture_count(&self, payment_ref: &str) -> u32 {
        self.lock().holds.get(payment_ref).map(|h| h.captures).unwrap_or(0)
    }

    pub fn is_captured(&self, payment_ref: &str) -> bool {
        self.lock().holds.get(payment_ref).map(|h| h.state == HoldState::Captured).unwrap_or(false)
    }

    pub fn is_cancelled(&self, payment_ref: &str) -> bool {
        self.lock().holds.get(payment_ref).map(|h| h.state == HoldState::Cancelled).unwrap_or(false)
    }

    pub fn is_refunded(&self, payment_ref: &str) -> bool {
        self.lock().holds.get(payment_ref).map(|h| h.refunded).unwrap_or(false)
    }

    pub fn transfer_amount(&self, transfer_ref: &str) -> Option<Money> {
        self.lock().transfers.get(transfer_ref).copied()
    }

    fn next_ref(inner: &mut Inner, prefix: &str) -> String {
        inner.counter += 1;
        format!("{prefix}_{:06}", inner.counter)
    }
}

impl EscrowGateway for MockGateway {
    async fn authorize(&self, amount: Money, meta: PaymentMetadata) -> Result<String, GatewayError> {
        let mut inner = self.lock();
        if inner.decline_next_authorization {
            inner.decline_next_authorization = false;
            return Err(GatewayError::Declined("card declined (scripted)".to_string()));
        }
        let payment_ref = Self::next_ref(&mut inner, "pay");
        inner
            .holds
            .insert(payment_ref.clone(), Hold { amount, state: HoldState::Authorized, captures: 0, refunded: false });
        trace!("💳️ [mock] hold [{payment_ref}] of {amount} for {}", meta.reference);
        Ok(payment_ref)
    }

    async fn verify_authorization(&self, payment_ref: &str) -> Result<PaymentVerification, GatewayError> {
        let inner = self.lock();
        let hold = inner
            .holds
            .get(payment_ref)
            .ok_or_else(|| GatewayError::UnknownReference(payment_ref.to_string()))?;
        let (status, reason) = match hold.state {
            HoldState::Authorized | HoldState::Captured => (AuthorizationStatus::Succeeded, None),
            HoldState::RequiresAction => {
                (AuthorizationStatus::RequiresAction, Some("3DS challenge pending".to_string()))
            },
            HoldState::Cancelled => (AuthorizationStatus::Failed, Some("authorization was voided".to_string())),
        };
        Ok(PaymentVerification { status, reason })
    }

    async fn capture(&self, payment_ref: &str) -> Result<CaptureOutcome, GatewayError> {
        let mut inner = self.lock();
        let hold = inner
            .holds
            .get_mut(payment_ref)
            .ok_or_else(|| GatewayError::UnknownReference(payment_ref.to_string()))?;
        match hold.state {
            HoldState::Authorized => {
                hold.state = HoldState::Captured;
                hold.captures += 1;
                Ok(CaptureOutcome::Captured(hold.amount))
            },
            HoldState::Captured => Ok(CaptureOutcome::AlreadyCaptured(hold.amount)),
            HoldState::RequiresAction => {
                Err(GatewayError::RequiresAction("cannot capture before authentication".to_string()))
            },
            HoldState::Cancelled => Err(GatewayError::Declined("authorization was voided".to_string())),
        }
    }

    async fn cancel_authorization(&self, payment_ref: &str) -> Result<(), GatewayError> {
        let mut inner = self.lock();
        let hold = inner
            .holds
            .get_mut(payment_ref)
            .ok_or_else(|| GatewayError::UnknownReference(payment_ref.to_string()))?;
        match hold.state {
            HoldState::Captured => Err(GatewayError::Declined("cannot void a captured payment".to_string())),
            // Voiding twice is fine; the processor treats it as settled
            _ => {
                hold.state = HoldState::Cancelled;
                Ok(())
            },
        }
    }

    async fn refund(&self, payment_ref: &str, amount: Option<Money>) -> Result<(), GatewayError> {
        let mut inner = self.lock();
        let hold = inner
            .holds
            .get_mut(payment_ref)
            .ok_or_else(|| GatewayError::UnknownReference(payment_ref.to_string()))?;
        if hold.state != HoldState::Captured {
            return Err(GatewayError::Declined("only captured payments can be refunded".to_string()));
        }
        if amount.map(|a| a > hold.amount).unwrap_or(false) {
            return Err(GatewayError::Declined("refund exceeds the captured amount".to_string()));
        }
        hold.refunded = true;
        Ok(())
    }

    async fn transfer(&self, amount: Money, destination: &str) -> Result<String, GatewayError> {
        let mut inner = self.lock();
        if inner.reject_transfers {
            return Err(GatewayError::TransferRejected(format!("payouts to {destination} are blocked (scripted)")));
        }
        let transfer_ref = Self::next_ref(&mut inner, "tr");
        inner.transfers.insert(transfer_ref.clone(), amount);
        trace!("💳️ [mock] transfer [{transfer_ref}] of {amount} to {destination}");
        Ok(transfer_ref)
    }
}
