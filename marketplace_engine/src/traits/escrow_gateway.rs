use mp_common::Money;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The contract for the external escrow payment processor.
///
/// The adapter holds no persistent state of its own; every method maps onto one processor primitive.
/// All operations are idempotent from the caller's perspective: in particular, retrying a capture on an
/// already-captured reference surfaces [`CaptureOutcome::AlreadyCaptured`] rather than an error, so the
/// completion flow can safely be replayed after a crash.
#[allow(async_fn_in_trait)]
pub trait EscrowGateway: Clone + Send + Sync {
    /// Place a manual-capture hold for `amount`. The hold is never charged until [`Self::capture`] is
    /// called. Returns the payment reference identifying the authorization.
    async fn authorize(&self, amount: Money, meta: PaymentMetadata) -> Result<String, GatewayError>;

    /// Check the state of an authorization. Used by the payment-confirmation step, where the client may
    /// still owe an additional action (e.g. 3DS) before the hold is final.
    async fn verify_authorization(&self, payment_ref: &str) -> Result<PaymentVerification, GatewayError>;

    /// Convert the hold into an actual charge, releasing the funds to the platform.
    async fn capture(&self, payment_ref: &str) -> Result<CaptureOutcome, GatewayError>;

    /// Void an authorization that was never captured.
    async fn cancel_authorization(&self, payment_ref: &str) -> Result<(), GatewayError>;

    /// Refund a captured payment. `None` refunds the full amount.
    async fn refund(&self, payment_ref: &str, amount: Option<Money>) -> Result<(), GatewayError>;

    /// Pay out `amount` to the given destination account. Settlement is asynchronous; the returned
    /// transfer reference is matched against the `transfer.paid` / `transfer.failed` webhooks.
    async fn transfer(&self, amount: Money, destination: &str) -> Result<String, GatewayError>;
}

/// Descriptive metadata attached to an authorization so the processor dashboard can tie holds back to
/// marketplace entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMetadata {
    pub buyer_id: i64,
    pub listing_id: i64,
    /// The offer or order reference the hold belongs to.
    pub reference: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizationStatus {
    /// The hold is in place.
    Succeeded,
    /// The buyer must complete an additional client-side step before the hold is final.
    RequiresAction,
    /// The processor declined the authorization.
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentVerification {
    pub status: AuthorizationStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureOutcome {
    Captured(Money),
    /// The reference was captured by an earlier call. Not an error; the funds moved exactly once.
    AlreadyCaptured(Money),
}

impl CaptureOutcome {
    pub fn amount(&self) -> Money {
        match self {
            CaptureOutcome::Captured(a) | CaptureOutcome::AlreadyCaptured(a) => *a,
        }
    }
}

/// Gateway failures. Internal processor error codes are folded into the message and never leak
/// verbatim to end users.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("The payment reference {0} is not known to the processor")]
    UnknownReference(String),
    #[error("The payment was declined: {0}")]
    Declined(String),
    #[error("The payment requires additional authentication: {0}")]
    RequiresAction(String),
    #[error("Could not reach the payment processor: {0}")]
    Network(String),
    #[error("Unexpected response from the payment processor: {0}")]
    Protocol(String),
    #[error("The transfer was rejected: {0}")]
    TransferRejected(String),
}

impl GatewayError {
    /// Whether the caller may retry the same operation and reasonably expect a different answer.
    pub fn retryable(&self) -> bool {
        matches!(self, GatewayError::RequiresAction(_) | GatewayError::Network(_))
    }
}
