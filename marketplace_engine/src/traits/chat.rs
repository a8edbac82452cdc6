use thiserror::Error;

use crate::db_types::OrderId;

#[derive(Debug, Clone, Error)]
#[error("Could not open chat channel: {0}")]
pub struct ChatError(pub String);

/// The chat collaborator. A channel is opened once per confirmed purchase so buyer and seller can talk.
/// Failures here are logged and swallowed by the caller; they never roll back a payment confirmation.
#[allow(async_fn_in_trait)]
pub trait ChatProvider: Clone + Send + Sync {
    async fn open_channel(&self, buyer_id: i64, seller_id: i64, order_id: &OrderId) -> Result<String, ChatError>;
}

/// A provider that hands out deterministic channel ids without talking to any transport. Useful for
/// tests and for deployments where chat is disabled.
#[derive(Debug, Clone, Default)]
pub struct NullChatProvider;

impl ChatProvider for NullChatProvider {
    async fn open_channel(&self, buyer_id: i64, seller_id: i64, order_id: &OrderId) -> Result<String, ChatError> {
        Ok(format!("chat-{buyer_id}-{seller_id}-{}", order_id.as_str()))
    }
}
