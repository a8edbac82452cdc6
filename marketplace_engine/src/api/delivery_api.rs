use std::fmt::Debug;

use log::*;

use crate::{
    db_types::{Delivery, NewDelivery, Order, OrderId},
    events::{EventProducers, OrderDeliveredEvent},
    traits::{LedgerManagement, MarketplaceDatabase, MarketplaceError},
};

/// `DeliveryApi` handles the seller's work submissions. Each submission gets the next revision
/// number on the order and drives the order to `Delivered`; the revision history is append-only.
pub struct DeliveryApi<B> {
    db: B,
    producers: EventProducers,
}

impl<B> Debug for DeliveryApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DeliveryApi")
    }
}

impl<B> DeliveryApi<B> {
    pub fn new(db: B, producers: EventProducers) -> Self {
        Self { db, producers }
    }
}

impl<B> DeliveryApi<B>
where B: MarketplaceDatabase
{
    /// Submits delivered work on an order in `InProgress` or `InRevision`.
    pub async fn submit_delivery(
        &self,
        seller_id: i64,
        delivery: NewDelivery,
    ) -> Result<(Delivery, Order), MarketplaceError> {
        if delivery.message.trim().is_empty() {
            return Err(MarketplaceError::Validation("A delivery needs a message for the buyer".to_string()));
        }
        if delivery.attachments.is_empty() {
            return Err(MarketplaceError::Validation("A delivery needs at least one attachment".to_string()));
        }
        let order_id = delivery.order_id.clone();
        let order = self
            .db
            .fetch_order(&order_id)
            .await?
            .ok_or_else(|| MarketplaceError::OrderNotFound(order_id.clone()))?;
        if order.seller_id != seller_id {
            return Err(MarketplaceError::Forbidden(format!(
                "user #{seller_id} is not the seller on order {order_id}"
            )));
        }
        let (delivery, order) = self.db.insert_delivery(delivery).await?;
        self.call_order_delivered_hook(order.clone(), delivery.clone()).await;
        info!(
            "🔄️📦️ Delivery #{} submitted on order [{}]. The order is now awaiting the buyer's review.",
            delivery.revision_number, order.order_id
        );
        Ok((delivery, order))
    }

    /// The full submission history for an order, oldest first.
    pub async fn delivery_history(&self, order_id: &OrderId) -> Result<Vec<Delivery>, MarketplaceError> {
        Ok(self.db.fetch_deliveries_for_order(order_id).await?)
    }

    async fn call_order_delivered_hook(&self, order: Order, delivery: Delivery) {
        for emitter in &self.producers.order_delivered_producer {
            emitter.publish_event(OrderDeliveredEvent::new(order.clone(), delivery.clone())).await;
        }
    }
}
