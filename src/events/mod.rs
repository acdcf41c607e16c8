use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events emitted by the order and fulfillment pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    PaymentSessionCreated {
        order_id: Uuid,
        session_id: String,
    },
    PaymentCaptured(Uuid),
    PaymentFailed(Uuid),
    OrderExpired(Uuid),
    InventoryAdjusted {
        variant_id: Uuid,
        quantity: i32,
    },
    PromoCodeRedeemed {
        code: String,
        order_id: Uuid,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously. Delivery is best-effort; a full or
    /// closed channel is reported to the caller, never panicked on.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {e}"))
    }
}

/// Consumes events from the channel, logging each one. Runs until the
/// sending side is dropped.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderCreated(id) => info!(order_id = %id, "event: order created"),
            Event::PaymentSessionCreated { order_id, session_id } => {
                info!(order_id = %order_id, session_id = %session_id, "event: payment session created")
            }
            Event::PaymentCaptured(id) => info!(order_id = %id, "event: payment captured"),
            Event::PaymentFailed(id) => warn!(order_id = %id, "event: payment failed"),
            Event::OrderExpired(id) => info!(order_id = %id, "event: order expired"),
            Event::InventoryAdjusted { variant_id, quantity } => {
                info!(variant_id = %variant_id, quantity, "event: inventory adjusted")
            }
            Event::PromoCodeRedeemed { code, order_id } => {
                info!(code = %code, order_id = %order_id, "event: promo code redeemed")
            }
        }
    }
    info!("Event channel closed; consumer exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_reports_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        assert!(sender.send(Event::OrderCreated(Uuid::new_v4())).await.is_err());
    }
}
