use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entities::order::OrderStatus;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event whose state change is already committed. A closed
    /// channel is logged, not surfaced, since storage is the source of truth.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Dropping domain event");
        }
    }
}

/// Domain events emitted after the corresponding storage change commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // Order events
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
        transition: String,
    },

    // Inventory events
    InventoryAllocated {
        listing_item_id: Uuid,
        inventory_item_id: Uuid,
        order_id: Uuid,
    },
    OutOfStock {
        listing_item_id: Uuid,
        order_id: Uuid,
    },
    InventoryRestocked {
        listing_item_id: Uuid,
        added: usize,
    },
    RestockNotificationRequested {
        listing_item_id: Uuid,
        provider_id: Uuid,
        available: u64,
    },

    // Coupon events
    CouponRedeemed {
        coupon_id: Uuid,
        redemption_id: Uuid,
        discount_cents: i64,
    },
    CouponReleased {
        coupon_id: Uuid,
        redemption_id: Uuid,
    },
    CouponCreated {
        coupon_id: Uuid,
        provider_id: Uuid,
    },

    // Checkout and payment events
    CheckoutOpened {
        order_id: Uuid,
        session_id: Uuid,
        amount_cents: i64,
    },
    PaymentCaptured {
        order_id: Uuid,
        session_id: Uuid,
    },
    PaymentFailed {
        order_id: Uuid,
        session_id: Uuid,
        reason: Option<String>,
    },
    PaymentRefunded {
        order_id: Uuid,
        session_id: Uuid,
        amount_cents: i64,
        reason: String,
    },
    RefundFailed {
        order_id: Uuid,
        session_id: Uuid,
        error: String,
    },
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!(order_id = %order_id, "Order created");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
                transition,
            } => {
                info!(
                    order_id = %order_id,
                    from = ?old_status,
                    to = ?new_status,
                    transition = %transition,
                    "Order status changed"
                );
            }
            Event::InventoryAllocated {
                listing_item_id,
                inventory_item_id,
                order_id,
            } => {
                info!(
                    listing_item_id = %listing_item_id,
                    inventory_item_id = %inventory_item_id,
                    order_id = %order_id,
                    "Serialized unit allocated"
                );
            }
            Event::OutOfStock {
                listing_item_id,
                order_id,
            } => {
                warn!(
                    listing_item_id = %listing_item_id,
                    order_id = %order_id,
                    "Allocation found no stock"
                );
            }
            Event::RestockNotificationRequested {
                listing_item_id,
                provider_id,
                available,
            } => {
                // Delivery transport lives outside this service.
                info!(
                    listing_item_id = %listing_item_id,
                    provider_id = %provider_id,
                    available = available,
                    "Restock notification requested"
                );
            }
            Event::RefundFailed {
                order_id,
                session_id,
                error: err,
            } => {
                error!(
                    order_id = %order_id,
                    session_id = %session_id,
                    error = %err,
                    "Refund left pending; redelivery of the callback will retry"
                );
            }
            other => {
                info!(event = ?other, "Domain event");
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_to_receiver() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let id = Uuid::new_v4();

        sender.send(Event::OrderCreated(id)).await.unwrap();
        assert_eq!(rx.recv().await, Some(Event::OrderCreated(id)));
    }

    #[tokio::test]
    async fn send_fails_once_receiver_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        assert!(sender.send(Event::OrderCreated(Uuid::new_v4())).await.is_err());
        // Does not panic or error.
        sender.send_or_log(Event::OrderCreated(Uuid::new_v4())).await;
    }
}
