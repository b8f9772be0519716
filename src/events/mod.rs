use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Domain events emitted by the services after their transaction commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartUpdated(Uuid),
    CartsMerged {
        user_cart_id: Uuid,
        guest_cart_id: Uuid,
        strategy: String,
    },
    CartsAbandoned(u64),

    // Reservation events
    ReservationsExpired(u64),

    // Checkout events
    CheckoutSessionCreated(Uuid),
    CheckoutCompleted {
        session_id: Uuid,
        order_id: Uuid,
    },
    CheckoutSessionsExpired(u64),

    // Order events
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderCancelled {
        order_id: Uuid,
        reason: String,
    },
    OrderPaid(Uuid),
    OrderShipped {
        order_id: Uuid,
        shipment_id: Uuid,
    },
    OrderDelivered(Uuid),

    // Payment events
    PaymentCaptured(Uuid),
    PaymentFailed(Uuid),
    PaymentRefunded {
        payment_id: Uuid,
        amount: Decimal,
    },

    // Return events
    ReturnRequested(Uuid),
    ReturnStatusChanged {
        return_id: Uuid,
        status: String,
    },

    // Catalog events
    ProductUpdated(Uuid),
    StockAdjusted {
        product_id: Uuid,
        old_quantity: i32,
        new_quantity: i32,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::CartUpdated(_) => "cart_updated",
            Event::CartsMerged { .. } => "carts_merged",
            Event::CartsAbandoned(_) => "carts_abandoned",
            Event::ReservationsExpired(_) => "reservations_expired",
            Event::CheckoutSessionCreated(_) => "checkout_session_created",
            Event::CheckoutCompleted { .. } => "checkout_completed",
            Event::CheckoutSessionsExpired(_) => "checkout_sessions_expired",
            Event::OrderCreated(_) => "order_created",
            Event::OrderStatusChanged { .. } => "order_status_changed",
            Event::OrderCancelled { .. } => "order_cancelled",
            Event::OrderPaid(_) => "order_paid",
            Event::OrderShipped { .. } => "order_shipped",
            Event::OrderDelivered(_) => "order_delivered",
            Event::PaymentCaptured(_) => "payment_captured",
            Event::PaymentFailed(_) => "payment_failed",
            Event::PaymentRefunded { .. } => "payment_refunded",
            Event::ReturnRequested(_) => "return_requested",
            Event::ReturnStatusChanged { .. } => "return_status_changed",
            Event::ProductUpdated(_) => "product_updated",
            Event::StockAdjusted { .. } => "stock_adjusted",
        }
    }
}

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

    /// Sends an event, logging instead of failing when the channel is closed.
    /// Event delivery never fails the request that produced it.
    pub async fn send_or_log(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            warn!(event = name, error = %e, "dropping event");
        }
    }
}

/// Handlers registered with the event loop.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), String>;
}

/// Drains the channel, handing every event to each handler in turn. Handler
/// failures are logged and do not stop the loop.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Arc<dyn EventHandler>>) {
    info!(handlers = handlers.len(), "Starting event processing loop");

    while let Some(event) = rx.recv().await {
        debug!(event = event.name(), "Received event: {:?}", event);
        metrics::counter!("storefront.events.processed", 1, "event" => event.name());

        for handler in &handlers {
            if let Err(e) = handler.handle_event(&event).await {
                metrics::counter!("storefront.events.failed", 1, "event" => event.name());
                error!(event = event.name(), error = %e, "Event handler failed");
            }
        }
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<Event>>);

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle_event(&self, event: &Event) -> Result<(), String> {
            self.0.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        async fn handle_event(&self, _event: &Event) -> Result<(), String> {
            Err("boom".into())
        }
    }

    #[tokio::test]
    async fn events_reach_every_handler_even_after_failures() {
        let (tx, rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));

        let order_id = Uuid::new_v4();
        sender.send_or_log(Event::OrderCreated(order_id)).await;
        sender.send_or_log(Event::OrderPaid(order_id)).await;
        drop(sender);

        process_events(rx, vec![Arc::new(Failing), recorder.clone()]).await;

        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![Event::OrderCreated(order_id), Event::OrderPaid(order_id)]
        );
    }

    #[tokio::test]
    async fn send_or_log_swallows_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        sender.send_or_log(Event::CartUpdated(Uuid::new_v4())).await;
        assert!(sender.send(Event::CartUpdated(Uuid::new_v4())).await.is_err());
    }
}
