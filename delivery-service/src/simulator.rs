//! Scripted delivery timeline, standing in for a real logistics integration.

use std::time::Duration;

use anyhow::Result;
use shared::broker::Broker;
use shared::{topics, DeliveryStatusEvent, OrderCreatedEvent, OrderStatus};
use tracing::{error, info};
use uuid::Uuid;

const CONSUMER_GROUP: &str = "delivery-service";

/// Each step is a delay from receipt of the order-created event and the
/// status reported once it elapses.
const TIMELINE: [(Duration, OrderStatus); 2] = [
    (Duration::from_millis(500), OrderStatus::Shipped),
    (Duration::from_millis(1500), OrderStatus::Delivered),
];

pub struct DeliverySimulator {
    broker: Broker,
}

impl DeliverySimulator {
    pub fn new(broker: Broker) -> Self {
        Self { broker }
    }

    /// Consumes `sales.order.created` until the subscription ends.
    pub async fn run(&self) -> Result<()> {
        self.broker
            .subscribe(topics::ORDER_CREATED, CONSUMER_GROUP, |msg| async move {
                let event: OrderCreatedEvent = msg.decode()?;
                info!(
                    order_id = %event.order_id,
                    event_id = %event.event_id,
                    "scheduling delivery timeline"
                );
                self.schedule(event.order_id);
                Ok(())
            })
            .await
    }

    /// Spawns one independent, non-cancelable timer per timeline step.
    /// Nothing is persisted: a restart between scheduling and firing drops
    /// the pending steps.
    fn schedule(&self, order_id: Uuid) {
        for (delay, status) in TIMELINE {
            let broker = self.broker.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let event = DeliveryStatusEvent::new(order_id, status);
                let key = order_id.to_string();
                match broker
                    .publish_json(topics::DELIVERY_STATUS, &key, &event)
                    .await
                {
                    Ok(()) => info!(
                        %order_id,
                        status = %status,
                        event_id = %event.event_id,
                        "published delivery status"
                    ),
                    // Logged only; this component never retries a publish.
                    Err(e) => error!(
                        %order_id,
                        status = %status,
                        error = %e,
                        "failed to publish delivery status"
                    ),
                }
            });
        }
    }
}
