use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod broker;

/// Queue names shared by both services.
pub mod topics {
    pub const ORDER_CREATED: &str = "sales.order.created";
    pub const DELIVERY_STATUS: &str = "delivery.order.status";
}

/// Wire schema version stamped on outgoing order events. Populated but not
/// inspected by any consumer; reserved for future use.
pub const SCHEMA_VERSION: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    PendingShipment,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingShipment => "PendingShipment",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<OrderStatus> {
        match s {
            "PendingShipment" => Some(OrderStatus::PendingShipment),
            "Shipped" => Some(OrderStatus::Shipped),
            "Delivered" => Some(OrderStatus::Delivered),
            "Cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` is a legal forward step of the
    /// order lifecycle. Anything else (regression, skipping Shipped,
    /// cancelling after shipment, repeating a status) is rejected.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::PendingShipment, OrderStatus::Shipped)
                | (OrderStatus::Shipped, OrderStatus::Delivered)
                | (OrderStatus::PendingShipment, OrderStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    pub quantity: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

/// Published on `sales.order.created` when an order is accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedEvent {
    pub event_id: Uuid,
    pub order_id: Uuid,
    pub customer_id: String,
    pub items: Vec<OrderItem>,
    pub total_amount: f64,
    pub status: OrderStatus,
    pub occurred_at: DateTime<Utc>,
    pub schema_version: String,
}

impl OrderCreatedEvent {
    pub fn new(
        order_id: Uuid,
        customer_id: String,
        items: Vec<OrderItem>,
        total_amount: f64,
        status: OrderStatus,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            order_id,
            customer_id,
            items,
            total_amount,
            status,
            occurred_at: Utc::now(),
            schema_version: SCHEMA_VERSION.to_string(),
        }
    }
}

/// Published on `delivery.order.status` for each simulated delivery step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStatusEvent {
    pub event_id: Uuid,
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub occurred_at: DateTime<Utc>,
}

impl DeliveryStatusEvent {
    pub fn new(order_id: Uuid, status: OrderStatus) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            order_id,
            status,
            occurred_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_only_advances_forward() {
        use OrderStatus::*;

        assert!(PendingShipment.can_transition_to(Shipped));
        assert!(Shipped.can_transition_to(Delivered));
        assert!(PendingShipment.can_transition_to(Cancelled));

        let all = [PendingShipment, Shipped, Delivered, Cancelled];
        for from in all {
            for to in all {
                let legal = matches!(
                    (from, to),
                    (PendingShipment, Shipped)
                        | (Shipped, Delivered)
                        | (PendingShipment, Cancelled)
                );
                assert_eq!(from.can_transition_to(to), legal, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            OrderStatus::PendingShipment,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("Returned"), None);
    }

    #[test]
    fn order_created_event_uses_camel_case_wire_names() {
        let event = OrderCreatedEvent::new(
            Uuid::new_v4(),
            "c1".to_string(),
            vec![OrderItem {
                product_id: "p1".to_string(),
                quantity: 1,
                sku: None,
                name: None,
                price: None,
            }],
            10.0,
            OrderStatus::PendingShipment,
        );

        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("eventId").is_some());
        assert!(value.get("orderId").is_some());
        assert!(value.get("customerId").is_some());
        assert_eq!(value["totalAmount"], 10.0);
        assert_eq!(value["status"], "PendingShipment");
        assert_eq!(value["schemaVersion"], "1");
        assert!(value.get("occurredAt").is_some());

        let item = &value["items"][0];
        assert_eq!(item["productId"], "p1");
        assert_eq!(item["quantity"], 1);
        // Optional item fields are omitted, not serialized as null.
        assert!(item.get("sku").is_none());
        assert!(item.get("price").is_none());
    }

    #[test]
    fn delivery_status_events_get_fresh_event_ids() {
        let order_id = Uuid::new_v4();
        let first = DeliveryStatusEvent::new(order_id, OrderStatus::Shipped);
        let second = DeliveryStatusEvent::new(order_id, OrderStatus::Shipped);
        assert_ne!(first.event_id, second.event_id);

        let value = serde_json::to_value(&first).unwrap();
        assert!(value.get("eventId").is_some());
        assert_eq!(value["status"], "Shipped");
    }
}
