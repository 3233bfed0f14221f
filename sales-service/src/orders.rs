//! Order workflow core: validation, persistence, event publication, and the
//! idempotent request wrapper around the whole create path.

use anyhow::{anyhow, Result};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection, RunQueryDsl};
use num_traits::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::broker::Broker;
use shared::{topics, OrderCreatedEvent, OrderItem, OrderStatus};
use tracing::{error, info};
use uuid::Uuid;

use crate::error::OrderError;
use crate::idempotency::{IdempotencyCache, StoredResponse};
use crate::models::{NewOrder, Order};
use crate::schema::orders;

type DbPool = Pool<AsyncPgConnection>;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub customer_id: String,
    pub items: Vec<OrderItem>,
    pub total_amount: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderReceipt {
    pub order_id: Uuid,
    pub status: OrderStatus,
}

/// An order as returned by the read endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub order_id: Uuid,
    pub customer_id: String,
    pub items: Vec<OrderItem>,
    pub total_amount: f64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<Order> for OrderView {
    type Error = anyhow::Error;

    fn try_from(order: Order) -> Result<Self> {
        let items: Vec<OrderItem> = serde_json::from_value(order.items)?;
        let status = OrderStatus::parse(&order.status)
            .ok_or_else(|| anyhow!("order {} has unrecognized status {:?}", order.order_id, order.status))?;

        Ok(Self {
            order_id: order.order_id,
            customer_id: order.customer_id,
            items,
            total_amount: order.total_amount.to_f64().unwrap_or_default(),
            status,
            created_at: order.created_at,
            updated_at: order.updated_at,
        })
    }
}

pub struct OrderService {
    pool: DbPool,
    broker: Broker,
    idempotency: IdempotencyCache,
}

impl OrderService {
    pub fn new(pool: DbPool, broker: Broker) -> Self {
        let idempotency = IdempotencyCache::new(pool.clone());
        Self {
            pool,
            broker,
            idempotency,
        }
    }

    /// Runs the create path at most once per idempotency key: cache checked
    /// first, outcome stored last, after the attempt completes, success or
    /// failure alike. Concurrent first requests sharing an unseen key are
    /// not serialized; both may execute.
    pub async fn create_order_idempotent(
        &self,
        key: &str,
        request: &CreateOrderRequest,
    ) -> StoredResponse {
        match self.idempotency.lookup(key).await {
            Ok(Some(prior)) => {
                info!(key, "replaying cached response for repeated idempotency key");
                return prior;
            }
            Ok(None) => {}
            Err(e) => {
                error!(key, error = %e, "idempotency lookup failed");
                return StoredResponse {
                    status_code: 500,
                    body: json!({ "error": "Internal Server Error" }),
                };
            }
        }

        let outcome = match self.create_order(request).await {
            Ok(receipt) => StoredResponse {
                status_code: 201,
                body: json!({ "data": receipt }),
            },
            Err(e) => {
                if matches!(e, OrderError::Internal(_)) {
                    error!(key, error = %e, "create order failed");
                }
                StoredResponse {
                    status_code: e.status_code(),
                    body: e.body(),
                }
            }
        };

        self.idempotency.store(key, outcome.status_code, &outcome.body).await;
        outcome
    }

    pub async fn create_order(
        &self,
        request: &CreateOrderRequest,
    ) -> Result<OrderReceipt, OrderError> {
        validate_request(request)?;
        self.persist_and_publish(request)
            .await
            .map_err(OrderError::Internal)
    }

    async fn persist_and_publish(&self, request: &CreateOrderRequest) -> Result<OrderReceipt> {
        let order_id = Uuid::new_v4();
        let status = OrderStatus::PendingShipment;
        let total_amount = BigDecimal::from_f64(request.total_amount)
            .ok_or_else(|| anyhow!("totalAmount is not representable"))?;

        let new_order = NewOrder {
            order_id,
            customer_id: request.customer_id.clone(),
            items: serde_json::to_value(&request.items)?,
            total_amount,
            status: status.as_str().to_string(),
        };

        let mut conn = self.pool.get().await?;
        diesel::insert_into(orders::table)
            .values(&new_order)
            .execute(&mut conn)
            .await?;

        let event = OrderCreatedEvent::new(
            order_id,
            request.customer_id.clone(),
            request.items.clone(),
            request.total_amount,
            status,
        );
        self.broker
            .publish_json(topics::ORDER_CREATED, &order_id.to_string(), &event)
            .await?;

        info!(%order_id, event_id = %event.event_id, "order created");
        Ok(OrderReceipt { order_id, status })
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderView, OrderError> {
        let mut conn = self.pool.get().await.map_err(anyhow::Error::from)?;
        let order = orders::table
            .find(order_id)
            .first::<Order>(&mut conn)
            .await
            .optional()
            .map_err(anyhow::Error::from)?;

        match order {
            Some(order) => Ok(OrderView::try_from(order)?),
            None => Err(OrderError::NotFound),
        }
    }

    pub async fn orders_by_customer(&self, customer_id: &str) -> Result<Vec<OrderView>, OrderError> {
        let mut conn = self.pool.get().await.map_err(anyhow::Error::from)?;
        let rows = orders::table
            .filter(orders::customer_id.eq(customer_id))
            .order(orders::created_at.asc())
            .load::<Order>(&mut conn)
            .await
            .map_err(anyhow::Error::from)?;

        collect_views(rows)
    }

    pub async fn orders_by_status(&self, status: OrderStatus) -> Result<Vec<OrderView>, OrderError> {
        let mut conn = self.pool.get().await.map_err(anyhow::Error::from)?;
        let rows = orders::table
            .filter(orders::status.eq(status.as_str()))
            .order(orders::created_at.asc())
            .load::<Order>(&mut conn)
            .await
            .map_err(anyhow::Error::from)?;

        collect_views(rows)
    }
}

fn collect_views(rows: Vec<Order>) -> Result<Vec<OrderView>, OrderError> {
    rows.into_iter()
        .map(|order| OrderView::try_from(order).map_err(OrderError::Internal))
        .collect()
}

/// Field-by-field request validation, in the order the fields appear on the
/// wire. The first violation wins.
pub(crate) fn validate_request(request: &CreateOrderRequest) -> Result<(), OrderError> {
    if request.customer_id.trim().is_empty() {
        return Err(OrderError::Validation("customerId"));
    }
    if request.items.is_empty() {
        return Err(OrderError::Validation("items array"));
    }
    if !request.total_amount.is_finite() || request.total_amount <= 0.0 {
        return Err(OrderError::Validation("totalAmount"));
    }
    for item in &request.items {
        if item.product_id.trim().is_empty() {
            return Err(OrderError::Validation("productId in item"));
        }
        if item.quantity <= 0 {
            return Err(OrderError::Validation("quantity in item"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(product_id: &str, quantity: i32) -> OrderItem {
        OrderItem {
            product_id: product_id.to_string(),
            quantity,
            sku: None,
            name: None,
            price: None,
        }
    }

    fn valid_request() -> CreateOrderRequest {
        CreateOrderRequest {
            customer_id: "c1".to_string(),
            items: vec![item("p1", 1)],
            total_amount: 10.0,
        }
    }

    fn violated_field(request: &CreateOrderRequest) -> &'static str {
        match validate_request(request) {
            Err(OrderError::Validation(field)) => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn accepts_a_valid_request() {
        assert!(validate_request(&valid_request()).is_ok());
    }

    #[test]
    fn rejects_empty_customer_id() {
        let mut request = valid_request();
        request.customer_id = "  ".to_string();
        assert_eq!(violated_field(&request), "customerId");
    }

    #[test]
    fn rejects_empty_items() {
        let mut request = valid_request();
        request.items.clear();
        assert_eq!(violated_field(&request), "items array");
    }

    #[test]
    fn rejects_non_positive_total_amount() {
        for bad in [0.0, -3.5, f64::NAN, f64::INFINITY] {
            let mut request = valid_request();
            request.total_amount = bad;
            assert_eq!(violated_field(&request), "totalAmount");
        }
    }

    #[test]
    fn rejects_item_without_product_id() {
        let mut request = valid_request();
        request.items.push(item("", 2));
        assert_eq!(violated_field(&request), "productId in item");
    }

    #[test]
    fn rejects_item_with_non_positive_quantity() {
        let mut request = valid_request();
        request.items = vec![item("p1", 0)];
        assert_eq!(violated_field(&request), "quantity in item");
    }

    #[test]
    fn receipt_serializes_with_camel_case_names() {
        let receipt = OrderReceipt {
            order_id: Uuid::new_v4(),
            status: OrderStatus::PendingShipment,
        };
        let value = serde_json::to_value(&receipt).unwrap();
        assert!(value.get("orderId").is_some());
        assert_eq!(value["status"], "PendingShipment");
    }

    #[test]
    fn request_deserializes_from_camel_case_body() {
        let body = serde_json::json!({
            "customerId": "c1",
            "items": [{ "productId": "p1", "quantity": 1 }],
            "totalAmount": 10.0
        });
        let request: CreateOrderRequest = serde_json::from_value(body).unwrap();
        assert_eq!(request.customer_id, "c1");
        assert_eq!(request.items[0].product_id, "p1");
        assert!(validate_request(&request).is_ok());
    }

    #[test]
    fn order_view_rebuilds_items_from_stored_json() {
        let now = Utc::now();
        let order = Order {
            order_id: Uuid::new_v4(),
            customer_id: "c1".to_string(),
            items: serde_json::json!([{ "productId": "p1", "quantity": 2, "price": 5.0 }]),
            total_amount: BigDecimal::from_f64(10.0).unwrap(),
            status: "Shipped".to_string(),
            created_at: now,
            updated_at: now,
        };

        let view = OrderView::try_from(order).unwrap();
        assert_eq!(view.items.len(), 1);
        assert_eq!(view.items[0].quantity, 2);
        assert_eq!(view.items[0].price, Some(5.0));
        assert_eq!(view.status, OrderStatus::Shipped);
        assert_eq!(view.total_amount, 10.0);
    }

    #[test]
    fn order_view_rejects_unknown_stored_status() {
        let now = Utc::now();
        let order = Order {
            order_id: Uuid::new_v4(),
            customer_id: "c1".to_string(),
            items: serde_json::json!([]),
            total_amount: BigDecimal::from_f64(1.0).unwrap(),
            status: "Lost".to_string(),
            created_at: now,
            updated_at: now,
        };

        assert!(OrderView::try_from(order).is_err());
    }
}
