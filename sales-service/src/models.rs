use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct Order {
    pub order_id: Uuid,
    pub customer_id: String,
    pub items: serde_json::Value,
    pub total_amount: BigDecimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct NewOrder {
    pub order_id: Uuid,
    pub customer_id: String,
    pub items: serde_json::Value,
    pub total_amount: BigDecimal,
    pub status: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::processed_events)]
pub struct NewProcessedEvent {
    pub event_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::idempotency_responses)]
pub struct IdempotencyRecord {
    pub idempotency_key: String,
    pub status_code: i32,
    pub response: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::idempotency_responses)]
pub struct NewIdempotencyRecord {
    pub idempotency_key: String,
    pub status_code: i32,
    pub response: serde_json::Value,
    pub expires_at: DateTime<Utc>,
}
