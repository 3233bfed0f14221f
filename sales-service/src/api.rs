use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::json;
use shared::OrderStatus;
use uuid::Uuid;

use crate::auth::AuthGuard;
use crate::error::OrderError;
use crate::idempotency::StoredResponse;
use crate::orders::{CreateOrderRequest, OrderService, OrderView};

pub type ApiError = (StatusCode, Json<serde_json::Value>);

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderService>,
    pub auth: Arc<AuthGuard>,
}

#[derive(Debug, Serialize)]
struct DataResponse<T> {
    data: T,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/customer/:customer_id", get(orders_by_customer))
        .route("/orders/status/:status", get(orders_by_status))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

async fn create_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateOrderRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    if let Err(rejection) = state.auth.require_bearer_token(&headers) {
        return rejection;
    }

    let Some(key) = headers
        .get("idempotency-key")
        .and_then(|value| value.to_str().ok())
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Idempotency-Key header is required" })),
        );
    };

    let outcome = state.orders.create_order_idempotent(key, &request).await;
    into_response(outcome)
}

async fn get_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderView>, ApiError> {
    state.auth.require_api_key(&headers)?;
    let order = state.orders.get_order(order_id).await.map_err(api_error)?;
    Ok(Json(order))
}

async fn orders_by_customer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(customer_id): Path<String>,
) -> Result<Json<DataResponse<Vec<OrderView>>>, ApiError> {
    state.auth.require_api_key(&headers)?;
    let orders = state
        .orders
        .orders_by_customer(&customer_id)
        .await
        .map_err(api_error)?;
    Ok(Json(DataResponse { data: orders }))
}

async fn orders_by_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(status): Path<String>,
) -> Result<Json<DataResponse<Vec<OrderView>>>, ApiError> {
    state.auth.require_api_key(&headers)?;
    let Some(status) = OrderStatus::parse(&status) else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid status" })),
        ));
    };
    let orders = state
        .orders
        .orders_by_status(status)
        .await
        .map_err(api_error)?;
    Ok(Json(DataResponse { data: orders }))
}

async fn health_check() -> &'static str {
    "OK"
}

fn into_response(outcome: StoredResponse) -> (StatusCode, Json<serde_json::Value>) {
    let status =
        StatusCode::from_u16(outcome.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(outcome.body))
}

fn api_error(err: OrderError) -> ApiError {
    if matches!(err, OrderError::Internal(_)) {
        tracing::error!(error = %err, "request failed");
    }
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err.body()))
}
