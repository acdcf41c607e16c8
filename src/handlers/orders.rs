use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    services::orders::{CreateOrderRequest, DemoPaymentRequest, OrderResponse},
    AppState,
};

/// Creates a pending order and, with a live gateway, a hosted payment
/// session the shopper is redirected to.
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    tag = "orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = OrderResponse),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown variant or promo code", body = crate::errors::ErrorResponse),
        (status = 409, description = "Out of stock or promo not applicable", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway or routing unavailable; retry later", body = crate::errors::ErrorResponse)
    )
)]
pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ServiceError> {
    let order = state.orders.create_order(&request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    tag = "orders",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order with line items", body = OrderResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    )
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderResponse>, ServiceError> {
    Ok(Json(state.orders.get_order(id).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/by-number/{order_number}",
    tag = "orders",
    params(("order_number" = String, Path, description = "Human-readable order number")),
    responses(
        (status = 200, description = "Order with line items", body = OrderResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    )
)]
pub async fn get_order_by_number(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
) -> Result<Json<OrderResponse>, ServiceError> {
    Ok(Json(state.orders.get_order_by_number(&order_number).await?))
}

/// Opens a fresh hosted checkout session for a pending order, typically
/// after an earlier gateway failure left the order without one.
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/payment-session",
    tag = "orders",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Session opened; payment_url is set", body = OrderResponse),
        (status = 400, description = "No live gateway configured", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order is not awaiting payment", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway unavailable; retry later", body = crate::errors::ErrorResponse)
    )
)]
pub async fn request_payment_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderResponse>, ServiceError> {
    Ok(Json(state.orders.request_payment_session(id).await?))
}

/// Synchronously settles an order without a gateway round trip. Only
/// available while no live gateway is configured.
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/demo-payment",
    tag = "orders",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = DemoPaymentRequest,
    responses(
        (status = 200, description = "Order settled", body = OrderResponse),
        (status = 403, description = "Live gateway configured; demo path disabled", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order is not awaiting payment", body = crate::errors::ErrorResponse)
    )
)]
pub async fn demo_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<DemoPaymentRequest>,
) -> Result<Json<OrderResponse>, ServiceError> {
    Ok(Json(state.orders.complete_demo_payment(id, &request).await?))
}
