use axum::{extract::State, Json};

use crate::{
    errors::ServiceError,
    services::orders::{CheckoutQuoteRequest, CheckoutQuoteResponse},
    AppState,
};

/// Prices a prospective cart: resolves delivery distance, applies any
/// promo code and returns the full breakdown without creating an order.
#[utoipa::path(
    post,
    path = "/api/v1/checkout/quote",
    tag = "checkout",
    request_body = CheckoutQuoteRequest,
    responses(
        (status = 200, description = "Priced cart", body = CheckoutQuoteResponse),
        (status = 400, description = "Invalid cart", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown variant or promo code", body = crate::errors::ErrorResponse),
        (status = 409, description = "Promo code not applicable", body = crate::errors::ErrorResponse),
        (status = 502, description = "Delivery distance unavailable", body = crate::errors::ErrorResponse)
    )
)]
pub async fn quote(
    State(state): State<AppState>,
    Json(request): Json<CheckoutQuoteRequest>,
) -> Result<Json<CheckoutQuoteResponse>, ServiceError> {
    let quote = state.orders.quote_checkout(&request).await?;
    Ok(Json(quote))
}
