use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::{errors::ServiceError, services::delivery::DeliveryQuote, AppState};

#[derive(Debug, Deserialize)]
pub struct DeliveryQuoteParams {
    pub address: String,
}

/// Resolves the driving distance to an address and returns the flat
/// delivery price for its tier.
#[utoipa::path(
    get,
    path = "/api/v1/delivery/quote",
    tag = "delivery",
    params(("address" = String, Query, description = "Destination street address")),
    responses(
        (status = 200, description = "Delivery quote", body = DeliveryQuote),
        (status = 400, description = "Missing address", body = crate::errors::ErrorResponse),
        (status = 502, description = "Distance could not be resolved", body = crate::errors::ErrorResponse)
    )
)]
pub async fn quote(
    State(state): State<AppState>,
    Query(params): Query<DeliveryQuoteParams>,
) -> Result<Json<DeliveryQuote>, ServiceError> {
    let quote = state.delivery.quote(&params.address).await?;
    Ok(Json(quote))
}
