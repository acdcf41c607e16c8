use axum::{extract::State, http::HeaderMap, Json};
use bytes::Bytes;
use serde_json::{json, Value};
use tracing::warn;

use crate::{
    errors::ServiceError,
    services::gateway::{self, CallbackPayload, CALLER_HEADER, SIGNATURE_HEADER},
    AppState,
};

/// Receives the gateway's asynchronous payment-result callback.
///
/// Authentication runs over the raw body bytes before anything is
/// parsed or persisted: caller-identity header as a coarse filter, then
/// the HMAC signature as the trust boundary. Every rejection is the
/// same generic 401 so probes learn nothing about which check failed.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    tag = "payments",
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "Callback processed"),
        (status = 400, description = "Malformed payload", body = crate::errors::ErrorResponse),
        (status = 401, description = "Authentication failed", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown payment session", body = crate::errors::ErrorResponse)
    )
)]
pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ServiceError> {
    let secret = state
        .config
        .gateway
        .webhook_secret
        .as_deref()
        .ok_or_else(|| {
            warn!("Callback received but no webhook secret is configured");
            ServiceError::Unauthorized("webhook secret not configured".into())
        })?;

    let caller = headers
        .get(CALLER_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServiceError::Unauthorized("missing caller header".into()))?;
    if caller != state.config.gateway.expected_caller {
        warn!(caller, "Callback caller header mismatch");
        return Err(ServiceError::Unauthorized("unexpected caller".into()));
    }

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServiceError::Unauthorized("missing signature header".into()))?;
    if !gateway::verify_signature(secret, &body, signature) {
        warn!("Callback signature verification failed");
        return Err(ServiceError::Unauthorized("signature mismatch".into()));
    }

    let payload: CallbackPayload = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::BadRequest(format!("malformed callback payload: {e}")))?;

    state.orders.reconcile_callback(&payload, &body).await?;
    Ok(Json(json!({ "received": true })))
}
