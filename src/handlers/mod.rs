pub mod checkout;
pub mod delivery;
pub mod orders;
pub mod payment_webhooks;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses((status = 200, description = "Service is up"))
)]
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Readiness and mode summary. Pings the database.
#[utoipa::path(
    get,
    path = "/status",
    tag = "system",
    responses((status = 200, description = "Service status"))
)]
pub async fn status(State(state): State<AppState>) -> Json<Value> {
    let db_ok = state.db.ping().await.is_ok();
    Json(json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "database": if db_ok { "up" } else { "down" },
        "gateway_mode": if state.orders.demo_mode() { "demo" } else { "live" },
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
