pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod services;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use sea_orm::DatabaseConnection;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    config::AppConfig,
    errors::ServiceError,
    events::EventSender,
    services::{
        delivery::{DeliveryService, HttpRoutingClient, RoutingClient, StaticRoutingClient},
        emails::{EmailSender, EmailService, HttpEmailSender, NoopEmailSender},
        fulfillment::FulfillmentService,
        gateway::{HttpPaymentGateway, PaymentGateway},
        orders::OrderService,
        promotions::PromotionService,
    },
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Distance assumed when no routing collaborator is configured.
const DEV_FALLBACK_DISTANCE_KM: f64 = 5.0;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub orders: OrderService,
    pub delivery: DeliveryService,
}

impl AppState {
    /// Wires the service graph from configuration. Collaborators that
    /// are not configured get explicit stand-ins, never silent defaults.
    pub fn build(
        config: AppConfig,
        db: DatabaseConnection,
        events: EventSender,
    ) -> Result<Self, ServiceError> {
        let db = Arc::new(db);
        let config = Arc::new(config);

        let routing: Arc<dyn RoutingClient> = match &config.routing.base_url {
            Some(base_url) => Arc::new(HttpRoutingClient::new(
                base_url.clone(),
                Duration::from_secs(config.routing.timeout_secs),
            )?),
            None => {
                warn!(
                    distance_km = DEV_FALLBACK_DISTANCE_KM,
                    "No routing collaborator configured; using a fixed development distance"
                );
                Arc::new(StaticRoutingClient {
                    distance_km: DEV_FALLBACK_DISTANCE_KM,
                })
            }
        };
        let delivery = DeliveryService::new(routing, config.routing.origin_address.clone());

        let gateway: Option<Arc<dyn PaymentGateway>> = if config.gateway.is_live() {
            // is_live() guarantees both credentials are present.
            let base_url = config.gateway.base_url.clone().unwrap_or_default();
            let api_key = config.gateway.api_key.clone().unwrap_or_default();
            Some(Arc::new(HttpPaymentGateway::new(
                base_url,
                api_key,
                Duration::from_secs(config.gateway.timeout_secs),
            )?))
        } else {
            warn!("Payment gateway not fully configured; demo completion path enabled");
            None
        };

        let email_sender: Arc<dyn EmailSender> =
            match (&config.email.api_url, &config.email.api_key) {
                (Some(url), Some(key)) => Arc::new(HttpEmailSender::new(
                    url.clone(),
                    key.clone(),
                    Duration::from_secs(config.email.timeout_secs),
                )?),
                _ => Arc::new(NoopEmailSender),
            };
        let emails = EmailService::new(
            email_sender,
            config.email.from_address.clone(),
            config.email.staff_address.clone(),
        );

        let promotions = PromotionService::new(db.clone());
        let fulfillment =
            FulfillmentService::new(db.clone(), promotions.clone(), emails, events.clone());
        let orders = OrderService::new(
            db.clone(),
            promotions,
            delivery.clone(),
            gateway,
            fulfillment,
            events,
            &config,
        );

        Ok(Self {
            db,
            config,
            orders,
            delivery,
        })
    }
}

/// Full application router: system endpoints, Swagger UI and the
/// versioned API, with tracing, CORS, timeout and compression layers.
pub fn app_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/checkout/quote", post(handlers::checkout::quote))
        .route("/delivery/quote", get(handlers::delivery::quote))
        .route("/orders", post(handlers::orders::create_order))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route(
            "/orders/by-number/:order_number",
            get(handlers::orders::get_order_by_number),
        )
        .route(
            "/orders/:id/payment-session",
            post(handlers::orders::request_payment_session),
        )
        .route(
            "/orders/:id/demo-payment",
            post(handlers::orders::demo_payment),
        )
        .route("/payments/webhook", post(handlers::payment_webhooks::receive))
        // Probes answer on both the root and the versioned prefix.
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .merge(
            SwaggerUi::new("/docs")
                .url("/api-docs/openapi.json", openapi::ApiDoc::openapi()),
        )
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CompressionLayer::new())
        .with_state(state)
}
