use crate::errors::ServiceError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};
use utoipa::ToSchema;

/// Distance bracket mapped to a flat delivery price. `max_distance_km`
/// of `None` marks the final unbounded tier.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryTier {
    pub max_distance_km: Option<f64>,
    pub price: Decimal,
}

/// Tier table, ascending by bound. Code-level configuration, not persisted.
pub const DELIVERY_TIERS: [DeliveryTier; 4] = [
    DeliveryTier {
        max_distance_km: Some(10.0),
        price: dec!(25),
    },
    DeliveryTier {
        max_distance_km: Some(30.0),
        price: dec!(50),
    },
    DeliveryTier {
        max_distance_km: Some(50.0),
        price: dec!(75),
    },
    DeliveryTier {
        max_distance_km: None,
        price: dec!(100),
    },
];

/// Flat price for the first tier whose bound covers the distance.
pub fn tier_price(distance_km: f64) -> Decimal {
    for tier in DELIVERY_TIERS {
        match tier.max_distance_km {
            Some(bound) if distance_km <= bound => return tier.price,
            Some(_) => continue,
            None => return tier.price,
        }
    }
    // Unreachable: the table ends with an unbounded tier.
    DELIVERY_TIERS[DELIVERY_TIERS.len() - 1].price
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeliveryQuote {
    pub distance_km: f64,
    pub price: Decimal,
}

/// Routing collaborator resolving a destination address to a driving
/// distance. Untrusted and unreliable; implementations must time out.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoutingClient: Send + Sync {
    async fn driving_distance_km(
        &self,
        origin: &str,
        destination: &str,
    ) -> Result<f64, ServiceError>;
}

/// HTTP routing client. Expects the collaborator to answer
/// `GET {base}/route?origin=…&destination=…` with `{"distance_km": f64}`.
pub struct HttpRoutingClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct RouteResponse {
    distance_km: f64,
}

impl HttpRoutingClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("routing client init: {e}")))?;
        Ok(Self { http, base_url })
    }
}

#[async_trait]
impl RoutingClient for HttpRoutingClient {
    async fn driving_distance_km(
        &self,
        origin: &str,
        destination: &str,
    ) -> Result<f64, ServiceError> {
        let url = format!("{}/route", self.base_url.trim_end_matches('/'));
        let resp = self
            .http
            .get(url)
            .query(&[("origin", origin), ("destination", destination)])
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Routing collaborator unreachable");
                ServiceError::DistanceUnavailable(e.to_string())
            })?;

        if !resp.status().is_success() {
            warn!(status = %resp.status(), "Routing collaborator returned an error");
            return Err(ServiceError::DistanceUnavailable(format!(
                "routing status {}",
                resp.status()
            )));
        }

        let route: RouteResponse = resp
            .json()
            .await
            .map_err(|e| ServiceError::DistanceUnavailable(e.to_string()))?;
        Ok(route.distance_km)
    }
}

/// Fixed-distance client for installations without a routing
/// collaborator. Announced loudly at startup; never a silent fallback
/// for a configured client that failed.
pub struct StaticRoutingClient {
    pub distance_km: f64,
}

#[async_trait]
impl RoutingClient for StaticRoutingClient {
    async fn driving_distance_km(
        &self,
        _origin: &str,
        _destination: &str,
    ) -> Result<f64, ServiceError> {
        Ok(self.distance_km)
    }
}

/// Estimates the flat delivery price for a destination address.
#[derive(Clone)]
pub struct DeliveryService {
    routing: Arc<dyn RoutingClient>,
    origin_address: String,
}

impl DeliveryService {
    pub fn new(routing: Arc<dyn RoutingClient>, origin_address: String) -> Self {
        Self {
            routing,
            origin_address,
        }
    }

    /// Resolves the driving distance and applies the tier table. A routing
    /// failure surfaces as `DistanceUnavailable`; callers must not fall
    /// back to a default tier.
    #[instrument(skip(self))]
    pub async fn quote(&self, destination: &str) -> Result<DeliveryQuote, ServiceError> {
        if destination.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "destination address is required".to_string(),
            ));
        }

        let distance_km = self
            .routing
            .driving_distance_km(&self.origin_address, destination)
            .await?;

        if !distance_km.is_finite() || distance_km < 0.0 {
            return Err(ServiceError::DistanceUnavailable(format!(
                "implausible distance {distance_km}"
            )));
        }

        Ok(DeliveryQuote {
            distance_km,
            price: tier_price(distance_km),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0.0 => dec!(25); "at origin")]
    #[test_case(10.0 => dec!(25); "boundary of first tier")]
    #[test_case(25.0 => dec!(50); "documented 25 km scenario")]
    #[test_case(30.0 => dec!(50); "boundary of second tier")]
    #[test_case(49.9 => dec!(75); "third tier")]
    #[test_case(50.0 => dec!(75); "boundary of third tier")]
    #[test_case(800.0 => dec!(100); "unbounded tier")]
    fn tier_lookup(distance: f64) -> Decimal {
        tier_price(distance)
    }

    #[test]
    fn tier_prices_are_monotonic_in_distance() {
        let mut last = Decimal::ZERO;
        for km in 0..200 {
            let price = tier_price(km as f64);
            assert!(price >= last, "price dropped at {} km", km);
            last = price;
        }
    }

    #[tokio::test]
    async fn routing_failure_is_typed_not_defaulted() {
        let mut routing = MockRoutingClient::new();
        routing
            .expect_driving_distance_km()
            .returning(|_, _| Err(ServiceError::DistanceUnavailable("timeout".into())));

        let service = DeliveryService::new(Arc::new(routing), "origin".into());
        let err = service.quote("somewhere far").await.unwrap_err();
        assert!(matches!(err, ServiceError::DistanceUnavailable(_)));
    }

    #[tokio::test]
    async fn quote_applies_tier_to_resolved_distance() {
        let mut routing = MockRoutingClient::new();
        routing
            .expect_driving_distance_km()
            .returning(|_, _| Ok(25.0));

        let service = DeliveryService::new(Arc::new(routing), "origin".into());
        let quote = service.quote("21 Harbor St").await.unwrap();
        assert_eq!(quote.distance_km, 25.0);
        assert_eq!(quote.price, dec!(50));
    }

    #[tokio::test]
    async fn blank_destination_is_rejected_before_routing() {
        let routing = MockRoutingClient::new();
        let service = DeliveryService::new(Arc::new(routing), "origin".into());
        let err = service.quote("   ").await.unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }
}
