use crate::errors::ServiceError;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::{instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 of the raw callback body.
pub const SIGNATURE_HEADER: &str = "x-gateway-signature";
/// Header naming the calling system; checked literally before the HMAC.
pub const CALLER_HEADER: &str = "x-gateway-caller";

/// Gateway status string that marks a successful capture. Anything else
/// is treated as a failure.
pub const STATUS_APPROVED: &str = "approved";

/// What we send the gateway to open a hosted checkout session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRequest {
    pub order_id: Uuid,
    pub order_number: String,
    pub amount: Decimal,
    pub currency: String,
    /// Charge immediately rather than authorize-only.
    pub charge: bool,
    pub success_url: String,
    pub failure_url: String,
    /// Where the gateway posts the signed server-to-server callback.
    pub callback_url: String,
    pub customer_email: String,
    pub customer_name: String,
    pub line_items: Vec<SessionLineItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionLineItem {
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// Hosted checkout session handed back by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckoutSession {
    pub session_id: String,
    /// Hosted payment page the shopper is redirected to.
    pub checkout_url: String,
}

/// Server-to-server callback body. Parsed only after the signature over
/// the raw bytes has been verified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub session_id: String,
    pub transaction_id: String,
    pub status: String,
    pub amount: Decimal,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub approval_code: Option<String>,
    #[serde(default)]
    pub voucher_number: Option<String>,
    #[serde(default)]
    pub card_last4: Option<String>,
    #[serde(default)]
    pub transaction_type: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    /// Free-form gateway metadata, kept verbatim for the audit record.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    /// Line items as the gateway reports them, kept for the audit record.
    #[serde(default)]
    pub line_items: Option<serde_json::Value>,
}

impl CallbackPayload {
    pub fn is_approved(&self) -> bool {
        self.status.eq_ignore_ascii_case(STATUS_APPROVED)
    }
}

/// Constant-time byte comparison for signature checks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Computes the hex HMAC-SHA256 of a body under the shared secret.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a callback signature against the exact raw wire bytes.
///
/// The signature must be computed over the bytes as received; callers
/// must never re-serialize the payload before checking.
pub fn verify_signature(secret: &str, body: &[u8], provided_hex: &str) -> bool {
    let expected = sign_payload(secret, body);
    constant_time_eq(expected.as_bytes(), provided_hex.trim().as_bytes())
}

/// Hosted payment gateway. One implementation talks HTTP; tests mock it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_session(&self, request: &SessionRequest)
        -> Result<CheckoutSession, ServiceError>;
}

/// HTTP client for the live gateway.
pub struct HttpPaymentGateway {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpPaymentGateway {
    pub fn new(
        base_url: String,
        api_key: String,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("gateway client init: {e}")))?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_session(
        &self,
        request: &SessionRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        let url = format!(
            "{}/v1/checkout/sessions",
            self.base_url.trim_end_matches('/')
        );
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Gateway unreachable");
                ServiceError::ExternalServiceError(format!("gateway: {e}"))
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(%status, body, "Gateway rejected session request");
            return Err(ServiceError::ExternalServiceError(format!(
                "gateway returned {status}"
            )));
        }

        resp.json::<CheckoutSession>()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("gateway response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "wh_test_secret";

    #[test]
    fn signature_round_trip_over_raw_bytes() {
        let body = br#"{"session_id":"cs_1","transaction_id":"tx_1","status":"approved","amount":"950.00"}"#;
        let sig = sign_payload(SECRET, body);
        assert!(verify_signature(SECRET, body, &sig));
    }

    #[test]
    fn signature_is_bound_to_the_exact_bytes() {
        let body = b"{\"amount\":\"950.00\"}";
        let sig = sign_payload(SECRET, body);
        // Same JSON meaning, different bytes.
        assert!(!verify_signature(SECRET, b"{ \"amount\": \"950.00\" }", &sig));
        assert!(!verify_signature("other_secret", body, &sig));
    }

    #[test]
    fn signature_tolerates_surrounding_whitespace_in_header() {
        let body = b"payload";
        let sig = sign_payload(SECRET, body);
        assert!(verify_signature(SECRET, body, &format!(" {sig} ")));
    }

    #[test]
    fn malformed_hex_never_verifies() {
        assert!(!verify_signature(SECRET, b"payload", "not-hex"));
        assert!(!verify_signature(SECRET, b"payload", ""));
    }

    #[test]
    fn approved_status_is_case_insensitive() {
        let payload = CallbackPayload {
            session_id: "cs_1".into(),
            transaction_id: "tx_1".into(),
            status: "Approved".into(),
            amount: Decimal::new(95000, 2),
            currency: None,
            approval_code: None,
            voucher_number: None,
            card_last4: None,
            transaction_type: None,
            customer_name: None,
            customer_email: None,
            metadata: None,
            line_items: None,
        };
        assert!(payload.is_approved());

        let declined = CallbackPayload {
            status: "declined".into(),
            ..payload
        };
        assert!(!declined.is_approved());
    }
}
