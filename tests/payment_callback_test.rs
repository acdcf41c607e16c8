mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use common::{harness, seed_variant, test_config, FakeGateway, TestHarness};
use kilim_api::{
    app_router,
    entities::{
        order::Entity as Order, payment_transaction::Entity as PaymentTransaction,
        product_variant::Entity as ProductVariant,
    },
    services::gateway::{sign_payload, CallbackPayload, CALLER_HEADER, SIGNATURE_HEADER},
    services::orders::{CreateOrderRequest, OrderItemRequest},
    AppState,
};
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "wh_test_secret";
const CALLER: &str = "hosted-checkout";
const SESSION: &str = "cs_test_1";

/// Harness with a live fake gateway and webhook credentials configured.
async fn webhook_harness() -> (TestHarness, Router, Uuid) {
    let mut config = test_config();
    config.gateway.base_url = Some("https://gateway.example".into());
    config.gateway.api_key = Some("sk_test".into());
    config.gateway.webhook_secret = Some(SECRET.into());
    config.gateway.expected_caller = CALLER.into();

    let h = harness(Some(FakeGateway::ok(SESSION)), 25.0, config).await;

    let (_, variant_id) = seed_variant(&h.db, "KLM-001", dec!(250), 10).await;
    let created = h
        .orders
        .create_order(&CreateOrderRequest {
            customer_name: "Ayse Demir".into(),
            customer_email: "ayse@example.com".into(),
            customer_phone: None,
            delivery_address: "21 Harbor St".into(),
            promo_code: None,
            items: vec![OrderItemRequest {
                variant_id,
                quantity: 3,
            }],
        })
        .await
        .unwrap();

    let app = app_router(AppState {
        db: h.db.clone(),
        config: h.config.clone(),
        orders: h.orders.clone(),
        delivery: h.delivery.clone(),
    });
    (h, app, created.id)
}

fn callback_body(status: &str, amount: &str) -> Vec<u8> {
    format!(
        r#"{{"session_id":"{SESSION}","transaction_id":"tx_001","status":"{status}","amount":"{amount}","currency":"USD","approval_code":"AP123","card_last4":"4242"}}"#
    )
    .into_bytes()
}

async fn deliver(
    app: &Router,
    body: Vec<u8>,
    signature: Option<String>,
    caller: Option<&str>,
) -> StatusCode {
    let mut request = Request::builder()
        .method("POST")
        .uri("/api/v1/payments/webhook")
        .header("content-type", "application/json");
    if let Some(sig) = signature {
        request = request.header(SIGNATURE_HEADER, sig);
    }
    if let Some(caller) = caller {
        request = request.header(CALLER_HEADER, caller);
    }

    let response = app
        .clone()
        .oneshot(request.body(Body::from(body)).unwrap())
        .await
        .unwrap();
    response.status()
}

#[tokio::test]
async fn authenticated_approved_callback_settles_the_order() {
    let (h, app, order_id) = webhook_harness().await;
    let body = callback_body("approved", "800");
    let sig = sign_payload(SECRET, &body);

    let status = deliver(&app, body, Some(sig), Some(CALLER)).await;
    assert_eq!(status, StatusCode::OK);

    let order = Order::find_by_id(order_id)
        .one(&*h.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, "processing");
    assert_eq!(order.payment_status, "paid");

    let variants = ProductVariant::find().all(&*h.db).await.unwrap();
    assert_eq!(variants[0].stock_quantity, 7);

    let transactions = PaymentTransaction::find().all(&*h.db).await.unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].transaction_id, "tx_001");
    assert_eq!(h.sent_emails.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn duplicate_callback_is_a_no_op_for_state_and_side_effects() {
    let (h, app, _) = webhook_harness().await;
    let body = callback_body("approved", "800");
    let sig = sign_payload(SECRET, &body);

    let first = deliver(&app, body.clone(), Some(sig.clone()), Some(CALLER)).await;
    let second = deliver(&app, body, Some(sig), Some(CALLER)).await;
    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::OK);

    // One decrement (10 - 3), one pair of emails; two audit rows.
    let variants = ProductVariant::find().all(&*h.db).await.unwrap();
    assert_eq!(variants[0].stock_quantity, 7);
    assert_eq!(h.sent_emails.lock().unwrap().len(), 2);
    assert_eq!(
        PaymentTransaction::find().all(&*h.db).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn racing_duplicate_callbacks_settle_exactly_once() {
    let (h, _app, order_id) = webhook_harness().await;
    let body = callback_body("approved", "800");
    let payload: CallbackPayload = serde_json::from_slice(&body).unwrap();

    // Two in-flight deliveries interleave across await points; only one
    // may win the conditional transition and run fulfillment.
    let (first, second) = tokio::join!(
        h.orders.reconcile_callback(&payload, &body),
        h.orders.reconcile_callback(&payload, &body),
    );
    first.unwrap();
    second.unwrap();

    let order = Order::find_by_id(order_id)
        .one(&*h.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, "processing");
    assert_eq!(order.payment_status, "paid");

    let variants = ProductVariant::find().all(&*h.db).await.unwrap();
    assert_eq!(variants[0].stock_quantity, 7);
    assert_eq!(h.sent_emails.lock().unwrap().len(), 2);
    // Both deliveries still land in the audit trail.
    assert_eq!(
        PaymentTransaction::find().all(&*h.db).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn failure_callback_marks_payment_failed_without_fulfillment() {
    let (h, app, order_id) = webhook_harness().await;
    let body = callback_body("declined", "800");
    let sig = sign_payload(SECRET, &body);

    let status = deliver(&app, body, Some(sig), Some(CALLER)).await;
    assert_eq!(status, StatusCode::OK);

    let order = Order::find_by_id(order_id)
        .one(&*h.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, "pending");
    assert_eq!(order.payment_status, "failed");

    let variants = ProductVariant::find().all(&*h.db).await.unwrap();
    assert_eq!(variants[0].stock_quantity, 10);
    assert!(h.sent_emails.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unauthenticated_callbacks_never_mutate_anything() {
    let (h, app, order_id) = webhook_harness().await;
    let body = callback_body("approved", "800");
    let good_sig = sign_payload(SECRET, &body);

    // Wrong signature, missing signature, wrong caller, missing caller,
    // and a re-serialized body under a signature for different bytes.
    let respaced: Vec<u8> = String::from_utf8(body.clone())
        .unwrap()
        .replace(':', ": ")
        .into_bytes();
    let cases = [
        (body.clone(), Some("deadbeef".to_string()), Some(CALLER)),
        (body.clone(), None, Some(CALLER)),
        (body.clone(), Some(good_sig.clone()), Some("someone-else")),
        (body.clone(), Some(good_sig.clone()), None),
        (respaced, Some(good_sig), Some(CALLER)),
    ];

    for (payload, sig, caller) in cases {
        let status = deliver(&app, payload, sig, caller).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let order = Order::find_by_id(order_id)
        .one(&*h.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.payment_status, "pending");
    assert!(PaymentTransaction::find().all(&*h.db).await.unwrap().is_empty());
    let variants = ProductVariant::find().all(&*h.db).await.unwrap();
    assert_eq!(variants[0].stock_quantity, 10);
    assert!(h.sent_emails.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_session_is_recorded_and_reported() {
    let (h, app, _) = webhook_harness().await;
    let body = br#"{"session_id":"cs_unknown","transaction_id":"tx_9","status":"approved","amount":"10"}"#.to_vec();
    let sig = sign_payload(SECRET, &body);

    let status = deliver(&app, body, Some(sig), Some(CALLER)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // The audit trail still captures the stray notification.
    let transactions = PaymentTransaction::find().all(&*h.db).await.unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].session_id, "cs_unknown");
}

#[tokio::test]
async fn malformed_json_with_a_valid_signature_is_a_bad_request() {
    let (_h, app, _) = webhook_harness().await;
    let body = b"not json at all".to_vec();
    let sig = sign_payload(SECRET, &body);

    let status = deliver(&app, body, Some(sig), Some(CALLER)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
