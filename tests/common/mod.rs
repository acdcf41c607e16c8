#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use chrono::Utc;
use kilim_api::{
    config::{AppConfig, EmailConfig, GatewayConfig, RoutingConfig},
    entities::{product, product_variant, promo_code},
    errors::ServiceError,
    events::EventSender,
    migrator::Migrator,
    services::{
        delivery::{DeliveryService, StaticRoutingClient},
        emails::{EmailMessage, EmailSender, EmailService},
        fulfillment::FulfillmentService,
        gateway::{CheckoutSession, PaymentGateway, SessionRequest},
        orders::OrderService,
        promotions::PromotionService,
    },
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
use sea_orm_migration::MigratorTrait;
use tokio::sync::mpsc;
use uuid::Uuid;

pub async fn setup_db() -> DatabaseConnection {
    let mut opts = ConnectOptions::new("sqlite::memory:".to_string());
    opts.max_connections(1).sqlx_logging(false);
    let db = Database::connect(opts).await.expect("connect sqlite");
    Migrator::up(&db, None).await.expect("run migrations");
    db
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".into(),
        host: "127.0.0.1".into(),
        port: 0,
        environment: "test".into(),
        log_level: "debug".into(),
        log_json: false,
        auto_migrate: true,
        public_base_url: "http://localhost:8080".into(),
        currency: "USD".into(),
        tax_rate: 0.20,
        pending_order_ttl_hours: 48,
        db_max_connections: 1,
        db_min_connections: 1,
        db_connect_timeout_secs: 5,
        db_acquire_timeout_secs: 5,
        gateway: GatewayConfig::default(),
        routing: RoutingConfig::default(),
        email: EmailConfig::default(),
    }
}

/// Email sender that records every message for later assertions.
#[derive(Clone, Default)]
pub struct RecordingEmailSender {
    pub sent: Arc<Mutex<Vec<EmailMessage>>>,
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), ServiceError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// In-process gateway double that hands out a fixed session. The
/// failure switch can be flipped mid-test to model an outage clearing.
pub struct FakeGateway {
    pub session_id: String,
    fail: AtomicBool,
}

impl FakeGateway {
    pub fn ok(session_id: &str) -> Arc<Self> {
        Arc::new(Self {
            session_id: session_id.into(),
            fail: AtomicBool::new(false),
        })
    }

    pub fn failing(session_id: &str) -> Arc<Self> {
        Arc::new(Self {
            session_id: session_id.into(),
            fail: AtomicBool::new(true),
        })
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_session(
        &self,
        _request: &SessionRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError("gateway down".into()));
        }
        Ok(CheckoutSession {
            session_id: self.session_id.clone(),
            checkout_url: format!("https://pay.example/{}", self.session_id),
        })
    }
}

pub struct TestHarness {
    pub db: Arc<DatabaseConnection>,
    pub orders: OrderService,
    pub delivery: DeliveryService,
    pub config: Arc<AppConfig>,
    pub sent_emails: Arc<Mutex<Vec<EmailMessage>>>,
}

/// Builds the service graph against an in-memory database with a fixed
/// routing distance and a recording email sender.
pub async fn harness(
    gateway: Option<Arc<dyn PaymentGateway>>,
    distance_km: f64,
    config: AppConfig,
) -> TestHarness {
    let db = Arc::new(setup_db().await);
    let config = Arc::new(config);

    let (tx, mut rx) = mpsc::channel(64);
    // Drain events so senders never observe a closed channel.
    tokio::spawn(async move { while rx.recv().await.is_some() {} });
    let events = EventSender::new(tx);

    let recorder = RecordingEmailSender::default();
    let sent_emails = recorder.sent.clone();
    let emails = EmailService::new(
        Arc::new(recorder),
        "orders@shop.example".into(),
        "staff@shop.example".into(),
    );

    let delivery = DeliveryService::new(
        Arc::new(StaticRoutingClient { distance_km }),
        "origin".into(),
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

    TestHarness {
        db,
        orders,
        delivery,
        config,
        sent_emails,
    }
}

/// Seeds one product with one variant; returns `(product_id, variant_id)`.
pub async fn seed_variant(
    db: &DatabaseConnection,
    sku: &str,
    price: Decimal,
    stock: i32,
) -> (Uuid, Uuid) {
    let product_id = Uuid::new_v4();
    product::ActiveModel {
        id: Set(product_id),
        name: Set(format!("Rug {sku}")),
        stock_quantity: Set(stock),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    }
    .insert(db)
    .await
    .expect("insert product");

    let variant_id = Uuid::new_v4();
    product_variant::ActiveModel {
        id: Set(variant_id),
        product_id: Set(product_id),
        sku: Set(sku.to_string()),
        size_label: Set(Some("170x240".into())),
        price: Set(price),
        stock_quantity: Set(stock),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    }
    .insert(db)
    .await
    .expect("insert variant");

    (product_id, variant_id)
}

pub async fn seed_percentage_promo(
    db: &DatabaseConnection,
    code: &str,
    percent: Decimal,
    max_uses: Option<i32>,
) -> Uuid {
    let id = Uuid::new_v4();
    promo_code::ActiveModel {
        id: Set(id),
        code: Set(code.to_uppercase()),
        discount_type: Set(promo_code::DiscountType::Percentage),
        discount_value: Set(percent),
        min_purchase_amount: Set(Decimal::ZERO),
        max_uses: Set(max_uses),
        current_uses: Set(0),
        per_customer_limit: Set(None),
        is_active: Set(true),
        expires_at: Set(None),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    }
    .insert(db)
    .await
    .expect("insert promo code");
    id
}
