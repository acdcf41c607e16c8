use crate::{
    config::AppConfig,
    entities::{
        order::{self, Entity as Order, OrderStatus, PaymentStatus},
        order_item::{self, Entity as OrderItem},
        payment_transaction,
        product::{self, Entity as Product},
        product_variant::{self, Entity as ProductVariant},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        delivery::DeliveryService,
        fulfillment::FulfillmentService,
        gateway::{CallbackPayload, PaymentGateway, SessionLineItem, SessionRequest},
        pricing::{price_cart, CartLine, PriceBreakdown},
        promotions::PromotionService,
    },
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set, SqlErr,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

pub const ORDER_NUMBER_PREFIX: &str = "RUG";
/// Unambiguous alphabet: no 0/O, 1/I/L ambiguity over the phone.
pub const ORDER_NUMBER_ALPHABET: &[u8] = b"23456789ABCDEFGHJKMNPQRSTUVWXYZ";
const ORDER_NUMBER_SUFFIX_LEN: usize = 6;
const ORDER_NUMBER_ATTEMPTS: usize = 5;

/// Random order number like `RUG7K2M4Q`. Not collision-free; the insert
/// retries on a uniqueness violation.
pub fn generate_order_number() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ORDER_NUMBER_SUFFIX_LEN)
        .map(|_| ORDER_NUMBER_ALPHABET[rng.gen_range(0..ORDER_NUMBER_ALPHABET.len())] as char)
        .collect();
    format!("{ORDER_NUMBER_PREFIX}{suffix}")
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItemRequest {
    pub variant_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, max = 120))]
    pub customer_name: String,
    #[validate(email)]
    pub customer_email: String,
    pub customer_phone: Option<String>,
    #[validate(length(min = 1, max = 500))]
    pub delivery_address: String,
    pub promo_code: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub items: Vec<OrderItemRequest>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CheckoutQuoteRequest {
    #[validate(length(min = 1, max = 500))]
    pub delivery_address: String,
    pub promo_code: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub items: Vec<OrderItemRequest>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutQuoteResponse {
    pub distance_km: f64,
    #[serde(flatten)]
    pub breakdown: PriceBreakdown,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct DemoPaymentRequest {
    /// Masked card digits shown on the synthetic receipt.
    pub card_last4: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderItemResponse {
    pub sku: String,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub status: String,
    pub payment_status: String,
    pub customer_name: String,
    pub customer_email: String,
    pub delivery_address: String,
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub discount_amount: Decimal,
    pub tax: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub promo_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItemResponse>,
    /// Hosted payment page to send the shopper to; absent once paid or
    /// when the order was created in demo mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
}

impl OrderResponse {
    fn from_parts(
        order: order::Model,
        items: Vec<order_item::Model>,
        payment_url: Option<String>,
    ) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number,
            status: order.status,
            payment_status: order.payment_status,
            customer_name: order.customer_name,
            customer_email: order.customer_email,
            delivery_address: order.delivery_address,
            subtotal: order.subtotal,
            shipping_cost: order.shipping_cost,
            discount_amount: order.discount_amount,
            tax: order.tax,
            total_amount: order.total_amount,
            currency: order.currency,
            promo_code: order.promo_code,
            created_at: order.created_at,
            items: items
                .into_iter()
                .map(|i| OrderItemResponse {
                    sku: i.sku,
                    name: i.name,
                    quantity: i.quantity,
                    unit_price: i.unit_price,
                    total_price: i.total_price,
                })
                .collect(),
            payment_url,
        }
    }
}

/// A cart line resolved against the catalog: current variant price and
/// the product name snapshotted onto the order.
struct ResolvedLine {
    variant: product_variant::Model,
    product_name: String,
    quantity: i32,
}

impl ResolvedLine {
    fn cart_line(&self) -> CartLine {
        CartLine {
            unit_price: self.variant.price,
            quantity: self.quantity,
        }
    }
}

/// The state-machine core: creates pending orders, opens gateway
/// sessions, and reconciles payment outcomes exactly once.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    promotions: PromotionService,
    delivery: DeliveryService,
    gateway: Option<Arc<dyn PaymentGateway>>,
    fulfillment: FulfillmentService,
    events: EventSender,
    currency: String,
    tax_rate: Decimal,
    public_base_url: String,
    pending_order_ttl: Duration,
    demo_enabled: bool,
}

impl OrderService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        promotions: PromotionService,
        delivery: DeliveryService,
        gateway: Option<Arc<dyn PaymentGateway>>,
        fulfillment: FulfillmentService,
        events: EventSender,
        config: &AppConfig,
    ) -> Self {
        // Any live gateway secret disables the demo path, even when the
        // rest of the gateway configuration is incomplete.
        let demo_enabled = gateway.is_none() && config.gateway.webhook_secret.is_none();
        Self {
            db,
            promotions,
            delivery,
            gateway,
            fulfillment,
            events,
            currency: config.currency.clone(),
            tax_rate: Decimal::from_f64(config.tax_rate).unwrap_or(Decimal::ZERO),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
            pending_order_ttl: Duration::hours(config.pending_order_ttl_hours),
            demo_enabled,
        }
    }

    /// Whether the synchronous demo completion path is available.
    pub fn demo_mode(&self) -> bool {
        self.demo_enabled
    }

    async fn resolve_cart(
        &self,
        items: &[OrderItemRequest],
    ) -> Result<Vec<ResolvedLine>, ServiceError> {
        if items.is_empty() {
            return Err(ServiceError::ValidationError(
                "order must contain at least one item".into(),
            ));
        }
        for item in items {
            if item.quantity <= 0 {
                return Err(ServiceError::ValidationError(
                    "item quantity must be positive".into(),
                ));
            }
        }

        let variant_ids: Vec<Uuid> = items.iter().map(|i| i.variant_id).collect();
        let variants: HashMap<Uuid, product_variant::Model> = ProductVariant::find()
            .filter(product_variant::Column::Id.is_in(variant_ids))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|v| (v.id, v))
            .collect();

        let product_ids: Vec<Uuid> = variants.values().map(|v| v.product_id).collect();
        let product_names: HashMap<Uuid, String> = Product::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|p| (p.id, p.name))
            .collect();

        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            let variant = variants.get(&item.variant_id).cloned().ok_or_else(|| {
                ServiceError::NotFound(format!("variant {} not found", item.variant_id))
            })?;
            if variant.stock_quantity < item.quantity {
                return Err(ServiceError::Conflict(format!(
                    "insufficient stock for {}",
                    variant.sku
                )));
            }
            let product_name = product_names
                .get(&variant.product_id)
                .cloned()
                .unwrap_or_else(|| variant.sku.clone());
            lines.push(ResolvedLine {
                variant,
                product_name,
                quantity: item.quantity,
            });
        }
        Ok(lines)
    }

    async fn price_resolved(
        &self,
        lines: &[ResolvedLine],
        promo_code: Option<&str>,
        delivery_address: &str,
    ) -> Result<(PriceBreakdown, f64, Option<String>), ServiceError> {
        let cart: Vec<CartLine> = lines.iter().map(ResolvedLine::cart_line).collect();
        let subtotal: Decimal = cart.iter().map(CartLine::line_total).sum();

        let promo = match promo_code.map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => Some(self.promotions.validate(code, subtotal).await?),
            None => None,
        };
        let discount = promo.as_ref().map(|p| p.discount_amount).unwrap_or_default();
        let applied_code = promo.map(|p| p.code);

        let quote = self.delivery.quote(delivery_address).await?;
        let breakdown = price_cart(&cart, discount, quote.price, self.tax_rate);
        Ok((breakdown, quote.distance_km, applied_code))
    }

    /// Prices a prospective cart without creating anything.
    #[instrument(skip(self, request))]
    pub async fn quote_checkout(
        &self,
        request: &CheckoutQuoteRequest,
    ) -> Result<CheckoutQuoteResponse, ServiceError> {
        request.validate()?;
        let lines = self.resolve_cart(&request.items).await?;
        let (breakdown, distance_km, _) = self
            .price_resolved(
                &lines,
                request.promo_code.as_deref(),
                &request.delivery_address,
            )
            .await?;
        Ok(CheckoutQuoteResponse {
            distance_km,
            breakdown,
        })
    }

    /// Creates a pending order with snapshotted line items and, when the
    /// live gateway is configured, a hosted checkout session.
    #[instrument(skip(self, request), fields(customer = %request.customer_email))]
    pub async fn create_order(
        &self,
        request: &CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request.validate()?;
        let lines = self.resolve_cart(&request.items).await?;
        let (breakdown, _, applied_code) = self
            .price_resolved(
                &lines,
                request.promo_code.as_deref(),
                &request.delivery_address,
            )
            .await?;

        let order = self
            .insert_order_with_unique_number(request, &breakdown, applied_code)
            .await?;

        let items = self.insert_line_items(&order, &lines).await;

        info!(
            order_number = %order.order_number,
            total = %order.total_amount,
            "Order created"
        );
        if let Err(e) = self.events.send(Event::OrderCreated(order.id)).await {
            warn!(error = %e, "Failed to emit order created event");
        }

        let (order, payment_url) = match &self.gateway {
            Some(gateway) => {
                let session = self.open_session(gateway.as_ref(), &order, &items).await?;
                (session.0, Some(session.1))
            }
            None => {
                debug!("No live gateway configured; order awaits demo completion");
                (order, None)
            }
        };

        Ok(OrderResponse::from_parts(order, items, payment_url))
    }

    async fn insert_order_with_unique_number(
        &self,
        request: &CreateOrderRequest,
        breakdown: &PriceBreakdown,
        applied_code: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        for attempt in 0..ORDER_NUMBER_ATTEMPTS {
            let model = order::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_number: Set(generate_order_number()),
                status: Set(OrderStatus::Pending.to_string()),
                payment_status: Set(PaymentStatus::Pending.to_string()),
                customer_email: Set(request.customer_email.trim().to_lowercase()),
                customer_name: Set(request.customer_name.trim().to_string()),
                customer_phone: Set(request.customer_phone.clone()),
                delivery_address: Set(request.delivery_address.trim().to_string()),
                subtotal: Set(breakdown.subtotal),
                shipping_cost: Set(breakdown.delivery_cost),
                discount_amount: Set(breakdown.discount_amount),
                tax: Set(breakdown.tax),
                total_amount: Set(breakdown.total),
                currency: Set(self.currency.clone()),
                promo_code: Set(applied_code.clone()),
                gateway_session_id: Set(None),
                created_at: Set(Utc::now()),
                updated_at: Set(None),
            };

            match model.insert(&*self.db).await {
                Ok(order) => return Ok(order),
                Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                    debug!(attempt, "Order number collision; regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ServiceError::InternalError(
            "could not allocate a unique order number".into(),
        ))
    }

    /// Inserts line items in one transaction. A failure here leaves the
    /// order standing and is logged as a data-integrity warning, never
    /// surfaced as an order-creation failure.
    async fn insert_line_items(
        &self,
        order: &order::Model,
        lines: &[ResolvedLine],
    ) -> Vec<order_item::Model> {
        let build = |line: &ResolvedLine| order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(line.variant.product_id),
            variant_id: Set(line.variant.id),
            sku: Set(line.variant.sku.clone()),
            name: Set(line.product_name.clone()),
            quantity: Set(line.quantity),
            unit_price: Set(line.variant.price),
            total_price: Set(line.cart_line().line_total()),
            created_at: Set(Utc::now()),
        };

        let result: Result<Vec<order_item::Model>, sea_orm::DbErr> = async {
            let txn = self.db.begin().await?;
            let mut inserted = Vec::with_capacity(lines.len());
            for line in lines {
                inserted.push(build(line).insert(&txn).await?);
            }
            txn.commit().await?;
            Ok(inserted)
        }
        .await;

        match result {
            Ok(items) => items,
            Err(e) => {
                error!(
                    order_number = %order.order_number,
                    error = %e,
                    "Data integrity warning: order persisted without line items"
                );
                Vec::new()
            }
        }
    }

    /// Opens a hosted checkout session and stores its reference. On
    /// gateway failure the order stays pending and the error propagates
    /// as retryable.
    async fn open_session(
        &self,
        gateway: &dyn PaymentGateway,
        order: &order::Model,
        items: &[order_item::Model],
    ) -> Result<(order::Model, String), ServiceError> {
        let request = SessionRequest {
            order_id: order.id,
            order_number: order.order_number.clone(),
            amount: order.total_amount,
            currency: order.currency.clone(),
            charge: true,
            success_url: format!(
                "{}/checkout/complete?order={}",
                self.public_base_url, order.order_number
            ),
            failure_url: format!(
                "{}/checkout/failed?order={}",
                self.public_base_url, order.order_number
            ),
            callback_url: format!("{}/api/v1/payments/webhook", self.public_base_url),
            customer_email: order.customer_email.clone(),
            customer_name: order.customer_name.clone(),
            line_items: items
                .iter()
                .map(|i| SessionLineItem {
                    name: i.name.clone(),
                    quantity: i.quantity,
                    unit_price: i.unit_price,
                })
                .collect(),
        };

        let session = gateway.create_session(&request).await?;

        let mut active: order::ActiveModel = order.clone().into();
        active.gateway_session_id = Set(Some(session.session_id.clone()));
        active.updated_at = Set(Some(Utc::now()));
        let order = active.update(&*self.db).await?;

        if let Err(e) = self
            .events
            .send(Event::PaymentSessionCreated {
                order_id: order.id,
                session_id: session.session_id.clone(),
            })
            .await
        {
            warn!(error = %e, "Failed to emit session created event");
        }

        Ok((order, session.checkout_url))
    }

    pub async fn get_order(&self, id: Uuid) -> Result<OrderResponse, ServiceError> {
        let order = Order::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {id} not found")))?;
        self.with_items(order).await
    }

    pub async fn get_order_by_number(&self, number: &str) -> Result<OrderResponse, ServiceError> {
        let normalized = number.trim().to_uppercase();
        let order = Order::find()
            .filter(order::Column::OrderNumber.eq(normalized.clone()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {normalized} not found")))?;
        self.with_items(order).await
    }

    async fn with_items(&self, order: order::Model) -> Result<OrderResponse, ServiceError> {
        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(&*self.db)
            .await?;
        Ok(OrderResponse::from_parts(order, items, None))
    }

    /// Re-requests a hosted checkout session for an existing pending
    /// order after a gateway failure. Safe to call repeatedly; the
    /// order is never duplicated.
    #[instrument(skip(self))]
    pub async fn request_payment_session(
        &self,
        order_id: Uuid,
    ) -> Result<OrderResponse, ServiceError> {
        let gateway = self.gateway.as_ref().ok_or_else(|| {
            ServiceError::InvalidOperation("no live payment gateway is configured".into())
        })?;

        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id} not found")))?;

        if !matches!(order.status(), Some(OrderStatus::Pending))
            || !matches!(order.payment_status(), Some(PaymentStatus::Pending))
        {
            return Err(ServiceError::Conflict(
                "order is not awaiting payment".into(),
            ));
        }

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(&*self.db)
            .await?;

        let (order, payment_url) = self.open_session(gateway.as_ref(), &order, &items).await?;
        Ok(OrderResponse::from_parts(order, items, Some(payment_url)))
    }

    /// Synchronous completion path for installations without a live
    /// gateway. Refused outright when gateway credentials are present.
    ///
    /// The audit record is appended before the paid transition: if that
    /// write fails the order is still `(pending, pending)` and the call
    /// can simply be retried.
    #[instrument(skip(self, request))]
    pub async fn complete_demo_payment(
        &self,
        order_id: Uuid,
        request: &DemoPaymentRequest,
    ) -> Result<OrderResponse, ServiceError> {
        if !self.demo_enabled {
            return Err(ServiceError::Forbidden(
                "demo payment is unavailable while a live gateway is configured".into(),
            ));
        }

        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id} not found")))?;

        if !matches!(order.status(), Some(OrderStatus::Pending))
            || !matches!(order.payment_status(), Some(PaymentStatus::Pending))
        {
            return Err(ServiceError::Conflict(
                "order is not awaiting payment".into(),
            ));
        }

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(&*self.db)
            .await?;

        let approval_code = format!("DEMO-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let payload = CallbackPayload {
            session_id: format!("demo-{}", order.id.simple()),
            transaction_id: format!("demo-{}", Uuid::new_v4().simple()),
            status: "approved".into(),
            amount: order.total_amount,
            currency: Some(order.currency.clone()),
            approval_code: Some(approval_code),
            voucher_number: None,
            card_last4: request.card_last4.clone(),
            transaction_type: Some("demo".into()),
            customer_name: Some(order.customer_name.clone()),
            customer_email: Some(order.customer_email.clone()),
            metadata: None,
            line_items: Some(
                serde_json::to_value(&items)
                    .map_err(|e| ServiceError::SerializationError(e.to_string()))?,
            ),
        };
        let raw = serde_json::to_vec(&payload)
            .map_err(|e| ServiceError::SerializationError(e.to_string()))?;
        self.record_transaction(&payload, &raw).await?;

        if !try_mark_paid(&self.db, order.id).await? {
            return Err(ServiceError::Conflict(
                "order is not awaiting payment".into(),
            ));
        }

        // Past the transition nothing may abort before dispatch, so the
        // settled model is assembled locally instead of refetched.
        let order = order::Model {
            status: OrderStatus::Processing.to_string(),
            payment_status: PaymentStatus::Paid.to_string(),
            updated_at: Some(Utc::now()),
            ..order
        };

        self.fulfillment.dispatch_paid_order(&order).await;
        info!(order_number = %order.order_number, "Demo payment completed");

        Ok(OrderResponse::from_parts(order, items, None))
    }

    /// Reconciles an authenticated gateway callback. The caller has
    /// already verified the signature over the raw bytes; nothing here
    /// runs for unauthenticated traffic.
    ///
    /// Appends the audit record unconditionally, then applies the
    /// single-writer transition. A duplicate delivery finds the
    /// conditional update matching zero rows and becomes a no-op.
    #[instrument(skip(self, payload, raw_body), fields(session_id = %payload.session_id, status = %payload.status))]
    pub async fn reconcile_callback(
        &self,
        payload: &CallbackPayload,
        raw_body: &[u8],
    ) -> Result<(), ServiceError> {
        self.record_transaction(payload, raw_body).await?;

        let order = Order::find()
            .filter(order::Column::GatewaySessionId.eq(payload.session_id.clone()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                warn!("Callback references an unknown payment session");
                ServiceError::NotFound("unknown payment session".into())
            })?;

        if !payload.is_approved() {
            let res = Order::update_many()
                .col_expr(
                    order::Column::PaymentStatus,
                    Expr::value(PaymentStatus::Failed.to_string()),
                )
                .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
                .filter(order::Column::Id.eq(order.id))
                .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending.to_string()))
                .exec(&*self.db)
                .await?;
            if res.rows_affected > 0 {
                info!(order_number = %order.order_number, "Payment failed at the gateway");
                let _ = self.events.send(Event::PaymentFailed(order.id)).await;
            }
            return Ok(());
        }

        if payload.amount != order.total_amount {
            // Authenticated, so the gateway is authoritative on outcome;
            // the discrepancy is flagged for manual reconciliation.
            warn!(
                order_number = %order.order_number,
                expected = %order.total_amount,
                reported = %payload.amount,
                "Callback amount differs from persisted order total"
            );
        }

        if !try_mark_paid(&self.db, order.id).await? {
            debug!(
                order_number = %order.order_number,
                "Duplicate or late callback; order already settled"
            );
            return Ok(());
        }

        // Winner of the transition; nothing may abort before dispatch,
        // so the settled model is assembled locally instead of refetched.
        let order = order::Model {
            status: OrderStatus::Processing.to_string(),
            payment_status: PaymentStatus::Paid.to_string(),
            updated_at: Some(Utc::now()),
            ..order
        };

        info!(order_number = %order.order_number, "Payment captured");
        self.fulfillment.dispatch_paid_order(&order).await;
        Ok(())
    }

    async fn record_transaction(
        &self,
        payload: &CallbackPayload,
        raw_body: &[u8],
    ) -> Result<(), ServiceError> {
        payment_transaction::ActiveModel {
            id: Set(Uuid::new_v4()),
            transaction_id: Set(payload.transaction_id.clone()),
            session_id: Set(payload.session_id.clone()),
            status: Set(payload.status.clone()),
            amount: Set(payload.amount),
            currency: Set(payload
                .currency
                .clone()
                .unwrap_or_else(|| self.currency.clone())),
            customer_name: Set(payload.customer_name.clone()),
            customer_email: Set(payload.customer_email.clone()),
            transaction_type: Set(payload.transaction_type.clone()),
            approval_code: Set(payload.approval_code.clone()),
            voucher_number: Set(payload.voucher_number.clone()),
            card_last4: Set(payload.card_last4.clone()),
            metadata: Set(payload.metadata.as_ref().map(|m| m.to_string())),
            line_items: Set(payload.line_items.as_ref().map(|v| v.to_string())),
            raw_payload: Set(String::from_utf8_lossy(raw_body).into_owned()),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?;
        Ok(())
    }

    /// Marks orders stuck in `(pending, pending)` past the TTL as
    /// expired. Returns how many were swept.
    #[instrument(skip(self))]
    pub async fn expire_stale_pending(&self) -> Result<u64, ServiceError> {
        let cutoff = Utc::now() - self.pending_order_ttl;

        let stale: Vec<Uuid> = Order::find()
            .filter(order::Column::Status.eq(OrderStatus::Pending.to_string()))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending.to_string()))
            .filter(order::Column::CreatedAt.lt(cutoff))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|o| o.id)
            .collect();

        if stale.is_empty() {
            return Ok(0);
        }

        let res = Order::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Expired.to_string()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(order::Column::Id.is_in(stale.clone()))
            .filter(order::Column::Status.eq(OrderStatus::Pending.to_string()))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending.to_string()))
            .exec(&*self.db)
            .await?;

        if res.rows_affected > 0 {
            info!(count = res.rows_affected, "Expired stale pending orders");
            for id in stale {
                let _ = self.events.send(Event::OrderExpired(id)).await;
            }
        }
        Ok(res.rows_affected)
    }
}

/// Single-writer transition `(pending, pending)` to `(processing, paid)`.
/// Returns whether this caller won the transition; losers must not run
/// fulfillment side effects.
pub async fn try_mark_paid(
    db: &DatabaseConnection,
    order_id: Uuid,
) -> Result<bool, ServiceError> {
    let res = Order::update_many()
        .col_expr(
            order::Column::Status,
            Expr::value(OrderStatus::Processing.to_string()),
        )
        .col_expr(
            order::Column::PaymentStatus,
            Expr::value(PaymentStatus::Paid.to_string()),
        )
        .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
        .filter(order::Column::Id.eq(order_id))
        .filter(order::Column::Status.eq(OrderStatus::Pending.to_string()))
        .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending.to_string()))
        .exec(db)
        .await?;
    Ok(res.rows_affected > 0)
}
