use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;
use validator::Validate;

/// Fulfillment-facing order status. `Expired` is terminal for orders
/// abandoned at the gateway page.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Expired,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Human-readable order number (RUG prefix + 6 unambiguous characters).
    #[sea_orm(unique)]
    #[validate(length(min = 9, max = 9))]
    pub order_number: String,

    pub status: String,
    pub payment_status: String,

    #[validate(email)]
    pub customer_email: String,
    pub customer_name: String,
    pub customer_phone: Option<String>,

    /// Destination the delivery tier was quoted against.
    pub delivery_address: String,

    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub discount_amount: Decimal,
    /// VAT extracted from the gross total; informational, never re-added.
    pub tax: Decimal,
    /// Persisted gross total; never recomputed downstream.
    pub total_amount: Decimal,
    pub currency: String,

    pub promo_code: Option<String>,

    /// Opaque hosted-checkout session reference from the gateway.
    pub gateway_session_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn status(&self) -> Option<OrderStatus> {
        self.status.parse().ok()
    }

    pub fn payment_status(&self) -> Option<PaymentStatus> {
        self.payment_status.parse().ok()
    }
}
