use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Append-only audit record for each inbound gateway notification.
/// Never updated or deleted; decoupled from the order's own state.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Transaction identifier as reported by the gateway.
    pub transaction_id: String,
    /// Hosted-checkout session the transaction belongs to.
    pub session_id: String,
    pub status: String,
    pub amount: Decimal,
    pub currency: String,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub transaction_type: Option<String>,
    pub approval_code: Option<String>,
    pub voucher_number: Option<String>,
    pub card_last4: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub metadata: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub line_items: Option<String>,
    /// Full callback payload exactly as received on the wire.
    #[sea_orm(column_type = "Text")]
    pub raw_payload: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
