use crate::{
    entities::{
        order, order_item,
        order_item::Entity as OrderItem,
        product::{self, Entity as Product},
        product_variant::{self, Entity as ProductVariant},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{emails::EmailService, promotions::PromotionService},
};
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Runs the side effects of a successful payment: stock decrements,
/// promo redemption accounting, confirmation mail and pipeline events.
///
/// Each effect is independent. A failure is logged and the remaining
/// effects still run; the paid order itself is never rolled back here.
#[derive(Clone)]
pub struct FulfillmentService {
    db: Arc<DatabaseConnection>,
    promotions: PromotionService,
    emails: EmailService,
    events: EventSender,
}

impl FulfillmentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        promotions: PromotionService,
        emails: EmailService,
        events: EventSender,
    ) -> Self {
        Self {
            db,
            promotions,
            emails,
            events,
        }
    }

    #[instrument(skip(self, order), fields(order_number = %order.order_number))]
    pub async fn dispatch_paid_order(&self, order: &order::Model) {
        match self.adjust_inventory(order.id).await {
            Ok(()) => {}
            Err(e) => error!(error = %e, "Inventory adjustment failed for paid order"),
        }

        if let Some(code) = &order.promo_code {
            match self.promotions.redeem(code).await {
                Ok(true) => {
                    let _ = self
                        .events
                        .send(Event::PromoCodeRedeemed {
                            code: code.clone(),
                            order_id: order.id,
                        })
                        .await;
                }
                Ok(false) => {
                    // Validated at checkout but the cap filled in between;
                    // the order stands, only the counter is off.
                    warn!(code, "Promo redemption not counted at payment time");
                }
                Err(e) => error!(code, error = %e, "Promo redemption accounting failed"),
            }
        }

        self.emails.send_order_confirmation(order).await;

        if let Err(e) = self.events.send(Event::PaymentCaptured(order.id)).await {
            warn!(error = %e, "Failed to emit payment captured event");
        }

        info!("Fulfillment side effects dispatched");
    }

    /// Decrements variant and product stock for each line of the order.
    async fn adjust_inventory(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;

        for item in items {
            decrement_variant_stock(&self.db, item.variant_id, item.quantity).await?;
            decrement_product_stock(&self.db, item.product_id, item.quantity).await?;

            let _ = self
                .events
                .send(Event::InventoryAdjusted {
                    variant_id: item.variant_id,
                    quantity: item.quantity,
                })
                .await;
        }
        Ok(())
    }
}

/// Atomically decrements a variant's stock, clamping at zero.
///
/// Two conditional updates instead of one DB-specific `GREATEST`: the
/// first subtracts when there is headroom, the second floors the count
/// when there is not. Each statement is a single atomic write.
pub async fn decrement_variant_stock(
    db: &DatabaseConnection,
    variant_id: Uuid,
    quantity: i32,
) -> Result<(), ServiceError> {
    if quantity <= 0 {
        return Ok(());
    }

    let res = ProductVariant::update_many()
        .col_expr(
            product_variant::Column::StockQuantity,
            Expr::col(product_variant::Column::StockQuantity).sub(quantity),
        )
        .col_expr(
            product_variant::Column::UpdatedAt,
            Expr::value(Some(Utc::now())),
        )
        .filter(product_variant::Column::Id.eq(variant_id))
        .filter(product_variant::Column::StockQuantity.gte(quantity))
        .exec(db)
        .await?;

    if res.rows_affected == 0 {
        let clamped = ProductVariant::update_many()
            .col_expr(product_variant::Column::StockQuantity, Expr::value(0))
            .col_expr(
                product_variant::Column::UpdatedAt,
                Expr::value(Some(Utc::now())),
            )
            .filter(product_variant::Column::Id.eq(variant_id))
            .filter(product_variant::Column::StockQuantity.lt(quantity))
            .exec(db)
            .await?;
        if clamped.rows_affected > 0 {
            warn!(%variant_id, quantity, "Oversold variant; stock floored at zero");
        }
    }
    Ok(())
}

/// Same clamped decrement against the product's aggregate stock.
pub async fn decrement_product_stock(
    db: &DatabaseConnection,
    product_id: Uuid,
    quantity: i32,
) -> Result<(), ServiceError> {
    if quantity <= 0 {
        return Ok(());
    }

    let res = Product::update_many()
        .col_expr(
            product::Column::StockQuantity,
            Expr::col(product::Column::StockQuantity).sub(quantity),
        )
        .col_expr(product::Column::UpdatedAt, Expr::value(Some(Utc::now())))
        .filter(product::Column::Id.eq(product_id))
        .filter(product::Column::StockQuantity.gte(quantity))
        .exec(db)
        .await?;

    if res.rows_affected == 0 {
        Product::update_many()
            .col_expr(product::Column::StockQuantity, Expr::value(0))
            .col_expr(product::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::StockQuantity.lt(quantity))
            .exec(db)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrator::Migrator;
    use sea_orm::{ActiveModelTrait, ConnectOptions, Database, Set};
    use sea_orm_migration::MigratorTrait;

    async fn test_db() -> DatabaseConnection {
        let mut opts = ConnectOptions::new("sqlite::memory:".to_string());
        opts.max_connections(1).sqlx_logging(false);
        let db = Database::connect(opts).await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        db
    }

    async fn seed_variant(db: &DatabaseConnection, stock: i32) -> (Uuid, Uuid) {
        let product_id = Uuid::new_v4();
        product::ActiveModel {
            id: Set(product_id),
            name: Set("Anatolian Kilim".into()),
            stock_quantity: Set(stock),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(db)
        .await
        .unwrap();

        let variant_id = Uuid::new_v4();
        product_variant::ActiveModel {
            id: Set(variant_id),
            product_id: Set(product_id),
            sku: Set("KLM-001-M".into()),
            size_label: Set(Some("170x240".into())),
            price: Set(rust_decimal_macros::dec!(250)),
            stock_quantity: Set(stock),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(db)
        .await
        .unwrap();

        (product_id, variant_id)
    }

    #[tokio::test]
    async fn decrement_subtracts_when_stock_suffices() {
        let db = test_db().await;
        let (_, variant_id) = seed_variant(&db, 5).await;

        decrement_variant_stock(&db, variant_id, 3).await.unwrap();

        let v = ProductVariant::find_by_id(variant_id)
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(v.stock_quantity, 2);
    }

    #[tokio::test]
    async fn decrement_floors_at_zero_when_oversold() {
        let db = test_db().await;
        let (product_id, variant_id) = seed_variant(&db, 2).await;

        decrement_variant_stock(&db, variant_id, 7).await.unwrap();
        decrement_product_stock(&db, product_id, 7).await.unwrap();

        let v = ProductVariant::find_by_id(variant_id)
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(v.stock_quantity, 0);

        let p = Product::find_by_id(product_id)
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(p.stock_quantity, 0);
    }

    #[tokio::test]
    async fn zero_and_negative_quantities_are_ignored() {
        let db = test_db().await;
        let (_, variant_id) = seed_variant(&db, 4).await;

        decrement_variant_stock(&db, variant_id, 0).await.unwrap();
        decrement_variant_stock(&db, variant_id, -2).await.unwrap();

        let v = ProductVariant::find_by_id(variant_id)
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(v.stock_quantity, 4);
    }
}
