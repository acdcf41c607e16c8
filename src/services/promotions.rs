use crate::{
    entities::promo_code::{self, DiscountType, Entity as PromoCode, Model as PromoCodeModel},
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Why a promo code was refused. Checks run in this order and the first
/// failure wins.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PromoRejection {
    #[error("Promo code not found")]
    NotFound,
    #[error("Promo code is not active")]
    Inactive,
    #[error("Promo code has expired")]
    Expired,
    #[error("Promo code has reached its usage limit")]
    UsageExhausted,
    #[error("Order subtotal is below the {minimum} minimum for this code")]
    BelowMinimum { minimum: Decimal },
}

impl From<PromoRejection> for ServiceError {
    fn from(rejection: PromoRejection) -> Self {
        match rejection {
            PromoRejection::NotFound => ServiceError::NotFound(rejection.to_string()),
            _ => ServiceError::Conflict(rejection.to_string()),
        }
    }
}

/// A validated code and the discount it grants against a given subtotal.
#[derive(Debug, Clone)]
pub struct PromoQuote {
    pub code: String,
    pub discount_amount: Decimal,
}

/// Applies the eligibility rules to an already-loaded code. Pure; the
/// service wraps this with the case-insensitive lookup.
pub fn evaluate_code(
    promo: Option<&PromoCodeModel>,
    subtotal: Decimal,
    now: DateTime<Utc>,
) -> Result<PromoQuote, PromoRejection> {
    let promo = promo.ok_or(PromoRejection::NotFound)?;

    if !promo.is_active {
        return Err(PromoRejection::Inactive);
    }
    if let Some(expires_at) = promo.expires_at {
        if expires_at < now {
            return Err(PromoRejection::Expired);
        }
    }
    if let Some(max_uses) = promo.max_uses {
        if promo.current_uses >= max_uses {
            return Err(PromoRejection::UsageExhausted);
        }
    }
    if promo.min_purchase_amount > Decimal::ZERO && subtotal < promo.min_purchase_amount {
        return Err(PromoRejection::BelowMinimum {
            minimum: promo.min_purchase_amount,
        });
    }

    let discount = match promo.discount_type {
        DiscountType::Percentage => {
            (subtotal * promo.discount_value / Decimal::from(100)).round_dp(2)
        }
        DiscountType::FixedAmount => promo.discount_value,
    };

    // Discount can never push the subtotal negative.
    Ok(PromoQuote {
        code: promo.code.clone(),
        discount_amount: discount.min(subtotal),
    })
}

#[derive(Clone)]
pub struct PromotionService {
    db: Arc<DatabaseConnection>,
}

impl PromotionService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Looks up a code (case-insensitive; codes are stored upper-cased)
    /// and computes the discount it grants for the given subtotal.
    ///
    /// No redemption lock is taken here; usage accounting happens at
    /// order confirmation through [`redeem`](Self::redeem).
    #[instrument(skip(self))]
    pub async fn validate(
        &self,
        code: &str,
        subtotal: Decimal,
    ) -> Result<PromoQuote, PromoRejection> {
        let promo = PromoCode::find()
            .filter(promo_code::Column::Code.eq(code.trim().to_uppercase()))
            .one(&*self.db)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to look up promo code");
                PromoRejection::NotFound
            })?;

        evaluate_code(promo.as_ref(), subtotal, Utc::now())
    }

    /// Records one redemption: an atomic conditional increment that only
    /// succeeds while the usage cap has headroom. Returns whether the
    /// redemption was counted.
    #[instrument(skip(self))]
    pub async fn redeem(&self, code: &str) -> Result<bool, ServiceError> {
        let res = PromoCode::update_many()
            .col_expr(
                promo_code::Column::CurrentUses,
                Expr::col(promo_code::Column::CurrentUses).add(1),
            )
            .col_expr(
                promo_code::Column::UpdatedAt,
                Expr::value(Some(Utc::now())),
            )
            .filter(promo_code::Column::Code.eq(code.trim().to_uppercase()))
            .filter(
                Condition::any()
                    .add(promo_code::Column::MaxUses.is_null())
                    .add(
                        Expr::col(promo_code::Column::CurrentUses)
                            .lt(Expr::col(promo_code::Column::MaxUses)),
                    ),
            )
            .exec(&*self.db)
            .await?;

        if res.rows_affected == 0 {
            debug!(code, "Promo redemption not counted (unknown code or cap reached)");
        }
        Ok(res.rows_affected > 0)
    }
}
