use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One cart position: a unit price and a quantity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CartLine {
    pub unit_price: Decimal,
    pub quantity: i32,
}

impl CartLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Fully-priced cart. `total` is the tax-inclusive amount the customer
/// pays; `tax` is the VAT share already embedded in it, extracted for
/// receipts and never added on top.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PriceBreakdown {
    pub subtotal: Decimal,
    pub delivery_cost: Decimal,
    pub discount_amount: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// Prices a cart. Pure computation, no I/O.
///
/// `total = subtotal + delivery_cost - discount_amount`, clamped to zero;
/// the VAT embedded in that gross total is `total * rate / (1 + rate)`,
/// rounded to two decimal places.
pub fn price_cart(
    lines: &[CartLine],
    discount_amount: Decimal,
    delivery_cost: Decimal,
    tax_rate: Decimal,
) -> PriceBreakdown {
    let subtotal: Decimal = lines.iter().map(CartLine::line_total).sum();

    let mut total = subtotal + delivery_cost - discount_amount;
    if total < Decimal::ZERO {
        total = Decimal::ZERO;
    }

    let tax = extract_vat(total, tax_rate);

    PriceBreakdown {
        subtotal,
        delivery_cost,
        discount_amount,
        tax,
        total,
    }
}

/// VAT share embedded in a gross amount at the given rate.
pub fn extract_vat(gross: Decimal, rate: Decimal) -> Decimal {
    if rate <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (gross * rate / (Decimal::ONE + rate)).round_dp(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(price: Decimal, qty: i32) -> CartLine {
        CartLine {
            unit_price: price,
            quantity: qty,
        }
    }

    #[test]
    fn totals_follow_the_documented_identity() {
        // Cart 1000, 10% promo already computed as 100, 25 km tier = 50.
        let breakdown = price_cart(
            &[line(dec!(250), 4)],
            dec!(100),
            dec!(50),
            dec!(0.20),
        );
        assert_eq!(breakdown.subtotal, dec!(1000));
        assert_eq!(breakdown.total, dec!(950));
        assert_eq!(
            breakdown.total,
            breakdown.subtotal + breakdown.delivery_cost - breakdown.discount_amount
        );
    }

    #[test]
    fn vat_is_extracted_from_the_gross_total() {
        // 20% embedded in 120.00 is 20.00.
        assert_eq!(extract_vat(dec!(120), dec!(0.20)), dec!(20));
        assert_eq!(extract_vat(dec!(950), dec!(0.20)), dec!(158.33));
        assert_eq!(extract_vat(dec!(100), Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn total_is_clamped_at_zero() {
        let breakdown = price_cart(&[line(dec!(10), 1)], dec!(50), dec!(5), dec!(0.20));
        assert_eq!(breakdown.total, Decimal::ZERO);
        assert_eq!(breakdown.tax, Decimal::ZERO);
    }

    #[test]
    fn empty_cart_prices_to_delivery_only() {
        let breakdown = price_cart(&[], Decimal::ZERO, dec!(25), dec!(0.20));
        assert_eq!(breakdown.subtotal, Decimal::ZERO);
        assert_eq!(breakdown.total, dec!(25));
    }
}
