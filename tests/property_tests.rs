use chrono::Utc;
use kilim_api::{
    entities::promo_code::{self, DiscountType},
    services::{
        delivery::tier_price,
        orders::{generate_order_number, ORDER_NUMBER_ALPHABET},
        pricing::{price_cart, CartLine},
        promotions::evaluate_code,
    },
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

fn cents(value: i64) -> Decimal {
    Decimal::new(value, 2)
}

fn cart_strategy() -> impl Strategy<Value = Vec<CartLine>> {
    prop::collection::vec(
        (1i64..=500_000, 1i32..=20).prop_map(|(price_cents, quantity)| CartLine {
            unit_price: cents(price_cents),
            quantity,
        }),
        0..8,
    )
}

proptest! {
    #[test]
    fn totals_satisfy_the_pricing_identity(
        lines in cart_strategy(),
        discount_cents in 0i64..=2_000_000,
        delivery_cents in 0i64..=10_000,
    ) {
        let discount = cents(discount_cents);
        let delivery = cents(delivery_cents);
        let breakdown = price_cart(&lines, discount, delivery, Decimal::new(20, 2));

        prop_assert!(breakdown.total >= Decimal::ZERO);
        prop_assert!(breakdown.tax >= Decimal::ZERO);

        let raw = breakdown.subtotal + breakdown.delivery_cost - breakdown.discount_amount;
        if raw >= Decimal::ZERO {
            prop_assert_eq!(breakdown.total, raw);
        } else {
            prop_assert_eq!(breakdown.total, Decimal::ZERO);
        }
    }

    #[test]
    fn promo_discount_never_exceeds_the_subtotal(
        subtotal_cents in 0i64..=10_000_000,
        value_cents in 0i64..=2_000_000,
        percentage in proptest::bool::ANY,
    ) {
        let subtotal = cents(subtotal_cents);
        let promo = promo_code::Model {
            id: Uuid::new_v4(),
            code: "PROP".into(),
            discount_type: if percentage {
                DiscountType::Percentage
            } else {
                DiscountType::FixedAmount
            },
            discount_value: if percentage {
                Decimal::from(value_cents % 100)
            } else {
                cents(value_cents)
            },
            min_purchase_amount: Decimal::ZERO,
            max_uses: None,
            current_uses: 0,
            per_customer_limit: None,
            is_active: true,
            expires_at: None,
            created_at: Utc::now(),
            updated_at: None,
        };

        let quote = evaluate_code(Some(&promo), subtotal, Utc::now()).unwrap();
        prop_assert!(quote.discount_amount <= subtotal);
        prop_assert!(quote.discount_amount >= Decimal::ZERO);
    }

    #[test]
    fn delivery_tiers_are_monotonic(a in 0.0f64..1000.0, b in 0.0f64..1000.0) {
        let (near, far) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(tier_price(near) <= tier_price(far));
    }

    #[test]
    fn order_numbers_always_come_from_the_safe_alphabet(_seed in 0u32..1000) {
        let number = generate_order_number();
        prop_assert_eq!(number.len(), 9);
        prop_assert!(number.starts_with("RUG"));
        for b in number[3..].bytes() {
            prop_assert!(ORDER_NUMBER_ALPHABET.contains(&b));
        }
    }
}
