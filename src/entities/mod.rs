pub mod order;
pub mod order_item;
pub mod payment_transaction;
pub mod product;
pub mod product_variant;
pub mod promo_code;
