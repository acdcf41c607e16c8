pub mod delivery;
pub mod emails;
pub mod fulfillment;
pub mod gateway;
pub mod orders;
pub mod pricing;
pub mod promotions;
