use utoipa::OpenApi;

use crate::{
    errors::ErrorResponse,
    services::{
        delivery::DeliveryQuote,
        gateway::CheckoutSession,
        orders::{
            CheckoutQuoteRequest, CheckoutQuoteResponse, CreateOrderRequest, DemoPaymentRequest,
            OrderItemRequest, OrderItemResponse, OrderResponse,
        },
        pricing::PriceBreakdown,
    },
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Kilim & Sons Order API",
        description = "Order and payment orchestration for the rug storefront: \
                       cart pricing, delivery quotes, promo codes, hosted \
                       checkout sessions and payment callbacks."
    ),
    paths(
        crate::handlers::health,
        crate::handlers::status,
        crate::handlers::checkout::quote,
        crate::handlers::delivery::quote,
        crate::handlers::orders::create_order,
        crate::handlers::orders::get_order,
        crate::handlers::orders::get_order_by_number,
        crate::handlers::orders::request_payment_session,
        crate::handlers::orders::demo_payment,
        crate::handlers::payment_webhooks::receive,
    ),
    components(schemas(
        ErrorResponse,
        PriceBreakdown,
        DeliveryQuote,
        CheckoutSession,
        OrderItemRequest,
        CreateOrderRequest,
        CheckoutQuoteRequest,
        CheckoutQuoteResponse,
        DemoPaymentRequest,
        OrderItemResponse,
        OrderResponse,
    )),
    tags(
        (name = "system", description = "Health and status probes"),
        (name = "checkout", description = "Cart pricing"),
        (name = "delivery", description = "Delivery quotes"),
        (name = "orders", description = "Order lifecycle"),
        (name = "payments", description = "Gateway callbacks")
    )
)]
pub struct ApiDoc;
