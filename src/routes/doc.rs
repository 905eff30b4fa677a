use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        coupons::{CartLine, CouponValidation, ValidateCouponRequest},
        orders::{CancelOrderRequest, CheckoutItem, CheckoutRequest, OrderList, OrderWithItems},
    },
    entity::sea_orm_active_enums::{MovementType, OrderStatus, PaymentMethod, PaymentStatus},
    models::{
        AppliedCoupon, Cancellation, Order, OrderItem, Payment, Product, ProductSize,
        StockMovement,
    },
    response::{ApiResponse, Meta},
    routes::{admin, coupons, health, orders, params},
    services::reconciler::SweepSummary,
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        orders::list_order,
        orders::checkout,
        orders::get_order,
        orders::pay_order,
        orders::cancel_order,
        coupons::validate_coupon,
        admin::list_all_orders,
        admin::get_order_admin,
        admin::update_order_status,
        admin::mark_payment_failed,
        admin::record_return,
        admin::list_low_stock,
        admin::adjust_inventory,
        admin::list_movements,
        admin::run_sweep
    ),
    components(
        schemas(
            Product,
            ProductSize,
            Order,
            OrderItem,
            Payment,
            AppliedCoupon,
            Cancellation,
            StockMovement,
            OrderStatus,
            PaymentMethod,
            PaymentStatus,
            MovementType,
            CheckoutItem,
            CheckoutRequest,
            CancelOrderRequest,
            OrderList,
            OrderWithItems,
            CartLine,
            ValidateCouponRequest,
            CouponValidation,
            SweepSummary,
            admin::ProductList,
            admin::MovementList,
            admin::StockAdjustment,
            admin::UpdateOrderStatusRequest,
            admin::InventoryAdjustRequest,
            admin::ReturnRequest,
            admin::LowStockQuery,
            params::Pagination,
            params::OrderListQuery,
            Meta,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<CouponValidation>,
            ApiResponse<admin::ProductList>,
            ApiResponse<admin::MovementList>,
            ApiResponse<SweepSummary>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Orders", description = "Checkout and order endpoints"),
        (name = "Coupons", description = "Coupon validation"),
        (name = "Admin", description = "Order lifecycle, inventory and reconciliation"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
