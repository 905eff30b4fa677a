#![allow(dead_code)]

use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use sea_orm::sea_query::Expr;
use storefront_core::{
    db::{create_orm_conn, run_migrations},
    dto::orders::{CheckoutItem, CheckoutRequest},
    entity::{
        coupons::ActiveModel as CouponActive,
        orders::{Column as OrderCol, Entity as Orders},
        product_sizes::{ActiveModel as SizeActive, Column as SizeCol, Entity as ProductSizes},
        products::{ActiveModel as ProductActive, Entity as Products},
        sea_orm_active_enums::{CouponType, PaymentMethod},
        stock_movements::{Column as MovementCol, Entity as StockMovements, Model as MovementModel},
    },
    middleware::{auth::AuthUser, client_ip::ForwardedPolicy},
    rate_limit::{RateLimitPolicy, RedemptionLimiter},
    services::{
        reconciler::ReconcilerConfig,
        stock_ledger::{LedgerMode, StockLedger},
    },
    state::AppState,
};
use uuid::Uuid;

pub const CLIENT_IP: &str = "203.0.113.7";

pub async fn setup() -> anyhow::Result<AppState> {
    setup_with(LedgerMode::Atomic).await
}

pub async fn setup_with(mode: LedgerMode) -> anyhow::Result<AppState> {
    let orm = create_orm_conn("sqlite::memory:").await?;
    run_migrations(&orm).await?;
    Ok(AppState {
        orm,
        ledger: StockLedger::new(mode),
        limiter: RedemptionLimiter::in_memory(RateLimitPolicy::default()),
        reconciler: ReconcilerConfig::default(),
        forwarded: ForwardedPolicy::default(),
    })
}

pub fn customer() -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        role: "user".into(),
    }
}

pub fn admin() -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        role: "admin".into(),
    }
}

pub async fn product(
    state: &AppState,
    name: &str,
    category: &str,
    price: i64,
    stock: i32,
) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    ProductActive {
        id: Set(id),
        name: Set(name.into()),
        description: Set(None),
        category: Set(category.into()),
        price: Set(price),
        stock: Set(stock),
        created_at: Set(Utc::now().into()),
    }
    .insert(&state.orm)
    .await?;
    Ok(id)
}

/// Product whose aggregate stock is the sum of its sizes.
pub async fn sized_product(
    state: &AppState,
    name: &str,
    price: i64,
    sizes: &[(&str, i32)],
) -> anyhow::Result<Uuid> {
    let total = sizes.iter().map(|(_, qty)| qty).sum();
    let id = product(state, name, "apparel", price, total).await?;
    for (size, qty) in sizes {
        SizeActive {
            id: Set(Uuid::new_v4()),
            product_id: Set(id),
            size: Set(size.to_string()),
            stock: Set(*qty),
        }
        .insert(&state.orm)
        .await?;
    }
    Ok(id)
}

pub async fn stock_of(state: &AppState, id: Uuid) -> anyhow::Result<i32> {
    let product = Products::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| anyhow::anyhow!("product {id} missing"))?;
    Ok(product.stock)
}

pub async fn size_stock(state: &AppState, id: Uuid, size: &str) -> anyhow::Result<i32> {
    let row = ProductSizes::find()
        .filter(SizeCol::ProductId.eq(id))
        .filter(SizeCol::Size.eq(size))
        .one(&state.orm)
        .await?
        .ok_or_else(|| anyhow::anyhow!("size {size} missing"))?;
    Ok(row.stock)
}

pub async fn movements(state: &AppState, product_id: Uuid) -> anyhow::Result<Vec<MovementModel>> {
    Ok(StockMovements::find()
        .filter(MovementCol::ProductId.eq(product_id))
        .order_by_asc(MovementCol::CreatedAt)
        .all(&state.orm)
        .await?)
}

/// Valid since yesterday for thirty days, no limits.
pub fn coupon(code: &str, coupon_type: CouponType, value: i64) -> CouponActive {
    let now = Utc::now();
    CouponActive {
        id: Set(Uuid::new_v4()),
        code: Set(code.into()),
        coupon_type: Set(coupon_type),
        value: Set(value),
        max_discount: Set(None),
        min_order: Set(0),
        valid_from: Set((now - Duration::days(1)).into()),
        expiry: Set((now + Duration::days(30)).into()),
        is_active: Set(true),
        usage_limit: Set(None),
        per_user_limit: Set(None),
        used_count: Set(0),
        first_order_only: Set(false),
        applicable_categories: Set(serde_json::json!([])),
        created_at: Set(now.into()),
    }
}

pub fn item(product_id: Uuid, size: Option<&str>, quantity: i32) -> CheckoutItem {
    CheckoutItem {
        product_id,
        size: size.map(str::to_string),
        quantity,
    }
}

pub fn cart(items: Vec<CheckoutItem>, payment_method: PaymentMethod) -> CheckoutRequest {
    CheckoutRequest {
        items,
        payment_method,
        coupon_code: None,
    }
}

/// Shift an order's creation time into the past.
pub async fn backdate(state: &AppState, order_id: Uuid, minutes: i64) -> anyhow::Result<()> {
    let at = (Utc::now() - Duration::minutes(minutes)).fixed_offset();
    Orders::update_many()
        .col_expr(OrderCol::CreatedAt, Expr::value(at))
        .filter(OrderCol::Id.eq(order_id))
        .exec(&state.orm)
        .await?;
    Ok(())
}
