use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use storefront_core::{
    config::AppConfig,
    db::{create_orm_conn, run_migrations},
    entity::{
        coupons::{ActiveModel as CouponActive, Column as CouponCol, Entity as Coupons},
        product_sizes::ActiveModel as SizeActive,
        products::{ActiveModel as ProductActive, Column as ProdCol, Entity as Products},
        sea_orm_active_enums::CouponType,
    },
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let orm = create_orm_conn(&config.database_url).await?;
    // Ensure migrations are applied.
    run_migrations(&orm).await?;

    seed_products(&orm).await?;
    seed_coupons(&orm).await?;

    println!("Seed completed");
    Ok(())
}

async fn seed_products(orm: &DatabaseConnection) -> anyhow::Result<()> {
    let products: Vec<(&str, &str, &str, i64, Vec<(&str, i32)>, i32)> = vec![
        ("Axum Hoodie", "Warm hoodie for Rustaceans", "apparel", 550000, vec![("S", 15), ("M", 20), ("L", 15)], 0),
        ("Ferris Tee", "Crab on cotton", "apparel", 180000, vec![("M", 30), ("L", 30)], 0),
        ("Ferris Mug", "Coffee tastes better with Ferris", "kitchen", 120000, vec![], 100),
        ("Rust Sticker Pack", "Decorate your laptop", "accessories", 50000, vec![], 200),
    ];

    for (name, desc, category, price, sizes, flat_stock) in products {
        let exists = Products::find()
            .filter(ProdCol::Name.eq(name))
            .one(orm)
            .await?
            .is_some();
        if exists {
            continue;
        }

        let stock = if sizes.is_empty() {
            flat_stock
        } else {
            sizes.iter().map(|(_, qty)| qty).sum()
        };

        let txn = orm.begin().await?;
        let product_id = Uuid::new_v4();
        ProductActive {
            id: Set(product_id),
            name: Set(name.to_string()),
            description: Set(Some(desc.to_string())),
            category: Set(category.to_string()),
            price: Set(price),
            stock: Set(stock),
            created_at: Set(Utc::now().into()),
        }
        .insert(&txn)
        .await?;

        for (size, qty) in &sizes {
            SizeActive {
                id: Set(Uuid::new_v4()),
                product_id: Set(product_id),
                size: Set(size.to_string()),
                stock: Set(*qty),
            }
            .insert(&txn)
            .await?;
        }
        txn.commit().await?;
    }

    println!("Seeded products");
    Ok(())
}

async fn seed_coupons(orm: &DatabaseConnection) -> anyhow::Result<()> {
    let now = Utc::now();
    let coupons = vec![
        ("WELCOME10", CouponType::Percent, 10, None, 0, true, serde_json::json!([])),
        ("SAVE20", CouponType::Flat, 20000, Some(100), 100000, false, serde_json::json!(["apparel"])),
    ];

    for (code, coupon_type, value, usage_limit, min_order, first_order_only, categories) in coupons {
        let exists = Coupons::find()
            .filter(CouponCol::Code.eq(code))
            .one(orm)
            .await?
            .is_some();
        if exists {
            continue;
        }

        CouponActive {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            coupon_type: Set(coupon_type),
            value: Set(value),
            max_discount: Set(None),
            min_order: Set(min_order),
            valid_from: Set(now.into()),
            expiry: Set((now + Duration::days(90)).into()),
            is_active: Set(true),
            usage_limit: Set(usage_limit),
            per_user_limit: Set(Some(1)),
            used_count: Set(0),
            first_order_only: Set(first_order_only),
            applicable_categories: Set(categories),
            created_at: Set(now.into()),
        }
        .insert(orm)
        .await?;
    }

    println!("Seeded coupons");
    Ok(())
}
