use sea_orm_migration::prelude::*;

use crate::entity::{
    Orders, ProductSizes, StockMovements, orders, product_sizes, stock_movements,
};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // One stock row per (product, size).
        manager
            .create_index(
                Index::create()
                    .name("uq_product_sizes_product_size")
                    .table(ProductSizes)
                    .col(product_sizes::Column::ProductId)
                    .col(product_sizes::Column::Size)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        // Reconciler selection: status + age.
        manager
            .create_index(
                Index::create()
                    .name("idx_orders_status_created_at")
                    .table(Orders)
                    .col(orders::Column::Status)
                    .col(orders::Column::CreatedAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_orders_user_coupon")
                    .table(Orders)
                    .col(orders::Column::UserId)
                    .col(orders::Column::CouponCode)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_stock_movements_product_created_at")
                    .table(StockMovements)
                    .col(stock_movements::Column::ProductId)
                    .col(stock_movements::Column::CreatedAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for (name, table) in [
            ("idx_stock_movements_product_created_at", "stock_movements"),
            ("idx_orders_user_coupon", "orders"),
            ("idx_orders_status_created_at", "orders"),
            ("uq_product_sizes_product_size", "product_sizes"),
        ] {
            manager
                .drop_index(Index::drop().name(name).table(Alias::new(table)).to_owned())
                .await?;
        }
        Ok(())
    }
}
