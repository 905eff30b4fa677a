use sea_orm::entity::prelude::*;

use super::sea_orm_active_enums::CouponType;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Stored trimmed and uppercased.
    #[sea_orm(unique)]
    pub code: String,
    pub coupon_type: CouponType,
    pub value: i64,
    pub max_discount: Option<i64>,
    pub min_order: i64,
    pub valid_from: DateTimeWithTimeZone,
    pub expiry: DateTimeWithTimeZone,
    pub is_active: bool,
    pub usage_limit: Option<i32>,
    pub per_user_limit: Option<i32>,
    pub used_count: i32,
    pub first_order_only: bool,
    /// JSON array of category names; empty means the whole cart qualifies.
    pub applicable_categories: Json,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
