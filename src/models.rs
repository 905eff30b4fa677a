use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entity::{
    order_items::Model as OrderItemModel,
    orders::Model as OrderModel,
    product_sizes::Model as ProductSizeModel,
    products::Model as ProductModel,
    sea_orm_active_enums::{MovementType, OrderStatus, PaymentMethod, PaymentStatus},
    stock_movements::Model as StockMovementModel,
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProductSize {
    pub size: String,
    pub stock: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub price: i64,
    pub stock: i32,
    pub sizes: Vec<ProductSize>,
    pub created_at: DateTime<Utc>,
}

impl Product {
    pub fn from_entity(model: ProductModel, sizes: Vec<ProductSizeModel>) -> Self {
        Product {
            id: model.id,
            name: model.name,
            description: model.description,
            category: model.category,
            price: model.price,
            stock: model.stock,
            sizes: sizes
                .into_iter()
                .map(|s| ProductSize {
                    size: s.size,
                    stock: s.stock,
                })
                .collect(),
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Payment {
    pub method: PaymentMethod,
    pub status: Option<PaymentStatus>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AppliedCoupon {
    pub code: String,
    pub discount: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Cancellation {
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
    pub cancelled_by: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub order_code: String,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub payment: Payment,
    pub subtotal: i64,
    pub discount: i64,
    pub total_amount: i64,
    pub coupon: Option<AppliedCoupon>,
    pub cancellation: Option<Cancellation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<OrderModel> for Order {
    fn from(model: OrderModel) -> Self {
        let coupon = match (model.coupon_code, model.coupon_discount) {
            (Some(code), discount) => Some(AppliedCoupon {
                code,
                discount: discount.unwrap_or(0),
            }),
            _ => None,
        };
        let cancellation = model.cancelled_at.map(|at| Cancellation {
            reason: model.cancel_reason.unwrap_or_default(),
            cancelled_at: at.with_timezone(&Utc),
            cancelled_by: model.cancelled_by.unwrap_or_default(),
        });

        Order {
            id: model.id,
            order_code: model.order_code,
            user_id: model.user_id,
            status: model.status,
            payment: Payment {
                method: model.payment_method,
                status: model.payment_status,
                paid_at: model.paid_at.map(|dt| dt.with_timezone(&Utc)),
            },
            subtotal: model.subtotal,
            discount: model.discount,
            total_amount: model.total_amount,
            coupon,
            cancellation,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub size: Option<String>,
    pub quantity: i32,
    pub price: i64,
    pub created_at: DateTime<Utc>,
}

impl From<OrderItemModel> for OrderItem {
    fn from(model: OrderItemModel) -> Self {
        OrderItem {
            id: model.id,
            order_id: model.order_id,
            product_id: model.product_id,
            size: model.size,
            quantity: model.quantity,
            price: model.price,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StockMovement {
    pub id: Uuid,
    pub product_id: Uuid,
    #[serde(rename = "type")]
    pub movement_type: MovementType,
    pub quantity: i32,
    pub size: Option<String>,
    pub order_id: Option<Uuid>,
    pub actor: Option<String>,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

impl From<StockMovementModel> for StockMovement {
    fn from(model: StockMovementModel) -> Self {
        StockMovement {
            id: model.id,
            product_id: model.product_id,
            movement_type: model.movement_type,
            quantity: model.quantity,
            size: model.size,
            order_id: model.order_id,
            actor: model.actor,
            note: model.note,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}
