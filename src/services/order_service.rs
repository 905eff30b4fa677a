use std::collections::HashMap;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use sea_orm::sea_query::Expr;
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::{
        coupons::CartLine,
        orders::{CancelOrderRequest, CheckoutRequest, OrderList, OrderWithItems},
    },
    entity::{
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        products::{Column as ProdCol, Entity as Products},
        sea_orm_active_enums::{MovementType, OrderStatus, PaymentMethod, PaymentStatus},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::Order,
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::{
        coupon_service,
        order_state::{self, Actor, Transition, TransitionOutcome},
        stock_ledger::StockChange,
    },
    state::AppState,
};

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination().normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status {
        condition = condition.add(OrderCol::Status.eq(status));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Order::from)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

/// Create a `confirmed` order with its stock reserved.
///
/// The coupon, if any, is validated through the redemption limiter before
/// the transaction opens and redeemed inside it, after the order row is
/// written. Reservation, order rows and redemption commit together.
pub async fn checkout(
    state: &AppState,
    user: &AuthUser,
    client_ip: &str,
    payload: CheckoutRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    if payload.items.is_empty() {
        return Err(AppError::BadRequest("Cart is empty".into()));
    }
    if payload.items.iter().any(|item| item.quantity <= 0) {
        return Err(AppError::BadRequest("Cart has invalid quantity".into()));
    }

    let ids: Vec<Uuid> = payload.items.iter().map(|item| item.product_id).collect();
    let products: HashMap<Uuid, i64> = Products::find()
        .filter(ProdCol::Id.is_in(ids))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(|p| (p.id, p.price))
        .collect();

    let mut lines = Vec::with_capacity(payload.items.len());
    for item in &payload.items {
        let price = products
            .get(&item.product_id)
            .copied()
            .ok_or(AppError::ProductNotFound(item.product_id))?;
        lines.push(CartLine {
            product_id: item.product_id,
            quantity: item.quantity,
            price,
        });
    }
    let subtotal = coupon_service::lines_total(&lines)?;

    let quote = match payload
        .coupon_code
        .as_deref()
        .filter(|code| !code.trim().is_empty())
    {
        Some(code) => Some(
            coupon_service::validate_for_client(
                state,
                client_ip,
                code,
                subtotal,
                user.user_id,
                &lines,
            )
            .await?,
        ),
        None => None,
    };
    let discount = quote.as_ref().map(|q| q.discount).unwrap_or(0);

    let order_id = Uuid::new_v4();
    let order_code = build_order_code(order_id);
    let actor = user.actor().to_string();
    let now = Utc::now();

    let txn = state.orm.begin().await?;

    let order = OrderActive {
        id: Set(order_id),
        order_code: Set(order_code.clone()),
        user_id: Set(user.user_id),
        status: Set(OrderStatus::Confirmed),
        payment_method: Set(payload.payment_method),
        payment_status: Set(Some(PaymentStatus::Pending)),
        subtotal: Set(subtotal),
        discount: Set(discount),
        total_amount: Set(subtotal - discount),
        coupon_code: Set(quote.as_ref().map(|q| q.code.clone())),
        coupon_discount: Set(quote.as_ref().map(|q| q.discount)),
        cancel_reason: Set(None),
        cancelled_at: Set(None),
        cancelled_by: Set(None),
        paid_at: Set(None),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(&txn)
    .await?;

    let mut items = Vec::with_capacity(payload.items.len());
    let mut pending = Vec::with_capacity(payload.items.len());
    for (item, line) in payload.items.iter().zip(&lines) {
        let size = item
            .size
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let row = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(item.product_id),
            size: Set(size.clone()),
            quantity: Set(item.quantity),
            price: Set(line.price),
            created_at: Set(now.into()),
        }
        .insert(&txn)
        .await?;
        items.push(row);

        let change = StockChange::new(item.product_id, size, -item.quantity, MovementType::Sale)
            .for_order(order_id)
            .by(actor.clone())
            .note(format!("order {order_code}"));
        pending.push(state.ledger.apply_in(&txn, change).await?);
    }

    if let Some(quote) = &quote {
        coupon_service::redeem(&txn, &quote.code).await?;
    }

    txn.commit().await?;

    for write in state.ledger.settle(&state.orm, pending).await {
        if !write.is_recorded() {
            tracing::warn!(order_id = %order_id, "reservation committed without ledger row");
        }
    }

    if let Err(err) = log_audit(
        &state.orm,
        &actor,
        "checkout",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "coupon": order.coupon_code })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Checkout success",
        with_items(order, items),
        Some(Meta::empty()),
    ))
}

/// Record a confirmed payment. The order status is left alone; only a
/// non-terminal order that is not yet paid accepts it.
pub async fn mark_paid(db: &DatabaseConnection, order_id: Uuid) -> AppResult<OrderModel> {
    let now = Utc::now().fixed_offset();
    let result = Orders::update_many()
        .col_expr(OrderCol::PaymentStatus, Expr::value(PaymentStatus::Paid))
        .col_expr(OrderCol::PaidAt, Expr::value(now))
        .col_expr(OrderCol::UpdatedAt, Expr::value(now))
        .filter(OrderCol::Id.eq(order_id))
        .filter(OrderCol::Status.is_in([
            OrderStatus::Confirmed,
            OrderStatus::Processing,
            OrderStatus::Shipped,
        ]))
        .filter(
            Condition::any()
                .add(OrderCol::PaymentStatus.is_null())
                .add(OrderCol::PaymentStatus.eq(PaymentStatus::Pending)),
        )
        .exec(db)
        .await?;

    let order = Orders::find_by_id(order_id)
        .one(db)
        .await?
        .ok_or(AppError::OrderNotFound)?;

    if result.rows_affected == 0 {
        return Err(if order.payment_status == Some(PaymentStatus::Paid) {
            AppError::BadRequest("Order already paid".into())
        } else {
            AppError::BadRequest(format!(
                "payment can no longer be recorded for a {} order",
                order.status
            ))
        });
    }

    tracing::info!(order_id = %order_id, "payment recorded");
    Ok(order)
}

pub async fn pay_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    find_owned(&state.orm, user, id).await?;
    let order = mark_paid(&state.orm, id).await?;
    let items = load_items(&state.orm, order.id).await?;

    if let Err(err) = log_audit(
        &state.orm,
        &user.actor().to_string(),
        "order_paid",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Payment recorded",
        with_items(order, items),
        Some(Meta::empty()),
    ))
}

/// A failed online payment releases the reservation and cancels the order.
pub async fn record_payment_failure(
    state: &AppState,
    order_id: Uuid,
) -> AppResult<TransitionOutcome> {
    let order = Orders::find_by_id(order_id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::OrderNotFound)?;

    if order.payment_method == PaymentMethod::Cod {
        return Err(AppError::BadRequest(
            "cash on delivery orders have no online payment".into(),
        ));
    }
    if order.payment_status == Some(PaymentStatus::Paid) {
        return Err(AppError::BadRequest("Order already paid".into()));
    }

    let request = Transition::to(OrderStatus::Cancelled, Actor::System)
        .reason("Payment failed")
        .restock_as(MovementType::PaymentFailed)
        .payment_status(PaymentStatus::Failed)
        .unpaid_only();
    order_state::transition(&state.orm, &state.ledger, order_id, request).await
}

/// Customers may withdraw an order until it starts processing.
pub async fn cancel_own_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: CancelOrderRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = find_owned(&state.orm, user, id).await?;
    match order.status {
        OrderStatus::Confirmed => {}
        OrderStatus::Processing => return Err(AppError::Forbidden),
        from => {
            return Err(AppError::IllegalTransition {
                from,
                to: OrderStatus::Cancelled,
            });
        }
    }

    let reason = payload
        .reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| "Cancelled by customer".to_string());
    let request = Transition::to(OrderStatus::Cancelled, Actor::Customer(user.user_id)).reason(reason);
    let outcome = order_state::transition(&state.orm, &state.ledger, id, request).await?;
    let items = load_items(&state.orm, id).await?;

    Ok(ApiResponse::success(
        "Order cancelled",
        with_items(outcome.order, items),
        Some(Meta::empty()),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = find_owned(&state.orm, user, id).await?;
    let items = load_items(&state.orm, order.id).await?;

    Ok(ApiResponse::success(
        "OK",
        with_items(order, items),
        Some(Meta::empty()),
    ))
}

async fn find_owned<C: ConnectionTrait>(
    conn: &C,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<OrderModel> {
    Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .one(conn)
        .await?
        .ok_or(AppError::OrderNotFound)
}

pub(crate) async fn load_items<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> AppResult<Vec<OrderItemModel>> {
    Ok(OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .all(conn)
        .await?)
}

pub(crate) fn with_items(order: OrderModel, items: Vec<OrderItemModel>) -> OrderWithItems {
    OrderWithItems {
        order: order.into(),
        items: items.into_iter().map(Into::into).collect(),
    }
}

fn build_order_code(order_id: Uuid) -> String {
    let date = Utc::now().format("%Y%m%d");
    let suffix = order_id.simple().to_string().to_uppercase();
    format!("ORD-{}-{}", date, &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_code_is_dated_and_short() {
        let code = build_order_code(Uuid::new_v4());
        let parts: Vec<&str> = code.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ORD");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 8);
    }
}
