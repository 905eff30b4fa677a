use std::collections::HashMap;

use uuid::Uuid;
use sea_orm::{
    ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
    TransactionTrait,
};
use sea_orm::sea_query::LockType;

use crate::{
    audit::log_audit,
    entity::{
        order_items::{Column as OrderItemCol, Entity as OrderItems},
        orders::{Column as OrderCol, Entity as Orders},
        product_sizes::{Column as SizeCol, Entity as ProductSizes, Model as ProductSizeModel},
        products::{Column as ProdCol, Entity as Products},
        sea_orm_active_enums::{MovementType, OrderStatus},
        stock_movements::{Column as MovementCol, Entity as StockMovements},
    },
    dto::orders::{OrderList, OrderWithItems},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Order, Product, StockMovement},
    response::{ApiResponse, Meta},
    routes::admin::{
        InventoryAdjustRequest, LowStockQuery, MovementList, ProductList, ReturnRequest,
        StockAdjustment, UpdateOrderStatusRequest,
    },
    routes::params::{OrderListQuery, Pagination, SortOrder},
    services::{
        order_service,
        order_state::{self, Transition},
        reconciler::{self, SweepSummary},
        stock_ledger::{self, LedgerWrite, StockChange},
    },
    state::AppState,
};

pub async fn list_all_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination().normalize();

    let mut condition = Condition::all();
    if let Some(status) = query.status {
        condition = condition.add(OrderCol::Status.eq(status));
    }

    let mut finder = Orders::find().filter(condition);

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
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

    let order_list = OrderList { items: orders };

    Ok(ApiResponse::success("Orders", order_list, Some(meta)))
}

pub async fn get_order_admin(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    ensure_admin(user)?;
    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::OrderNotFound)?;
    let items = order_service::load_items(&state.orm, order.id).await?;

    Ok(ApiResponse::success(
        "Order found",
        order_service::with_items(order, items),
        Some(Meta::empty()),
    ))
}

pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_admin(user)?;

    let mut request = Transition::to(payload.status, user.actor());
    if payload.status == OrderStatus::Cancelled {
        let reason = payload
            .reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| "Cancelled by admin".to_string());
        request = request.reason(reason);
    }

    let outcome = order_state::transition(&state.orm, &state.ledger, id, request).await?;
    let missing = outcome.restocked.iter().filter(|w| !w.is_recorded()).count();
    if missing > 0 {
        tracing::warn!(order_id = %id, missing, "restock committed without ledger rows");
    }

    if let Err(err) = log_audit(
        &state.orm,
        &user.actor().to_string(),
        "order_status_update",
        Some("orders"),
        Some(serde_json::json!({ "order_id": outcome.order.id, "status": outcome.order.status })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order updated",
        Order::from(outcome.order),
        Some(Meta::empty()),
    ))
}

pub async fn mark_payment_failed(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Order>> {
    ensure_admin(user)?;
    let outcome = order_service::record_payment_failure(state, id).await?;

    if let Err(err) = log_audit(
        &state.orm,
        &user.actor().to_string(),
        "payment_failed",
        Some("orders"),
        Some(serde_json::json!({ "order_id": id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Payment failure recorded",
        Order::from(outcome.order),
        Some(Meta::empty()),
    ))
}

/// Put returned units of a delivered order back on the shelf. The running
/// total of returns for a line never exceeds what was ordered.
pub async fn record_return(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
    payload: ReturnRequest,
) -> AppResult<ApiResponse<StockMovement>> {
    ensure_admin(user)?;
    if payload.quantity <= 0 {
        return Err(AppError::BadRequest("quantity must be positive".into()));
    }
    let size = payload
        .size
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let txn = state.orm.begin().await?;
    let order = Orders::find_by_id(order_id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::OrderNotFound)?;
    if order.status != OrderStatus::Delivered {
        return Err(AppError::BadRequest(
            "returns can only be recorded for delivered orders".into(),
        ));
    }

    let ordered: i32 = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .filter(OrderItemCol::ProductId.eq(payload.product_id))
        .all(&txn)
        .await?
        .into_iter()
        .filter(|item| item.size == size)
        .map(|item| item.quantity)
        .sum();
    if ordered == 0 {
        return Err(AppError::BadRequest("product is not part of this order".into()));
    }

    let returned: i32 = StockMovements::find()
        .filter(MovementCol::OrderId.eq(order_id))
        .filter(MovementCol::ProductId.eq(payload.product_id))
        .filter(MovementCol::MovementType.eq(MovementType::Return))
        .all(&txn)
        .await?
        .into_iter()
        .filter(|row| row.size == size)
        .map(|row| row.quantity)
        .sum();
    if returned + payload.quantity > ordered {
        return Err(AppError::BadRequest(format!(
            "return exceeds ordered quantity ({} of {} already returned)",
            returned, ordered
        )));
    }

    let change = StockChange::new(payload.product_id, size, payload.quantity, MovementType::Return)
        .for_order(order_id)
        .by(user.actor().to_string())
        .note(format!("return for order {}", order.order_code));
    let pending = state.ledger.apply_in(&txn, change).await?;
    txn.commit().await?;

    let write = state
        .ledger
        .settle(&state.orm, vec![pending])
        .await
        .into_iter()
        .next()
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("ledger returned no write")))?;
    let movement = match write {
        LedgerWrite::Recorded(movement) => movement,
        LedgerWrite::Failed { error, .. } => {
            return Err(AppError::Internal(anyhow::anyhow!(
                "return restocked but ledger write failed: {error}"
            )));
        }
    };

    if let Err(err) = log_audit(
        &state.orm,
        &user.actor().to_string(),
        "order_return",
        Some("orders"),
        Some(serde_json::json!({
            "order_id": order_id,
            "product_id": payload.product_id,
            "quantity": payload.quantity
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Return recorded",
        movement,
        Some(Meta::empty()),
    ))
}

pub async fn list_low_stock(
    state: &AppState,
    user: &AuthUser,
    query: LowStockQuery,
) -> AppResult<ApiResponse<ProductList>> {
    ensure_admin(user)?;
    let threshold = query.threshold.unwrap_or(5);
    let (page, limit, offset) = query.pagination().normalize();

    let mut finder = Products::find().filter(ProdCol::Stock.lte(threshold));
    finder = finder
        .order_by_asc(ProdCol::Stock)
        .order_by_desc(ProdCol::CreatedAt);

    let total = finder.clone().count(&state.orm).await? as i64;

    let products = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;

    let ids: Vec<Uuid> = products.iter().map(|p| p.id).collect();
    let mut sizes: HashMap<Uuid, Vec<ProductSizeModel>> = HashMap::new();
    for row in ProductSizes::find()
        .filter(SizeCol::ProductId.is_in(ids))
        .order_by_asc(SizeCol::Size)
        .all(&state.orm)
        .await?
    {
        sizes.entry(row.product_id).or_default().push(row);
    }

    let items = products
        .into_iter()
        .map(|p| {
            let product_sizes = sizes.remove(&p.id).unwrap_or_default();
            Product::from_entity(p, product_sizes)
        })
        .collect();

    let data = ProductList { items };
    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Low stock", data, Some(meta)))
}

pub async fn adjust_inventory(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: InventoryAdjustRequest,
) -> AppResult<ApiResponse<StockAdjustment>> {
    ensure_admin(user)?;
    if payload.delta == 0 {
        return Err(AppError::BadRequest("delta must not be 0".into()));
    }

    let change = StockChange::new(id, payload.size, payload.delta, MovementType::ManualAdjustment)
        .by(user.actor().to_string())
        .note(payload.note.unwrap_or_default());
    let outcome = state.ledger.apply_stock_delta(&state.orm, change).await?;

    if let Err(err) = log_audit(
        &state.orm,
        &user.actor().to_string(),
        "inventory_adjust",
        Some("products"),
        Some(serde_json::json!({ "product_id": outcome.product_id, "delta": payload.delta })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let data = StockAdjustment {
        product_id: outcome.product_id,
        stock: outcome.levels.stock,
        size_stock: outcome.levels.size_stock,
        ledger_recorded: outcome.ledger.is_recorded(),
    };
    Ok(ApiResponse::success(
        "Inventory updated",
        data,
        Some(Meta::empty()),
    ))
}

pub async fn list_movements(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
    pagination: Pagination,
) -> AppResult<ApiResponse<MovementList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = pagination.normalize();

    let (rows, total) =
        stock_ledger::list_movements(&state.orm, product_id, limit as u64, offset as u64).await?;
    let items = rows.into_iter().map(StockMovement::from).collect();

    Ok(ApiResponse::success(
        "Stock movements",
        MovementList { items },
        Some(Meta::new(page, limit, total as i64)),
    ))
}

pub async fn run_sweep(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<SweepSummary>> {
    ensure_admin(user)?;
    let summary =
        reconciler::run_reconciliation_sweep(&state.orm, &state.ledger, &state.reconciler).await?;

    if let Err(err) = log_audit(
        &state.orm,
        &user.actor().to_string(),
        "reconcile_sweep",
        Some("orders"),
        Some(serde_json::json!({ "cancelled": summary.cancelled, "failed": summary.failed })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Sweep finished",
        summary,
        Some(Meta::empty()),
    ))
}
