mod common;

use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, TransactionTrait};
use storefront_core::{
    dto::orders::{CancelOrderRequest, OrderWithItems},
    entity::{
        orders::Entity as Orders,
        product_sizes::{Column as SizeCol, Entity as ProductSizes},
        sea_orm_active_enums::{MovementType, OrderStatus, PaymentMethod, PaymentStatus},
    },
    error::AppError,
    middleware::auth::AuthUser,
    routes::admin::{ReturnRequest, UpdateOrderStatusRequest},
    services::{
        admin_service, order_service,
        order_state::{self, Actor, Transition},
    },
    state::AppState,
};
use uuid::Uuid;

use common::{CLIENT_IP, admin, cart, customer, item, movements, setup, size_stock, sized_product, stock_of};

async fn place(
    state: &AppState,
    user: &AuthUser,
    items: Vec<storefront_core::dto::orders::CheckoutItem>,
    method: PaymentMethod,
) -> anyhow::Result<OrderWithItems> {
    let resp = order_service::checkout(state, user, CLIENT_IP, cart(items, method)).await?;
    resp.data.ok_or_else(|| anyhow::anyhow!("checkout returned no data"))
}

async fn move_to(
    state: &AppState,
    id: Uuid,
    status: OrderStatus,
) -> Result<OrderStatus, AppError> {
    let resp = admin_service::update_order_status(
        state,
        &admin(),
        id,
        UpdateOrderStatusRequest {
            status,
            reason: None,
        },
    )
    .await?;
    Ok(resp.data.map(|o| o.status).unwrap_or(status))
}

async fn status_of(state: &AppState, id: Uuid) -> anyhow::Result<OrderStatus> {
    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| anyhow::anyhow!("order {id} missing"))?;
    Ok(order.status)
}

#[tokio::test]
async fn checkout_reserves_stock_and_confirms() -> anyhow::Result<()> {
    let state = setup().await?;
    let mug = common::product(&state, "Ferris Mug", "kitchen", 1200, 5).await?;
    let hoodie = sized_product(&state, "Axum Hoodie", 5500, &[("S", 2), ("M", 3)]).await?;
    let user = customer();

    let placed = place(
        &state,
        &user,
        vec![item(mug, None, 2), item(hoodie, Some("M"), 1)],
        PaymentMethod::Online,
    )
    .await?;

    assert_eq!(placed.order.status, OrderStatus::Confirmed);
    assert_eq!(placed.order.payment.status, Some(PaymentStatus::Pending));
    assert_eq!(placed.order.subtotal, 2 * 1200 + 5500);
    assert_eq!(placed.order.total_amount, placed.order.subtotal);
    assert!(placed.order.order_code.starts_with("ORD-"));
    assert_eq!(placed.items.len(), 2);

    assert_eq!(stock_of(&state, mug).await?, 3);
    assert_eq!(stock_of(&state, hoodie).await?, 4);
    assert_eq!(size_stock(&state, hoodie, "M").await?, 2);

    let rows = movements(&state, mug).await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].movement_type, MovementType::Sale);
    assert_eq!(rows[0].quantity, -2);
    assert_eq!(rows[0].order_id, Some(placed.order.id));
    Ok(())
}

#[tokio::test]
async fn checkout_with_one_short_item_reserves_nothing() -> anyhow::Result<()> {
    let state = setup().await?;
    let mug = common::product(&state, "Ferris Mug", "kitchen", 1200, 5).await?;
    let pin = common::product(&state, "Limited Pin", "accessories", 500, 1).await?;

    let err = order_service::checkout(
        &state,
        &customer(),
        CLIENT_IP,
        cart(vec![item(mug, None, 2), item(pin, None, 2)], PaymentMethod::Cod),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::InsufficientStock { product_id, .. } if product_id == pin));

    assert_eq!(stock_of(&state, mug).await?, 5);
    assert_eq!(stock_of(&state, pin).await?, 1);
    assert_eq!(Orders::find().count(&state.orm).await?, 0);
    assert!(movements(&state, mug).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn checkout_rejects_empty_or_unknown_items() -> anyhow::Result<()> {
    let state = setup().await?;

    let empty = order_service::checkout(&state, &customer(), CLIENT_IP, cart(vec![], PaymentMethod::Cod))
        .await
        .unwrap_err();
    assert!(matches!(empty, AppError::BadRequest(_)));

    let ghost = Uuid::new_v4();
    let unknown = order_service::checkout(
        &state,
        &customer(),
        CLIENT_IP,
        cart(vec![item(ghost, None, 1)], PaymentMethod::Cod),
    )
    .await
    .unwrap_err();
    assert!(matches!(unknown, AppError::ProductNotFound(id) if id == ghost));
    Ok(())
}

#[tokio::test]
async fn orders_walk_the_lifecycle_to_delivered() -> anyhow::Result<()> {
    let state = setup().await?;
    let mug = common::product(&state, "Ferris Mug", "kitchen", 1200, 5).await?;
    let placed = place(&state, &customer(), vec![item(mug, None, 1)], PaymentMethod::Cod).await?;
    let id = placed.order.id;

    assert_eq!(move_to(&state, id, OrderStatus::Processing).await?, OrderStatus::Processing);
    assert_eq!(move_to(&state, id, OrderStatus::Shipped).await?, OrderStatus::Shipped);
    assert_eq!(move_to(&state, id, OrderStatus::Delivered).await?, OrderStatus::Delivered);

    // Delivered is terminal.
    for target in [OrderStatus::Cancelled, OrderStatus::Shipped, OrderStatus::Processing] {
        let err = move_to(&state, id, target).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::IllegalTransition { from: OrderStatus::Delivered, .. }
        ));
    }
    assert_eq!(status_of(&state, id).await?, OrderStatus::Delivered);
    // Delivery does not give stock back.
    assert_eq!(stock_of(&state, mug).await?, 4);
    Ok(())
}

#[tokio::test]
async fn skipping_a_step_is_rejected() -> anyhow::Result<()> {
    let state = setup().await?;
    let mug = common::product(&state, "Ferris Mug", "kitchen", 1200, 5).await?;
    let placed = place(&state, &customer(), vec![item(mug, None, 1)], PaymentMethod::Cod).await?;
    let id = placed.order.id;

    let err = move_to(&state, id, OrderStatus::Shipped).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::IllegalTransition {
            from: OrderStatus::Confirmed,
            to: OrderStatus::Shipped
        }
    ));
    assert_eq!(status_of(&state, id).await?, OrderStatus::Confirmed);

    move_to(&state, id, OrderStatus::Processing).await?;
    move_to(&state, id, OrderStatus::Shipped).await?;
    let err = move_to(&state, id, OrderStatus::Cancelled).await.unwrap_err();
    assert!(matches!(err, AppError::IllegalTransition { from: OrderStatus::Shipped, .. }));
    assert_eq!(stock_of(&state, mug).await?, 4);
    Ok(())
}

#[tokio::test]
async fn admin_cancel_from_processing_restores_every_item() -> anyhow::Result<()> {
    let state = setup().await?;
    let mug = common::product(&state, "Ferris Mug", "kitchen", 1200, 5).await?;
    let hoodie = sized_product(&state, "Axum Hoodie", 5500, &[("S", 2), ("M", 3)]).await?;
    let placed = place(
        &state,
        &customer(),
        vec![item(mug, None, 2), item(hoodie, Some("S"), 2)],
        PaymentMethod::Cod,
    )
    .await?;
    let id = placed.order.id;

    move_to(&state, id, OrderStatus::Processing).await?;
    assert_eq!(move_to(&state, id, OrderStatus::Cancelled).await?, OrderStatus::Cancelled);

    assert_eq!(stock_of(&state, mug).await?, 5);
    assert_eq!(stock_of(&state, hoodie).await?, 5);
    assert_eq!(size_stock(&state, hoodie, "S").await?, 2);

    let restored: Vec<_> = movements(&state, hoodie)
        .await?
        .into_iter()
        .filter(|row| row.movement_type == MovementType::Cancellation)
        .collect();
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].quantity, 2);
    assert_eq!(restored[0].size.as_deref(), Some("S"));

    // Cancelled is terminal.
    let err = move_to(&state, id, OrderStatus::Processing).await.unwrap_err();
    assert!(matches!(err, AppError::IllegalTransition { from: OrderStatus::Cancelled, .. }));
    Ok(())
}

#[tokio::test]
async fn failed_restock_leaves_the_order_untouched() -> anyhow::Result<()> {
    let state = setup().await?;
    let mug = common::product(&state, "Ferris Mug", "kitchen", 1200, 5).await?;
    let hoodie = sized_product(&state, "Axum Hoodie", 5500, &[("S", 2), ("M", 3)]).await?;
    let placed = place(
        &state,
        &customer(),
        vec![item(mug, None, 2), item(hoodie, Some("M"), 1)],
        PaymentMethod::Cod,
    )
    .await?;
    let id = placed.order.id;

    // The second item can no longer be restored.
    ProductSizes::delete_many()
        .filter(SizeCol::ProductId.eq(hoodie))
        .filter(SizeCol::Size.eq("M"))
        .exec(&state.orm)
        .await?;

    assert!(move_to(&state, id, OrderStatus::Cancelled).await.is_err());

    assert_eq!(status_of(&state, id).await?, OrderStatus::Confirmed);
    assert_eq!(stock_of(&state, mug).await?, 3);
    let cancellations = movements(&state, mug)
        .await?
        .into_iter()
        .filter(|row| row.movement_type == MovementType::Cancellation)
        .count();
    assert_eq!(cancellations, 0);
    Ok(())
}

#[tokio::test]
async fn customers_cancel_only_their_own_unprocessed_orders() -> anyhow::Result<()> {
    let state = setup().await?;
    let mug = common::product(&state, "Ferris Mug", "kitchen", 1200, 5).await?;
    let owner = customer();

    let first = place(&state, &owner, vec![item(mug, None, 1)], PaymentMethod::Cod).await?;
    let stranger = order_service::cancel_own_order(
        &state,
        &customer(),
        first.order.id,
        CancelOrderRequest::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(stranger, AppError::OrderNotFound));

    let cancelled = order_service::cancel_own_order(
        &state,
        &owner,
        first.order.id,
        CancelOrderRequest {
            reason: Some("changed my mind".into()),
        },
    )
    .await?
    .data
    .ok_or_else(|| anyhow::anyhow!("no data"))?;
    assert_eq!(cancelled.order.status, OrderStatus::Cancelled);
    let cancellation = cancelled
        .order
        .cancellation
        .ok_or_else(|| anyhow::anyhow!("missing cancellation"))?;
    assert_eq!(cancellation.reason, "changed my mind");
    assert_eq!(cancellation.cancelled_by, format!("user:{}", owner.user_id));
    assert_eq!(stock_of(&state, mug).await?, 5);

    let second = place(&state, &owner, vec![item(mug, None, 1)], PaymentMethod::Cod).await?;
    move_to(&state, second.order.id, OrderStatus::Processing).await?;
    let err = order_service::cancel_own_order(
        &state,
        &owner,
        second.order.id,
        CancelOrderRequest::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));
    assert_eq!(stock_of(&state, mug).await?, 4);
    Ok(())
}

#[tokio::test]
async fn payment_is_recorded_once_without_moving_status() -> anyhow::Result<()> {
    let state = setup().await?;
    let mug = common::product(&state, "Ferris Mug", "kitchen", 1200, 5).await?;
    let user = customer();
    let placed = place(&state, &user, vec![item(mug, None, 1)], PaymentMethod::Online).await?;

    let paid = order_service::pay_order(&state, &user, placed.order.id)
        .await?
        .data
        .ok_or_else(|| anyhow::anyhow!("no data"))?;
    assert_eq!(paid.order.status, OrderStatus::Confirmed);
    assert_eq!(paid.order.payment.status, Some(PaymentStatus::Paid));
    assert!(paid.order.payment.paid_at.is_some());

    let again = order_service::pay_order(&state, &user, placed.order.id)
        .await
        .unwrap_err();
    assert!(matches!(again, AppError::BadRequest(_)));
    Ok(())
}

#[tokio::test]
async fn failed_online_payment_cancels_and_restocks() -> anyhow::Result<()> {
    let state = setup().await?;
    let mug = common::product(&state, "Ferris Mug", "kitchen", 1200, 5).await?;
    let online = place(&state, &customer(), vec![item(mug, None, 2)], PaymentMethod::Online).await?;

    let outcome = order_service::record_payment_failure(&state, online.order.id).await?;
    assert_eq!(outcome.order.status, OrderStatus::Cancelled);
    assert_eq!(outcome.order.payment_status, Some(PaymentStatus::Failed));
    assert_eq!(outcome.restocked.len(), 1);
    assert!(outcome.restocked.iter().all(|w| w.is_recorded()));
    assert_eq!(stock_of(&state, mug).await?, 5);

    let rows = movements(&state, mug).await?;
    assert!(rows
        .iter()
        .any(|row| row.movement_type == MovementType::PaymentFailed && row.quantity == 2));

    let cod = place(&state, &customer(), vec![item(mug, None, 1)], PaymentMethod::Cod).await?;
    let err = order_service::record_payment_failure(&state, cod.order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
    assert_eq!(status_of(&state, cod.order.id).await?, OrderStatus::Confirmed);
    Ok(())
}

#[tokio::test]
async fn payment_failure_arriving_after_payment_leaves_the_order_alone() -> anyhow::Result<()> {
    let state = setup().await?;
    let mug = common::product(&state, "Ferris Mug", "kitchen", 1200, 5).await?;
    let placed = place(&state, &customer(), vec![item(mug, None, 2)], PaymentMethod::Online).await?;
    let id = placed.order.id;

    // Read taken while the payment was still pending.
    let stale = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| anyhow::anyhow!("order {id} missing"))?;
    order_service::mark_paid(&state.orm, id).await?;

    let request = Transition::to(OrderStatus::Cancelled, Actor::System)
        .reason("Payment failed")
        .restock_as(MovementType::PaymentFailed)
        .payment_status(PaymentStatus::Failed)
        .unpaid_only();
    let txn = state.orm.begin().await?;
    let err = order_state::transition_in(&txn, &state.ledger, stale, &request)
        .await
        .unwrap_err();
    txn.rollback().await?;
    assert!(matches!(err, AppError::BadRequest(_)));

    let err = order_service::record_payment_failure(&state, id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| anyhow::anyhow!("order {id} missing"))?;
    assert_eq!(order.status, OrderStatus::Confirmed);
    assert_eq!(order.payment_status, Some(PaymentStatus::Paid));
    assert_eq!(stock_of(&state, mug).await?, 3);
    assert!(movements(&state, mug)
        .await?
        .iter()
        .all(|row| row.movement_type != MovementType::PaymentFailed));
    Ok(())
}

#[tokio::test]
async fn returns_restock_up_to_the_delivered_quantity() -> anyhow::Result<()> {
    let state = setup().await?;
    let mug = common::product(&state, "Ferris Mug", "kitchen", 1200, 5).await?;
    let placed = place(&state, &customer(), vec![item(mug, None, 3)], PaymentMethod::Cod).await?;
    let id = placed.order.id;
    let staff = admin();

    let early = admin_service::record_return(
        &state,
        &staff,
        id,
        ReturnRequest {
            product_id: mug,
            size: None,
            quantity: 1,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(early, AppError::BadRequest(_)));

    move_to(&state, id, OrderStatus::Processing).await?;
    move_to(&state, id, OrderStatus::Shipped).await?;
    move_to(&state, id, OrderStatus::Delivered).await?;

    let movement = admin_service::record_return(
        &state,
        &staff,
        id,
        ReturnRequest {
            product_id: mug,
            size: None,
            quantity: 2,
        },
    )
    .await?
    .data
    .ok_or_else(|| anyhow::anyhow!("no data"))?;
    assert_eq!(movement.movement_type, MovementType::Return);
    assert_eq!(movement.quantity, 2);
    assert_eq!(stock_of(&state, mug).await?, 4);

    let too_many = admin_service::record_return(
        &state,
        &staff,
        id,
        ReturnRequest {
            product_id: mug,
            size: None,
            quantity: 2,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(too_many, AppError::BadRequest(_)));
    assert_eq!(stock_of(&state, mug).await?, 4);
    assert_eq!(status_of(&state, id).await?, OrderStatus::Delivered);
    Ok(())
}

#[tokio::test]
async fn admin_endpoints_require_the_admin_role() -> anyhow::Result<()> {
    let state = setup().await?;
    let mug = common::product(&state, "Ferris Mug", "kitchen", 1200, 5).await?;
    let user = customer();
    let placed = place(&state, &user, vec![item(mug, None, 1)], PaymentMethod::Cod).await?;

    let err = admin_service::update_order_status(
        &state,
        &user,
        placed.order.id,
        UpdateOrderStatusRequest {
            status: OrderStatus::Cancelled,
            reason: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));
    assert_eq!(status_of(&state, placed.order.id).await?, OrderStatus::Confirmed);
    Ok(())
}
