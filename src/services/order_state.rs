//! Order status transitions.
//!
//! [`transition_in`] is the only code that writes `orders.status`. The write
//! is a compare-and-set on the status that was read, so two actors racing
//! to move the same order cannot both succeed. Cancelling an order that
//! still holds reserved stock restores every item through the ledger in the
//! same transaction as the status write.

use std::fmt;

use chrono::Utc;
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, DatabaseTransaction, EntityTrait, QueryFilter, QuerySelect,
    TransactionTrait,
};
use sea_orm::sea_query::{Expr, LockType};
use tracing::info;
use uuid::Uuid;

use crate::{
    entity::{
        order_items::{Column as OrderItemCol, Entity as OrderItems},
        orders::{Column as OrderCol, Entity as Orders, Model as OrderModel},
        sea_orm_active_enums::{MovementType, OrderStatus, PaymentStatus},
    },
    error::{AppError, AppResult},
    services::stock_ledger::{LedgerWrite, Pending, StockChange, StockLedger},
};

impl OrderStatus {
    pub fn allowed_transitions(self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::Confirmed => &[OrderStatus::Processing, OrderStatus::Cancelled],
            OrderStatus::Processing => &[OrderStatus::Shipped, OrderStatus::Cancelled],
            OrderStatus::Shipped => &[OrderStatus::Delivered],
            OrderStatus::Delivered | OrderStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, target: OrderStatus) -> bool {
        self.allowed_transitions().contains(&target)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Pre-shipment states still hold a stock reservation.
    pub fn holds_reservation(self) -> bool {
        matches!(self, OrderStatus::Confirmed | OrderStatus::Processing)
    }
}

/// Who asked for a change. Recorded on ledger rows and cancellations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    System,
    Admin(Uuid),
    Customer(Uuid),
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::System => f.write_str("system"),
            Actor::Admin(id) => write!(f, "admin:{id}"),
            Actor::Customer(id) => write!(f, "user:{id}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub target: OrderStatus,
    pub actor: Actor,
    pub reason: Option<String>,
    /// Ledger type used when a cancellation restores stock.
    pub restock_as: MovementType,
    /// Payment status written together with the new status, if any.
    pub payment_status: Option<PaymentStatus>,
    /// Refuse the change once the order has been paid.
    pub unpaid_only: bool,
}

impl Transition {
    pub fn to(target: OrderStatus, actor: Actor) -> Self {
        Self {
            target,
            actor,
            reason: None,
            restock_as: MovementType::Cancellation,
            payment_status: None,
            unpaid_only: false,
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn restock_as(mut self, movement_type: MovementType) -> Self {
        self.restock_as = movement_type;
        self
    }

    pub fn payment_status(mut self, status: PaymentStatus) -> Self {
        self.payment_status = Some(status);
        self
    }

    pub fn unpaid_only(mut self) -> Self {
        self.unpaid_only = true;
        self
    }
}

#[derive(Debug)]
pub struct TransitionOutcome {
    pub order: OrderModel,
    pub restocked: Vec<LedgerWrite>,
}

/// Load, transition and commit one order.
pub async fn transition(
    db: &DatabaseConnection,
    ledger: &StockLedger,
    order_id: Uuid,
    request: Transition,
) -> AppResult<TransitionOutcome> {
    let txn = db.begin().await?;
    let order = Orders::find_by_id(order_id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::OrderNotFound)?;

    let (order, pending) = transition_in(&txn, ledger, order, &request).await?;
    txn.commit().await?;

    let restocked = ledger.settle(db, pending).await;
    Ok(TransitionOutcome { order, restocked })
}

/// Apply `request` to `order` inside `txn`. Nothing is visible until the
/// caller commits; dropping the transaction on error rolls back the status
/// write and every restored item together.
pub async fn transition_in(
    txn: &DatabaseTransaction,
    ledger: &StockLedger,
    order: OrderModel,
    request: &Transition,
) -> AppResult<(OrderModel, Vec<Pending>)> {
    let from = order.status;
    let to = request.target;
    if !from.can_transition_to(to) {
        return Err(AppError::IllegalTransition { from, to });
    }

    let now = Utc::now().fixed_offset();
    let mut update = Orders::update_many()
        .col_expr(OrderCol::Status, Expr::value(to))
        .col_expr(OrderCol::UpdatedAt, Expr::value(now))
        .filter(OrderCol::Id.eq(order.id))
        .filter(OrderCol::Status.eq(from));

    if request.unpaid_only {
        if order.payment_status == Some(PaymentStatus::Paid) {
            return Err(AppError::BadRequest("Order already paid".into()));
        }
        update = update.filter(
            Condition::any()
                .add(OrderCol::PaymentStatus.is_null())
                .add(OrderCol::PaymentStatus.eq(PaymentStatus::Pending)),
        );
    }
    if let Some(payment_status) = request.payment_status {
        update = update.col_expr(OrderCol::PaymentStatus, Expr::value(payment_status));
    }
    if to == OrderStatus::Cancelled {
        let reason = request
            .reason
            .clone()
            .unwrap_or_else(|| "cancelled".to_string());
        update = update
            .col_expr(OrderCol::CancelReason, Expr::value(reason))
            .col_expr(OrderCol::CancelledAt, Expr::value(now))
            .col_expr(OrderCol::CancelledBy, Expr::value(request.actor.to_string()));
    }

    if update.exec(txn).await?.rows_affected == 0 {
        // Someone else moved or paid the order since it was read.
        let current = Orders::find_by_id(order.id)
            .one(txn)
            .await?
            .ok_or(AppError::OrderNotFound)?;
        if current.status == from && request.unpaid_only {
            return Err(AppError::BadRequest("Order already paid".into()));
        }
        return Err(AppError::IllegalTransition {
            from: current.status,
            to,
        });
    }

    let mut pending = Vec::new();
    if to == OrderStatus::Cancelled && from.holds_reservation() {
        let items = OrderItems::find()
            .filter(OrderItemCol::OrderId.eq(order.id))
            .all(txn)
            .await?;
        for item in items {
            let change = StockChange::new(
                item.product_id,
                item.size.clone(),
                item.quantity,
                request.restock_as,
            )
            .for_order(order.id)
            .by(request.actor.to_string())
            .note(format!("order {} cancelled", order.order_code));
            pending.push(ledger.apply_in(txn, change).await?);
        }
    }

    let updated = Orders::find_by_id(order.id)
        .one(txn)
        .await?
        .ok_or(AppError::OrderNotFound)?;

    info!(
        order_id = %order.id,
        from = %from,
        to = %to,
        actor = %request.actor,
        restored_items = pending.len(),
        "order status changed"
    );

    Ok((updated, pending))
}
