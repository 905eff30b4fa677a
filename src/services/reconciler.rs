//! Unwinds reservations held by online orders that were never paid.
//!
//! A sweep selects `confirmed` non-COD orders whose payment is still pending
//! past the grace period and cancels each one in its own transaction,
//! restoring stock as `abandoned_order`. Orders cancelled by an earlier or
//! concurrent sweep no longer match the selection, so re-running is safe.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    TransactionTrait,
};
use sea_orm::sea_query::LockType;
use serde::Serialize;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entity::{
        orders::{Column as OrderCol, Entity as Orders, Model as OrderModel},
        sea_orm_active_enums::{MovementType, OrderStatus, PaymentMethod, PaymentStatus},
    },
    error::{AppError, AppResult},
    services::{
        order_state::{Actor, Transition, transition_in},
        stock_ledger::StockLedger,
    },
};

pub const ABANDON_REASON: &str = "Payment not completed in time";

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub interval: Duration,
    pub grace_period: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10 * 60),
            grace_period: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct SweepSummary {
    pub scanned: u64,
    pub cancelled: u64,
    /// Orders that stopped qualifying between selection and cancellation.
    pub skipped: u64,
    pub failed: u64,
}

enum Outcome {
    Cancelled,
    Skipped,
}

/// Run one sweep against the current time.
pub async fn run_reconciliation_sweep(
    db: &DatabaseConnection,
    ledger: &StockLedger,
    config: &ReconcilerConfig,
) -> AppResult<SweepSummary> {
    sweep_at(db, ledger, config.grace_period, Utc::now()).await
}

pub async fn sweep_at(
    db: &DatabaseConnection,
    ledger: &StockLedger,
    grace_period: Duration,
    now: DateTime<Utc>,
) -> AppResult<SweepSummary> {
    let grace = chrono::Duration::from_std(grace_period)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid grace period: {e}")))?;
    let cutoff = now - grace;

    let candidates = Orders::find()
        .filter(abandoned_condition(cutoff))
        .order_by_asc(OrderCol::CreatedAt)
        .all(db)
        .await?;

    let mut summary = SweepSummary {
        scanned: candidates.len() as u64,
        ..SweepSummary::default()
    };

    for order in candidates {
        let order_id = order.id;
        match cancel_abandoned(db, ledger, order_id, cutoff).await {
            Ok(Outcome::Cancelled) => summary.cancelled += 1,
            Ok(Outcome::Skipped) => summary.skipped += 1,
            Err(err) => {
                summary.failed += 1;
                error!(order_id = %order_id, error = %err, "failed to cancel abandoned order");
            }
        }
    }

    if summary.scanned > 0 {
        info!(
            scanned = summary.scanned,
            cancelled = summary.cancelled,
            skipped = summary.skipped,
            failed = summary.failed,
            "reconciliation sweep finished"
        );
    } else {
        debug!("reconciliation sweep found nothing to do");
    }

    Ok(summary)
}

fn abandoned_condition(cutoff: DateTime<Utc>) -> Condition {
    Condition::all()
        .add(OrderCol::Status.eq(OrderStatus::Confirmed))
        .add(OrderCol::PaymentMethod.ne(PaymentMethod::Cod))
        .add(
            Condition::any()
                .add(OrderCol::PaymentStatus.is_null())
                .add(OrderCol::PaymentStatus.eq(PaymentStatus::Pending)),
        )
        .add(OrderCol::CreatedAt.lt(cutoff.fixed_offset()))
}

fn still_abandoned(order: &OrderModel, cutoff: DateTime<Utc>) -> bool {
    order.status == OrderStatus::Confirmed
        && order.payment_method != PaymentMethod::Cod
        && matches!(order.payment_status, None | Some(PaymentStatus::Pending))
        && order.created_at.with_timezone(&Utc) < cutoff
}

async fn cancel_abandoned(
    db: &DatabaseConnection,
    ledger: &StockLedger,
    order_id: Uuid,
    cutoff: DateTime<Utc>,
) -> AppResult<Outcome> {
    let txn = db.begin().await?;

    let order = Orders::find_by_id(order_id)
        .lock(LockType::Update)
        .one(&txn)
        .await?;
    let order = match order {
        Some(o) if still_abandoned(&o, cutoff) => o,
        _ => return Ok(Outcome::Skipped),
    };

    let request = Transition::to(OrderStatus::Cancelled, Actor::System)
        .reason(ABANDON_REASON)
        .restock_as(MovementType::AbandonedOrder)
        .payment_status(PaymentStatus::Expired)
        .unpaid_only();

    let pending = match transition_in(&txn, ledger, order, &request).await {
        Ok((_, pending)) => pending,
        Err(AppError::IllegalTransition { from, .. }) => {
            debug!(order_id = %order_id, status = %from, "order moved before it could be expired");
            return Ok(Outcome::Skipped);
        }
        Err(AppError::BadRequest(_)) => {
            debug!(order_id = %order_id, "order was paid before it could be expired");
            return Ok(Outcome::Skipped);
        }
        Err(err) => return Err(err),
    };
    txn.commit().await?;

    for write in ledger.settle(db, pending).await {
        if !write.is_recorded() {
            warn!(order_id = %order_id, "abandoned order restock missing its ledger row");
        }
    }

    Ok(Outcome::Cancelled)
}

/// Drive [`run_reconciliation_sweep`] on a fixed cadence until the runtime stops.
pub fn spawn(db: DatabaseConnection, ledger: StockLedger, config: ReconcilerConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            interval_secs = config.interval.as_secs(),
            grace_secs = config.grace_period.as_secs(),
            "reconciler started"
        );
        loop {
            ticker.tick().await;
            if let Err(err) = run_reconciliation_sweep(&db, &ledger, &config).await {
                warn!(error = %err, transient = err.is_transient(), "reconciliation sweep aborted");
            }
        }
    })
}
