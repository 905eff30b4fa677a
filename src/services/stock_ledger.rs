//! The only writer of `products.stock` and `product_sizes.stock`.
//!
//! Every change is a signed delta applied with a conditional `UPDATE`, never a
//! read-modify-write, so concurrent reservations and restorations commute.
//! Each applied delta is paired with exactly one `stock_movements` row.

use std::str::FromStr;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use sea_orm::sea_query::Expr;
use tracing::{debug, error};
use uuid::Uuid;

use crate::{
    entity::{
        product_sizes::{Column as SizeCol, Entity as ProductSizes},
        products::{Column as ProdCol, Entity as Products},
        sea_orm_active_enums::MovementType,
        stock_movements::{
            ActiveModel as MovementActive, Column as MovementCol, Entity as StockMovements,
            Model as MovementModel,
        },
    },
    error::{AppError, AppResult},
    models::StockMovement,
};

/// How the ledger row relates to the stock update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LedgerMode {
    /// Stock update and ledger row commit together.
    #[default]
    Atomic,
    /// The stock update is the transactional boundary; the ledger row is
    /// written after commit and a failure is logged and reported, not raised.
    BestEffort,
}

impl FromStr for LedgerMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "atomic" => Ok(LedgerMode::Atomic),
            "best_effort" | "best-effort" => Ok(LedgerMode::BestEffort),
            other => Err(anyhow::anyhow!("unknown ledger mode `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StockChange {
    pub product_id: Uuid,
    pub size: Option<String>,
    pub delta: i32,
    pub movement_type: MovementType,
    pub order_id: Option<Uuid>,
    pub actor: Option<String>,
    pub note: String,
}

impl StockChange {
    pub fn new(
        product_id: Uuid,
        size: Option<String>,
        delta: i32,
        movement_type: MovementType,
    ) -> Self {
        let size = size
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Self {
            product_id,
            size,
            delta,
            movement_type,
            order_id: None,
            actor: None,
            note: String::new(),
        }
    }

    pub fn for_order(mut self, order_id: Uuid) -> Self {
        self.order_id = Some(order_id);
        self
    }

    pub fn by(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    fn check_sign(&self) -> AppResult<()> {
        if self.delta == 0 {
            return Err(AppError::BadRequest("delta must not be 0".into()));
        }
        if self.movement_type.is_restorative() && self.delta < 0 {
            return Err(AppError::BadRequest(format!(
                "{} movements must restore stock",
                self.movement_type
            )));
        }
        if self.movement_type == MovementType::Sale && self.delta > 0 {
            return Err(AppError::BadRequest(
                "sale movements must reserve stock".into(),
            ));
        }
        Ok(())
    }
}

/// A delta whose stock update has been applied but whose ledger row may
/// still be outstanding.
#[derive(Debug)]
pub enum Pending {
    Recorded(MovementModel),
    Deferred(StockChange),
}

/// Result of the ledger half of a stock change.
#[derive(Debug)]
pub enum LedgerWrite {
    Recorded(StockMovement),
    Failed { change: StockChange, error: String },
}

impl LedgerWrite {
    pub fn is_recorded(&self) -> bool {
        matches!(self, LedgerWrite::Recorded(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockLevels {
    pub stock: i32,
    pub size_stock: Option<i32>,
}

#[derive(Debug)]
pub struct StockDeltaOutcome {
    pub product_id: Uuid,
    pub levels: StockLevels,
    pub ledger: LedgerWrite,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StockLedger {
    mode: LedgerMode,
}

impl StockLedger {
    pub fn new(mode: LedgerMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> LedgerMode {
        self.mode
    }

    /// Apply one delta as its own unit of work.
    pub async fn apply_stock_delta(
        &self,
        db: &DatabaseConnection,
        change: StockChange,
    ) -> AppResult<StockDeltaOutcome> {
        let product_id = change.product_id;
        let size = change.size.clone();

        let txn = db.begin().await?;
        let pending = self.apply_in(&txn, change).await?;
        let levels = current_levels(&txn, product_id, size.as_deref()).await?;
        txn.commit().await?;

        let ledger = self.settle_one(db, pending).await;
        Ok(StockDeltaOutcome {
            product_id,
            levels,
            ledger,
        })
    }

    /// Apply a delta on `conn`, which must be a transaction whenever the
    /// change names a size: the aggregate and size rows move together or
    /// not at all. In atomic mode the ledger row is written on `conn` too.
    pub async fn apply_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        change: StockChange,
    ) -> AppResult<Pending> {
        change.check_sign()?;
        adjust_levels(conn, &change).await?;

        debug!(
            product_id = %change.product_id,
            size = ?change.size,
            delta = change.delta,
            movement_type = %change.movement_type,
            "stock adjusted"
        );

        match self.mode {
            LedgerMode::Atomic => Ok(Pending::Recorded(insert_movement(conn, &change).await?)),
            LedgerMode::BestEffort => Ok(Pending::Deferred(change)),
        }
    }

    /// Flush ledger rows left outstanding by [`StockLedger::apply_in`].
    /// Call only after the stock updates have committed.
    pub async fn settle(&self, db: &DatabaseConnection, pending: Vec<Pending>) -> Vec<LedgerWrite> {
        let mut writes = Vec::with_capacity(pending.len());
        for item in pending {
            writes.push(self.settle_one(db, item).await);
        }
        writes
    }

    async fn settle_one(&self, db: &DatabaseConnection, pending: Pending) -> LedgerWrite {
        match pending {
            Pending::Recorded(model) => LedgerWrite::Recorded(model.into()),
            Pending::Deferred(change) => match insert_movement(db, &change).await {
                Ok(model) => LedgerWrite::Recorded(model.into()),
                Err(err) => {
                    error!(
                        error = %err,
                        product_id = %change.product_id,
                        size = ?change.size,
                        delta = change.delta,
                        movement_type = %change.movement_type,
                        order_id = ?change.order_id,
                        "stock ledger write failed after stock update committed"
                    );
                    LedgerWrite::Failed {
                        change,
                        error: err.to_string(),
                    }
                }
            },
        }
    }
}

async fn adjust_levels<C: ConnectionTrait>(conn: &C, change: &StockChange) -> AppResult<()> {
    let product_id = change.product_id;
    let guarded = change.delta < 0;

    if change.size.is_none() {
        let sized = ProductSizes::find()
            .filter(SizeCol::ProductId.eq(product_id))
            .count(conn)
            .await?;
        if sized > 0 {
            return Err(AppError::BadRequest(format!(
                "size is required for product {product_id}"
            )));
        }
    }

    let mut update = Products::update_many()
        .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).add(change.delta))
        .filter(ProdCol::Id.eq(product_id));
    if guarded {
        update = update.filter(ProdCol::Stock.gte(-change.delta));
    }
    if update.exec(conn).await?.rows_affected == 0 {
        return Err(match Products::find_by_id(product_id).one(conn).await? {
            None => AppError::ProductNotFound(product_id),
            Some(_) => AppError::InsufficientStock {
                product_id,
                size: None,
            },
        });
    }

    if let Some(size) = change.size.as_deref() {
        let mut update = ProductSizes::update_many()
            .col_expr(SizeCol::Stock, Expr::col(SizeCol::Stock).add(change.delta))
            .filter(SizeCol::ProductId.eq(product_id))
            .filter(SizeCol::Size.eq(size));
        if guarded {
            update = update.filter(SizeCol::Stock.gte(-change.delta));
        }
        if update.exec(conn).await?.rows_affected == 0 {
            let known = ProductSizes::find()
                .filter(SizeCol::ProductId.eq(product_id))
                .filter(SizeCol::Size.eq(size))
                .count(conn)
                .await?;
            return Err(if known == 0 {
                AppError::BadRequest(format!("product {product_id} has no size {size}"))
            } else {
                AppError::InsufficientStock {
                    product_id,
                    size: Some(size.to_string()),
                }
            });
        }
    }

    Ok(())
}

async fn insert_movement<C: ConnectionTrait>(
    conn: &C,
    change: &StockChange,
) -> Result<MovementModel, DbErr> {
    MovementActive {
        id: Set(Uuid::new_v4()),
        product_id: Set(change.product_id),
        movement_type: Set(change.movement_type),
        quantity: Set(change.delta),
        size: Set(change.size.clone()),
        order_id: Set(change.order_id),
        actor: Set(change.actor.clone()),
        note: Set(change.note.clone()),
        created_at: Set(Utc::now().into()),
    }
    .insert(conn)
    .await
}

pub async fn current_levels<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    size: Option<&str>,
) -> AppResult<StockLevels> {
    let product = Products::find_by_id(product_id)
        .one(conn)
        .await?
        .ok_or(AppError::ProductNotFound(product_id))?;

    let size_stock = match size {
        Some(size) => ProductSizes::find()
            .filter(SizeCol::ProductId.eq(product_id))
            .filter(SizeCol::Size.eq(size))
            .one(conn)
            .await?
            .map(|row| row.stock),
        None => None,
    };

    Ok(StockLevels {
        stock: product.stock,
        size_stock,
    })
}

/// Ledger rows for one product, newest first, with the total row count.
pub async fn list_movements(
    db: &DatabaseConnection,
    product_id: Uuid,
    limit: u64,
    offset: u64,
) -> AppResult<(Vec<MovementModel>, u64)> {
    let finder = StockMovements::find()
        .filter(MovementCol::ProductId.eq(product_id))
        .order_by_desc(MovementCol::CreatedAt);

    let total = finder.clone().count(db).await?;
    let rows = finder.limit(limit).offset(offset).all(db).await?;
    Ok((rows, total))
}
