mod common;

use sea_orm::ConnectionTrait;
use storefront_core::{
    entity::sea_orm_active_enums::MovementType,
    error::AppError,
    services::stock_ledger::{self, LedgerMode, LedgerWrite, StockChange},
};
use uuid::Uuid;

use common::{movements, setup, setup_with, size_stock, sized_product, stock_of};

#[tokio::test]
async fn reservation_never_drives_stock_negative() -> anyhow::Result<()> {
    let state = setup().await?;
    let id = common::product(&state, "Ferris Mug", "kitchen", 1200, 3).await?;

    let outcome = state
        .ledger
        .apply_stock_delta(&state.orm, StockChange::new(id, None, -2, MovementType::Sale))
        .await?;
    assert_eq!(outcome.levels.stock, 1);
    assert!(outcome.ledger.is_recorded());

    let err = state
        .ledger
        .apply_stock_delta(&state.orm, StockChange::new(id, None, -2, MovementType::Sale))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InsufficientStock { product_id, size: None } if product_id == id));

    assert_eq!(stock_of(&state, id).await?, 1);
    let rows = movements(&state, id).await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].quantity, -2);
    assert_eq!(rows[0].movement_type, MovementType::Sale);
    Ok(())
}

#[tokio::test]
async fn sized_stock_moves_with_the_aggregate() -> anyhow::Result<()> {
    let state = setup().await?;
    let id = sized_product(&state, "Axum Hoodie", 5500, &[("S", 3), ("M", 2)]).await?;

    let outcome = state
        .ledger
        .apply_stock_delta(
            &state.orm,
            StockChange::new(id, Some("S".into()), -2, MovementType::Sale),
        )
        .await?;
    assert_eq!(outcome.levels.stock, 3);
    assert_eq!(outcome.levels.size_stock, Some(1));

    // Aggregate has 3 left but size S only 1: nothing moves.
    let err = state
        .ledger
        .apply_stock_delta(
            &state.orm,
            StockChange::new(id, Some("S".into()), -2, MovementType::Sale),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InsufficientStock { size: Some(ref s), .. } if s == "S"));
    assert_eq!(stock_of(&state, id).await?, 3);
    assert_eq!(size_stock(&state, id, "S").await?, 1);

    state
        .ledger
        .apply_stock_delta(
            &state.orm,
            StockChange::new(id, Some("M".into()), 1, MovementType::Return),
        )
        .await?;
    assert_eq!(stock_of(&state, id).await?, 4);
    assert_eq!(size_stock(&state, id, "M").await?, 3);
    assert_eq!(
        stock_of(&state, id).await?,
        size_stock(&state, id, "S").await? + size_stock(&state, id, "M").await?
    );
    Ok(())
}

#[tokio::test]
async fn sized_products_reject_missing_or_unknown_sizes() -> anyhow::Result<()> {
    let state = setup().await?;
    let id = sized_product(&state, "Ferris Tee", 1800, &[("M", 4)]).await?;

    let missing = state
        .ledger
        .apply_stock_delta(&state.orm, StockChange::new(id, None, -1, MovementType::Sale))
        .await
        .unwrap_err();
    assert!(matches!(missing, AppError::BadRequest(_)));

    let unknown = state
        .ledger
        .apply_stock_delta(
            &state.orm,
            StockChange::new(id, Some("XL".into()), -1, MovementType::Sale),
        )
        .await
        .unwrap_err();
    assert!(matches!(unknown, AppError::BadRequest(_)));

    // The aggregate update for the unknown size was rolled back.
    assert_eq!(stock_of(&state, id).await?, 4);
    assert!(movements(&state, id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn unknown_product_is_reported() -> anyhow::Result<()> {
    let state = setup().await?;
    let missing = Uuid::new_v4();
    let err = state
        .ledger
        .apply_stock_delta(
            &state.orm,
            StockChange::new(missing, None, 5, MovementType::ManualAdjustment),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ProductNotFound(id) if id == missing));
    Ok(())
}

#[tokio::test]
async fn concurrent_reservations_never_oversell() -> anyhow::Result<()> {
    let state = setup().await?;
    let id = common::product(&state, "Limited Pin", "accessories", 500, 10).await?;

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..20 {
        let state = state.clone();
        tasks.spawn(async move {
            state
                .ledger
                .apply_stock_delta(&state.orm, StockChange::new(id, None, -1, MovementType::Sale))
                .await
        });
    }

    let mut reserved = 0;
    let mut refused = 0;
    while let Some(result) = tasks.join_next().await {
        match result? {
            Ok(_) => reserved += 1,
            Err(AppError::InsufficientStock { .. }) => refused += 1,
            Err(other) => return Err(other.into()),
        }
    }

    assert_eq!(reserved, 10);
    assert_eq!(refused, 10);
    assert_eq!(stock_of(&state, id).await?, 0);
    assert_eq!(movements(&state, id).await?.len(), 10);
    Ok(())
}

#[tokio::test]
async fn atomic_mode_rolls_back_stock_when_the_ledger_write_fails() -> anyhow::Result<()> {
    let state = setup_with(LedgerMode::Atomic).await?;
    let id = common::product(&state, "Ferris Mug", "kitchen", 1200, 5).await?;
    state.orm.execute_unprepared("DROP TABLE stock_movements").await?;

    let err = state
        .ledger
        .apply_stock_delta(&state.orm, StockChange::new(id, None, -1, MovementType::Sale))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::OrmError(_)));
    assert_eq!(stock_of(&state, id).await?, 5);
    Ok(())
}

#[tokio::test]
async fn best_effort_mode_keeps_stock_and_reports_the_missing_row() -> anyhow::Result<()> {
    let state = setup_with(LedgerMode::BestEffort).await?;
    let id = common::product(&state, "Ferris Mug", "kitchen", 1200, 5).await?;
    state.orm.execute_unprepared("DROP TABLE stock_movements").await?;

    let outcome = state
        .ledger
        .apply_stock_delta(&state.orm, StockChange::new(id, None, -1, MovementType::Sale))
        .await?;
    assert_eq!(outcome.levels.stock, 4);
    match outcome.ledger {
        LedgerWrite::Failed { change, .. } => {
            assert_eq!(change.delta, -1);
            assert_eq!(change.movement_type, MovementType::Sale);
        }
        LedgerWrite::Recorded(_) => panic!("ledger row should not exist"),
    }
    assert_eq!(stock_of(&state, id).await?, 4);
    Ok(())
}

#[tokio::test]
async fn movements_are_listed_newest_first() -> anyhow::Result<()> {
    let state = setup().await?;
    let id = common::product(&state, "Sticker Pack", "accessories", 300, 10).await?;

    for delta in [-1, -2, -3] {
        state
            .ledger
            .apply_stock_delta(&state.orm, StockChange::new(id, None, delta, MovementType::Sale))
            .await?;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let (rows, total) = stock_ledger::list_movements(&state.orm, id, 2, 0).await?;
    assert_eq!(total, 3);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].quantity, -3);
    assert_eq!(rows[1].quantity, -2);
    assert_eq!(stock_of(&state, id).await?, 4);
    Ok(())
}
