use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
};
use sea_orm::sea_query::{Expr, LikeExpr};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dto::coupons::CartLine,
    entity::{
        coupons::{Column as CouponCol, Entity as Coupons, Model as CouponModel},
        orders::{Column as OrderCol, Entity as Orders},
        products::{Column as ProdCol, Entity as Products},
        sea_orm_active_enums::{CouponType, OrderStatus},
    },
    error::{AppError, AppResult},
    state::AppState,
};

/// Number of leading characters used to narrow the candidate set.
const PREFIX_LEN: usize = 3;
const LIKE_ESCAPE: char = '\\';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouponQuote {
    pub code: String,
    pub discount: i64,
    pub applicable_subtotal: i64,
}

pub fn normalize_code(raw: &str) -> AppResult<String> {
    let code = raw.trim().to_uppercase();
    if code.is_empty() {
        return Err(AppError::EmptyCode);
    }
    Ok(code)
}

/// Escape `LIKE` wildcards so a code is matched literally.
pub fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | LIKE_ESCAPE) {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(ch);
    }
    escaped
}

/// Sum of `price * quantity` over `lines`, refusing carts whose total does
/// not fit in an `i64`.
pub fn lines_total<'a>(lines: impl IntoIterator<Item = &'a CartLine>) -> AppResult<i64> {
    lines.into_iter().try_fold(0i64, |total, line| {
        line.price
            .checked_mul(i64::from(line.quantity))
            .and_then(|amount| total.checked_add(amount))
            .ok_or_else(|| AppError::BadRequest("cart has invalid items".into()))
    })
}

/// Compare without an early exit on the first differing byte.
/// Lengths are not secret, so unequal lengths return at once.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Find the stored coupon for a normalized code.
///
/// The prefix query only narrows the scan. Every candidate is compared in
/// full, and the loop never breaks early, so the time taken does not reveal
/// where in the candidate list a match sat.
pub async fn find_match<C: ConnectionTrait>(
    conn: &C,
    code: &str,
) -> AppResult<Option<CouponModel>> {
    let prefix: String = code.chars().take(PREFIX_LEN).collect();
    let candidates = Coupons::find()
        .filter(
            CouponCol::Code
                .like(LikeExpr::new(format!("{}%", escape_like(&prefix))).escape(LIKE_ESCAPE)),
        )
        .all(conn)
        .await?;

    let mut matched = None;
    for candidate in candidates {
        if constant_time_eq(candidate.code.as_bytes(), code.as_bytes()) && matched.is_none() {
            matched = Some(candidate);
        }
    }
    Ok(matched)
}

/// Discount for `applicable_subtotal`, rounded once, half away from zero.
///
/// Work happens in hundredths of the currency unit so the percentage never
/// passes through a float or an intermediate rounding.
pub fn compute_discount(
    coupon_type: CouponType,
    value: i64,
    max_discount: Option<i64>,
    applicable_subtotal: i64,
) -> i64 {
    if applicable_subtotal <= 0 || value <= 0 {
        return 0;
    }
    let subtotal_hundredths = applicable_subtotal.saturating_mul(100);
    let mut hundredths = match coupon_type {
        CouponType::Flat => value.saturating_mul(100),
        CouponType::Percent => {
            let raw = applicable_subtotal.saturating_mul(value);
            match max_discount {
                Some(cap) => raw.min(cap.max(0).saturating_mul(100)),
                None => raw,
            }
        }
    };
    hundredths = hundredths.min(subtotal_hundredths);
    (hundredths + 50) / 100
}

/// Rule checks for a matched coupon, in order, each failing fast.
pub async fn evaluate<C: ConnectionTrait>(
    conn: &C,
    coupon: &CouponModel,
    cart_total: i64,
    user_id: Uuid,
    lines: &[CartLine],
    now: DateTime<Utc>,
) -> AppResult<CouponQuote> {
    if !coupon.is_active {
        return Err(AppError::CouponInactive);
    }
    if coupon.valid_from.with_timezone(&Utc) > now {
        return Err(AppError::CouponNotYetValid);
    }
    if now > coupon.expiry.with_timezone(&Utc) {
        return Err(AppError::CouponExpired);
    }
    if cart_total < coupon.min_order {
        return Err(AppError::MinOrderNotMet {
            min_order: coupon.min_order,
        });
    }
    if let Some(limit) = coupon.usage_limit {
        if coupon.used_count >= limit {
            return Err(AppError::UsageLimitReached);
        }
    }
    if let Some(per_user) = coupon.per_user_limit {
        let used = Orders::find()
            .filter(OrderCol::UserId.eq(user_id))
            .filter(OrderCol::CouponCode.eq(coupon.code.as_str()))
            .filter(OrderCol::Status.ne(OrderStatus::Cancelled))
            .count(conn)
            .await?;
        if used >= per_user.max(0) as u64 {
            return Err(AppError::PerUserLimitReached);
        }
    }
    if coupon.first_order_only {
        let prior = Orders::find()
            .filter(OrderCol::UserId.eq(user_id))
            .filter(OrderCol::Status.ne(OrderStatus::Cancelled))
            .count(conn)
            .await?;
        if prior > 0 {
            return Err(AppError::FirstOrderOnlyViolation);
        }
    }

    let categories = applicable_categories(coupon)?;
    let applicable_subtotal = if categories.is_empty() {
        cart_total
    } else {
        let subtotal = category_subtotal(conn, &categories, lines).await?;
        if subtotal == 0 {
            return Err(AppError::NoEligibleItems);
        }
        // Lines come from the client; the stated total bounds them.
        subtotal.min(cart_total)
    };

    let discount = compute_discount(
        coupon.coupon_type,
        coupon.value,
        coupon.max_discount,
        applicable_subtotal,
    );

    Ok(CouponQuote {
        code: coupon.code.clone(),
        discount,
        applicable_subtotal,
    })
}

fn applicable_categories(coupon: &CouponModel) -> AppResult<HashSet<String>> {
    if coupon.applicable_categories.is_null() {
        return Ok(HashSet::new());
    }
    let names: Vec<String> = serde_json::from_value(coupon.applicable_categories.clone())
        .map_err(|e| {
            AppError::Internal(anyhow::anyhow!(
                "coupon {} has malformed categories: {e}",
                coupon.id
            ))
        })?;
    Ok(names
        .into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect())
}

async fn category_subtotal<C: ConnectionTrait>(
    conn: &C,
    categories: &HashSet<String>,
    lines: &[CartLine],
) -> AppResult<i64> {
    if lines.is_empty() {
        return Ok(0);
    }
    let ids: Vec<Uuid> = lines.iter().map(|line| line.product_id).collect();
    let product_categories: HashMap<Uuid, String> = Products::find()
        .filter(ProdCol::Id.is_in(ids))
        .all(conn)
        .await?
        .into_iter()
        .map(|p| (p.id, p.category))
        .collect();

    lines_total(lines.iter().filter(|line| {
        product_categories
            .get(&line.product_id)
            .is_some_and(|category| categories.contains(category))
    }))
}

fn check_lines(cart_total: i64, lines: &[CartLine]) -> AppResult<()> {
    if cart_total < 0 {
        return Err(AppError::BadRequest("cart total must not be negative".into()));
    }
    if lines.iter().any(|line| line.quantity <= 0 || line.price < 0) {
        return Err(AppError::BadRequest("cart has invalid items".into()));
    }
    lines_total(lines)?;
    Ok(())
}

/// Read-only validation without the per-client limiter.
pub async fn validate<C: ConnectionTrait>(
    conn: &C,
    raw_code: &str,
    cart_total: i64,
    user_id: Uuid,
    lines: &[CartLine],
) -> AppResult<CouponQuote> {
    check_lines(cart_total, lines)?;
    let code = normalize_code(raw_code)?;
    let coupon = find_match(conn, &code)
        .await?
        .ok_or(AppError::InvalidCoupon)?;
    evaluate(conn, &coupon, cart_total, user_id, lines, Utc::now()).await
}

/// Validation as exposed to shoppers: gated by the redemption limiter, with
/// unmatched codes counted as probing.
pub async fn validate_for_client(
    state: &AppState,
    client_ip: &str,
    raw_code: &str,
    cart_total: i64,
    user_id: Uuid,
    lines: &[CartLine],
) -> AppResult<CouponQuote> {
    state.limiter.admit(client_ip).await?;
    check_lines(cart_total, lines)?;
    let code = normalize_code(raw_code)?;

    let coupon = match find_match(&state.orm, &code).await? {
        Some(coupon) => coupon,
        None => {
            state.limiter.record_failure(client_ip).await;
            debug!(client_ip = %client_ip, "coupon code did not match");
            return Err(AppError::InvalidCoupon);
        }
    };
    state.limiter.record_success(client_ip).await;

    evaluate(&state.orm, &coupon, cart_total, user_id, lines, Utc::now()).await
}

/// Count one redemption. The increment is conditional on the limit in the
/// same statement, so concurrent redemptions cannot overshoot it.
pub async fn redeem<C: ConnectionTrait>(conn: &C, code: &str) -> AppResult<()> {
    let result = Coupons::update_many()
        .col_expr(CouponCol::UsedCount, Expr::col(CouponCol::UsedCount).add(1))
        .filter(CouponCol::Code.eq(code))
        .filter(
            Condition::any()
                .add(CouponCol::UsageLimit.is_null())
                .add(Expr::col(CouponCol::UsedCount).lt(Expr::col(CouponCol::UsageLimit))),
        )
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        let exists = Coupons::find()
            .filter(CouponCol::Code.eq(code))
            .count(conn)
            .await?;
        return Err(if exists == 0 {
            AppError::InvalidCoupon
        } else {
            AppError::UsageLimitReached
        });
    }

    info!(code = %code, "coupon redeemed");
    Ok(())
}
