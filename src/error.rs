use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    entity::sea_orm_active_enums::OrderStatus,
    response::ApiResponse,
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Coupon code is required")]
    EmptyCode,

    #[error("Invalid coupon code")]
    InvalidCoupon,

    #[error("Coupon is not active")]
    CouponInactive,

    #[error("Coupon is not valid yet")]
    CouponNotYetValid,

    #[error("Coupon has expired")]
    CouponExpired,

    #[error("Minimum order amount of {min_order} required for this coupon")]
    MinOrderNotMet { min_order: i64 },

    #[error("Coupon usage limit reached")]
    UsageLimitReached,

    #[error("You have already used this coupon the maximum number of times")]
    PerUserLimitReached,

    #[error("Coupon is only valid on your first order")]
    FirstOrderOnlyViolation,

    #[error("No items in the cart are eligible for this coupon")]
    NoEligibleItems,

    #[error("Too many coupon attempts, try again later")]
    RateLimited,

    #[error("Too many failed attempts, please wait before trying again")]
    TooManyFailedAttempts,

    #[error("Cannot move order from {from} to {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },

    #[error("Insufficient stock for product {product_id}{}", size_suffix(.size))]
    InsufficientStock {
        product_id: Uuid,
        size: Option<String>,
    },

    #[error("Order not found")]
    OrderNotFound,

    #[error("Product {0} not found")]
    ProductNotFound(Uuid),

    #[error("Not Found")]
    NotFound,

    #[error("Bad Request {0}")]
    BadRequest(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("ORM error")]
    OrmError(#[from] sea_orm::DbErr),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

fn size_suffix(size: &Option<String>) -> String {
    size.as_deref()
        .map(|s| format!(" (size {s})"))
        .unwrap_or_default()
}

impl AppError {
    /// Stable identifier for the failure, independent of the message text.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::EmptyCode => "empty_code",
            AppError::InvalidCoupon => "invalid_coupon",
            AppError::CouponInactive => "coupon_inactive",
            AppError::CouponNotYetValid => "coupon_not_yet_valid",
            AppError::CouponExpired => "coupon_expired",
            AppError::MinOrderNotMet { .. } => "min_order_not_met",
            AppError::UsageLimitReached => "usage_limit_reached",
            AppError::PerUserLimitReached => "per_user_limit_reached",
            AppError::FirstOrderOnlyViolation => "first_order_only_violation",
            AppError::NoEligibleItems => "no_eligible_items",
            AppError::RateLimited => "rate_limited",
            AppError::TooManyFailedAttempts => "too_many_failed_attempts",
            AppError::IllegalTransition { .. } => "illegal_transition",
            AppError::InsufficientStock { .. } => "insufficient_stock",
            AppError::OrderNotFound => "order_not_found",
            AppError::ProductNotFound(_) => "product_not_found",
            AppError::NotFound => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Forbidden => "forbidden",
            AppError::OrmError(_) => "store_unavailable",
            AppError::Internal(_) => "internal",
        }
    }

    /// Coupon rule failures that the storefront shows as `valid: false`.
    pub fn is_coupon_rejection(&self) -> bool {
        matches!(
            self,
            AppError::EmptyCode
                | AppError::InvalidCoupon
                | AppError::CouponInactive
                | AppError::CouponNotYetValid
                | AppError::CouponExpired
                | AppError::MinOrderNotMet { .. }
                | AppError::UsageLimitReached
                | AppError::PerUserLimitReached
                | AppError::FirstOrderOnlyViolation
                | AppError::NoEligibleItems
        )
    }

    /// Infrastructure failures; the caller may retry the whole operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::OrmError(_))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NoEligibleItems => StatusCode::UNPROCESSABLE_ENTITY,
            e if e.is_coupon_rejection() => StatusCode::BAD_REQUEST,
            AppError::RateLimited | AppError::TooManyFailedAttempts => {
                StatusCode::TOO_MANY_REQUESTS
            }
            AppError::IllegalTransition { .. } | AppError::InsufficientStock { .. } => {
                StatusCode::CONFLICT
            }
            AppError::OrderNotFound | AppError::ProductNotFound(_) | AppError::NotFound => {
                StatusCode::NOT_FOUND
            }
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::OrmError(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorData {
    error: String,
    kind: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = ?self, kind = self.kind(), "request failed");
        }

        let message = match &self {
            AppError::OrmError(_) => "Temporarily unavailable, please retry".to_string(),
            _ => self.to_string(),
        };

        let body = ApiResponse::failure(
            message.clone(),
            ErrorData {
                error: message,
                kind: self.kind(),
            },
        );

        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
