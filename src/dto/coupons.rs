use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    services::coupon_service::CouponQuote,
};

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct CartLine {
    pub product_id: Uuid,
    pub quantity: i32,
    /// Unit price in the smallest currency unit.
    pub price: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ValidateCouponRequest {
    pub code: String,
    pub cart_total: i64,
    #[serde(default)]
    pub items: Vec<CartLine>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CouponValidation {
    pub valid: bool,
    pub code: Option<String>,
    pub discount: i64,
    pub applicable_subtotal: i64,
    pub message: String,
    pub kind: Option<String>,
}

impl CouponValidation {
    /// Fold coupon rule failures into `valid: false`; anything else (rate
    /// limiting, infrastructure) stays an error for the caller.
    pub fn from_result(result: AppResult<CouponQuote>) -> AppResult<Self> {
        match result {
            Ok(quote) => Ok(CouponValidation {
                valid: true,
                code: Some(quote.code),
                discount: quote.discount,
                applicable_subtotal: quote.applicable_subtotal,
                message: "Coupon applied".to_string(),
                kind: None,
            }),
            Err(err) if err.is_coupon_rejection() => Ok(Self::rejected(&err)),
            Err(err) => Err(err),
        }
    }

    fn rejected(err: &AppError) -> Self {
        CouponValidation {
            valid: false,
            code: None,
            discount: 0,
            applicable_subtotal: 0,
            message: err.to_string(),
            kind: Some(err.kind().to_string()),
        }
    }
}
