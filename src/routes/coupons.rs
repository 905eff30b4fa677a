use axum::{Json, Router, extract::State, routing::post};

use crate::{
    dto::coupons::{CouponValidation, ValidateCouponRequest},
    error::AppResult,
    middleware::{auth::AuthUser, client_ip::ClientIp},
    response::{ApiResponse, Meta},
    services::coupon_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/validate", post(validate_coupon))
}

#[utoipa::path(
    post,
    path = "/api/coupons/validate",
    request_body = ValidateCouponRequest,
    responses(
        (status = 200, description = "Validation verdict with the discount it would give", body = ApiResponse<CouponValidation>),
        (status = 400, description = "Empty code or malformed cart"),
        (status = 429, description = "Too many attempts from this client"),
    ),
    security(("bearer_auth" = [])),
    tag = "Coupons"
)]
pub async fn validate_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    ClientIp(client_ip): ClientIp,
    Json(payload): Json<ValidateCouponRequest>,
) -> AppResult<Json<ApiResponse<CouponValidation>>> {
    let result = coupon_service::validate_for_client(
        &state,
        &client_ip,
        &payload.code,
        payload.cart_total,
        user.user_id,
        &payload.items,
    )
    .await;
    let verdict = CouponValidation::from_result(result)?;
    let message = verdict.message.clone();
    Ok(Json(ApiResponse::success(
        message,
        verdict,
        Some(Meta::empty()),
    )))
}
