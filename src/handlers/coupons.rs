use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::commands::coupons::CreateCouponCommand;
use crate::commands::Command;
use crate::entities::coupon;
use crate::errors::ServiceError;
use crate::handlers::CallerId;
use crate::services::coupons::RedeemerIdentity;
use crate::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ValidateCouponRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    pub provider_id: Uuid,
    #[validate(range(min = 0))]
    pub amount_cents: i64,
    #[serde(default)]
    pub user_phone: Option<String>,
}

/// Result of a validate-and-redeem call. Rejections are a normal answer, not
/// an HTTP error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_amount_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redemption_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// POST /coupons/validate
pub async fn validate_coupon(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Json(request): Json<ValidateCouponRequest>,
) -> Result<Json<CouponValidation>, ServiceError> {
    request.validate()?;

    let identity = RedeemerIdentity {
        user_id: Some(caller),
        user_phone: request.user_phone,
    };
    let outcome = state
        .services
        .coupons
        .validate_and_apply(
            &request.code,
            request.provider_id,
            request.amount_cents,
            &identity,
        )
        .await;

    match outcome {
        Ok(application) => Ok(Json(CouponValidation {
            valid: true,
            discount_amount_cents: Some(application.discount_cents),
            coupon_id: Some(application.coupon_id),
            redemption_id: Some(application.redemption_id),
            error: None,
            message: None,
        })),
        Err(ServiceError::Coupon(rejection)) => Ok(Json(CouponValidation {
            valid: false,
            discount_amount_cents: None,
            coupon_id: None,
            redemption_id: None,
            error: Some(rejection.as_ref().to_string()),
            message: Some(rejection.message().to_string()),
        })),
        Err(e) => Err(e),
    }
}

/// POST /coupons
pub async fn create_coupon(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Json(mut command): Json<CreateCouponCommand>,
) -> Result<(StatusCode, Json<ApiResponse<coupon::Model>>), ServiceError> {
    command.provider_id = caller;
    let created = command
        .execute(state.db.clone(), state.event_sender.clone())
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

/// GET /coupons/:code
pub async fn get_coupon(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(code): Path<String>,
) -> ApiResult<coupon::Model> {
    let coupon = state
        .services
        .coupons
        .find_by_code(caller, &code)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Coupon {code}")))?;
    Ok(Json(ApiResponse::success(coupon)))
}
