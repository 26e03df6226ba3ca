use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::services::pricing::{BreakdownDisplay, PriceBreakdown};
use crate::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct QuoteRequest {
    #[validate(range(min = 0))]
    pub base_amount_cents: i64,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub service_call_fee_cents: i64,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub discount_cents: i64,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub deposit_cents: Option<i64>,
    #[serde(default)]
    #[validate(length(equal = 3))]
    pub currency: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QuoteResponse {
    pub breakdown: PriceBreakdown,
    pub amount_due_cents: i64,
    pub display: BreakdownDisplay,
}

/// POST /pricing/quote
pub async fn quote(
    State(state): State<AppState>,
    Json(request): Json<QuoteRequest>,
) -> ApiResult<QuoteResponse> {
    request.validate()?;

    let breakdown = state.services.pricing.quote(
        request.base_amount_cents,
        request.service_call_fee_cents,
        request.discount_cents,
        request.deposit_cents,
        request.currency.as_deref(),
    )?;

    Ok(Json(ApiResponse::success(QuoteResponse {
        amount_due_cents: breakdown.amount_due_cents(),
        display: breakdown.display(),
        breakdown,
    })))
}
