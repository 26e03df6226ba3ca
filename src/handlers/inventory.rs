use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::commands::inventory::{NewUnit, RestockInventoryCommand, RestockResult};
use crate::commands::Command;
use crate::errors::ServiceError;
use crate::handlers::CallerId;
use crate::services::inventory_allocator::{Availability, RevealedUnit};
use crate::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RestockRequest {
    pub units: Vec<NewUnit>,
}

/// GET /listings/:id/availability
pub async fn availability(
    State(state): State<AppState>,
    Path(listing_item_id): Path<Uuid>,
) -> ApiResult<Availability> {
    let availability = state
        .services
        .inventory
        .check_availability(listing_item_id)
        .await?;
    Ok(Json(ApiResponse::success(availability)))
}

/// POST /listings/:id/inventory
pub async fn restock(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(listing_item_id): Path<Uuid>,
    Json(request): Json<RestockRequest>,
) -> Result<(StatusCode, Json<ApiResponse<RestockResult>>), ServiceError> {
    let command = RestockInventoryCommand {
        provider_id: caller,
        listing_item_id,
        units: request.units,
    };
    let result = command
        .execute(state.db.clone(), state.event_sender.clone())
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(result))))
}

/// GET /orders/:id/unit
pub async fn reveal_unit(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(order_id): Path<Uuid>,
) -> ApiResult<RevealedUnit> {
    let unit = state
        .services
        .inventory
        .reveal_for_order(order_id, caller)
        .await?;
    Ok(Json(ApiResponse::success(unit)))
}
