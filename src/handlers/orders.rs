use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::commands::orders::CreateOrderCommand;
use crate::commands::Command;
use crate::entities::order::{self, Actor};
use crate::entities::order_status_history;
use crate::errors::ServiceError;
use crate::handlers::CallerId;
use crate::services::order_lifecycle::OrderTransition;
use crate::services::pricing::{format_cents, PurchaseTerms};
use crate::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateOrderRequest {
    pub listing_item_id: Uuid,
    pub terms: PurchaseTerms,
}

/// An order as one of its parties sees it.
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    #[serde(flatten)]
    pub order: order::Model,
    pub status_label: &'static str,
    pub total_display: String,
    /// The caller's part in the order
    pub role: Option<Actor>,
}

impl OrderResponse {
    fn for_caller(order: order::Model, caller: Uuid) -> Self {
        Self {
            status_label: order.status.label(),
            total_display: format_cents(order.total_cents, &order.currency),
            role: order.role_of(caller),
            order,
        }
    }
}

/// POST /orders
pub async fn create_order(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    let command = CreateOrderCommand {
        buyer_id: caller,
        listing_item_id: request.listing_item_id,
        terms: request.terms,
        pricing: state.services.pricing.clone(),
    };
    let created = command
        .execute(state.db.clone(), state.event_sender.clone())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(OrderResponse::for_caller(created, caller))),
    ))
}

/// GET /orders/:id
pub async fn get_order(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(order_id): Path<Uuid>,
) -> ApiResult<OrderResponse> {
    let order = state.services.orders.get_for_party(order_id, caller).await?;
    Ok(Json(ApiResponse::success(OrderResponse::for_caller(
        order, caller,
    ))))
}

/// POST /orders/:id/transitions
pub async fn transition_order(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(order_id): Path<Uuid>,
    Json(transition): Json<OrderTransition>,
) -> ApiResult<OrderResponse> {
    let updated = state
        .services
        .orders
        .apply(order_id, caller, transition)
        .await?;
    Ok(Json(ApiResponse::success(OrderResponse::for_caller(
        updated, caller,
    ))))
}

/// GET /orders/:id/history
pub async fn order_history(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(order_id): Path<Uuid>,
) -> ApiResult<Vec<order_status_history::Model>> {
    state.services.orders.get_for_party(order_id, caller).await?;
    let history = state.services.orders.history(order_id).await?;
    Ok(Json(ApiResponse::success(history)))
}
