use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use bytes::Bytes;
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::handlers::CallerId;
use crate::services::checkout::{CallbackOutcome, CheckoutView, OpenCheckout, PaymentCallback};
use crate::services::payment_gateway::verify_signature;
use crate::{ApiResponse, AppState};

pub const TIMESTAMP_HEADER: &str = "x-timestamp";
pub const SIGNATURE_HEADER: &str = "x-signature";

/// POST /orders/:id/checkout
pub async fn open_checkout(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(order_id): Path<Uuid>,
    body: Option<Json<OpenCheckout>>,
) -> Result<(StatusCode, Json<ApiResponse<CheckoutView>>), ServiceError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let view = state
        .services
        .checkout
        .open_session(order_id, caller, request)
        .await?;
    let status = if view.reused {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(ApiResponse::success(view))))
}

/// POST /payments/webhook
///
/// Signed with HMAC-SHA256 over `"{x-timestamp}.{body}"` when a webhook
/// secret is configured.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CallbackOutcome>, ServiceError> {
    match state.config.webhook_secret.as_deref() {
        Some(secret) => {
            let header = |name: &str| {
                headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
            };
            let ok = verify_signature(
                secret,
                header(TIMESTAMP_HEADER),
                header(SIGNATURE_HEADER),
                &body,
                state.config.webhook_tolerance_secs,
                Utc::now().timestamp(),
            );
            if !ok {
                warn!("Payment webhook signature verification failed");
                return Err(ServiceError::Unauthorized(
                    "invalid webhook signature".to_string(),
                ));
            }
        }
        None => warn!("Accepting unsigned payment webhook, no secret configured"),
    }

    let callback: PaymentCallback = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::ValidationError(format!("invalid callback payload: {e}")))?;
    info!(session = %callback.session_id, success = callback.success, "Payment webhook received");

    let outcome = state.services.checkout.handle_callback(callback).await?;
    Ok(Json(outcome))
}
