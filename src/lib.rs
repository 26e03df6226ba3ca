//! Marketplace settlement library
//!
//! Order settlement for a neighborhood-services marketplace: pricing, coupons,
//! serialized inventory allocation, the order state machine and the hosted
//! checkout bridge.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod commands;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod migrator;
pub mod services;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Serialize;
use tower_http::{
    classify::{SharedClassifier, StatusInRangeAsFailures},
    cors::CorsLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::db::DbPool;
use crate::events::EventSender;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: config::AppConfig,
    pub event_sender: Arc<EventSender>,
    pub services: handlers::AppServices,
}

// Common response wrappers
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: ResponseMeta::capture(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            meta: ResponseMeta::capture(),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

pub fn api_v1_routes() -> Router<AppState> {
    let pricing = Router::new().route("/pricing/quote", post(handlers::pricing::quote));

    let coupons = Router::new()
        .route("/coupons", post(handlers::coupons::create_coupon))
        .route("/coupons/validate", post(handlers::coupons::validate_coupon))
        .route("/coupons/:code", get(handlers::coupons::get_coupon));

    let inventory = Router::new()
        .route(
            "/listings/:id/availability",
            get(handlers::inventory::availability),
        )
        .route("/listings/:id/inventory", post(handlers::inventory::restock));

    let orders = Router::new()
        .route("/orders", post(handlers::orders::create_order))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route(
            "/orders/:id/transitions",
            post(handlers::orders::transition_order),
        )
        .route("/orders/:id/history", get(handlers::orders::order_history))
        .route("/orders/:id/unit", get(handlers::inventory::reveal_unit))
        .route(
            "/orders/:id/checkout",
            post(handlers::payments::open_checkout),
        );

    let payments = Router::new().route(
        "/payments/webhook",
        post(handlers::payments::payment_webhook),
    );

    Router::new()
        .merge(pricing)
        .merge(coupons)
        .merge(inventory)
        .merge(orders)
        .merge(payments)
}

/// Full application router: health and metrics plus the v1 API, with HTTP
/// tracing, CORS and a request timeout.
pub fn build_router(state: AppState) -> Router {
    let classifier = SharedClassifier::new(StatusInRangeAsFailures::new(500..=599));
    let cors = if state.config.is_development() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/", get(|| async { "marketplace-settlement up" }))
        .merge(handlers::health::health_routes())
        .nest("/api/v1", api_v1_routes())
        .layer(TraceLayer::new(classifier))
        .layer(cors)
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(state)
}
