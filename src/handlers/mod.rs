pub mod coupons;
pub mod health;
pub mod inventory;
pub mod orders;
pub mod payments;
pub mod pricing;

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::events::EventSender;
use crate::services::payment_gateway::CheckoutSessionBridge;
use crate::services::{
    CheckoutService, CouponService, InventoryAllocator, OrderLifecycleService, PricingEngine,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Header carrying the authenticated caller's id, set by the gateway in front
/// of this service.
pub const CALLER_HEADER: &str = "x-user-id";

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub pricing: PricingEngine,
    pub coupons: Arc<CouponService>,
    pub inventory: Arc<InventoryAllocator>,
    pub orders: Arc<OrderLifecycleService>,
    pub checkout: Arc<CheckoutService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        bridge: Arc<dyn CheckoutSessionBridge>,
        config: &AppConfig,
    ) -> Result<Self, ServiceError> {
        let pricing = PricingEngine::from_config(config)?;

        let coupons = Arc::new(CouponService::new(db_pool.clone(), event_sender.clone()));
        let inventory = Arc::new(InventoryAllocator::from_config(
            db_pool.clone(),
            event_sender.clone(),
            config,
        ));
        let orders = Arc::new(OrderLifecycleService::new(
            db_pool.clone(),
            event_sender.clone(),
            bridge.clone(),
            pricing.clone(),
        ));
        let checkout = Arc::new(CheckoutService::new(
            db_pool,
            event_sender,
            bridge,
            pricing.clone(),
            config.allocation_retry_limit,
        ));

        Ok(Self {
            pricing,
            coupons,
            inventory,
            orders,
            checkout,
        })
    }
}

/// The authenticated caller, taken from [`CALLER_HEADER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(CALLER_HEADER)
            .ok_or_else(|| ServiceError::Unauthorized("missing caller identity".to_string()))?;
        let id = raw
            .to_str()
            .ok()
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or_else(|| ServiceError::Unauthorized("malformed caller identity".to_string()))?;
        Ok(CallerId(id))
    }
}
