#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use chrono::{Duration as ChronoDuration, Utc};
use marketplace_settlement::{
    commands::{orders::CreateOrderCommand, Command},
    config::AppConfig,
    db::{self, DbConfig, DbPool},
    entities::{
        coupon::{self, DiscountType},
        inventory_item::{self, InventoryStatus},
        listing_item::{self, ListingKind, PricingModel},
        order,
    },
    errors::ServiceError,
    events::{self, EventSender},
    handlers::AppServices,
    services::{
        checkout::{CallbackOutcome, CheckoutView, OpenCheckout, PaymentCallback},
        payment_gateway::{
            CheckoutSessionBridge, CreateSessionInput, HostedSession, RefundReceipt, RefundRequest,
        },
        pricing::PurchaseTerms,
    },
    AppState,
};
use sea_orm::{ActiveModelTrait, ConnectionTrait, Database, Set};
use tokio::sync::mpsc;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// In-memory stand-in for the hosted checkout gateway.
#[derive(Default)]
pub struct FakeBridge {
    pub sessions: Mutex<Vec<CreateSessionInput>>,
    pub refunds: Mutex<Vec<RefundRequest>>,
    pub fail_create: AtomicBool,
    pub fail_refund: AtomicBool,
    counter: AtomicUsize,
}

impl FakeBridge {
    pub fn refund_count(&self) -> usize {
        self.refunds.lock().unwrap().len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

#[async_trait]
impl CheckoutSessionBridge for FakeBridge {
    async fn create_session(
        &self,
        input: &CreateSessionInput,
    ) -> Result<HostedSession, ServiceError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError(
                "gateway unavailable".to_string(),
            ));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.sessions.lock().unwrap().push(input.clone());
        Ok(HostedSession {
            session_id: format!("cs_test_{n}"),
            url: format!("https://pay.example.test/cs_test_{n}"),
        })
    }

    async fn refund(&self, request: &RefundRequest) -> Result<RefundReceipt, ServiceError> {
        if self.fail_refund.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError(
                "refund endpoint down".to_string(),
            ));
        }
        self.refunds.lock().unwrap().push(request.clone());
        Ok(RefundReceipt {
            refund_id: format!("re_{}", request.idempotency_key.simple()),
            amount_cents: request.amount_cents,
        })
    }
}

/// Application services over a fresh in-memory SQLite database.
pub struct TestContext {
    pub db: Arc<DbPool>,
    pub events: Arc<EventSender>,
    pub bridge: Arc<FakeBridge>,
    pub config: AppConfig,
    pub services: AppServices,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let db = Arc::new(test_db().await);
        let (tx, rx) = mpsc::channel(1024);
        let events = Arc::new(EventSender::new(tx));
        let event_task = tokio::spawn(events::process_events(rx));
        let bridge = Arc::new(FakeBridge::default());

        let services = AppServices::new(db.clone(), events.clone(), bridge.clone(), &config)
            .expect("services build from test config");

        Self {
            db,
            events,
            bridge,
            config,
            services,
            _event_task: event_task,
        }
    }

    pub fn state(&self) -> AppState {
        AppState {
            db: self.db.clone(),
            config: self.config.clone(),
            event_sender: self.events.clone(),
            services: self.services.clone(),
        }
    }

    pub fn router(&self) -> Router {
        marketplace_settlement::build_router(self.state())
    }

    pub async fn place_order(
        &self,
        buyer_id: Uuid,
        listing: &listing_item::Model,
        terms: PurchaseTerms,
    ) -> Result<order::Model, ServiceError> {
        CreateOrderCommand {
            buyer_id,
            listing_item_id: listing.id,
            terms,
            pricing: self.services.pricing.clone(),
        }
        .execute(self.db.clone(), self.events.clone())
        .await
    }

    pub async fn open_checkout(
        &self,
        order: &order::Model,
        coupon_code: Option<&str>,
    ) -> Result<CheckoutView, ServiceError> {
        self.services
            .checkout
            .open_session(
                order.id,
                order.buyer_id,
                OpenCheckout {
                    coupon_code: coupon_code.map(str::to_string),
                    ..OpenCheckout::default()
                },
            )
            .await
    }

    /// Opens checkout with a reservation taken earlier by coupon validation.
    pub async fn open_checkout_with_reservation(
        &self,
        order: &order::Model,
        redemption_id: Uuid,
    ) -> Result<CheckoutView, ServiceError> {
        self.services
            .checkout
            .open_session(
                order.id,
                order.buyer_id,
                OpenCheckout {
                    redemption_id: Some(redemption_id),
                    ..OpenCheckout::default()
                },
            )
            .await
    }

    pub async fn deliver(
        &self,
        external_session_id: &str,
        success: bool,
    ) -> Result<CallbackOutcome, ServiceError> {
        self.services
            .checkout
            .handle_callback(PaymentCallback {
                session_id: external_session_id.to_string(),
                success,
                failure_reason: (!success).then(|| "card_declined".to_string()),
            })
            .await
    }

    /// Opens a session and delivers a successful callback for it.
    pub async fn pay(&self, order: &order::Model) -> Result<CallbackOutcome, ServiceError> {
        let view = self.open_checkout(order, None).await?;
        self.deliver(&view.external_session_id, true).await
    }

    pub async fn reload(&self, order_id: Uuid) -> order::Model {
        use sea_orm::EntityTrait;
        order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .expect("query order")
            .expect("order exists")
    }
}

pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::new(
        "sqlite::memory:".to_string(),
        "127.0.0.1".to_string(),
        18_080,
        "test".to_string(),
    );
    cfg.db_max_connections = 1;
    cfg.db_min_connections = 1;
    cfg.webhook_secret = Some(WEBHOOK_SECRET.to_string());
    cfg
}

/// A fresh database for one test.
///
/// By default this is in-memory SQLite on one long-lived connection, so every
/// query sees the same database and racing callers queue on the pool. Their
/// transactions never overlap there. Pointing `TEST_DATABASE_URL` at a
/// Postgres server gives each test its own schema and a pool wide enough for
/// racing transactions to run side by side.
pub async fn test_db() -> DbPool {
    let config = match std::env::var("TEST_DATABASE_URL") {
        Ok(url) if url.starts_with("postgres") => postgres_schema(&url).await,
        _ => DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            idle_timeout: Duration::from_secs(3600),
            acquire_timeout: Duration::from_secs(60),
            ..Default::default()
        },
    };
    let pool = db::establish_connection_with_config(&config)
        .await
        .expect("failed to create test database");
    db::run_migrations(&pool)
        .await
        .expect("failed to run migrations in tests");
    pool
}

async fn postgres_schema(url: &str) -> DbConfig {
    let schema = format!("test_{}", Uuid::new_v4().simple());
    let admin = Database::connect(url)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");
    admin
        .execute_unprepared(&format!("CREATE SCHEMA \"{schema}\""))
        .await
        .expect("failed to create test schema");
    let _ = admin.close().await;

    DbConfig {
        url: url.to_string(),
        max_connections: 8,
        min_connections: 1,
        idle_timeout: Duration::from_secs(60),
        acquire_timeout: Duration::from_secs(30),
        schema: Some(schema),
        ..Default::default()
    }
}

pub struct ListingSeed {
    pub kind: ListingKind,
    pub pricing_model: PricingModel,
    pub unit_price_cents: i64,
    pub deposit_cents: Option<i64>,
    pub service_call_fee_cents: Option<i64>,
    pub serialized: bool,
}

impl ListingSeed {
    pub fn goods(unit_price_cents: i64) -> Self {
        Self {
            kind: ListingKind::Goods,
            pricing_model: PricingModel::Fixed,
            unit_price_cents,
            deposit_cents: None,
            service_call_fee_cents: None,
            serialized: false,
        }
    }

    pub fn serialized(unit_price_cents: i64) -> Self {
        Self {
            serialized: true,
            ..Self::goods(unit_price_cents)
        }
    }

    pub fn service(unit_price_cents: i64) -> Self {
        Self {
            kind: ListingKind::Service,
            ..Self::goods(unit_price_cents)
        }
    }

    pub fn quoted_task() -> Self {
        Self {
            kind: ListingKind::Task,
            pricing_model: PricingModel::Quote,
            ..Self::goods(0)
        }
    }

    pub fn rental(daily_cents: i64, deposit_cents: i64) -> Self {
        Self {
            kind: ListingKind::Rental,
            pricing_model: PricingModel::DepositRequired,
            unit_price_cents: daily_cents,
            deposit_cents: Some(deposit_cents),
            service_call_fee_cents: None,
            serialized: false,
        }
    }
}

pub async fn seed_listing(db: &DbPool, provider_id: Uuid, seed: ListingSeed) -> listing_item::Model {
    let now = Utc::now();
    listing_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        master_id: Set(Uuid::new_v4()),
        provider_id: Set(provider_id),
        kind: Set(seed.kind),
        pricing_model: Set(seed.pricing_model),
        title: Set("Neighbourhood listing".to_string()),
        item_name: Set("Item".to_string()),
        image_url: Set(None),
        unit_price_cents: Set(seed.unit_price_cents),
        unit_label: Set("each".to_string()),
        deposit_cents: Set(seed.deposit_cents),
        service_call_fee_cents: Set(seed.service_call_fee_cents),
        serialized: Set(seed.serialized),
        currency: Set("CAD".to_string()),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("seed listing")
}

pub async fn seed_units(db: &DbPool, listing_item_id: Uuid, count: usize) -> Vec<inventory_item::Model> {
    let mut units = Vec::with_capacity(count);
    for i in 0..count {
        let unit = inventory_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            listing_item_id: Set(listing_item_id),
            serial_number: Set(format!("SN-{i:04}")),
            secret_code: Set(format!("SECRET-{i:04}")),
            status: Set(InventoryStatus::Available),
            order_id: Set(None),
            sold_at: Set(None),
            created_at: Set(Utc::now() + ChronoDuration::milliseconds(i as i64)),
        }
        .insert(db)
        .await
        .expect("seed unit");
        units.push(unit);
    }
    units
}

pub struct CouponSeed {
    pub code: &'static str,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    pub max_uses: Option<i32>,
    pub min_purchase_cents: Option<i64>,
    pub per_user_limit: Option<i32>,
    pub valid_for: ChronoDuration,
}

impl CouponSeed {
    pub fn fixed(code: &'static str, cents: i64) -> Self {
        Self {
            code,
            discount_type: DiscountType::Fixed,
            discount_value: cents,
            max_uses: None,
            min_purchase_cents: None,
            per_user_limit: None,
            valid_for: ChronoDuration::days(30),
        }
    }

    pub fn percentage(code: &'static str, percent: i64) -> Self {
        Self {
            discount_type: DiscountType::Percentage,
            discount_value: percent,
            ..Self::fixed(code, 0)
        }
    }
}

pub async fn seed_coupon(db: &DbPool, provider_id: Uuid, seed: CouponSeed) -> coupon::Model {
    let now = Utc::now();
    coupon::ActiveModel {
        id: Set(Uuid::new_v4()),
        provider_id: Set(provider_id),
        code: Set(seed.code.to_ascii_uppercase()),
        discount_type: Set(seed.discount_type),
        discount_value: Set(seed.discount_value),
        max_uses: Set(seed.max_uses),
        used_count: Set(0),
        valid_until: Set(now + seed.valid_for),
        min_purchase_cents: Set(seed.min_purchase_cents),
        per_user_limit: Set(seed.per_user_limit),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("seed coupon")
}
