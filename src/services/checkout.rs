use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set, SqlErr,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::db::{self, DbPool};
use crate::entities::checkout_session::{self, SessionStatus};
use crate::entities::listing_item;
use crate::entities::order::{self, Actor, OrderStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics::{ORDER_TRANSITIONS, PAYMENT_COMPENSATIONS};
use crate::services::coupons::{self, CouponApplication, RedeemerIdentity, RedemptionContext};
use crate::services::inventory_allocator;
use crate::services::order_lifecycle::{self, OrderTransition};
use crate::services::payment_gateway::{CheckoutSessionBridge, CreateSessionInput, RefundRequest};
use crate::services::pricing::{PriceBreakdown, PricingEngine};

/// A buyer's request to pay for an order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenCheckout {
    #[serde(default)]
    pub coupon_code: Option<String>,
    /// A reservation returned by `POST /coupons/validate`. Takes precedence
    /// over `coupon_code`, so a validated coupon is not redeemed twice.
    #[serde(default)]
    pub redemption_id: Option<Uuid>,
    /// Used for per-user coupon limits alongside the buyer id
    #[serde(default)]
    pub user_phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutView {
    pub session_id: Uuid,
    pub external_session_id: String,
    pub checkout_url: String,
    pub amount_cents: i64,
    pub deposit_cents: i64,
    pub discount_cents: i64,
    pub currency: String,
    pub status: SessionStatus,
    /// An already-open session was returned instead of a new one
    pub reused: bool,
}

impl CheckoutView {
    fn from_session(session: checkout_session::Model, reused: bool) -> Self {
        Self {
            session_id: session.id,
            external_session_id: session.external_session_id,
            checkout_url: session.checkout_url,
            amount_cents: session.amount_cents,
            deposit_cents: session.deposit_cents,
            discount_cents: session.discount_cents,
            currency: session.currency,
            status: session.status,
            reused,
        }
    }
}

/// Where a checkout's coupon slot comes from.
enum CouponSlot {
    /// Reserved by this checkout and released again if opening fails
    Reserved(CouponApplication),
    /// Reserved by an earlier validation, attached when the session is stored
    Held(CouponApplication),
}

impl CouponSlot {
    fn application(&self) -> &CouponApplication {
        match self {
            CouponSlot::Reserved(a) | CouponSlot::Held(a) => a,
        }
    }
}

/// Payment result delivered by the gateway, keyed by its session id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCallback {
    pub session_id: String,
    pub success: bool,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CallbackOutcome {
    /// Payment captured; the order moved on and any unit was allocated
    Captured { order_id: Uuid, status: OrderStatus },
    /// Duplicate or stale delivery; nothing changed
    AlreadyProcessed { order_id: Uuid },
    /// Payment failed; any coupon reservation was released
    Failed { order_id: Uuid },
    /// Captured money was returned because the order could not proceed
    Refunded { order_id: Uuid, reason: String },
}

/// Opens hosted checkout sessions and settles their callbacks.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    bridge: Arc<dyn CheckoutSessionBridge>,
    pricing: PricingEngine,
    allocation_retry_limit: u32,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        bridge: Arc<dyn CheckoutSessionBridge>,
        pricing: PricingEngine,
        allocation_retry_limit: u32,
    ) -> Self {
        Self {
            db,
            event_sender,
            bridge,
            pricing,
            allocation_retry_limit,
        }
    }

    /// Opens (or returns the already-open) payment session for an order.
    ///
    /// A coupon is reserved before the gateway is called and released again
    /// if the session cannot be opened. A reservation already taken by coupon
    /// validation is attached to the session instead of reserving again.
    #[instrument(skip(self, request))]
    pub async fn open_session(
        &self,
        order_id: Uuid,
        caller_id: Uuid,
        request: OpenCheckout,
    ) -> Result<CheckoutView, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id}")))?;

        if order.buyer_id != caller_id {
            return Err(ServiceError::Forbidden(
                "only the buyer may pay for this order".to_string(),
            ));
        }
        if !order.status.awaits_payment() {
            warn!(order_id = %order_id, status = ?order.status, "Checkout refused");
            return Err(ServiceError::StateConflict(format!(
                "order in {:?} is not awaiting payment",
                order.status
            )));
        }

        if let Some(open) = self.find_open_session(order_id).await? {
            info!(order_id = %order_id, session_id = %open.id, "Returning open checkout session");
            return Ok(CheckoutView::from_session(open, true));
        }

        let session_id = Uuid::new_v4();
        let identity = RedeemerIdentity {
            user_id: Some(caller_id),
            user_phone: request.user_phone.clone(),
        };
        let code = request
            .coupon_code
            .as_deref()
            .filter(|c| !c.trim().is_empty());

        let slot = match (request.redemption_id, code) {
            (Some(redemption_id), code) => {
                let application = coupons::held_reservation(
                    &*self.db,
                    redemption_id,
                    order.provider_id,
                    order.base_amount_cents,
                    &identity,
                )
                .await?;
                if code.is_some_and(|c| coupons::normalize_code(c) != application.code) {
                    return Err(ServiceError::ValidationError(
                        "coupon_code does not match the reserved coupon".to_string(),
                    ));
                }
                Some(CouponSlot::Held(application))
            }
            (None, Some(code)) => {
                let txn = db::begin(&self.db).await?;
                let application = coupons::reserve(
                    &txn,
                    code,
                    order.provider_id,
                    order.base_amount_cents,
                    &identity,
                    RedemptionContext {
                        session_ref: Some(session_id),
                        order_id: Some(order_id),
                    },
                    Utc::now(),
                )
                .await?;
                txn.commit().await?;
                self.event_sender
                    .send_or_log(Event::CouponRedeemed {
                        coupon_id: application.coupon_id,
                        redemption_id: application.redemption_id,
                        discount_cents: application.discount_cents,
                    })
                    .await;
                Some(CouponSlot::Reserved(application))
            }
            (None, None) => None,
        };

        match self.open_with_reservation(&order, session_id, slot.as_ref()).await {
            Ok(view) => Ok(view),
            Err(e) => {
                if let Some(CouponSlot::Reserved(application)) = &slot {
                    self.release_quietly(application.redemption_id).await;
                }
                if matches!(e, ServiceError::StateConflict(_)) {
                    // A concurrent open for the same order won. Its session
                    // stands in for ours when it carries the same coupon.
                    let wanted = slot.as_ref().map(|s| s.application().coupon_id);
                    if let Some(open) = self.find_open_session(order_id).await? {
                        if open.coupon_id == wanted {
                            info!(order_id = %order_id, session_id = %open.id, "Concurrent checkout won, returning its session");
                            return Ok(CheckoutView::from_session(open, true));
                        }
                    }
                }
                Err(e)
            }
        }
    }

    async fn open_with_reservation(
        &self,
        order: &order::Model,
        session_id: Uuid,
        slot: Option<&CouponSlot>,
    ) -> Result<CheckoutView, ServiceError> {
        let coupon = slot.map(CouponSlot::application);
        let discount = coupon.map_or(0, |c| c.discount_cents);
        let breakdown = self.pricing.quote(
            order.base_amount_cents,
            order.service_call_fee_cents,
            discount,
            order.deposit_cents,
            Some(&order.currency),
        )?;

        let input = CreateSessionInput {
            amount_cents: breakdown.amount_due_cents(),
            deposit_cents: breakdown.deposit_cents.unwrap_or(0),
            currency: breakdown.currency.clone(),
            listing_item_id: order.listing_item_id,
            order_id: order.id,
            session_ref: session_id,
            coupon_id: coupon.map(|c| c.coupon_id),
            coupon_code: coupon.map(|c| c.code.clone()),
            discount_cents: breakdown.discount_cents,
        };
        let hosted = self.bridge.create_session(&input).await?;

        let now = Utc::now();
        let txn = db::begin(&self.db).await?;
        let session = checkout_session::ActiveModel {
            id: Set(session_id),
            order_id: Set(order.id),
            external_session_id: Set(hosted.session_id),
            amount_cents: Set(input.amount_cents),
            deposit_cents: Set(input.deposit_cents),
            currency: Set(input.currency.clone()),
            coupon_id: Set(input.coupon_id),
            coupon_code: Set(input.coupon_code.clone()),
            discount_cents: Set(breakdown.discount_cents),
            redemption_id: Set(coupon.map(|c| c.redemption_id)),
            status: Set(SessionStatus::Open),
            checkout_url: Set(hosted.url),
            refund_reference: Set(None),
            failure_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| match e.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => ServiceError::StateConflict(format!(
                "order {} already has an open checkout session",
                order.id
            )),
            _ => ServiceError::from(e),
        })?;

        if let Some(CouponSlot::Held(application)) = slot {
            coupons::attach(
                &txn,
                application,
                RedemptionContext {
                    session_ref: Some(session_id),
                    order_id: Some(order.id),
                },
            )
            .await?;
        }
        reprice_order(&txn, order, &breakdown, now).await?;
        txn.commit().await?;

        info!(
            order_id = %order.id,
            session_id = %session.id,
            amount_cents = session.amount_cents,
            discount_cents = session.discount_cents,
            "Checkout session opened"
        );
        self.event_sender
            .send_or_log(Event::CheckoutOpened {
                order_id: order.id,
                session_id: session.id,
                amount_cents: session.amount_cents,
            })
            .await;

        Ok(CheckoutView::from_session(session, false))
    }

    /// Settles a gateway callback. Safe to call any number of times for the
    /// same session.
    #[instrument(skip(self, callback), fields(session = %callback.session_id, success = callback.success))]
    pub async fn handle_callback(
        &self,
        callback: PaymentCallback,
    ) -> Result<CallbackOutcome, ServiceError> {
        let session = checkout_session::Entity::find()
            .filter(checkout_session::Column::ExternalSessionId.eq(callback.session_id.as_str()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                warn!("Callback for unknown session");
                ServiceError::NotFound(format!("Checkout session {}", callback.session_id))
            })?;

        if !callback.success {
            return self.record_failure(session, callback.failure_reason).await;
        }

        if session.status == SessionStatus::RefundPending {
            return self
                .issue_refund(&session, "refund retried on redelivery".to_string())
                .await;
        }

        let now = Utc::now();
        let txn = db::begin(&self.db).await?;
        if !claim_session(&txn, session.id, SessionStatus::Completed, now).await? {
            info!(session_id = %session.id, status = ?session.status, "Duplicate payment callback");
            return Ok(CallbackOutcome::AlreadyProcessed {
                order_id: session.order_id,
            });
        }

        match self.capture(&txn, &session, now).await {
            Ok((order, from, unit)) => {
                txn.commit().await?;
                self.after_capture(&session, &order, from, unit).await;
                Ok(CallbackOutcome::Captured {
                    order_id: order.id,
                    status: order.status,
                })
            }
            Err(e) if e.requires_compensation() => {
                drop(txn);
                error!(
                    order_id = %session.order_id,
                    session_id = %session.id,
                    error = %e,
                    "Post-capture step failed, compensating"
                );
                if let ServiceError::OutOfStock(listing_item_id) = &e {
                    self.event_sender
                        .send_or_log(Event::OutOfStock {
                            listing_item_id: *listing_item_id,
                            order_id: session.order_id,
                        })
                        .await;
                }
                self.compensate(&session, e.to_string()).await
            }
            Err(e) => Err(e),
        }
    }

    /// Allocation and the order transition, inside the claiming transaction.
    async fn capture<C: ConnectionTrait>(
        &self,
        conn: &C,
        session: &checkout_session::Model,
        now: DateTime<Utc>,
    ) -> Result<(order::Model, OrderStatus, Option<Uuid>), ServiceError> {
        let order = order::Entity::find_by_id(session.order_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {}", session.order_id)))?;

        let listing = listing_item::Entity::find_by_id(order.listing_item_id)
            .one(conn)
            .await?;
        let unit = match listing {
            Some(listing) if listing.serialized => Some(
                inventory_allocator::allocate(
                    conn,
                    listing.id,
                    order.id,
                    self.allocation_retry_limit,
                    now,
                )
                .await?
                .id,
            ),
            _ => None,
        };

        let mut plan = order_lifecycle::plan(
            &order,
            &OrderTransition::PaymentCaptured,
            Actor::System,
            &self.pricing,
            now,
        )?;
        plan.patch.breakdown = Some(self.captured_breakdown(&order, session)?);
        let updated = order_lifecycle::commit(conn, order.id, &plan, now).await?;
        Ok((updated, plan.from, unit))
    }

    /// The order's price as the captured session charged it. The session
    /// amount must be reproducible from the order, or the capture is refused.
    fn captured_breakdown(
        &self,
        order: &order::Model,
        session: &checkout_session::Model,
    ) -> Result<PriceBreakdown, ServiceError> {
        let breakdown = self.pricing.quote(
            order.base_amount_cents,
            order.service_call_fee_cents,
            session.discount_cents,
            order.deposit_cents,
            Some(&order.currency),
        )?;
        if breakdown.amount_due_cents() != session.amount_cents {
            error!(
                order_id = %order.id,
                session_id = %session.id,
                captured_cents = session.amount_cents,
                priced_cents = breakdown.amount_due_cents(),
                "Captured amount does not match the order price"
            );
            return Err(ServiceError::StateConflict(format!(
                "session {} charged {} cents but the order prices at {}",
                session.id,
                session.amount_cents,
                breakdown.amount_due_cents()
            )));
        }
        Ok(breakdown)
    }

    async fn after_capture(
        &self,
        session: &checkout_session::Model,
        order: &order::Model,
        from: OrderStatus,
        unit: Option<Uuid>,
    ) {
        ORDER_TRANSITIONS
            .with_label_values(&["payment_captured"])
            .inc();
        info!(
            order_id = %order.id,
            session_id = %session.id,
            status = ?order.status,
            "Payment captured"
        );

        self.event_sender
            .send_or_log(Event::PaymentCaptured {
                order_id: order.id,
                session_id: session.id,
            })
            .await;
        if let Some(inventory_item_id) = unit {
            self.event_sender
                .send_or_log(Event::InventoryAllocated {
                    listing_item_id: order.listing_item_id,
                    inventory_item_id,
                    order_id: order.id,
                })
                .await;
        }
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id: order.id,
                old_status: from,
                new_status: order.status,
                transition: "payment_captured".to_string(),
            })
            .await;
    }

    async fn record_failure(
        &self,
        session: checkout_session::Model,
        reason: Option<String>,
    ) -> Result<CallbackOutcome, ServiceError> {
        let now = Utc::now();
        let txn = db::begin(&self.db).await?;
        let result = checkout_session::Entity::update_many()
            .col_expr(
                checkout_session::Column::Status,
                Expr::value(SessionStatus::Failed),
            )
            .col_expr(
                checkout_session::Column::FailureReason,
                Expr::value(reason.clone()),
            )
            .col_expr(checkout_session::Column::UpdatedAt, Expr::value(now))
            .filter(checkout_session::Column::Id.eq(session.id))
            .filter(checkout_session::Column::Status.eq(SessionStatus::Open))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            info!(session_id = %session.id, status = ?session.status, "Stale failure callback ignored");
            return Ok(CallbackOutcome::AlreadyProcessed {
                order_id: session.order_id,
            });
        }

        let released = match session.redemption_id {
            Some(redemption_id) => coupons::release(&txn, redemption_id)
                .await?
                .map(|coupon_id| (coupon_id, redemption_id)),
            None => None,
        };
        txn.commit().await?;

        warn!(order_id = %session.order_id, session_id = %session.id, reason = ?reason, "Payment failed");
        self.event_sender
            .send_or_log(Event::PaymentFailed {
                order_id: session.order_id,
                session_id: session.id,
                reason,
            })
            .await;
        if let Some((coupon_id, redemption_id)) = released {
            self.event_sender
                .send_or_log(Event::CouponReleased {
                    coupon_id,
                    redemption_id,
                })
                .await;
        }

        Ok(CallbackOutcome::Failed {
            order_id: session.order_id,
        })
    }

    /// Marks the session as owing a refund, cancels the still-unpaid order and
    /// gives back its coupon, then refunds through the gateway.
    async fn compensate(
        &self,
        session: &checkout_session::Model,
        reason: String,
    ) -> Result<CallbackOutcome, ServiceError> {
        let now = Utc::now();
        let txn = db::begin(&self.db).await?;
        if !claim_session(&txn, session.id, SessionStatus::RefundPending, now).await? {
            return Ok(CallbackOutcome::AlreadyProcessed {
                order_id: session.order_id,
            });
        }

        let mut cancelled = None;
        if let Some(order) = order::Entity::find_by_id(session.order_id)
            .one(&txn)
            .await?
        {
            if order.status.awaits_payment() {
                let plan = order_lifecycle::plan(
                    &order,
                    &OrderTransition::Compensate,
                    Actor::System,
                    &self.pricing,
                    now,
                )?;
                order_lifecycle::commit(&txn, order.id, &plan, now).await?;
                cancelled = Some(plan.from);
            }
        }
        let mut released =
            order_lifecycle::abandon_open_sessions(&txn, session.order_id, "order cancelled", now)
                .await?;
        if let Some(redemption_id) = session.redemption_id {
            if let Some(coupon_id) = coupons::release(&txn, redemption_id).await? {
                released.push((coupon_id, redemption_id));
            }
        }
        txn.commit().await?;

        for (coupon_id, redemption_id) in released {
            self.event_sender
                .send_or_log(Event::CouponReleased {
                    coupon_id,
                    redemption_id,
                })
                .await;
        }

        if let Some(from) = cancelled {
            ORDER_TRANSITIONS.with_label_values(&["compensate"]).inc();
            self.event_sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id: session.order_id,
                    old_status: from,
                    new_status: OrderStatus::Cancelled,
                    transition: "compensate".to_string(),
                })
                .await;
        }

        self.issue_refund(session, reason).await
    }

    /// Refunds the full session amount. On gateway failure the session stays
    /// `refund_pending` and the error is returned so the callback is redelivered.
    async fn issue_refund(
        &self,
        session: &checkout_session::Model,
        reason: String,
    ) -> Result<CallbackOutcome, ServiceError> {
        let request = RefundRequest {
            idempotency_key: session.id,
            external_session_id: session.external_session_id.clone(),
            amount_cents: session.amount_cents,
            currency: session.currency.clone(),
            reason: reason.clone(),
        };

        let receipt = match self.bridge.refund(&request).await {
            Ok(receipt) => receipt,
            Err(e) => {
                PAYMENT_COMPENSATIONS.with_label_values(&["failed"]).inc();
                error!(
                    order_id = %session.order_id,
                    session_id = %session.id,
                    error = %e,
                    "Refund failed"
                );
                self.event_sender
                    .send_or_log(Event::RefundFailed {
                        order_id: session.order_id,
                        session_id: session.id,
                        error: e.to_string(),
                    })
                    .await;
                return Err(match e {
                    ServiceError::ExternalServiceError(_) => e,
                    other => ServiceError::ExternalServiceError(other.to_string()),
                });
            }
        };

        checkout_session::Entity::update_many()
            .col_expr(
                checkout_session::Column::Status,
                Expr::value(SessionStatus::Refunded),
            )
            .col_expr(
                checkout_session::Column::RefundReference,
                Expr::value(receipt.refund_id.clone()),
            )
            .col_expr(
                checkout_session::Column::FailureReason,
                Expr::value(reason.clone()),
            )
            .col_expr(checkout_session::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(checkout_session::Column::Id.eq(session.id))
            .filter(checkout_session::Column::Status.eq(SessionStatus::RefundPending))
            .exec(&*self.db)
            .await?;

        PAYMENT_COMPENSATIONS.with_label_values(&["refunded"]).inc();
        info!(
            order_id = %session.order_id,
            session_id = %session.id,
            amount_cents = receipt.amount_cents,
            "Captured payment refunded"
        );
        self.event_sender
            .send_or_log(Event::PaymentRefunded {
                order_id: session.order_id,
                session_id: session.id,
                amount_cents: receipt.amount_cents,
                reason: reason.clone(),
            })
            .await;

        Ok(CallbackOutcome::Refunded {
            order_id: session.order_id,
            reason,
        })
    }

    async fn release_quietly(&self, redemption_id: Uuid) {
        let released = async {
            let txn = db::begin(&self.db).await?;
            let released = coupons::release(&txn, redemption_id).await?;
            txn.commit().await?;
            Ok::<_, ServiceError>(released)
        }
        .await;

        match released {
            Ok(Some(coupon_id)) => {
                self.event_sender
                    .send_or_log(Event::CouponReleased {
                        coupon_id,
                        redemption_id,
                    })
                    .await;
            }
            Ok(None) => {}
            Err(e) => {
                error!(redemption_id = %redemption_id, error = %e, "Could not release coupon reservation");
            }
        }
    }

    async fn find_open_session(
        &self,
        order_id: Uuid,
    ) -> Result<Option<checkout_session::Model>, ServiceError> {
        Ok(checkout_session::Entity::find()
            .filter(checkout_session::Column::OrderId.eq(order_id))
            .filter(checkout_session::Column::Status.eq(SessionStatus::Open))
            .one(&*self.db)
            .await?)
    }

    pub async fn find_session(&self, session_id: Uuid) -> Result<checkout_session::Model, ServiceError> {
        checkout_session::Entity::find_by_id(session_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Checkout session {session_id}")))
    }
}

/// Moves a session out of `open`/`failed`. Only one caller ever wins.
async fn claim_session<C: ConnectionTrait>(
    conn: &C,
    session_id: Uuid,
    to: SessionStatus,
    now: DateTime<Utc>,
) -> Result<bool, ServiceError> {
    let result = checkout_session::Entity::update_many()
        .col_expr(checkout_session::Column::Status, Expr::value(to))
        .col_expr(checkout_session::Column::UpdatedAt, Expr::value(now))
        .filter(checkout_session::Column::Id.eq(session_id))
        .filter(
            checkout_session::Column::Status
                .is_in([SessionStatus::Open, SessionStatus::Failed]),
        )
        .exec(conn)
        .await?;
    Ok(result.rows_affected == 1)
}

/// Writes the checkout breakdown onto the order, provided nothing else has
/// touched it since it was read. A concurrent open or transition leaves the
/// version moved and this fails with `StateConflict`.
async fn reprice_order<C: ConnectionTrait>(
    conn: &C,
    order: &order::Model,
    breakdown: &PriceBreakdown,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let result = order::Entity::update_many()
        .col_expr(
            order::Column::DiscountCents,
            Expr::value(breakdown.discount_cents),
        )
        .col_expr(
            order::Column::PlatformFeeCents,
            Expr::value(breakdown.platform_fee_cents),
        )
        .col_expr(order::Column::TaxCents, Expr::value(breakdown.tax_cents))
        .col_expr(order::Column::TotalCents, Expr::value(breakdown.total_cents))
        .col_expr(
            order::Column::Version,
            Expr::col(order::Column::Version).add(1),
        )
        .col_expr(order::Column::UpdatedAt, Expr::value(now))
        .filter(order::Column::Id.eq(order.id))
        .filter(order::Column::Status.eq(order.status))
        .filter(order::Column::Version.eq(order.version))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::StateConflict(format!(
            "order {} changed while checkout was opening",
            order.id
        )));
    }
    Ok(())
}
