use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::sea_query::{Expr, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::db::{self, DbPool};
use crate::entities::checkout_session::{self, SessionStatus};
use crate::entities::order::{self, Actor, OrderStatus};
use crate::entities::order_status_history;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics::{ORDER_TRANSITIONS, ORDER_TRANSITION_CONFLICTS, PAYMENT_COMPENSATIONS};
use crate::services::coupons;
use crate::services::payment_gateway::{CheckoutSessionBridge, RefundRequest};
use crate::services::pricing::{PriceBreakdown, PricingEngine};

/// Actions that move an order between states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OrderTransition {
    SubmitQuote {
        base_amount_cents: i64,
        #[serde(default)]
        service_call_fee_cents: Option<i64>,
        #[serde(default)]
        deposit_cents: Option<i64>,
    },
    DeclineRequest,
    ApproveQuote,
    PaymentCaptured,
    Accept,
    Reject,
    Complete,
    ConfirmPickup,
    ConfirmReturn,
    Settle {
        deposit_deduction_cents: i64,
    },
    Cancel,
    CancelWithRefund,
    Compensate,
}

impl OrderTransition {
    pub fn name(&self) -> &'static str {
        match self {
            OrderTransition::SubmitQuote { .. } => "submit_quote",
            OrderTransition::DeclineRequest => "decline_request",
            OrderTransition::ApproveQuote => "approve_quote",
            OrderTransition::PaymentCaptured => "payment_captured",
            OrderTransition::Accept => "accept",
            OrderTransition::Reject => "reject",
            OrderTransition::Complete => "complete",
            OrderTransition::ConfirmPickup => "confirm_pickup",
            OrderTransition::ConfirmReturn => "confirm_return",
            OrderTransition::Settle { .. } => "settle",
            OrderTransition::Cancel => "cancel",
            OrderTransition::CancelWithRefund => "cancel_with_refund",
            OrderTransition::Compensate => "compensate",
        }
    }

    /// Actors allowed to trigger this transition.
    fn permitted(&self) -> &'static [Actor] {
        match self {
            OrderTransition::SubmitQuote { .. }
            | OrderTransition::DeclineRequest
            | OrderTransition::Accept
            | OrderTransition::Reject
            | OrderTransition::Settle { .. }
            | OrderTransition::CancelWithRefund => &[Actor::Provider],
            OrderTransition::ApproveQuote => &[Actor::Buyer],
            OrderTransition::Complete
            | OrderTransition::ConfirmPickup
            | OrderTransition::ConfirmReturn
            | OrderTransition::Cancel => &[Actor::Buyer, Actor::Provider],
            OrderTransition::PaymentCaptured | OrderTransition::Compensate => &[Actor::System],
        }
    }
}

/// Money to hand back through the gateway before a transition commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundAmount {
    /// Everything captured on the order's session
    Full,
    Partial(i64),
}

/// Column changes that ride along with a status change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderPatch {
    pub breakdown: Option<PriceBreakdown>,
    pub paid_at: Option<DateTime<Utc>>,
    pub deposit_deduction_cents: Option<i64>,
}

/// A validated transition, ready to commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    pub transition: &'static str,
    pub actor: Actor,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub refund: Option<RefundAmount>,
    pub patch: OrderPatch,
}

fn conflict(order: &order::Model, transition: &OrderTransition) -> ServiceError {
    ServiceError::StateConflict(format!(
        "cannot {} an order in {:?}",
        transition.name(),
        order.status
    ))
}

/// Validates `transition` against the order's current state and the actor,
/// producing the target state. Pure; nothing is written.
pub fn plan(
    order: &order::Model,
    transition: &OrderTransition,
    actor: Actor,
    pricing: &PricingEngine,
    now: DateTime<Utc>,
) -> Result<TransitionPlan, ServiceError> {
    if !transition.permitted().contains(&actor) {
        return Err(ServiceError::Forbidden(format!(
            "{} may not {}",
            actor,
            transition.name()
        )));
    }

    let today: NaiveDate = now.date_naive();
    let mut patch = OrderPatch::default();
    let mut refund = None;

    use OrderStatus::*;
    let to = match (transition, order.status) {
        (
            OrderTransition::SubmitQuote {
                base_amount_cents,
                service_call_fee_cents,
                deposit_cents,
            },
            PendingQuote,
        ) => {
            let breakdown = pricing.quote(
                *base_amount_cents,
                service_call_fee_cents.unwrap_or(0),
                0,
                *deposit_cents,
                Some(&order.currency),
            )?;
            patch.breakdown = Some(breakdown);
            WaitingForPriceApproval
        }
        (OrderTransition::DeclineRequest, PendingQuote) => Cancelled,
        (OrderTransition::ApproveQuote, WaitingForPriceApproval) => PendingPayment,
        (OrderTransition::PaymentCaptured, PendingPayment) => {
            patch.paid_at = Some(now);
            if order.listing_kind.is_appointment() {
                PendingConfirmation
            } else {
                InProgress
            }
        }
        (OrderTransition::PaymentCaptured, PendingDeposit) => {
            patch.paid_at = Some(now);
            match order.rental_start_date {
                Some(start) if start <= today => PickedUp,
                _ => InProgress,
            }
        }
        (OrderTransition::Accept, PendingConfirmation) => InProgress,
        (OrderTransition::Reject, PendingConfirmation) => {
            refund = Some(RefundAmount::Full);
            Cancelled
        }
        (OrderTransition::Complete, InProgress) if !order.is_rental() => Completed,
        (OrderTransition::ConfirmPickup, InProgress) if order.is_rental() => PickedUp,
        (OrderTransition::ConfirmReturn, PickedUp) => Returned,
        (
            OrderTransition::Settle {
                deposit_deduction_cents,
            },
            Returned,
        ) => {
            let deposit = order.deposit_cents.unwrap_or(0);
            if *deposit_deduction_cents < 0 || *deposit_deduction_cents > deposit {
                return Err(ServiceError::ValidationError(format!(
                    "deposit deduction must be between 0 and {deposit} cents"
                )));
            }
            patch.deposit_deduction_cents = Some(*deposit_deduction_cents);
            let remainder = deposit - deposit_deduction_cents;
            if remainder > 0 {
                refund = Some(RefundAmount::Partial(remainder));
            }
            Completed
        }
        (OrderTransition::Cancel, status) if status.is_unpaid() => Cancelled,
        (OrderTransition::CancelWithRefund, InProgress) => {
            refund = Some(RefundAmount::Full);
            Cancelled
        }
        (OrderTransition::Compensate, PendingPayment | PendingDeposit) => Cancelled,
        _ => return Err(conflict(order, transition)),
    };

    Ok(TransitionPlan {
        transition: transition.name(),
        actor,
        from: order.status,
        to,
        refund,
        patch,
    })
}

/// Applies a plan with `UPDATE ... WHERE id = ? AND status = from`, bumping
/// the version and appending to the status history. A concurrent transition
/// that got there first makes this fail with `StateConflict`.
pub async fn commit<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    plan: &TransitionPlan,
    now: DateTime<Utc>,
) -> Result<order::Model, ServiceError> {
    let mut update = order::Entity::update_many()
        .col_expr(order::Column::Status, Expr::value(plan.to))
        .col_expr(
            order::Column::Version,
            Expr::col(order::Column::Version).add(1),
        )
        .col_expr(order::Column::UpdatedAt, Expr::value(now));

    if let Some(b) = &plan.patch.breakdown {
        let columns: [(order::Column, SimpleExpr); 7] = [
            (order::Column::BaseAmountCents, Expr::value(b.base_amount_cents)),
            (order::Column::DiscountCents, Expr::value(b.discount_cents)),
            (order::Column::PlatformFeeCents, Expr::value(b.platform_fee_cents)),
            (order::Column::TaxCents, Expr::value(b.tax_cents)),
            (
                order::Column::ServiceCallFeeCents,
                Expr::value(b.service_call_fee_cents),
            ),
            (order::Column::DepositCents, Expr::value(b.deposit_cents)),
            (order::Column::TotalCents, Expr::value(b.total_cents)),
        ];
        for (column, value) in columns {
            update = update.col_expr(column, value);
        }
    }
    if let Some(paid_at) = plan.patch.paid_at {
        update = update.col_expr(order::Column::PaidAt, Expr::value(paid_at));
    }
    if let Some(deduction) = plan.patch.deposit_deduction_cents {
        update = update.col_expr(order::Column::DepositDeductionCents, Expr::value(deduction));
    }

    let result = update
        .filter(order::Column::Id.eq(order_id))
        .filter(order::Column::Status.eq(plan.from))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        ORDER_TRANSITION_CONFLICTS.inc();
        warn!(
            order_id = %order_id,
            from = ?plan.from,
            transition = plan.transition,
            "Order moved before the transition committed"
        );
        return Err(ServiceError::StateConflict(format!(
            "order {order_id} is no longer {:?}",
            plan.from
        )));
    }

    order_status_history::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        from_status: Set(plan.from),
        to_status: Set(plan.to),
        actor: Set(plan.actor.to_string()),
        transition: Set(plan.transition.to_string()),
        created_at: Set(now),
    }
    .insert(conn)
    .await?;

    order::Entity::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id}")))
}

/// The session that captured payment for an order, if any.
pub async fn captured_session<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Option<checkout_session::Model>, ServiceError> {
    Ok(checkout_session::Entity::find()
        .filter(checkout_session::Column::OrderId.eq(order_id))
        .filter(checkout_session::Column::Status.eq(SessionStatus::Completed))
        .order_by_desc(checkout_session::Column::UpdatedAt)
        .one(conn)
        .await?)
}

/// Fails every still-open checkout session of `order_id` and gives back their
/// coupon reservations, returning the released `(coupon_id, redemption_id)`
/// pairs. A session settled concurrently is left alone.
pub async fn abandon_open_sessions<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Vec<(Uuid, Uuid)>, ServiceError> {
    let open = checkout_session::Entity::find()
        .filter(checkout_session::Column::OrderId.eq(order_id))
        .filter(checkout_session::Column::Status.eq(SessionStatus::Open))
        .all(conn)
        .await?;

    let mut released = Vec::new();
    for session in open {
        let result = checkout_session::Entity::update_many()
            .col_expr(
                checkout_session::Column::Status,
                Expr::value(SessionStatus::Failed),
            )
            .col_expr(
                checkout_session::Column::FailureReason,
                Expr::value(reason.to_string()),
            )
            .col_expr(checkout_session::Column::UpdatedAt, Expr::value(now))
            .filter(checkout_session::Column::Id.eq(session.id))
            .filter(checkout_session::Column::Status.eq(SessionStatus::Open))
            .exec(conn)
            .await?;
        if result.rows_affected == 0 {
            continue;
        }
        if let Some(redemption_id) = session.redemption_id {
            if let Some(coupon_id) = coupons::release(conn, redemption_id).await? {
                released.push((coupon_id, redemption_id));
            }
        }
    }
    Ok(released)
}

/// Actor-driven transitions, including the refund leg some of them carry.
#[derive(Clone)]
pub struct OrderLifecycleService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    bridge: Arc<dyn CheckoutSessionBridge>,
    pricing: PricingEngine,
}

impl OrderLifecycleService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        bridge: Arc<dyn CheckoutSessionBridge>,
        pricing: PricingEngine,
    ) -> Self {
        Self {
            db,
            event_sender,
            bridge,
            pricing,
        }
    }

    /// Applies `transition` on behalf of `caller_id`, who must be the order's
    /// buyer or provider.
    #[instrument(skip(self, transition), fields(transition = transition.name()))]
    pub async fn apply(
        &self,
        order_id: Uuid,
        caller_id: Uuid,
        transition: OrderTransition,
    ) -> Result<order::Model, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id}")))?;

        let actor = order.role_of(caller_id).ok_or_else(|| {
            ServiceError::Forbidden("caller is not a party to this order".to_string())
        })?;

        self.apply_as(order, actor, transition).await
    }

    /// Applies a transition for an already-resolved actor.
    pub async fn apply_as(
        &self,
        order: order::Model,
        actor: Actor,
        transition: OrderTransition,
    ) -> Result<order::Model, ServiceError> {
        let now = Utc::now();
        let plan = match plan(&order, &transition, actor, &self.pricing, now) {
            Ok(plan) => plan,
            Err(e) => {
                if matches!(e, ServiceError::StateConflict(_)) {
                    ORDER_TRANSITION_CONFLICTS.inc();
                    warn!(order_id = %order.id, status = ?order.status, transition = transition.name(), "Transition refused");
                }
                return Err(e);
            }
        };

        let txn = db::begin(&self.db).await?;
        let updated = commit(&txn, order.id, &plan, now).await?;

        let mut refunded = None;
        if let Some(amount) = plan.refund {
            let session = captured_session(&txn, order.id).await?.ok_or_else(|| {
                error!(order_id = %order.id, "No captured session to refund");
                ServiceError::InternalError("no captured payment found for order".to_string())
            })?;

            let amount_cents = match amount {
                RefundAmount::Full => session.amount_cents,
                RefundAmount::Partial(cents) => cents.min(session.amount_cents),
            };
            let receipt = self
                .bridge
                .refund(&RefundRequest {
                    idempotency_key: session.id,
                    external_session_id: session.external_session_id.clone(),
                    amount_cents,
                    currency: session.currency.clone(),
                    reason: plan.transition.to_string(),
                })
                .await
                .map_err(|e| {
                    PAYMENT_COMPENSATIONS.with_label_values(&["failed"]).inc();
                    error!(order_id = %order.id, error = %e, "Refund failed, order left unchanged");
                    match e {
                        ServiceError::ExternalServiceError(_) => e,
                        other => ServiceError::ExternalServiceError(other.to_string()),
                    }
                })?;

            let status = match amount {
                RefundAmount::Full => SessionStatus::Refunded,
                RefundAmount::Partial(_) => SessionStatus::Completed,
            };
            checkout_session::Entity::update_many()
                .col_expr(checkout_session::Column::Status, Expr::value(status))
                .col_expr(
                    checkout_session::Column::RefundReference,
                    Expr::value(receipt.refund_id.clone()),
                )
                .col_expr(checkout_session::Column::UpdatedAt, Expr::value(now))
                .filter(checkout_session::Column::Id.eq(session.id))
                .exec(&txn)
                .await?;
            PAYMENT_COMPENSATIONS.with_label_values(&["refunded"]).inc();
            refunded = Some((session.id, receipt.amount_cents));
        }

        let released = if plan.to == OrderStatus::Cancelled {
            abandon_open_sessions(&txn, order.id, "order cancelled", now).await?
        } else {
            Vec::new()
        };

        txn.commit().await?;

        ORDER_TRANSITIONS.with_label_values(&[plan.transition]).inc();
        info!(
            order_id = %order.id,
            from = ?plan.from,
            to = ?plan.to,
            actor = %plan.actor,
            "Order transitioned"
        );

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id: order.id,
                old_status: plan.from,
                new_status: plan.to,
                transition: plan.transition.to_string(),
            })
            .await;
        if let Some((session_id, amount_cents)) = refunded {
            self.event_sender
                .send_or_log(Event::PaymentRefunded {
                    order_id: order.id,
                    session_id,
                    amount_cents,
                    reason: plan.transition.to_string(),
                })
                .await;
        }
        for (coupon_id, redemption_id) in released {
            info!(order_id = %order.id, redemption_id = %redemption_id, "Coupon reservation released on cancel");
            self.event_sender
                .send_or_log(Event::CouponReleased {
                    coupon_id,
                    redemption_id,
                })
                .await;
        }

        Ok(updated)
    }

    /// Loads an order for one of its parties.
    pub async fn get_for_party(
        &self,
        order_id: Uuid,
        caller_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id}")))?;
        if order.role_of(caller_id).is_none() {
            return Err(ServiceError::Forbidden(
                "caller is not a party to this order".to_string(),
            ));
        }
        Ok(order)
    }

    pub async fn history(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_status_history::Model>, ServiceError> {
        Ok(order_status_history::Entity::find()
            .filter(order_status_history::Column::OrderId.eq(order_id))
            .order_by_asc(order_status_history::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::listing_item::{ListingKind, PricingModel};
    use chrono::Duration;

    fn order(kind: ListingKind, status: OrderStatus) -> order::Model {
        let now = Utc::now();
        order::Model {
            id: Uuid::new_v4(),
            buyer_id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            master_id: Uuid::new_v4(),
            listing_item_id: Uuid::new_v4(),
            status,
            listing_kind: kind,
            pricing_model: PricingModel::Fixed,
            units: 1,
            base_amount_cents: 5000,
            discount_cents: 0,
            platform_fee_cents: 250,
            tax_cents: 683,
            service_call_fee_cents: 0,
            deposit_cents: None,
            total_cents: 5933,
            currency: "CAD".into(),
            deposit_deduction_cents: None,
            rental_start_date: None,
            rental_end_date: None,
            snapshot_title: "Snow shovel".into(),
            snapshot_item_name: "Shovel".into(),
            snapshot_image_url: None,
            paid_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn plan_for(
        o: &order::Model,
        t: OrderTransition,
        actor: Actor,
    ) -> Result<TransitionPlan, ServiceError> {
        plan(o, &t, actor, &PricingEngine::default(), Utc::now())
    }

    #[test]
    fn capture_routes_goods_and_appointments() {
        let goods = order(ListingKind::Goods, OrderStatus::PendingPayment);
        let p = plan_for(&goods, OrderTransition::PaymentCaptured, Actor::System).unwrap();
        assert_eq!(p.to, OrderStatus::InProgress);
        assert!(p.patch.paid_at.is_some());

        let service = order(ListingKind::Service, OrderStatus::PendingPayment);
        let p = plan_for(&service, OrderTransition::PaymentCaptured, Actor::System).unwrap();
        assert_eq!(p.to, OrderStatus::PendingConfirmation);
    }

    #[test]
    fn rental_capture_depends_on_window_start() {
        let mut rental = order(ListingKind::Rental, OrderStatus::PendingDeposit);
        rental.rental_start_date = Some((Utc::now() - Duration::days(1)).date_naive());
        let p = plan_for(&rental, OrderTransition::PaymentCaptured, Actor::System).unwrap();
        assert_eq!(p.to, OrderStatus::PickedUp);

        rental.rental_start_date = Some((Utc::now() + Duration::days(3)).date_naive());
        let p = plan_for(&rental, OrderTransition::PaymentCaptured, Actor::System).unwrap();
        assert_eq!(p.to, OrderStatus::InProgress);
    }

    #[test]
    fn wrong_actor_is_forbidden() {
        let o = order(ListingKind::Service, OrderStatus::PendingConfirmation);
        let err = plan_for(&o, OrderTransition::Accept, Actor::Buyer).unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        let err = plan_for(&o, OrderTransition::PaymentCaptured, Actor::Provider).unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }

    #[test]
    fn complete_and_pickup_split_by_rental() {
        let goods = order(ListingKind::Goods, OrderStatus::InProgress);
        assert!(plan_for(&goods, OrderTransition::Complete, Actor::Buyer).is_ok());
        assert!(matches!(
            plan_for(&goods, OrderTransition::ConfirmPickup, Actor::Buyer),
            Err(ServiceError::StateConflict(_))
        ));

        let rental = order(ListingKind::Rental, OrderStatus::InProgress);
        assert!(plan_for(&rental, OrderTransition::ConfirmPickup, Actor::Provider).is_ok());
        assert!(matches!(
            plan_for(&rental, OrderTransition::Complete, Actor::Provider),
            Err(ServiceError::StateConflict(_))
        ));
    }

    #[test]
    fn settle_refunds_deposit_remainder() {
        let mut rental = order(ListingKind::Rental, OrderStatus::Returned);
        rental.deposit_cents = Some(20000);

        let p = plan_for(
            &rental,
            OrderTransition::Settle {
                deposit_deduction_cents: 4500,
            },
            Actor::Provider,
        )
        .unwrap();
        assert_eq!(p.to, OrderStatus::Completed);
        assert_eq!(p.refund, Some(RefundAmount::Partial(15500)));
        assert_eq!(p.patch.deposit_deduction_cents, Some(4500));

        let full_keep = plan_for(
            &rental,
            OrderTransition::Settle {
                deposit_deduction_cents: 20000,
            },
            Actor::Provider,
        )
        .unwrap();
        assert_eq!(full_keep.refund, None);

        assert!(matches!(
            plan_for(
                &rental,
                OrderTransition::Settle {
                    deposit_deduction_cents: 20001
                },
                Actor::Provider
            ),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn submit_quote_prices_the_order() {
        let o = order(ListingKind::Service, OrderStatus::PendingQuote);
        let p = plan_for(
            &o,
            OrderTransition::SubmitQuote {
                base_amount_cents: 5000,
                service_call_fee_cents: Some(1500),
                deposit_cents: None,
            },
            Actor::Provider,
        )
        .unwrap();
        let b = p.patch.breakdown.unwrap();
        assert_eq!(b.total_cents, 5933 + 1500);
        assert_eq!(p.to, OrderStatus::WaitingForPriceApproval);
    }

    #[test]
    fn transition_json_uses_action_tag() {
        let t: OrderTransition =
            serde_json::from_str(r#"{"action":"settle","deposit_deduction_cents":100}"#).unwrap();
        assert_eq!(
            t,
            OrderTransition::Settle {
                deposit_deduction_cents: 100
            }
        );
        let t: OrderTransition = serde_json::from_str(r#"{"action":"confirm_pickup"}"#).unwrap();
        assert_eq!(t.name(), "confirm_pickup");
    }
}
