mod common;

use std::sync::atomic::Ordering;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::{seed_coupon, seed_listing, seed_units, CouponSeed, ListingSeed, TestContext};
use marketplace_settlement::entities::checkout_session::{self, SessionStatus};
use marketplace_settlement::entities::order::{self, OrderStatus};
use marketplace_settlement::entities::{coupon, coupon_redemption};
use marketplace_settlement::errors::{CouponRejection, ServiceError};
use marketplace_settlement::services::checkout::CallbackOutcome;
use marketplace_settlement::services::coupons::RedeemerIdentity;
use marketplace_settlement::services::order_lifecycle::OrderTransition;
use marketplace_settlement::services::pricing::PurchaseTerms;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

fn one() -> PurchaseTerms {
    PurchaseTerms::Fixed { quantity: 1 }
}

async fn sessions_for(ctx: &TestContext, order_id: Uuid) -> Vec<checkout_session::Model> {
    checkout_session::Entity::find()
        .filter(checkout_session::Column::OrderId.eq(order_id))
        .all(&*ctx.db)
        .await
        .unwrap()
}

async fn coupon_uses(ctx: &TestContext, coupon_id: Uuid) -> i32 {
    coupon::Entity::find_by_id(coupon_id)
        .one(&*ctx.db)
        .await
        .unwrap()
        .unwrap()
        .used_count
}

#[tokio::test]
async fn goods_order_is_captured_once() {
    let ctx = TestContext::new().await;
    let listing = seed_listing(&ctx.db, Uuid::new_v4(), ListingSeed::goods(5000)).await;
    let order = ctx.place_order(Uuid::new_v4(), &listing, one()).await.unwrap();
    assert_eq!(order.status, OrderStatus::PendingPayment);
    assert_eq!(order.total_cents, 5933);

    let view = ctx.open_checkout(&order, None).await.unwrap();
    assert_eq!(view.amount_cents, 5933);
    assert!(!view.reused);

    let outcome = ctx.deliver(&view.external_session_id, true).await.unwrap();
    assert_eq!(
        outcome,
        CallbackOutcome::Captured {
            order_id: order.id,
            status: OrderStatus::InProgress
        }
    );

    let duplicate = ctx.deliver(&view.external_session_id, true).await.unwrap();
    assert_eq!(duplicate, CallbackOutcome::AlreadyProcessed { order_id: order.id });

    let reloaded = ctx.reload(order.id).await;
    assert_eq!(reloaded.status, OrderStatus::InProgress);
    assert!(reloaded.paid_at.is_some());
    assert!(reloaded.totals_reconcile());

    let history = ctx.services.orders.history(order.id).await.unwrap();
    assert_eq!(history.len(), 1, "duplicate delivery must not transition twice");
    assert_eq!(history[0].transition, "payment_captured");
}

#[tokio::test]
async fn service_order_waits_for_provider_after_capture() {
    let ctx = TestContext::new().await;
    let listing = seed_listing(&ctx.db, Uuid::new_v4(), ListingSeed::service(8000)).await;
    let order = ctx
        .place_order(Uuid::new_v4(), &listing, PurchaseTerms::Fixed { quantity: 1 })
        .await
        .unwrap();

    let outcome = ctx.pay(&order).await.unwrap();
    assert_matches!(
        outcome,
        CallbackOutcome::Captured {
            status: OrderStatus::PendingConfirmation,
            ..
        }
    );
}

#[tokio::test]
async fn coupon_discount_flows_into_session_and_order() {
    let ctx = TestContext::new().await;
    let provider = Uuid::new_v4();
    let listing = seed_listing(&ctx.db, provider, ListingSeed::goods(5000)).await;
    let seeded = seed_coupon(&ctx.db, provider, CouponSeed::fixed("TENOFF", 1000)).await;
    let order = ctx.place_order(Uuid::new_v4(), &listing, one()).await.unwrap();

    let view = ctx.open_checkout(&order, Some("tenoff")).await.unwrap();
    assert_eq!(view.discount_cents, 1000);
    assert_eq!(view.amount_cents, 4746);

    let sent = ctx.bridge.sessions.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].amount_cents, 4746);
    assert_eq!(sent[0].coupon_code.as_deref(), Some("TENOFF"));
    assert_eq!(sent[0].coupon_id, Some(seeded.id));

    let repriced = ctx.reload(order.id).await;
    assert_eq!(repriced.discount_cents, 1000);
    assert_eq!(repriced.platform_fee_cents, 200);
    assert_eq!(repriced.tax_cents, 546);
    assert_eq!(repriced.total_cents, 4746);
    assert!(repriced.totals_reconcile());
    assert_eq!(coupon_uses(&ctx, seeded.id).await, 1);
}

#[tokio::test]
async fn open_session_is_reused() {
    let ctx = TestContext::new().await;
    let listing = seed_listing(&ctx.db, Uuid::new_v4(), ListingSeed::goods(1200)).await;
    let order = ctx.place_order(Uuid::new_v4(), &listing, one()).await.unwrap();

    let first = ctx.open_checkout(&order, None).await.unwrap();
    let second = ctx.open_checkout(&order, None).await.unwrap();
    assert!(second.reused);
    assert_eq!(first.session_id, second.session_id);
    assert_eq!(ctx.bridge.session_count(), 1);
}

#[tokio::test]
async fn checkout_guards_caller_and_state() {
    let ctx = TestContext::new().await;
    let goods = seed_listing(&ctx.db, Uuid::new_v4(), ListingSeed::goods(1200)).await;
    let order = ctx.place_order(Uuid::new_v4(), &goods, one()).await.unwrap();

    let err = ctx
        .services
        .checkout
        .open_session(order.id, Uuid::new_v4(), Default::default())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Forbidden(_));

    let task = seed_listing(&ctx.db, Uuid::new_v4(), ListingSeed::quoted_task()).await;
    let quoted = ctx
        .place_order(Uuid::new_v4(), &task, PurchaseTerms::Quote)
        .await
        .unwrap();
    assert_eq!(quoted.status, OrderStatus::PendingQuote);
    let err = ctx.open_checkout(&quoted, None).await.unwrap_err();
    assert_matches!(err, ServiceError::StateConflict(_));

    let err = ctx.deliver("cs_unknown", true).await.unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn gateway_failure_releases_coupon() {
    let ctx = TestContext::new().await;
    let provider = Uuid::new_v4();
    let listing = seed_listing(&ctx.db, provider, ListingSeed::goods(5000)).await;
    let seeded = seed_coupon(
        &ctx.db,
        provider,
        CouponSeed {
            max_uses: Some(1),
            ..CouponSeed::fixed("LAST", 500)
        },
    )
    .await;
    let order = ctx.place_order(Uuid::new_v4(), &listing, one()).await.unwrap();

    ctx.bridge.fail_create.store(true, Ordering::SeqCst);
    let err = ctx.open_checkout(&order, Some("LAST")).await.unwrap_err();
    assert_matches!(err, ServiceError::ExternalServiceError(_));
    assert_eq!(coupon_uses(&ctx, seeded.id).await, 0);
    assert!(sessions_for(&ctx, order.id).await.is_empty());

    ctx.bridge.fail_create.store(false, Ordering::SeqCst);
    let view = ctx.open_checkout(&order, Some("LAST")).await.unwrap();
    assert_eq!(view.discount_cents, 500);
}

#[tokio::test]
async fn failed_payment_releases_coupon_and_allows_retry() {
    let ctx = TestContext::new().await;
    let provider = Uuid::new_v4();
    let listing = seed_listing(&ctx.db, provider, ListingSeed::goods(5000)).await;
    let seeded = seed_coupon(
        &ctx.db,
        provider,
        CouponSeed {
            max_uses: Some(1),
            ..CouponSeed::percentage("HALF", 50)
        },
    )
    .await;
    let order = ctx.place_order(Uuid::new_v4(), &listing, one()).await.unwrap();

    let view = ctx.open_checkout(&order, Some("HALF")).await.unwrap();
    assert_eq!(coupon_uses(&ctx, seeded.id).await, 1);

    let outcome = ctx.deliver(&view.external_session_id, false).await.unwrap();
    assert_eq!(outcome, CallbackOutcome::Failed { order_id: order.id });
    assert_eq!(coupon_uses(&ctx, seeded.id).await, 0);
    assert_eq!(ctx.reload(order.id).await.status, OrderStatus::PendingPayment);

    // A repeated failure notice changes nothing.
    let again = ctx.deliver(&view.external_session_id, false).await.unwrap();
    assert_eq!(again, CallbackOutcome::AlreadyProcessed { order_id: order.id });

    let retry = ctx.open_checkout(&order, Some("HALF")).await.unwrap();
    assert_ne!(retry.session_id, view.session_id);
    assert_eq!(coupon_uses(&ctx, seeded.id).await, 1);
}

#[tokio::test]
async fn sold_out_after_capture_refunds_and_cancels() {
    let ctx = TestContext::new().await;
    let listing = seed_listing(&ctx.db, Uuid::new_v4(), ListingSeed::serialized(2500)).await;
    seed_units(&ctx.db, listing.id, 1).await;

    let winner = ctx.place_order(Uuid::new_v4(), &listing, one()).await.unwrap();
    let loser = ctx.place_order(Uuid::new_v4(), &listing, one()).await.unwrap();
    let winner_view = ctx.open_checkout(&winner, None).await.unwrap();
    let loser_view = ctx.open_checkout(&loser, None).await.unwrap();

    let outcome = ctx.deliver(&winner_view.external_session_id, true).await.unwrap();
    assert_matches!(outcome, CallbackOutcome::Captured { .. });

    let outcome = ctx.deliver(&loser_view.external_session_id, true).await.unwrap();
    assert_matches!(outcome, CallbackOutcome::Refunded { order_id, .. } if order_id == loser.id);

    assert_eq!(ctx.reload(loser.id).await.status, OrderStatus::Cancelled);
    let refunds = ctx.bridge.refunds.lock().unwrap().clone();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].amount_cents, loser_view.amount_cents);
    assert_eq!(refunds[0].idempotency_key, loser_view.session_id);

    let sessions = sessions_for(&ctx, loser.id).await;
    assert_eq!(sessions[0].status, SessionStatus::Refunded);
    assert!(sessions[0].refund_reference.is_some());

    // The winner sees their code; nobody else does.
    let revealed = ctx
        .services
        .inventory
        .reveal_for_order(winner.id, winner.buyer_id)
        .await
        .unwrap();
    assert_eq!(revealed.serial_number, "SN-0000");
    let err = ctx
        .services
        .inventory
        .reveal_for_order(winner.id, winner.provider_id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Forbidden(_));
    let err = ctx
        .services
        .inventory
        .reveal_for_order(loser.id, loser.buyer_id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    // Redelivery of the refunded session is a no-op.
    let replay = ctx.deliver(&loser_view.external_session_id, true).await.unwrap();
    assert_eq!(replay, CallbackOutcome::AlreadyProcessed { order_id: loser.id });
    assert_eq!(ctx.bridge.refund_count(), 1);
}

#[tokio::test]
async fn failed_refund_is_retried_on_redelivery() {
    let ctx = TestContext::new().await;
    let listing = seed_listing(&ctx.db, Uuid::new_v4(), ListingSeed::serialized(2500)).await;
    seed_units(&ctx.db, listing.id, 1).await;

    let winner = ctx.place_order(Uuid::new_v4(), &listing, one()).await.unwrap();
    let loser = ctx.place_order(Uuid::new_v4(), &listing, one()).await.unwrap();
    let loser_view = ctx.open_checkout(&loser, None).await.unwrap();
    ctx.pay(&winner).await.unwrap();

    ctx.bridge.fail_refund.store(true, Ordering::SeqCst);
    let err = ctx
        .deliver(&loser_view.external_session_id, true)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ExternalServiceError(_));
    assert_eq!(
        sessions_for(&ctx, loser.id).await[0].status,
        SessionStatus::RefundPending
    );
    assert_eq!(ctx.reload(loser.id).await.status, OrderStatus::Cancelled);

    ctx.bridge.fail_refund.store(false, Ordering::SeqCst);
    let outcome = ctx.deliver(&loser_view.external_session_id, true).await.unwrap();
    assert_matches!(outcome, CallbackOutcome::Refunded { .. });
    assert_eq!(
        sessions_for(&ctx, loser.id).await[0].status,
        SessionStatus::Refunded
    );
    assert_eq!(ctx.bridge.refund_count(), 1);
}

#[tokio::test]
async fn rental_deposit_is_collected_with_the_first_payment() {
    let ctx = TestContext::new().await;
    let listing = seed_listing(&ctx.db, Uuid::new_v4(), ListingSeed::rental(2000, 10_000)).await;
    let today = Utc::now().date_naive();
    let order = ctx
        .place_order(
            Uuid::new_v4(),
            &listing,
            PurchaseTerms::DepositRequired {
                start_date: today,
                end_date: today + Duration::days(2),
            },
        )
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::PendingDeposit);
    assert_eq!(order.units, 3);
    assert_eq!(order.base_amount_cents, 6000);
    assert_eq!(order.total_cents, 7119);
    assert_eq!(order.deposit_cents, Some(10_000));

    let view = ctx.open_checkout(&order, None).await.unwrap();
    assert_eq!(view.amount_cents, 17_119);
    assert_eq!(view.deposit_cents, 10_000);

    let outcome = ctx.deliver(&view.external_session_id, true).await.unwrap();
    assert_matches!(
        outcome,
        CallbackOutcome::Captured {
            status: OrderStatus::PickedUp,
            ..
        }
    );
}

#[tokio::test]
async fn rentals_cannot_start_in_the_past() {
    let ctx = TestContext::new().await;
    let listing = seed_listing(&ctx.db, Uuid::new_v4(), ListingSeed::rental(2000, 5000)).await;
    let yesterday = Utc::now().date_naive() - Duration::days(1);
    let err = ctx
        .place_order(
            Uuid::new_v4(),
            &listing,
            PurchaseTerms::DepositRequired {
                start_date: yesterday,
                end_date: yesterday + Duration::days(3),
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn validated_coupon_is_carried_into_checkout() {
    let ctx = TestContext::new().await;
    let provider = Uuid::new_v4();
    let buyer = Uuid::new_v4();
    let listing = seed_listing(&ctx.db, provider, ListingSeed::goods(5000)).await;
    let seeded = seed_coupon(
        &ctx.db,
        provider,
        CouponSeed {
            max_uses: Some(1),
            per_user_limit: Some(1),
            ..CouponSeed::fixed("ONCE", 1000)
        },
    )
    .await;
    let order = ctx.place_order(buyer, &listing, one()).await.unwrap();

    let validated = ctx
        .services
        .coupons
        .validate_and_apply("ONCE", provider, 5000, &RedeemerIdentity::user(buyer))
        .await
        .unwrap();
    assert_eq!(coupon_uses(&ctx, seeded.id).await, 1);

    let view = ctx
        .open_checkout_with_reservation(&order, validated.redemption_id)
        .await
        .unwrap();
    assert_eq!(view.discount_cents, 1000);
    assert_eq!(view.amount_cents, 4746);
    assert_eq!(coupon_uses(&ctx, seeded.id).await, 1);
    assert_eq!(ctx.services.coupons.redemption_count(seeded.id).await.unwrap(), 1);

    let redemption = coupon_redemption::Entity::find_by_id(validated.redemption_id)
        .one(&*ctx.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(redemption.order_id, Some(order.id));
    assert_eq!(redemption.session_ref, Some(view.session_id));

    let session = &sessions_for(&ctx, order.id).await[0];
    assert_eq!(session.redemption_id, Some(validated.redemption_id));
    assert_eq!(session.coupon_id, Some(seeded.id));

    // A declined card hands the slot back.
    ctx.deliver(&view.external_session_id, false).await.unwrap();
    assert_eq!(coupon_uses(&ctx, seeded.id).await, 0);
}

#[tokio::test]
async fn reservations_are_checked_before_checkout() {
    let ctx = TestContext::new().await;
    let provider = Uuid::new_v4();
    let buyer = Uuid::new_v4();
    let listing = seed_listing(&ctx.db, provider, ListingSeed::goods(5000)).await;
    seed_coupon(&ctx.db, provider, CouponSeed::fixed("MULTI", 500)).await;
    let elsewhere = Uuid::new_v4();
    seed_coupon(&ctx.db, elsewhere, CouponSeed::fixed("ELSEWHERE", 500)).await;
    let coupons = &ctx.services.coupons;

    let first = ctx.place_order(buyer, &listing, one()).await.unwrap();
    let second = ctx.place_order(buyer, &listing, one()).await.unwrap();

    let err = ctx
        .open_checkout_with_reservation(&first, Uuid::new_v4())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    let strangers = coupons
        .validate_and_apply("MULTI", provider, 5000, &RedeemerIdentity::user(Uuid::new_v4()))
        .await
        .unwrap();
    let err = ctx
        .open_checkout_with_reservation(&first, strangers.redemption_id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Forbidden(_));

    let other_provider = coupons
        .validate_and_apply("ELSEWHERE", elsewhere, 5000, &RedeemerIdentity::user(buyer))
        .await
        .unwrap();
    let err = ctx
        .open_checkout_with_reservation(&first, other_provider.redemption_id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Coupon(CouponRejection::InvalidCode));

    let mine = coupons
        .validate_and_apply("MULTI", provider, 5000, &RedeemerIdentity::user(buyer))
        .await
        .unwrap();
    ctx.open_checkout_with_reservation(&first, mine.redemption_id)
        .await
        .unwrap();
    let err = ctx
        .open_checkout_with_reservation(&second, mine.redemption_id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::StateConflict(_));
    assert!(sessions_for(&ctx, second.id).await.is_empty());
}

#[tokio::test]
async fn concurrent_opens_leave_one_payable_session() {
    let ctx = TestContext::new().await;
    let provider = Uuid::new_v4();
    let listing = seed_listing(&ctx.db, provider, ListingSeed::goods(5000)).await;
    let seeded = seed_coupon(&ctx.db, provider, CouponSeed::fixed("TENOFF", 1000)).await;
    let order = ctx.place_order(Uuid::new_v4(), &listing, one()).await.unwrap();

    let (with_coupon, without) = tokio::join!(
        ctx.open_checkout(&order, Some("TENOFF")),
        ctx.open_checkout(&order, None)
    );

    let open: Vec<_> = sessions_for(&ctx, order.id)
        .await
        .into_iter()
        .filter(|s| s.status == SessionStatus::Open)
        .collect();
    assert_eq!(open.len(), 1, "only one session may stay payable");
    let session = &open[0];

    for result in [&with_coupon, &without] {
        match result {
            Ok(view) => assert_eq!(view.session_id, session.id),
            Err(e) => assert_matches!(e, ServiceError::StateConflict(_)),
        }
    }
    assert!(with_coupon.is_ok() || without.is_ok());

    let expected_uses = i32::from(session.coupon_id.is_some());
    assert_eq!(coupon_uses(&ctx, seeded.id).await, expected_uses);

    let repriced = ctx.reload(order.id).await;
    assert_eq!(repriced.total_cents, session.amount_cents);
    assert_eq!(repriced.discount_cents, session.discount_cents);

    ctx.deliver(&session.external_session_id, true).await.unwrap();
    let paid = ctx.reload(order.id).await;
    assert_eq!(paid.status, OrderStatus::InProgress);
    assert_eq!(paid.total_cents, session.amount_cents);
    assert!(paid.totals_reconcile());
}

#[tokio::test]
async fn concurrent_opens_without_coupons_share_a_session() {
    let ctx = TestContext::new().await;
    let listing = seed_listing(&ctx.db, Uuid::new_v4(), ListingSeed::goods(3000)).await;
    let order = ctx.place_order(Uuid::new_v4(), &listing, one()).await.unwrap();

    let (a, b) = tokio::join!(ctx.open_checkout(&order, None), ctx.open_checkout(&order, None));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.session_id, b.session_id);
    assert!(a.reused != b.reused);
    assert_eq!(sessions_for(&ctx, order.id).await.len(), 1);
}

#[tokio::test]
async fn capture_prices_the_order_from_the_paid_session() {
    let ctx = TestContext::new().await;
    let provider = Uuid::new_v4();
    let listing = seed_listing(&ctx.db, provider, ListingSeed::goods(5000)).await;
    seed_coupon(&ctx.db, provider, CouponSeed::fixed("TENOFF", 1000)).await;
    let order = ctx.place_order(Uuid::new_v4(), &listing, one()).await.unwrap();
    let view = ctx.open_checkout(&order, Some("TENOFF")).await.unwrap();

    // Leave the order showing the undiscounted price.
    let mut stale: order::ActiveModel = ctx.reload(order.id).await.into();
    stale.discount_cents = Set(0);
    stale.platform_fee_cents = Set(250);
    stale.tax_cents = Set(683);
    stale.total_cents = Set(5933);
    stale.update(&*ctx.db).await.unwrap();

    ctx.deliver(&view.external_session_id, true).await.unwrap();
    let paid = ctx.reload(order.id).await;
    assert_eq!(paid.discount_cents, 1000);
    assert_eq!(paid.platform_fee_cents, 200);
    assert_eq!(paid.tax_cents, 546);
    assert_eq!(paid.total_cents, view.amount_cents);
    assert!(paid.totals_reconcile());
}

#[tokio::test]
async fn capture_refunds_an_amount_the_order_cannot_explain() {
    let ctx = TestContext::new().await;
    let listing = seed_listing(&ctx.db, Uuid::new_v4(), ListingSeed::goods(5000)).await;
    let order = ctx.place_order(Uuid::new_v4(), &listing, one()).await.unwrap();
    let view = ctx.open_checkout(&order, None).await.unwrap();

    let session = checkout_session::Entity::find_by_id(view.session_id)
        .one(&*ctx.db)
        .await
        .unwrap()
        .unwrap();
    let mut tampered: checkout_session::ActiveModel = session.into();
    tampered.amount_cents = Set(100);
    tampered.update(&*ctx.db).await.unwrap();

    let outcome = ctx.deliver(&view.external_session_id, true).await.unwrap();
    assert_matches!(outcome, CallbackOutcome::Refunded { .. });
    assert_eq!(ctx.reload(order.id).await.status, OrderStatus::Cancelled);
    let refunds = ctx.bridge.refunds.lock().unwrap().clone();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].amount_cents, 100);
}

#[tokio::test]
async fn cancelling_an_unpaid_order_releases_its_checkout() {
    let ctx = TestContext::new().await;
    let provider = Uuid::new_v4();
    let listing = seed_listing(&ctx.db, provider, ListingSeed::goods(5000)).await;
    let seeded = seed_coupon(
        &ctx.db,
        provider,
        CouponSeed {
            max_uses: Some(1),
            ..CouponSeed::fixed("ONCE", 1000)
        },
    )
    .await;
    let order = ctx.place_order(Uuid::new_v4(), &listing, one()).await.unwrap();
    let view = ctx.open_checkout(&order, Some("ONCE")).await.unwrap();
    assert_eq!(coupon_uses(&ctx, seeded.id).await, 1);

    let cancelled = ctx
        .services
        .orders
        .apply(order.id, order.buyer_id, OrderTransition::Cancel)
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(coupon_uses(&ctx, seeded.id).await, 0);
    assert_eq!(ctx.services.coupons.redemption_count(seeded.id).await.unwrap(), 0);

    let session = &sessions_for(&ctx, order.id).await[0];
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.failure_reason.as_deref(), Some("order cancelled"));

    // Paying the abandoned session anyway gets the money back.
    let outcome = ctx.deliver(&view.external_session_id, true).await.unwrap();
    assert_matches!(outcome, CallbackOutcome::Refunded { .. });
    let refunds = ctx.bridge.refunds.lock().unwrap().clone();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].amount_cents, view.amount_cents);
    assert_eq!(ctx.reload(order.id).await.status, OrderStatus::Cancelled);
    assert_eq!(coupon_uses(&ctx, seeded.id).await, 0);

    ctx.services
        .coupons
        .validate_and_apply("ONCE", provider, 5000, &RedeemerIdentity::user(Uuid::new_v4()))
        .await
        .expect("released slot can be taken again");
}
