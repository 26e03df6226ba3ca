use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QuerySelect, QueryTrait, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::db::{self, DbPool};
use crate::entities::{coupon, coupon_redemption};
use crate::errors::{CouponRejection, ServiceError};
use crate::events::{Event, EventSender};
use crate::metrics::COUPON_OUTCOMES;

/// Who is redeeming. Either field identifies the redeemer for per-user limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemerIdentity {
    pub user_id: Option<Uuid>,
    pub user_phone: Option<String>,
}

impl RedeemerIdentity {
    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            user_phone: None,
        }
    }

    /// Stable key stored on redemptions, `user:<id>` preferred over `phone:<n>`.
    pub fn key(&self) -> Option<String> {
        if let Some(id) = self.user_id {
            return Some(format!("user:{id}"));
        }
        self.user_phone
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| format!("phone:{p}"))
    }
}

/// A reserved redemption slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponApplication {
    pub coupon_id: Uuid,
    pub code: String,
    pub redemption_id: Uuid,
    pub discount_cents: i64,
}

/// Where a redemption is being made from.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedemptionContext {
    pub session_ref: Option<Uuid>,
    pub order_id: Option<Uuid>,
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Atomically takes one redemption slot on `conn`, which should be a
/// transaction the caller commits.
///
/// Every eligibility rule is part of the conditional UPDATE, so two
/// concurrent callers can never both take the last use. The coupon row is
/// locked before the UPDATE so the per-redeemer count inside it is taken
/// after any competing redemption of the same coupon has committed.
pub async fn reserve<C: ConnectionTrait>(
    conn: &C,
    code: &str,
    provider_id: Uuid,
    amount_cents: i64,
    identity: &RedeemerIdentity,
    context: RedemptionContext,
    now: DateTime<Utc>,
) -> Result<CouponApplication, ServiceError> {
    let code = normalize_code(code);
    if code.is_empty() {
        return Err(CouponRejection::InvalidCode.into());
    }
    if amount_cents < 0 {
        return Err(ServiceError::ValidationError(
            "amount must not be negative".to_string(),
        ));
    }

    let found = coupon::Entity::find()
        .filter(coupon::Column::ProviderId.eq(provider_id))
        .filter(coupon::Column::Code.eq(code.as_str()))
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or(CouponRejection::InvalidCode)?;

    let redeemer_key = identity.key();
    if found.per_user_limit.is_some() && redeemer_key.is_none() {
        return Err(ServiceError::ValidationError(
            "this coupon requires a user id or phone number".to_string(),
        ));
    }

    let mut condition = Condition::all()
        .add(coupon::Column::Id.eq(found.id))
        .add(coupon::Column::IsActive.eq(true))
        .add(coupon::Column::ValidUntil.gt(now))
        .add(
            Condition::any()
                .add(coupon::Column::MaxUses.is_null())
                .add(Expr::col(coupon::Column::UsedCount).lt(Expr::col(coupon::Column::MaxUses))),
        )
        .add(
            Condition::any()
                .add(coupon::Column::MinPurchaseCents.is_null())
                .add(coupon::Column::MinPurchaseCents.lte(amount_cents)),
        );

    if let Some(key) = &redeemer_key {
        let used_by_redeemer = coupon_redemption::Entity::find()
            .select_only()
            .expr(Expr::col(coupon_redemption::Column::Id).count())
            .filter(coupon_redemption::Column::CouponId.eq(found.id))
            .filter(coupon_redemption::Column::RedeemerKey.eq(key.as_str()))
            .into_query();
        condition = condition.add(
            Condition::any()
                .add(coupon::Column::PerUserLimit.is_null())
                .add(Expr::col(coupon::Column::PerUserLimit).gt(SimpleExpr::SubQuery(
                    None,
                    Box::new(used_by_redeemer.into_sub_query_statement()),
                ))),
        );
    }

    let result = coupon::Entity::update_many()
        .col_expr(
            coupon::Column::UsedCount,
            Expr::col(coupon::Column::UsedCount).add(1),
        )
        .col_expr(coupon::Column::UpdatedAt, Expr::value(now))
        .filter(condition)
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        let rejection = diagnose(conn, found.id, amount_cents, redeemer_key.as_deref(), now).await?;
        COUPON_OUTCOMES.with_label_values(&[rejection.as_ref()]).inc();
        debug!(coupon_id = %found.id, reason = %rejection, "Coupon rejected");
        return Err(rejection.into());
    }

    let discount_cents = found.discount_for(amount_cents);
    let redemption_id = Uuid::new_v4();
    coupon_redemption::ActiveModel {
        id: Set(redemption_id),
        coupon_id: Set(found.id),
        session_ref: Set(context.session_ref),
        order_id: Set(context.order_id),
        redeemer_key: Set(redeemer_key),
        discount_applied_cents: Set(discount_cents),
        created_at: Set(now),
    }
    .insert(conn)
    .await?;

    COUPON_OUTCOMES.with_label_values(&["applied"]).inc();

    Ok(CouponApplication {
        coupon_id: found.id,
        code,
        redemption_id,
        discount_cents,
    })
}

/// Explains a refused UPDATE by re-reading the coupon, checking the rules in
/// the order clients see them.
async fn diagnose<C: ConnectionTrait>(
    conn: &C,
    coupon_id: Uuid,
    amount_cents: i64,
    redeemer_key: Option<&str>,
    now: DateTime<Utc>,
) -> Result<CouponRejection, ServiceError> {
    let Some(current) = coupon::Entity::find_by_id(coupon_id).one(conn).await? else {
        return Ok(CouponRejection::InvalidCode);
    };

    if !current.is_active {
        return Ok(CouponRejection::InvalidCode);
    }
    if current.valid_until <= now {
        return Ok(CouponRejection::CouponExpired);
    }
    if current
        .max_uses
        .map(|max| current.used_count >= max)
        .unwrap_or(false)
    {
        return Ok(CouponRejection::CouponExhausted);
    }
    if current
        .min_purchase_cents
        .map(|min| amount_cents < min)
        .unwrap_or(false)
    {
        return Ok(CouponRejection::MinPurchaseNotMet);
    }
    if let (Some(limit), Some(key)) = (current.per_user_limit, redeemer_key) {
        let used = coupon_redemption::Entity::find()
            .filter(coupon_redemption::Column::CouponId.eq(coupon_id))
            .filter(coupon_redemption::Column::RedeemerKey.eq(key))
            .count(conn)
            .await?;
        if used >= u64::try_from(limit.max(0)).unwrap_or(0) {
            return Ok(CouponRejection::UserLimitExceeded);
        }
    }

    // Every rule passes on re-read; the slot went to a concurrent writer.
    Ok(CouponRejection::CouponExhausted)
}

/// Checks that `redemption_id` is an unattached reservation held by
/// `identity` on a coupon of `provider_id`, and prices it against
/// `amount_cents`. Nothing is written; see [`attach`].
pub async fn held_reservation<C: ConnectionTrait>(
    conn: &C,
    redemption_id: Uuid,
    provider_id: Uuid,
    amount_cents: i64,
    identity: &RedeemerIdentity,
) -> Result<CouponApplication, ServiceError> {
    let redemption = coupon_redemption::Entity::find_by_id(redemption_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Coupon reservation {redemption_id}")))?;

    if redemption.redeemer_key.is_none() || redemption.redeemer_key != identity.key() {
        return Err(ServiceError::Forbidden(
            "coupon reservation belongs to another user".to_string(),
        ));
    }
    if redemption.order_id.is_some() || redemption.session_ref.is_some() {
        return Err(ServiceError::StateConflict(format!(
            "coupon reservation {redemption_id} is already attached to a checkout"
        )));
    }

    let held = coupon::Entity::find_by_id(redemption.coupon_id)
        .one(conn)
        .await?
        .filter(|c| c.provider_id == provider_id)
        .ok_or(CouponRejection::InvalidCode)?;
    if held
        .min_purchase_cents
        .map(|min| amount_cents < min)
        .unwrap_or(false)
    {
        return Err(CouponRejection::MinPurchaseNotMet.into());
    }

    Ok(CouponApplication {
        coupon_id: held.id,
        code: held.code.clone(),
        redemption_id,
        discount_cents: held.discount_for(amount_cents),
    })
}

/// Binds a held reservation to a checkout. Fails with `StateConflict` when
/// another checkout attached it first.
pub async fn attach<C: ConnectionTrait>(
    conn: &C,
    application: &CouponApplication,
    context: RedemptionContext,
) -> Result<(), ServiceError> {
    let result = coupon_redemption::Entity::update_many()
        .col_expr(
            coupon_redemption::Column::SessionRef,
            Expr::value(context.session_ref),
        )
        .col_expr(coupon_redemption::Column::OrderId, Expr::value(context.order_id))
        .col_expr(
            coupon_redemption::Column::DiscountAppliedCents,
            Expr::value(application.discount_cents),
        )
        .filter(coupon_redemption::Column::Id.eq(application.redemption_id))
        .filter(coupon_redemption::Column::OrderId.is_null())
        .filter(coupon_redemption::Column::SessionRef.is_null())
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::StateConflict(format!(
            "coupon reservation {} is no longer available",
            application.redemption_id
        )));
    }
    Ok(())
}

/// Gives a reserved slot back: deletes the redemption and decrements the
/// counter. Returns the coupon id, or `None` when already released.
pub async fn release<C: ConnectionTrait>(
    conn: &C,
    redemption_id: Uuid,
) -> Result<Option<Uuid>, ServiceError> {
    let Some(redemption) = coupon_redemption::Entity::find_by_id(redemption_id)
        .one(conn)
        .await?
    else {
        return Ok(None);
    };

    let deleted = coupon_redemption::Entity::delete_many()
        .filter(coupon_redemption::Column::Id.eq(redemption_id))
        .exec(conn)
        .await?;
    if deleted.rows_affected == 0 {
        return Ok(None);
    }

    coupon::Entity::update_many()
        .col_expr(
            coupon::Column::UsedCount,
            Expr::col(coupon::Column::UsedCount).sub(1),
        )
        .col_expr(coupon::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(coupon::Column::Id.eq(redemption.coupon_id))
        .filter(coupon::Column::UsedCount.gt(0))
        .exec(conn)
        .await?;

    Ok(Some(redemption.coupon_id))
}

/// Coupon validation and redemption against the pool.
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl CouponService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Validates `code` for this purchase and reserves one use in a single
    /// transaction. Nothing is written when the coupon is rejected.
    #[instrument(skip(self, identity))]
    pub async fn validate_and_apply(
        &self,
        code: &str,
        provider_id: Uuid,
        amount_cents: i64,
        identity: &RedeemerIdentity,
    ) -> Result<CouponApplication, ServiceError> {
        let txn = db::begin(&self.db).await?;
        let application = reserve(
            &txn,
            code,
            provider_id,
            amount_cents,
            identity,
            RedemptionContext::default(),
            Utc::now(),
        )
        .await?;
        txn.commit().await?;

        info!(
            coupon_id = %application.coupon_id,
            redemption_id = %application.redemption_id,
            discount_cents = application.discount_cents,
            "Coupon applied"
        );
        self.event_sender
            .send_or_log(Event::CouponRedeemed {
                coupon_id: application.coupon_id,
                redemption_id: application.redemption_id,
                discount_cents: application.discount_cents,
            })
            .await;

        Ok(application)
    }

    /// Releases a reservation. Releasing twice is a no-op.
    #[instrument(skip(self))]
    pub async fn release(&self, redemption_id: Uuid) -> Result<bool, ServiceError> {
        let txn = db::begin(&self.db).await?;
        let released = release(&txn, redemption_id).await?;
        txn.commit().await?;

        match released {
            Some(coupon_id) => {
                info!(coupon_id = %coupon_id, redemption_id = %redemption_id, "Coupon reservation released");
                self.event_sender
                    .send_or_log(Event::CouponReleased {
                        coupon_id,
                        redemption_id,
                    })
                    .await;
                Ok(true)
            }
            None => {
                warn!(redemption_id = %redemption_id, "Redemption already released");
                Ok(false)
            }
        }
    }

    pub async fn find_by_code(
        &self,
        provider_id: Uuid,
        code: &str,
    ) -> Result<Option<coupon::Model>, ServiceError> {
        Ok(coupon::Entity::find()
            .filter(coupon::Column::ProviderId.eq(provider_id))
            .filter(coupon::Column::Code.eq(normalize_code(code)))
            .one(&*self.db)
            .await?)
    }

    pub async fn redemption_count(&self, coupon_id: Uuid) -> Result<u64, ServiceError> {
        Ok(coupon_redemption::Entity::find()
            .filter(coupon_redemption::Column::CouponId.eq(coupon_id))
            .count(&*self.db)
            .await?)
    }
}
