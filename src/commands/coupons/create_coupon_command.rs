use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::commands::Command;
use crate::db::DbPool;
use crate::entities::coupon::{self, DiscountType};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::coupons::normalize_code;

/// Creates a discount code for a provider's listings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateCouponCommand {
    #[serde(skip)]
    pub provider_id: Uuid,
    #[validate(length(min = 3, max = 32, message = "Code must be 3-32 characters"))]
    pub code: String,
    pub discount_type: DiscountType,
    #[validate(range(min = 1, message = "Discount must be positive"))]
    pub discount_value: i64,
    #[validate(range(min = 1))]
    pub max_uses: Option<i32>,
    pub valid_until: DateTime<Utc>,
    #[validate(range(min = 0))]
    pub min_purchase_cents: Option<i64>,
    #[validate(range(min = 1))]
    pub per_user_limit: Option<i32>,
}

#[async_trait]
impl Command for CreateCouponCommand {
    type Result = coupon::Model;

    #[instrument(skip(self, db_pool, event_sender), fields(provider_id = %self.provider_id))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate()?;

        let code = normalize_code(&self.code);
        if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(ServiceError::ValidationError(
                "code may only contain letters, digits, '-' and '_'".to_string(),
            ));
        }
        if self.discount_type == DiscountType::Percentage && self.discount_value > 100 {
            return Err(ServiceError::ValidationError(
                "percentage discounts cannot exceed 100".to_string(),
            ));
        }
        let now = Utc::now();
        if self.valid_until <= now {
            return Err(ServiceError::ValidationError(
                "valid_until must be in the future".to_string(),
            ));
        }

        let db = db_pool.as_ref();
        let clash = coupon::Entity::find()
            .filter(coupon::Column::ProviderId.eq(self.provider_id))
            .filter(coupon::Column::Code.eq(code.as_str()))
            .one(db)
            .await?;
        if clash.is_some() {
            return Err(ServiceError::ValidationError(format!(
                "coupon code {code} already exists"
            )));
        }

        let created = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            provider_id: Set(self.provider_id),
            code: Set(code),
            discount_type: Set(self.discount_type),
            discount_value: Set(self.discount_value),
            max_uses: Set(self.max_uses),
            used_count: Set(0),
            valid_until: Set(self.valid_until),
            min_purchase_cents: Set(self.min_purchase_cents),
            per_user_limit: Set(self.per_user_limit),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await?;

        info!(coupon_id = %created.id, code = %created.code, "Coupon created");
        event_sender
            .send_or_log(Event::CouponCreated {
                coupon_id: created.id,
                provider_id: created.provider_id,
            })
            .await;

        Ok(created)
    }
}
