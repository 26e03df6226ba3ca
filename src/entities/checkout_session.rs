use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[sea_orm(string_value = "open")]
    Open,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "refund_pending")]
    RefundPending,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

/// A hosted payment session opened for one order. The external session id is
/// the idempotency key for gateway callbacks.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "checkout_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    #[sea_orm(unique)]
    pub external_session_id: String,
    pub amount_cents: i64,
    pub deposit_cents: i64,
    pub currency: String,
    pub coupon_id: Option<Uuid>,
    pub coupon_code: Option<String>,
    pub discount_cents: i64,
    pub redemption_id: Option<Uuid>,
    pub status: SessionStatus,
    pub checkout_url: String,
    pub refund_reference: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Money left the buyer on this session.
    pub fn captured(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Completed | SessionStatus::RefundPending | SessionStatus::Refunded
        )
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
