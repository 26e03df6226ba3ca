use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::listing_item::{ListingKind, PricingModel};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[sea_orm(string_value = "PENDING_QUOTE")]
    PendingQuote,
    #[sea_orm(string_value = "WAITING_FOR_PRICE_APPROVAL")]
    WaitingForPriceApproval,
    #[sea_orm(string_value = "PENDING_PAYMENT")]
    PendingPayment,
    #[sea_orm(string_value = "PENDING_DEPOSIT")]
    PendingDeposit,
    #[sea_orm(string_value = "PENDING_CONFIRMATION")]
    PendingConfirmation,
    #[sea_orm(string_value = "IN_PROGRESS")]
    InProgress,
    #[sea_orm(string_value = "PICKED_UP")]
    PickedUp,
    #[sea_orm(string_value = "RETURNED")]
    Returned,
    #[sea_orm(string_value = "COMPLETED")]
    Completed,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// States in which no money has been taken yet.
    pub fn is_unpaid(&self) -> bool {
        matches!(
            self,
            OrderStatus::PendingQuote
                | OrderStatus::WaitingForPriceApproval
                | OrderStatus::PendingPayment
                | OrderStatus::PendingDeposit
        )
    }

    /// States a checkout session may be opened from.
    pub fn awaits_payment(&self) -> bool {
        matches!(self, OrderStatus::PendingPayment | OrderStatus::PendingDeposit)
    }

    /// Presentation label, kept apart from the stored value.
    pub fn label(&self) -> &'static str {
        match self {
            OrderStatus::PendingQuote => "Awaiting quote",
            OrderStatus::WaitingForPriceApproval => "Quote ready for approval",
            OrderStatus::PendingPayment => "Awaiting payment",
            OrderStatus::PendingDeposit => "Awaiting deposit",
            OrderStatus::PendingConfirmation => "Awaiting provider confirmation",
            OrderStatus::InProgress => "In progress",
            OrderStatus::PickedUp => "Picked up",
            OrderStatus::Returned => "Returned",
            OrderStatus::Completed => "Completed",
            OrderStatus::Cancelled => "Cancelled",
        }
    }
}

/// Who is acting on an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Actor {
    Buyer,
    Provider,
    System,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub provider_id: Uuid,
    pub master_id: Uuid,
    pub listing_item_id: Uuid,
    pub status: OrderStatus,
    pub listing_kind: ListingKind,
    pub pricing_model: PricingModel,
    /// Quantity, hours or rental days depending on the pricing model
    pub units: i32,

    pub base_amount_cents: i64,
    pub discount_cents: i64,
    pub platform_fee_cents: i64,
    pub tax_cents: i64,
    pub service_call_fee_cents: i64,
    pub deposit_cents: Option<i64>,
    pub total_cents: i64,
    pub currency: String,
    pub deposit_deduction_cents: Option<i64>,

    pub rental_start_date: Option<NaiveDate>,
    pub rental_end_date: Option<NaiveDate>,

    pub snapshot_title: String,
    pub snapshot_item_name: String,
    pub snapshot_image_url: Option<String>,

    pub paid_at: Option<DateTime<Utc>>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// The part this user plays on the order, if any.
    pub fn role_of(&self, user_id: Uuid) -> Option<Actor> {
        if user_id == self.buyer_id {
            Some(Actor::Buyer)
        } else if user_id == self.provider_id {
            Some(Actor::Provider)
        } else {
            None
        }
    }

    pub fn is_rental(&self) -> bool {
        self.listing_kind == ListingKind::Rental
    }

    /// Whether stored amounts satisfy the breakdown identity.
    pub fn totals_reconcile(&self) -> bool {
        self.total_cents
            == self.base_amount_cents - self.discount_cents
                + self.platform_fee_cents
                + self.tax_cents
                + self.service_call_fee_cents
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::checkout_session::Entity")]
    CheckoutSessions,
    #[sea_orm(has_many = "super::order_status_history::Entity")]
    StatusHistory,
}

impl Related<super::checkout_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CheckoutSessions.def()
    }
}

impl Related<super::order_status_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StatusHistory.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
