use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListingKind {
    #[sea_orm(string_value = "GOODS")]
    Goods,
    #[sea_orm(string_value = "SERVICE")]
    Service,
    #[sea_orm(string_value = "RENTAL")]
    Rental,
    #[sea_orm(string_value = "TASK")]
    Task,
}

impl ListingKind {
    /// Appointment-style listings wait for the provider to confirm after payment.
    pub fn is_appointment(&self) -> bool {
        matches!(self, ListingKind::Service | ListingKind::Task)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(24))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PricingModel {
    #[sea_orm(string_value = "FIXED")]
    Fixed,
    #[sea_orm(string_value = "HOURLY")]
    Hourly,
    #[sea_orm(string_value = "QUOTE")]
    Quote,
    #[sea_orm(string_value = "NEGOTIABLE")]
    Negotiable,
    #[sea_orm(string_value = "DEPOSIT_REQUIRED")]
    DepositRequired,
}

/// A purchasable line of a provider's listing. Orders copy what they need
/// from it at creation and never read it again.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "listing_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub master_id: Uuid,
    pub provider_id: Uuid,
    pub kind: ListingKind,
    pub pricing_model: PricingModel,
    pub title: String,
    pub item_name: String,
    pub image_url: Option<String>,
    pub unit_price_cents: i64,
    pub unit_label: String,
    pub deposit_cents: Option<i64>,
    pub service_call_fee_cents: Option<i64>,
    /// Backed by a pool of serialized units (scan-to-buy)
    pub serialized: bool,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::inventory_item::Entity")]
    InventoryItems,
}

impl Related<super::inventory_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InventoryItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
