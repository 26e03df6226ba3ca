use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum InventoryStatus {
    #[sea_orm(string_value = "available")]
    Available,
    #[sea_orm(string_value = "reserved")]
    Reserved,
    #[sea_orm(string_value = "sold")]
    Sold,
}

/// One serialized physical unit. Rows are never deleted; a sold unit keeps
/// its `order_id` forever.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub listing_item_id: Uuid,
    pub serial_number: String,
    #[serde(skip_serializing)]
    pub secret_code: String,
    pub status: InventoryStatus,
    #[sea_orm(unique)]
    pub order_id: Option<Uuid>,
    pub sold_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::listing_item::Entity",
        from = "Column::ListingItemId",
        to = "super::listing_item::Column::Id"
    )]
    ListingItem,
}

impl Related<super::listing_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ListingItem.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
