use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::commands::Command;
use crate::db::{self, DbPool};
use crate::entities::inventory_item::{self, InventoryStatus};
use crate::entities::{listing_item, restock_notification};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::inventory_allocator::available_count;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewUnit {
    #[validate(length(min = 1, max = 128, message = "Serial number must be 1-128 characters"))]
    pub serial_number: String,
    #[validate(length(min = 4, max = 256, message = "Secret code must be 4-256 characters"))]
    pub secret_code: String,
}

/// Adds serialized units to a provider's scan-to-buy listing item.
#[derive(Debug, Clone, Validate)]
pub struct RestockInventoryCommand {
    pub provider_id: Uuid,
    pub listing_item_id: Uuid,
    #[validate(length(min = 1, max = 500, message = "Restock between 1 and 500 units"))]
    pub units: Vec<NewUnit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestockResult {
    pub listing_item_id: Uuid,
    pub added: usize,
    pub available: u64,
}

#[async_trait]
impl Command for RestockInventoryCommand {
    type Result = RestockResult;

    #[instrument(skip(self, db_pool, event_sender), fields(listing_item_id = %self.listing_item_id))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate()?;
        for unit in &self.units {
            unit.validate()?;
        }

        let serials: Vec<String> = self
            .units
            .iter()
            .map(|u| u.serial_number.trim().to_string())
            .collect();
        let mut seen = HashSet::new();
        if let Some(dup) = serials.iter().find(|s| !seen.insert(s.as_str())) {
            return Err(ServiceError::ValidationError(format!(
                "serial number {dup} appears more than once"
            )));
        }

        let txn = db::begin(&db_pool).await?;

        let listing = listing_item::Entity::find_by_id(self.listing_item_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Listing item {}", self.listing_item_id))
            })?;
        if listing.provider_id != self.provider_id {
            return Err(ServiceError::Forbidden(
                "only the listing's provider may restock it".to_string(),
            ));
        }
        if !listing.serialized {
            return Err(ServiceError::ValidationError(
                "listing item is not sold from a serialized pool".to_string(),
            ));
        }

        let existing = inventory_item::Entity::find()
            .filter(inventory_item::Column::ListingItemId.eq(listing.id))
            .filter(inventory_item::Column::SerialNumber.is_in(serials.clone()))
            .all(&txn)
            .await?;
        if !existing.is_empty() {
            let taken: Vec<&str> = existing.iter().map(|u| u.serial_number.as_str()).collect();
            warn!(listing_item_id = %listing.id, duplicates = ?taken, "Restock rejected");
            return Err(ServiceError::ValidationError(format!(
                "serial numbers already stocked: {}",
                taken.join(", ")
            )));
        }

        let now = Utc::now();
        let rows = self
            .units
            .iter()
            .zip(serials.iter())
            .map(|(unit, serial)| inventory_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                listing_item_id: Set(listing.id),
                serial_number: Set(serial.clone()),
                secret_code: Set(unit.secret_code.clone()),
                status: Set(InventoryStatus::Available),
                order_id: Set(None),
                sold_at: Set(None),
                created_at: Set(now),
            });
        inventory_item::Entity::insert_many(rows)
            .exec_without_returning(&txn)
            .await?;

        // Fresh stock resets the low-stock cooldown.
        restock_notification::Entity::delete_by_id(listing.id)
            .exec(&txn)
            .await?;

        let available = available_count(&txn, listing.id).await?;
        txn.commit().await?;

        info!(
            listing_item_id = %listing.id,
            added = self.units.len(),
            available = available,
            "Inventory restocked"
        );
        event_sender
            .send_or_log(Event::InventoryRestocked {
                listing_item_id: listing.id,
                added: self.units.len(),
            })
            .await;

        Ok(RestockResult {
            listing_item_id: listing.id,
            added: self.units.len(),
            available,
        })
    }
}
